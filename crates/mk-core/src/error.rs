use crate::{EdgeId, NodeId, NodeKind};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequirementError {
    InvalidField { field: &'static str, detail: String },
    Json { detail: String },
}

impl fmt::Display for RequirementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidField { field, detail } => {
                write!(f, "invalid requirement field `{field}`: {detail}")
            }
            Self::Json { detail } => write!(f, "malformed requirement json: {detail}"),
        }
    }
}

impl std::error::Error for RequirementError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// The DAG cannot satisfy the source/sink bounds, or the retry bound
    /// ran out. `requirement` is a JSON snapshot of what was asked for.
    StructuralGeneration {
        detail: String,
        attempts: u32,
        requirement: String,
    },
    UnresolvableOperator {
        node: NodeId,
        kind: NodeKind,
        detail: String,
    },
    ShapeConflict {
        edge: EdgeId,
        axis: usize,
        detail: String,
    },
    AblationInfeasible {
        requested: i64,
        available: usize,
        detail: String,
    },
    InvalidRequirement(RequirementError),
}

impl GenerationError {
    /// Conditions the top-level generator absorbs with a fresh random draw.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UnresolvableOperator { .. } | Self::ShapeConflict { .. }
        )
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StructuralGeneration {
                detail, attempts, ..
            } => write!(
                f,
                "structural generation failed after {attempts} attempt(s): {detail}"
            ),
            Self::UnresolvableOperator { node, kind, detail } => write!(
                f,
                "no operator fits {} node {}: {}",
                kind.as_str(),
                node,
                detail
            ),
            Self::ShapeConflict { edge, axis, detail } => {
                write!(f, "shape conflict at {edge} axis {axis}: {detail}")
            }
            Self::AblationInfeasible {
                requested,
                available,
                detail,
            } => write!(
                f,
                "ablation to {requested} of {available} instruction(s) is infeasible: {detail}"
            ),
            Self::InvalidRequirement(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for GenerationError {}

impl From<RequirementError> for GenerationError {
    fn from(err: RequirementError) -> Self {
        Self::InvalidRequirement(err)
    }
}
