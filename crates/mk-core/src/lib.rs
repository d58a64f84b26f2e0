#![forbid(unsafe_code)]

#[cfg(test)]
pub mod proptest_strategies;

pub mod dag;
pub mod error;
pub mod op;
pub mod program;
pub mod requirement;

use serde::{Deserialize, Serialize};

pub use dag::{Dag, DagAnnotations, DagError, DagNode, Edge, EdgeId, NodeId, NodeKind};
pub use error::{GenerationError, RequirementError};
pub use op::{OpAssignment, OpName, ShapeRelation};
pub use program::{Instruction, Program, ProgramValidationError, TensorDecl, TensorName};
pub use requirement::{
    DagGenRequirement, DagGenType, DagGenTypePickProbability, DimSizeRequirement,
    DimsEq1GenRequirement, OpNameGenRequirement, PickWeight, TensorNameGenRequirement,
    UnitTestCaseRequirement,
};

/// A concrete dimension size drawn from the configured pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticDim(pub u32);

impl StaticDim {
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub dims: Vec<u32>,
}

impl Shape {
    #[must_use]
    pub fn new(dims: Vec<u32>) -> Self {
        Self { dims }
    }

    #[must_use]
    pub fn vector(len: u32) -> Self {
        Self { dims: vec![len] }
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    #[must_use]
    pub fn element_count(&self) -> Option<u64> {
        self.dims
            .iter()
            .try_fold(1_u64, |acc, dim| acc.checked_mul(u64::from(*dim)))
    }

    #[must_use]
    pub fn is_broadcast_compatible(&self, other: &Shape) -> bool {
        broadcast_shape(self, other).is_some()
    }
}

#[must_use]
pub fn broadcast_dim(lhs: u32, rhs: u32) -> Option<u32> {
    if lhs == rhs || rhs == 1 {
        Some(lhs)
    } else if lhs == 1 {
        Some(rhs)
    } else {
        None
    }
}

/// Right-aligned numpy-style broadcast of two shapes.
#[must_use]
pub fn broadcast_shape(lhs: &Shape, rhs: &Shape) -> Option<Shape> {
    let rank = lhs.rank().max(rhs.rank());
    let mut dims = vec![1_u32; rank];
    for (offset, slot) in dims.iter_mut().rev().enumerate() {
        let l = lhs.rank().checked_sub(offset + 1).map_or(1, |idx| lhs.dims[idx]);
        let r = rhs.rank().checked_sub(offset + 1).map_or(1, |idx| rhs.dims[idx]);
        *slot = broadcast_dim(l, r)?;
    }
    Some(Shape { dims })
}

/// State of one axis of an edge while shapes are being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimDescriptor {
    Eq1,
    Symbolic,
    Static(StaticDim),
}

impl DimDescriptor {
    #[must_use]
    pub fn from_eq1_marker(is_eq1: bool) -> Self {
        if is_eq1 { Self::Eq1 } else { Self::Symbolic }
    }

    #[must_use]
    pub fn resolved_size(self) -> Option<u32> {
        match self {
            Self::Eq1 => Some(1),
            Self::Symbolic => None,
            Self::Static(dim) => Some(dim.get()),
        }
    }
}

/// Per-axis "this axis is forced to size 1" markers for one edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimsEq1(pub Vec<bool>);

impl DimsEq1 {
    #[must_use]
    pub fn none(rank: usize) -> Self {
        Self(vec![false; rank])
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_eq1(&self, axis: usize) -> bool {
        self.0.get(axis).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn descriptors(&self) -> Vec<DimDescriptor> {
        self.0
            .iter()
            .map(|marker| DimDescriptor::from_eq1_marker(*marker))
            .collect()
    }

    #[must_use]
    pub fn from_shape(shape: &Shape) -> Self {
        Self(shape.dims.iter().map(|dim| *dim == 1).collect())
    }
}
