#![forbid(unsafe_code)]

//! Differential pairing and failure minimization. A [`DifferentialCase`]
//! holds one generated spec rendered for both backends; an external runner
//! executes the two scripts and compares results. When it reports a
//! divergence, [`minimize`] shrinks the spec while the runner's predicate
//! still reproduces it.

use mk_case::{UnitTestCaseSpec, generate_random_unit_test_case_spec};
use mk_codegen::{CodegenError, OpCallCodeGenRequirement, Script, generate_script};
use mk_core::{GenerationError, UnitTestCaseRequirement};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

const CASE_ID_HEX_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConformanceError {
    Generation(GenerationError),
    Codegen(CodegenError),
    /// The predicate rejected the spec handed to [`minimize`].
    NotReproducing { instructions: usize },
}

impl std::fmt::Display for ConformanceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generation(err) => write!(f, "generation failed: {err}"),
            Self::Codegen(err) => write!(f, "code generation failed: {err}"),
            Self::NotReproducing { instructions } => write!(
                f,
                "the {instructions}-instruction case does not reproduce the failure"
            ),
        }
    }
}

impl std::error::Error for ConformanceError {}

impl From<GenerationError> for ConformanceError {
    fn from(value: GenerationError) -> Self {
        Self::Generation(value)
    }
}

impl From<CodegenError> for ConformanceError {
    fn from(value: CodegenError) -> Self {
        Self::Codegen(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferentialCase {
    /// Leading hex digits of the sha256 of the program fingerprint.
    pub case_id: String,
    pub spec: UnitTestCaseSpec,
    pub eager: Script,
    pub reference: Script,
}

#[must_use]
pub fn case_id(spec: &UnitTestCaseSpec) -> String {
    let digest = Sha256::digest(spec.program.canonical_fingerprint().as_bytes());
    let mut out = String::with_capacity(CASE_ID_HEX_LEN);
    for byte in digest.iter().take(CASE_ID_HEX_LEN / 2) {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

pub fn build_differential_case(spec: UnitTestCaseSpec) -> Result<DifferentialCase, ConformanceError> {
    let eager = generate_script(&spec, &OpCallCodeGenRequirement::eager())?;
    let reference = generate_script(&spec, &OpCallCodeGenRequirement::numpy())?;
    Ok(DifferentialCase {
        case_id: case_id(&spec),
        spec,
        eager,
        reference,
    })
}

pub fn generate_differential_case(
    requirement: &UnitTestCaseRequirement,
    seed: u64,
) -> Result<DifferentialCase, ConformanceError> {
    let spec = generate_random_unit_test_case_spec(requirement, seed)?;
    build_differential_case(spec)
}

/// One accepted reduction. `-1` marks the pass that was not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimizationStep {
    pub bottom_up_ablation_size: i64,
    pub component_ablation_size: i64,
    pub instructions_after: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimizationReport {
    pub minimized: UnitTestCaseSpec,
    pub steps: Vec<MinimizationStep>,
    pub original_len: usize,
    pub minimized_len: usize,
}

/// Shrinks `spec` while `reproduces` keeps returning true. Each round tries
/// halving through bottom-up ablation, then dropping everything outside the
/// final instruction's closure, then trimming a single leading instruction.
/// Every accepted step removes at least one instruction, so the loop runs
/// at most once per instruction.
pub fn minimize<F>(spec: &UnitTestCaseSpec, mut reproduces: F) -> Result<MinimizationReport, ConformanceError>
where
    F: FnMut(&UnitTestCaseSpec) -> bool,
{
    let original_len = spec.program.len();
    if !reproduces(spec) {
        return Err(ConformanceError::NotReproducing {
            instructions: original_len,
        });
    }

    let mut current = spec.clone();
    let mut steps = Vec::new();
    loop {
        let len = current.program.len();
        let closure = current.program.final_output_closure().len();
        let mut candidates = Vec::with_capacity(3);
        if len > 1 {
            candidates.push((as_size(len.div_ceil(2)), -1));
        }
        if closure < len {
            candidates.push((-1, as_size(closure)));
        }
        if len > 1 {
            candidates.push((as_size(len - 1), -1));
        }

        let accepted = candidates.into_iter().find_map(|(bottom_up, component)| {
            let candidate = current.ablated(bottom_up, component).ok()?;
            (candidate.program.len() < len && reproduces(&candidate))
                .then_some((bottom_up, component, candidate))
        });
        let Some((bottom_up, component, candidate)) = accepted else {
            break;
        };
        steps.push(MinimizationStep {
            bottom_up_ablation_size: bottom_up,
            component_ablation_size: component,
            instructions_after: candidate.program.len(),
        });
        current = candidate;
    }

    let minimized_len = current.program.len();
    Ok(MinimizationReport {
        minimized: current,
        steps,
        original_len,
        minimized_len,
    })
}

fn as_size(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}
