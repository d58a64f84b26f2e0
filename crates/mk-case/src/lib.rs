#![forbid(unsafe_code)]

pub mod ablation;
pub mod ledger;

pub use ablation::{ablate_program, get_ablated_unit_test_case_spec};
pub use ledger::{AttemptOutcome, AttemptRecord, GenerationLedger};

use mk_core::{
    Dag, DagAnnotations, GenerationError, Instruction, Program, UnitTestCaseRequirement,
};
use mk_gen::{
    DagGenInstruction, GenContext, generate_dag_around, generate_dims_eq1, generate_op_names,
    generate_tensor_names, infer_shapes, linearize,
};
use serde::{Deserialize, Serialize};

/// A fully resolved test case: the annotated DAG, its linearized program
/// and the requirement it was drawn from. Ablation derives new specs and
/// never mutates an existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitTestCaseSpec {
    pub requirement: UnitTestCaseRequirement,
    /// `None` for specs derived by ablation.
    pub seed: Option<u64>,
    pub dag: Dag,
    pub dag_gen_instructions: Vec<DagGenInstruction>,
    pub annotations: DagAnnotations,
    pub program: Program,
    pub ledger: GenerationLedger,
}

impl UnitTestCaseSpec {
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.program.instructions
    }

    pub fn ablated(
        &self,
        bottom_up_ablation_size: i64,
        component_ablation_size: i64,
    ) -> Result<Self, GenerationError> {
        get_ablated_unit_test_case_spec(
            &self.program,
            &self.requirement,
            bottom_up_ablation_size,
            component_ablation_size,
        )
    }
}

pub fn generate_random_unit_test_case_spec(
    requirement: &UnitTestCaseRequirement,
    seed: u64,
) -> Result<UnitTestCaseSpec, GenerationError> {
    let mut ctx = GenContext::from_seed(seed);
    generate_unit_test_case_spec_with_context(requirement, &mut ctx)
}

/// Grows a new case around `core`, typically the `dag_gen_instructions` of
/// an earlier spec. The core is replayed on every attempt and only the steps
/// after it are random.
pub fn generate_random_unit_test_case_spec_around(
    requirement: &UnitTestCaseRequirement,
    core: &[DagGenInstruction],
    seed: u64,
) -> Result<UnitTestCaseSpec, GenerationError> {
    let mut ctx = GenContext::from_seed(seed);
    generate_around_with_context(requirement, core, &mut ctx)
}

/// Runs the full pipeline, retrying with fresh draws from `ctx` while the
/// failure is an unresolvable operator or a shape conflict. Running out of
/// attempts is reported as a structural failure.
pub fn generate_unit_test_case_spec_with_context(
    requirement: &UnitTestCaseRequirement,
    ctx: &mut GenContext,
) -> Result<UnitTestCaseSpec, GenerationError> {
    generate_around_with_context(requirement, &[], ctx)
}

fn generate_around_with_context(
    requirement: &UnitTestCaseRequirement,
    core: &[DagGenInstruction],
    ctx: &mut GenContext,
) -> Result<UnitTestCaseSpec, GenerationError> {
    requirement.validate()?;
    let max_attempts = requirement.max_generation_attempts;
    let mut ledger = GenerationLedger::new();
    let mut last_failure = String::new();

    for attempt in 1..=max_attempts {
        match generate_once(requirement, core, ctx) {
            Ok((generated_dag, dag_gen_instructions, annotations, program)) => {
                ledger.append(AttemptRecord::accepted(attempt, &program));
                return Ok(UnitTestCaseSpec {
                    requirement: requirement.clone(),
                    seed: Some(ctx.seed()),
                    dag: generated_dag,
                    dag_gen_instructions,
                    annotations,
                    program,
                    ledger,
                });
            }
            Err(GenerationError::StructuralGeneration { detail, .. }) => {
                return Err(GenerationError::StructuralGeneration {
                    detail,
                    attempts: attempt,
                    requirement: requirement.to_json_snapshot(),
                });
            }
            Err(err) => match AttemptRecord::rejected(attempt, &err) {
                Some(record) => {
                    last_failure = record.detail.clone();
                    ledger.append(record);
                }
                None => return Err(err),
            },
        }
    }

    Err(GenerationError::StructuralGeneration {
        detail: format!("no resolvable case within the attempt bound; last failure: {last_failure}"),
        attempts: max_attempts,
        requirement: requirement.to_json_snapshot(),
    })
}

fn generate_once(
    requirement: &UnitTestCaseRequirement,
    core: &[DagGenInstruction],
    ctx: &mut GenContext,
) -> Result<(Dag, Vec<DagGenInstruction>, DagAnnotations, Program), GenerationError> {
    let generated = generate_dag_around(&requirement.dag_gen_requirement, core, ctx)?;
    let dag = generated.dag;
    let dims_eq1 = generate_dims_eq1(&dag, &requirement.dims_eq1_gen_requirement, ctx);
    let ops = generate_op_names(&dag, &dims_eq1, &requirement.op_name_gen_requirement, ctx)?;
    let names = generate_tensor_names(&dag, &requirement.tensor_name_gen_requirement)?;
    let shapes = infer_shapes(&dag, &dims_eq1, &ops, &requirement.dim_size_requirement, ctx)?;
    let annotations = DagAnnotations {
        dims_eq1,
        ops,
        names,
        shapes,
    };
    let program = linearize(&dag, &annotations)?;
    Ok((dag, generated.instructions, annotations, program))
}
