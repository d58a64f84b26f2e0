use crate::GenContext;
use mk_core::{Dag, DimsEq1, DimsEq1GenRequirement};

/// Draws one marker vector per edge, in edge id order. Axis `i` is marked
/// with probability `dims_eq1_probability[i]`.
pub fn generate_dims_eq1(
    dag: &Dag,
    requirement: &DimsEq1GenRequirement,
    ctx: &mut GenContext,
) -> Vec<DimsEq1> {
    dag.edges()
        .iter()
        .map(|_| {
            DimsEq1(
                requirement
                    .dims_eq1_probability
                    .iter()
                    .map(|p| ctx.gen_bool(*p))
                    .collect(),
            )
        })
        .collect()
}
