use crate::{
    DagGenRequirement, DimSizeRequirement, DimsEq1GenRequirement, Instruction, NodeKind, OpName,
    Program, StaticDim, TensorDecl, TensorName, UnitTestCaseRequirement,
};
use proptest::prelude::*;
use smallvec::smallvec;

pub fn arb_static_dim() -> impl Strategy<Value = StaticDim> {
    (1..=64u32).prop_map(StaticDim)
}

pub fn arb_unary_op() -> impl Strategy<Value = OpName> {
    prop::sample::select(OpName::of_kind(NodeKind::Unary).collect::<Vec<_>>())
}

pub fn arb_binary_op() -> impl Strategy<Value = OpName> {
    prop::sample::select(OpName::of_kind(NodeKind::Binary).collect::<Vec<_>>())
}

pub fn arb_requirement() -> impl Strategy<Value = UnitTestCaseRequirement> {
    (
        0..=3usize,
        0..=2usize,
        1..=5usize,
        0..=24usize,
        prop::collection::vec(0.0..=1.0f64, 1..=4),
        prop::collection::vec(arb_static_dim(), 1..=4),
    )
        .prop_map(|(min, extra, width, steps, probabilities, pool)| {
            let max = min + extra;
            UnitTestCaseRequirement {
                dag_gen_requirement: DagGenRequirement {
                    min_num_sources: min.min(width),
                    max_num_sources: max,
                    max_width: width.max(min),
                    max_instructions: steps,
                    ..DagGenRequirement::default()
                },
                dims_eq1_gen_requirement: DimsEq1GenRequirement {
                    dims_eq1_probability: probabilities,
                },
                dim_size_requirement: DimSizeRequirement { dim_size: pool },
                ..UnitTestCaseRequirement::default()
            }
        })
}

/// A straight chain of unary instructions over one rank-1 source.
pub fn arb_unary_chain() -> impl Strategy<Value = Program> {
    (prop::collection::vec(arb_unary_op(), 1..=12), 1..=32u32).prop_map(|(ops, len)| {
        let source = TensorDecl::new("tensor1", vec![len]);
        let mut previous = source.clone();
        let mut instructions = Vec::with_capacity(ops.len());
        for (offset, op) in ops.into_iter().enumerate() {
            let output = TensorDecl::new(format!("tensor{}", offset + 2), vec![len]);
            instructions.push(Instruction {
                op,
                axes: smallvec![],
                inputs: smallvec![previous],
                output: output.clone(),
            });
            previous = output;
        }
        Program::new(vec![source], instructions, vec![TensorName(previous.name.0)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_requirements_validate(requirement in arb_requirement()) {
            prop_assert!(requirement.validate().is_ok());
        }

        #[test]
        fn unary_chains_are_well_formed(program in arb_unary_chain()) {
            prop_assert!(program.validate_well_formed().is_ok());
            prop_assert_eq!(program.final_output_closure().len(), program.len());
        }

        #[test]
        fn chain_fingerprint_determinism(program in arb_unary_chain()) {
            let again = program.clone();
            prop_assert_eq!(program.canonical_fingerprint(), again.canonical_fingerprint());
        }

        #[test]
        fn chain_rebuilds_as_dag(program in arb_unary_chain()) {
            let (dag, annotations) = program.to_dag().expect("chain rebuilds");
            prop_assert_eq!(dag.num_edges(), program.len() + 1);
            prop_assert_eq!(annotations.names.len(), dag.num_edges());
        }

        #[test]
        fn binary_of_unit_and_full_broadcasts(op in arb_binary_op(), len in 2..=16u32) {
            let lhs = TensorDecl::new("tensor1", vec![len, 1]);
            let rhs = TensorDecl::new("tensor2", vec![1, len]);
            let instr = Instruction {
                op,
                axes: smallvec![],
                inputs: smallvec![lhs, rhs],
                output: TensorDecl::new("tensor3", vec![len, len]),
            };
            prop_assert!(instr.check_shape_rule().is_ok());
        }
    }
}
