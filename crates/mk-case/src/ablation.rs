//! Instruction-sequence pruning for failure minimization.
//!
//! Bottom-up ablation keeps the last `k` instructions; outputs of removed
//! instructions that the kept ones still read become synthetic sources.
//! Component ablation removes instructions outside the final instruction's
//! dependency closure, latest first, until at most `k` remain. A size of
//! `-1` disables a pass. Bottom-up runs before component.

use crate::{GenerationLedger, UnitTestCaseSpec};
use mk_core::{GenerationError, Instruction, Program, TensorDecl, TensorName, UnitTestCaseRequirement};
use rustc_hash::{FxHashMap, FxHashSet};

pub fn get_ablated_unit_test_case_spec(
    program: &Program,
    requirement: &UnitTestCaseRequirement,
    bottom_up_ablation_size: i64,
    component_ablation_size: i64,
) -> Result<UnitTestCaseSpec, GenerationError> {
    let ablated = ablate_program(program, bottom_up_ablation_size, component_ablation_size)?;
    let (dag, annotations) = ablated.to_dag().map_err(|err| GenerationError::AblationInfeasible {
        requested: last_pass_size(bottom_up_ablation_size, component_ablation_size),
        available: program.len(),
        detail: format!("ablated program is not well formed: {err}"),
    })?;
    Ok(UnitTestCaseSpec {
        requirement: requirement.clone(),
        seed: None,
        dag,
        dag_gen_instructions: Vec::new(),
        annotations,
        program: ablated,
        ledger: GenerationLedger::new(),
    })
}

pub fn ablate_program(
    program: &Program,
    bottom_up_ablation_size: i64,
    component_ablation_size: i64,
) -> Result<Program, GenerationError> {
    let available = program.len();
    let bottom_up = target_size(bottom_up_ablation_size, available, "bottom_up_ablation_size")?;
    let component = target_size(component_ablation_size, available, "component_ablation_size")?;
    if bottom_up.is_none() && component.is_none() {
        return Ok(program.clone());
    }
    let requested = last_pass_size(bottom_up_ablation_size, component_ablation_size);
    if program.is_empty() {
        return Err(GenerationError::AblationInfeasible {
            requested,
            available,
            detail: "program has no final instruction".to_owned(),
        });
    }
    program
        .validate_well_formed()
        .map_err(|err| GenerationError::AblationInfeasible {
            requested,
            available,
            detail: format!("input program is not well formed: {err}"),
        })?;

    let mut current = program.clone();
    if let Some(size) = bottom_up {
        current = bottom_up_ablation(&current, size)?;
    }
    if let Some(size) = component {
        current = component_ablation(&current, size)?;
    }
    Ok(current)
}

/// Size of the last enabled pass: component runs after bottom-up.
fn last_pass_size(bottom_up_ablation_size: i64, component_ablation_size: i64) -> i64 {
    if component_ablation_size == -1 {
        bottom_up_ablation_size
    } else {
        component_ablation_size
    }
}

fn target_size(size: i64, available: usize, field: &str) -> Result<Option<usize>, GenerationError> {
    if size == -1 {
        return Ok(None);
    }
    usize::try_from(size)
        .map(Some)
        .map_err(|_| GenerationError::AblationInfeasible {
            requested: size,
            available,
            detail: format!("{field} must be -1 or non-negative"),
        })
}

fn bottom_up_ablation(program: &Program, size: usize) -> Result<Program, GenerationError> {
    let len = program.len();
    if size == 0 {
        return Err(GenerationError::AblationInfeasible {
            requested: 0,
            available: len,
            detail: "keeping zero instructions removes the final output".to_owned(),
        });
    }
    if size >= len {
        return Ok(program.clone());
    }
    let first_kept = len - size;
    let keep: Vec<bool> = (0..len).map(|index| index >= first_kept).collect();
    Ok(rebuild(program, &keep))
}

fn component_ablation(program: &Program, size: usize) -> Result<Program, GenerationError> {
    let len = program.len();
    let closure = program.final_output_closure();
    if size < closure.len() {
        return Err(GenerationError::AblationInfeasible {
            requested: size as i64,
            available: len,
            detail: format!(
                "the final instruction depends on {} instruction(s)",
                closure.len()
            ),
        });
    }

    let mut keep = vec![true; len];
    let mut remaining = len;
    for index in (0..len).rev() {
        if remaining <= size {
            break;
        }
        if closure.contains(&index) {
            continue;
        }
        keep[index] = false;
        remaining -= 1;
    }
    if remaining == len {
        return Ok(program.clone());
    }
    Ok(rebuild(program, &keep))
}

/// Builds the program made of the kept instructions. Sources are the
/// original sources still read or fetched, followed by synthetic sources
/// for removed outputs that kept instructions read. Fetches keep their
/// original relative order; kept outputs that lost every consumer are
/// fetched too, so each remaining tensor stays observable.
fn rebuild(program: &Program, keep: &[bool]) -> Program {
    let kept: Vec<&Instruction> = program
        .instructions
        .iter()
        .zip(keep)
        .filter_map(|(instr, keep)| keep.then_some(instr))
        .collect();
    let referenced: FxHashSet<&TensorName> = kept.iter().flat_map(|instr| instr.input_names()).collect();
    let fetched: FxHashSet<&TensorName> = program.fetches.iter().collect();

    let mut sources: Vec<TensorDecl> = program
        .sources
        .iter()
        .filter(|source| referenced.contains(&source.name) || fetched.contains(&source.name))
        .cloned()
        .collect();
    for (instr, keep) in program.instructions.iter().zip(keep) {
        if !keep && referenced.contains(&instr.output.name) {
            sources.push(instr.output.clone());
        }
    }

    let mut position: FxHashMap<&TensorName, usize> = FxHashMap::default();
    for (index, source) in sources.iter().enumerate() {
        position.insert(&source.name, index);
    }
    for (index, instr) in kept.iter().enumerate() {
        position.insert(&instr.output.name, sources.len() + index);
    }

    let mut fetches: Vec<(usize, TensorName)> = program
        .fetches
        .iter()
        .filter_map(|name| position.get(name).map(|pos| (*pos, name.clone())))
        .collect();
    for instr in &kept {
        let name = &instr.output.name;
        if !referenced.contains(name)
            && !fetched.contains(name)
            && let Some(pos) = position.get(name)
        {
            fetches.push((*pos, name.clone()));
        }
    }
    fetches.sort_by_key(|(pos, _)| *pos);

    Program::new(
        sources,
        kept.into_iter().cloned().collect(),
        fetches.into_iter().map(|(_, name)| name).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::{ablate_program, get_ablated_unit_test_case_spec};
    use mk_core::{
        GenerationError, Instruction, OpName, Program, TensorDecl, TensorName,
        UnitTestCaseRequirement,
    };
    use smallvec::smallvec;

    fn unary(op: OpName, input: &TensorDecl, output: &TensorDecl) -> Instruction {
        Instruction {
            op,
            axes: smallvec![],
            inputs: smallvec![input.clone()],
            output: output.clone(),
        }
    }

    /// tensor1 -> exp -> neg -> ... ten unary instructions in a row.
    fn chain_of_ten() -> Program {
        let ops = [
            OpName::Exp,
            OpName::Negative,
            OpName::Abs,
            OpName::Relu,
            OpName::Sigmoid,
            OpName::Tanh,
            OpName::Sin,
            OpName::Cos,
            OpName::Exp,
            OpName::Abs,
        ];
        let decls: Vec<TensorDecl> = (1..=11)
            .map(|index| TensorDecl::new(format!("tensor{index}"), vec![8, 4]))
            .collect();
        let instructions = ops
            .iter()
            .enumerate()
            .map(|(index, op)| unary(*op, &decls[index], &decls[index + 1]))
            .collect();
        Program::new(
            vec![decls[0].clone()],
            instructions,
            vec![TensorName::from("tensor11")],
        )
    }

    /// x feeds a three-instruction main line and a two-instruction side
    /// branch; both ends are fetched.
    fn with_side_branch() -> Program {
        let x = TensorDecl::new("x", vec![4]);
        let a = TensorDecl::new("a", vec![4]);
        let s1 = TensorDecl::new("s1", vec![4]);
        let s2 = TensorDecl::new("s2", vec![4]);
        let b = TensorDecl::new("b", vec![4]);
        let c = TensorDecl::new("c", vec![4]);
        Program::new(
            vec![x.clone()],
            vec![
                unary(OpName::Exp, &x, &a),
                unary(OpName::Sin, &x, &s1),
                unary(OpName::Cos, &s1, &s2),
                unary(OpName::Negative, &a, &b),
                unary(OpName::Abs, &b, &c),
            ],
            vec![TensorName::from("s2"), TensorName::from("c")],
        )
    }

    #[test]
    fn bottom_up_keeps_exactly_the_requested_suffix() {
        let program = chain_of_ten();
        program.validate_well_formed().expect("chain validates");
        let ablated = ablate_program(&program, 3, -1).expect("ablation");
        assert_eq!(ablated.len(), 3);
        assert_eq!(ablated.instructions[..], program.instructions[7..]);
        assert_eq!(ablated.sources, vec![TensorDecl::new("tensor8", vec![8, 4])]);
        assert_eq!(ablated.fetches, vec![TensorName::from("tensor11")]);
        ablated.validate_well_formed().expect("ablated chain validates");
    }

    #[test]
    fn ablating_again_to_the_same_size_is_a_fixed_point() {
        let program = chain_of_ten();
        let once = ablate_program(&program, 3, -1).expect("once");
        let twice = ablate_program(&once, 3, -1).expect("twice");
        assert_eq!(once, twice);

        let side = with_side_branch();
        let once = ablate_program(&side, 4, 3).expect("once");
        let twice = ablate_program(&once, 4, 3).expect("twice");
        assert_eq!(once, twice);
    }

    #[test]
    fn disabled_passes_are_the_identity() {
        let program = with_side_branch();
        assert_eq!(ablate_program(&program, -1, -1).expect("identity"), program);
        assert_eq!(ablate_program(&program, 99, 99).expect("identity"), program);
    }

    #[test]
    fn component_ablation_drops_side_branches_latest_first() {
        let program = with_side_branch();
        program.validate_well_formed().expect("program validates");

        let three = ablate_program(&program, -1, 3).expect("drop both side ops");
        let ops: Vec<OpName> = three.instructions.iter().map(|instr| instr.op).collect();
        assert_eq!(ops, vec![OpName::Exp, OpName::Negative, OpName::Abs]);
        assert_eq!(three.fetches, vec![TensorName::from("c")]);
        three.validate_well_formed().expect("three validates");

        let four = ablate_program(&program, -1, 4).expect("drop the later side op");
        assert_eq!(four.len(), 4);
        assert_eq!(
            four.fetches,
            vec![TensorName::from("s1"), TensorName::from("c")]
        );
        four.validate_well_formed().expect("four validates");
    }

    #[test]
    fn component_size_below_closure_is_infeasible() {
        let program = with_side_branch();
        let err = ablate_program(&program, -1, 2).expect_err("closure has three");
        assert!(matches!(
            err,
            GenerationError::AblationInfeasible {
                requested: 2,
                available: 5,
                ..
            }
        ));
    }

    #[test]
    fn invalid_sizes_are_infeasible() {
        let program = chain_of_ten();
        for (bottom_up, component) in [(0, -1), (-2, -1), (-1, -7)] {
            let err = ablate_program(&program, bottom_up, component)
                .expect_err("size must be rejected");
            assert!(matches!(err, GenerationError::AblationInfeasible { .. }));
        }
        let empty = Program::default();
        assert!(ablate_program(&empty, 1, -1).is_err());
        assert_eq!(ablate_program(&empty, -1, -1).expect("no-op"), empty);
    }

    #[test]
    fn ill_formed_input_is_rejected_with_the_running_pass_size() {
        let mut program = with_side_branch();
        program.fetches.push(TensorName::from("missing"));
        let err = ablate_program(&program, -1, 4).expect_err("unknown fetch");
        let GenerationError::AblationInfeasible {
            requested, detail, ..
        } = err
        else {
            panic!("expected ablation infeasible");
        };
        assert_eq!(requested, 4);
        assert!(detail.starts_with("input program is not well formed"), "{detail}");

        let requirement = UnitTestCaseRequirement::default();
        let err = get_ablated_unit_test_case_spec(&program, &requirement, 2, -1)
            .expect_err("unknown fetch");
        assert!(matches!(
            err,
            GenerationError::AblationInfeasible { requested: 2, .. }
        ));
    }

    #[test]
    fn final_instruction_and_closure_survive() {
        let program = with_side_branch();
        let final_output = program.final_instruction().expect("final").output.clone();
        for size in 1..=5 {
            let ablated = ablate_program(&program, size, -1).expect("bottom-up");
            assert_eq!(
                ablated.final_instruction().map(|instr| &instr.output),
                Some(&final_output)
            );
            ablated.validate_well_formed().expect("ablated validates");
        }
    }

    #[test]
    fn ablated_spec_rebuilds_its_dag() {
        let program = chain_of_ten();
        let requirement = UnitTestCaseRequirement::default();
        let spec = get_ablated_unit_test_case_spec(&program, &requirement, 3, -1).expect("spec");
        assert_eq!(spec.instructions().len(), 3);
        assert_eq!(spec.dag.source_count(), 1);
        assert_eq!(spec.annotations.names.len(), spec.dag.num_edges());
        assert!(spec.seed.is_none());
        assert!(spec.ledger.is_empty());
        let again = spec.ablated(3, -1).expect("again");
        assert_eq!(again.program, spec.program);
    }
}
