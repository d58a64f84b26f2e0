use crate::{
    Dag, DagAnnotations, DagError, DimsEq1, EdgeId, NodeKind, OpAssignment, OpName, Shape,
    ShapeRelation, broadcast_dim,
};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::fmt::{self, Write};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TensorName(pub String);

impl TensorName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TensorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TensorName {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorDecl {
    pub name: TensorName,
    pub shape: Shape,
}

impl TensorDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, dims: Vec<u32>) -> Self {
        Self {
            name: TensorName::new(name),
            shape: Shape::new(dims),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    pub op: OpName,
    pub axes: SmallVec<[usize; 4]>,
    pub inputs: SmallVec<[TensorDecl; 2]>,
    pub output: TensorDecl,
}

impl Instruction {
    pub fn input_names(&self) -> impl Iterator<Item = &TensorName> + '_ {
        self.inputs.iter().map(|input| &input.name)
    }

    /// Checks the output shape against the operator's shape relation.
    pub fn check_shape_rule(&self) -> Result<(), String> {
        let expected = self.op.input_arity();
        if self.inputs.len() != expected {
            return Err(format!(
                "{} takes {expected} input(s), got {}",
                self.op.as_str(),
                self.inputs.len()
            ));
        }
        let out = &self.output.shape;
        if out.dims.contains(&0) {
            return Err(format!("output {} has a zero-sized axis", self.output.name));
        }
        if self.op.takes_axes() {
            if self.axes.is_empty() {
                return Err(format!("{} requires at least one axis", self.op.as_str()));
            }
            if self.axes.windows(2).any(|pair| pair[0] >= pair[1]) {
                return Err(format!("axes {:?} must be strictly ascending", self.axes));
            }
            if let Some(axis) = self.axes.iter().find(|axis| **axis >= out.rank()) {
                return Err(format!("axis {axis} out of range for rank {}", out.rank()));
            }
        } else if !self.axes.is_empty() {
            return Err(format!("{} takes no axes", self.op.as_str()));
        }

        match self.op.shape_relation() {
            ShapeRelation::Fill => Ok(()),
            ShapeRelation::Elementwise => {
                let input = &self.inputs[0].shape;
                if input == out {
                    Ok(())
                } else {
                    Err(format!(
                        "elementwise output {:?} differs from input {:?}",
                        out.dims, input.dims
                    ))
                }
            }
            ShapeRelation::Broadcasting => {
                let lhs = &self.inputs[0].shape;
                let rhs = &self.inputs[1].shape;
                if lhs.rank() != out.rank() || rhs.rank() != out.rank() {
                    return Err(format!(
                        "binary operand ranks {} and {} differ from output rank {}",
                        lhs.rank(),
                        rhs.rank(),
                        out.rank()
                    ));
                }
                for axis in 0..out.rank() {
                    if broadcast_dim(lhs.dims[axis], rhs.dims[axis]) != Some(out.dims[axis]) {
                        return Err(format!(
                            "axis {axis}: {:?} and {:?} do not broadcast to {:?}",
                            lhs.dims, rhs.dims, out.dims
                        ));
                    }
                }
                Ok(())
            }
            ShapeRelation::Reduction | ShapeRelation::Expansion => {
                let input = &self.inputs[0].shape;
                if input.rank() != out.rank() {
                    return Err(format!(
                        "input rank {} differs from output rank {}",
                        input.rank(),
                        out.rank()
                    ));
                }
                let reducing = self.op.shape_relation() == ShapeRelation::Reduction;
                for axis in 0..out.rank() {
                    let (before, after) = (input.dims[axis], out.dims[axis]);
                    let ok = if !self.axes.contains(&axis) {
                        before == after
                    } else if reducing {
                        after == 1
                    } else {
                        before == 1
                    };
                    if !ok {
                        return Err(format!(
                            "axis {axis}: {:?} -> {:?} violates {}",
                            input.dims,
                            out.dims,
                            self.op.as_str()
                        ));
                    }
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramValidationError {
    DuplicateBinding {
        name: TensorName,
    },
    UnboundInput {
        instruction_index: usize,
        name: TensorName,
    },
    InputShapeMismatch {
        instruction_index: usize,
        name: TensorName,
        bound: Shape,
        declared: Shape,
    },
    ArityMismatch {
        instruction_index: usize,
        op: OpName,
        expected: usize,
        actual: usize,
    },
    RankMismatch {
        name: TensorName,
        expected: usize,
        actual: usize,
    },
    ZeroSizedAxis {
        name: TensorName,
    },
    ShapeRuleViolation {
        instruction_index: usize,
        op: OpName,
        detail: String,
    },
    UnknownFetch {
        name: TensorName,
    },
    UnusedTensor {
        name: TensorName,
    },
    FinalOutputNotFetchedLast {
        name: TensorName,
    },
    Dag(DagError),
}

impl fmt::Display for ProgramValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateBinding { name } => write!(f, "tensor {name} is bound twice"),
            Self::UnboundInput {
                instruction_index,
                name,
            } => write!(
                f,
                "instruction {instruction_index} reads {name} before it is defined"
            ),
            Self::InputShapeMismatch {
                instruction_index,
                name,
                bound,
                declared,
            } => write!(
                f,
                "instruction {} declares {} as {:?} but it is bound as {:?}",
                instruction_index, name, declared.dims, bound.dims
            ),
            Self::ArityMismatch {
                instruction_index,
                op,
                expected,
                actual,
            } => write!(
                f,
                "instruction {} ({}) expects {} inputs, got {}",
                instruction_index,
                op.as_str(),
                expected,
                actual
            ),
            Self::RankMismatch {
                name,
                expected,
                actual,
            } => write!(f, "tensor {name} has rank {actual}, expected {expected}"),
            Self::ZeroSizedAxis { name } => write!(f, "tensor {name} has a zero-sized axis"),
            Self::ShapeRuleViolation {
                instruction_index,
                op,
                detail,
            } => write!(
                f,
                "instruction {} ({}) violates its shape rule: {}",
                instruction_index,
                op.as_str(),
                detail
            ),
            Self::UnknownFetch { name } => write!(f, "fetch {name} is never defined"),
            Self::UnusedTensor { name } => {
                write!(f, "tensor {name} is neither consumed nor fetched")
            }
            Self::FinalOutputNotFetchedLast { name } => {
                write!(f, "final output {name} must be the last fetch")
            }
            Self::Dag(err) => write!(f, "dag reconstruction failed: {err}"),
        }
    }
}

impl std::error::Error for ProgramValidationError {}

impl From<DagError> for ProgramValidationError {
    fn from(err: DagError) -> Self {
        Self::Dag(err)
    }
}

/// A linearized program: sources are defined up front, every instruction
/// only reads tensors defined earlier, and the final instruction's output is
/// the last fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Program {
    pub sources: Vec<TensorDecl>,
    pub instructions: Vec<Instruction>,
    pub fetches: Vec<TensorName>,
}

impl Program {
    #[must_use]
    pub fn new(
        sources: Vec<TensorDecl>,
        instructions: Vec<Instruction>,
        fetches: Vec<TensorName>,
    ) -> Self {
        Self {
            sources,
            instructions,
            fetches,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    #[must_use]
    pub fn final_instruction(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    /// Shape of every tensor the program defines, keyed by name.
    #[must_use]
    pub fn tensor_shapes(&self) -> FxHashMap<&TensorName, &Shape> {
        self.sources
            .iter()
            .chain(self.instructions.iter().map(|instr| &instr.output))
            .map(|decl| (&decl.name, &decl.shape))
            .collect()
    }

    /// Indices of the instructions `index` transitively depends on,
    /// including `index` itself.
    #[must_use]
    pub fn dependency_closure(&self, index: usize) -> BTreeSet<usize> {
        let mut closure = BTreeSet::new();
        if index >= self.instructions.len() {
            return closure;
        }
        let producers: FxHashMap<&TensorName, usize> = self
            .instructions
            .iter()
            .enumerate()
            .map(|(position, instr)| (&instr.output.name, position))
            .collect();
        let mut stack = vec![index];
        while let Some(current) = stack.pop() {
            if !closure.insert(current) {
                continue;
            }
            for name in self.instructions[current].input_names() {
                if let Some(&producer) = producers.get(name) {
                    stack.push(producer);
                }
            }
        }
        closure
    }

    #[must_use]
    pub fn final_output_closure(&self) -> BTreeSet<usize> {
        match self.instructions.len() {
            0 => BTreeSet::new(),
            len => self.dependency_closure(len - 1),
        }
    }

    pub fn validate_well_formed(&self) -> Result<(), ProgramValidationError> {
        let expected_rank = self
            .sources
            .first()
            .or_else(|| self.instructions.first().map(|instr| &instr.output))
            .map_or(0, |decl| decl.shape.rank());
        let check_decl = |decl: &TensorDecl| -> Result<(), ProgramValidationError> {
            if decl.shape.rank() != expected_rank {
                return Err(ProgramValidationError::RankMismatch {
                    name: decl.name.clone(),
                    expected: expected_rank,
                    actual: decl.shape.rank(),
                });
            }
            if decl.shape.dims.contains(&0) {
                return Err(ProgramValidationError::ZeroSizedAxis {
                    name: decl.name.clone(),
                });
            }
            Ok(())
        };

        let mut bound: FxHashMap<&TensorName, &Shape> = FxHashMap::default();
        let mut consumed: FxHashSet<&TensorName> = FxHashSet::default();
        for source in &self.sources {
            check_decl(source)?;
            if bound.insert(&source.name, &source.shape).is_some() {
                return Err(ProgramValidationError::DuplicateBinding {
                    name: source.name.clone(),
                });
            }
        }

        for (instruction_index, instr) in self.instructions.iter().enumerate() {
            if instr.inputs.len() != instr.op.input_arity() {
                return Err(ProgramValidationError::ArityMismatch {
                    instruction_index,
                    op: instr.op,
                    expected: instr.op.input_arity(),
                    actual: instr.inputs.len(),
                });
            }
            for input in &instr.inputs {
                let shape = bound.get(&input.name).copied().ok_or_else(|| {
                    ProgramValidationError::UnboundInput {
                        instruction_index,
                        name: input.name.clone(),
                    }
                })?;
                if *shape != input.shape {
                    return Err(ProgramValidationError::InputShapeMismatch {
                        instruction_index,
                        name: input.name.clone(),
                        bound: shape.clone(),
                        declared: input.shape.clone(),
                    });
                }
                consumed.insert(&input.name);
            }
            check_decl(&instr.output)?;
            instr
                .check_shape_rule()
                .map_err(|detail| ProgramValidationError::ShapeRuleViolation {
                    instruction_index,
                    op: instr.op,
                    detail,
                })?;
            if bound.insert(&instr.output.name, &instr.output.shape).is_some() {
                return Err(ProgramValidationError::DuplicateBinding {
                    name: instr.output.name.clone(),
                });
            }
        }

        for fetch in &self.fetches {
            if !bound.contains_key(fetch) {
                return Err(ProgramValidationError::UnknownFetch {
                    name: fetch.clone(),
                });
            }
            consumed.insert(fetch);
        }

        let defined = self
            .sources
            .iter()
            .chain(self.instructions.iter().map(|instr| &instr.output));
        for decl in defined {
            if !consumed.contains(&decl.name) {
                return Err(ProgramValidationError::UnusedTensor {
                    name: decl.name.clone(),
                });
            }
        }

        if let Some(last) = self.final_instruction()
            && self.fetches.last() != Some(&last.output.name)
        {
            return Err(ProgramValidationError::FinalOutputNotFetchedLast {
                name: last.output.name.clone(),
            });
        }
        Ok(())
    }

    /// Deterministic text form used for determinism checks and case ids.
    #[must_use]
    pub fn canonical_fingerprint(&self) -> String {
        let mut out = String::new();
        out.push_str("src:");
        for source in &self.sources {
            write_decl(&mut out, source);
            out.push(',');
        }
        for instr in &self.instructions {
            let _ = write!(&mut out, "|{}(", instr.op.as_str());
            for input in instr.input_names() {
                out.push_str(input.as_str());
                out.push(',');
            }
            out.push_str(")->");
            write_decl(&mut out, &instr.output);
            if !instr.axes.is_empty() {
                let _ = write!(&mut out, "{{axes={:?}}}", instr.axes.as_slice());
            }
        }
        out.push_str("|fetch:");
        for fetch in &self.fetches {
            out.push_str(fetch.as_str());
            out.push(',');
        }
        out
    }

    /// Rebuilds the DAG and its annotations from a linearized program.
    /// Sources come first, then one node per instruction, then one sink per
    /// distinct fetch.
    pub fn to_dag(&self) -> Result<(Dag, DagAnnotations), ProgramValidationError> {
        self.validate_well_formed()?;

        let mut dag = Dag::new();
        let mut edge_of: FxHashMap<&TensorName, EdgeId> = FxHashMap::default();
        let mut ops = Vec::new();
        let mut names = Vec::new();
        let mut shapes = Vec::new();

        for source in &self.sources {
            let node = dag.add_node(NodeKind::Source, &[])?;
            edge_of.insert(&source.name, dag.node(node).outputs[0]);
            ops.push(None);
            names.push(source.name.clone());
            shapes.push(source.shape.clone());
        }
        for instr in &self.instructions {
            let inputs: SmallVec<[EdgeId; 2]> = instr
                .input_names()
                .filter_map(|name| edge_of.get(name).copied())
                .collect();
            let node = dag.add_node(instr.op.node_kind(), &inputs)?;
            edge_of.insert(&instr.output.name, dag.node(node).outputs[0]);
            ops.push(Some(OpAssignment {
                op: instr.op,
                axes: instr.axes.clone(),
            }));
            names.push(instr.output.name.clone());
            shapes.push(instr.output.shape.clone());
        }
        let mut sunk: FxHashSet<&TensorName> = FxHashSet::default();
        for fetch in &self.fetches {
            if !sunk.insert(fetch) {
                continue;
            }
            if let Some(edge) = edge_of.get(fetch) {
                dag.add_node(NodeKind::Sink, &[*edge])?;
                ops.push(None);
            }
        }
        dag.validate()?;

        let dims_eq1 = shapes.iter().map(DimsEq1::from_shape).collect();
        Ok((
            dag,
            DagAnnotations {
                dims_eq1,
                ops,
                names,
                shapes,
            },
        ))
    }
}

fn write_decl(out: &mut String, decl: &TensorDecl) {
    out.push_str(decl.name.as_str());
    out.push(':');
    for (axis, dim) in decl.shape.dims.iter().enumerate() {
        if axis > 0 {
            out.push('x');
        }
        let _ = write!(out, "{dim}");
    }
}

#[cfg(test)]
mod tests {
    use super::{Instruction, Program, ProgramValidationError, TensorDecl, TensorName};
    use crate::{NodeKind, OpName};
    use smallvec::smallvec;

    fn instr(op: OpName, axes: &[usize], inputs: &[TensorDecl], output: TensorDecl) -> Instruction {
        Instruction {
            op,
            axes: axes.iter().copied().collect(),
            inputs: inputs.iter().cloned().collect(),
            output,
        }
    }

    fn diamond() -> Program {
        let x = TensorDecl::new("tensor1", vec![4, 8]);
        let a = TensorDecl::new("tensor2", vec![4, 8]);
        let b = TensorDecl::new("tensor3", vec![1, 8]);
        let c = TensorDecl::new("tensor4", vec![4, 8]);
        Program::new(
            vec![x.clone()],
            vec![
                instr(OpName::Exp, &[], &[x.clone()], a.clone()),
                instr(OpName::ReduceSum, &[0], &[x], b.clone()),
                instr(OpName::Add, &[], &[a, b], c),
            ],
            vec![TensorName::from("tensor4")],
        )
    }

    #[test]
    fn diamond_program_is_well_formed() {
        let program = diamond();
        program.validate_well_formed().expect("diamond should validate");
        assert_eq!(program.len(), 3);
        assert_eq!(
            program.final_output_closure().into_iter().collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn forward_reference_is_rejected() {
        let mut program = diamond();
        program.instructions.swap(0, 2);
        let err = program
            .validate_well_formed()
            .expect_err("forward reference must fail");
        assert!(matches!(
            err,
            ProgramValidationError::UnboundInput {
                instruction_index: 0,
                ..
            }
        ));
    }

    #[test]
    fn non_broadcastable_binary_is_rejected() {
        let mut program = diamond();
        program.instructions[1].output.shape.dims = vec![2, 8];
        program.instructions[2].inputs[1].shape.dims = vec![2, 8];
        let err = program
            .validate_well_formed()
            .expect_err("reduce to size 2 must fail");
        assert!(matches!(
            err,
            ProgramValidationError::ShapeRuleViolation {
                instruction_index: 1,
                op: OpName::ReduceSum,
                ..
            }
        ));
    }

    #[test]
    fn duplicate_binding_is_rejected() {
        let mut program = diamond();
        program.instructions[1].output.name = TensorName::from("tensor2");
        let err = program
            .validate_well_formed()
            .expect_err("duplicate output name must fail");
        assert_eq!(
            err,
            ProgramValidationError::DuplicateBinding {
                name: TensorName::from("tensor2"),
            }
        );
    }

    #[test]
    fn final_output_must_be_last_fetch() {
        let mut program = diamond();
        program.fetches = vec![TensorName::from("tensor4"), TensorName::from("tensor1")];
        let err = program
            .validate_well_formed()
            .expect_err("fetch order must end with the final output");
        assert!(matches!(
            err,
            ProgramValidationError::FinalOutputNotFetchedLast { .. }
        ));
    }

    #[test]
    fn unused_tensor_is_rejected() {
        let mut program = diamond();
        program.sources.push(TensorDecl::new("tensor9", vec![4, 8]));
        let err = program
            .validate_well_formed()
            .expect_err("unused source must fail");
        assert_eq!(
            err,
            ProgramValidationError::UnusedTensor {
                name: TensorName::from("tensor9"),
            }
        );
    }

    #[test]
    fn expand_requires_unit_input_axis() {
        let x = TensorDecl::new("t1", vec![1, 8]);
        let y = TensorDecl::new("t2", vec![4, 8]);
        let ok = instr(OpName::Expand, &[0], &[x.clone()], y.clone());
        assert!(ok.check_shape_rule().is_ok());
        let bad = instr(OpName::Expand, &[1], &[x], y);
        assert!(bad.check_shape_rule().is_err());
        let no_axes = Instruction {
            op: OpName::Expand,
            axes: smallvec![],
            inputs: smallvec![TensorDecl::new("t1", vec![1, 8])],
            output: TensorDecl::new("t2", vec![4, 8]),
        };
        assert!(no_axes.check_shape_rule().is_err());
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let program = diamond();
        let fp = program.canonical_fingerprint();
        assert_eq!(fp, diamond().canonical_fingerprint());
        assert!(fp.starts_with("src:tensor1:4x8,|exp(tensor1,)->tensor2:4x8"));
        assert!(fp.contains("{axes=[0]}"));
        let mut other = diamond();
        other.instructions[0].op = OpName::Sin;
        assert_ne!(fp, other.canonical_fingerprint());
    }

    #[test]
    fn to_dag_round_trips_structure() {
        let program = diamond();
        let (dag, annotations) = program.to_dag().expect("dag should rebuild");
        assert_eq!(dag.source_count(), 1);
        assert_eq!(dag.nodes_of_kind(NodeKind::Sink).count(), 1);
        assert_eq!(dag.num_edges(), 4);
        assert_eq!(annotations.names.len(), 4);
        assert_eq!(annotations.dims_eq1[2].0, vec![true, false]);
        assert_eq!(
            annotations.ops[2].as_ref().map(|assignment| assignment.op),
            Some(OpName::ReduceSum)
        );
        dag.validate().expect("rebuilt dag is well formed");
    }

    #[test]
    fn shape_rule_reports_arity_instead_of_indexing() {
        let x = TensorDecl::new("tensor1", vec![4, 8]);
        let out = TensorDecl::new("tensor2", vec![4, 8]);
        let cases = [
            instr(OpName::Exp, &[], &[], out.clone()),
            instr(OpName::Add, &[], &[x.clone()], out.clone()),
            instr(OpName::ReduceSum, &[1], &[], TensorDecl::new("tensor2", vec![4, 1])),
            instr(OpName::Ones, &[], &[x.clone()], out.clone()),
        ];
        for case in cases {
            let detail = case.check_shape_rule().expect_err("arity mismatch");
            assert!(detail.contains("input(s)"), "{detail}");
        }
        instr(OpName::Add, &[], &[x.clone(), x], out)
            .check_shape_rule()
            .expect("well-formed binary");
    }
}
