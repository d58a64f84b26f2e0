//! Reference backend. Statements use plain `numpy` semantics: keepdims
//! reductions, `broadcast_to` for expansion, and composite forms for the
//! activations numpy lacks.

use crate::{
    BackendKind, CodegenError, DTYPE, RAMP_START, RAMP_STOP, ScriptGenerator, element_count,
    tuple_literal,
};
use mk_core::{Instruction, OpName, TensorDecl};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumpyGenerator {
    module_name: String,
}

impl NumpyGenerator {
    #[must_use]
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
        }
    }
}

impl ScriptGenerator for NumpyGenerator {
    fn backend(&self) -> BackendKind {
        BackendKind::Numpy
    }

    fn module_name(&self) -> &str {
        &self.module_name
    }

    fn source_statement(&self, source: &TensorDecl) -> Result<String, CodegenError> {
        let m = &self.module_name;
        Ok(format!(
            "{} = {m}.linspace({RAMP_START}, {RAMP_STOP}, num={}, dtype=\"{DTYPE}\").reshape({})",
            source.name,
            element_count(source)?,
            tuple_literal(&source.shape.dims),
        ))
    }

    fn instruction_statement(&self, instr: &Instruction) -> Result<String, CodegenError> {
        let m = &self.module_name;
        let out = &instr.output;
        let shape = tuple_literal(&out.shape.dims);
        let arg = |slot: usize| instr.inputs.get(slot).map_or("", |decl| decl.name.as_str());
        let axes = tuple_literal(instr.axes.as_slice());
        let rhs = match instr.op {
            OpName::Ones | OpName::Zeros => {
                format!("{m}.{}({shape}, dtype=\"{DTYPE}\")", instr.op.as_str())
            }
            OpName::Linspace => format!(
                "{m}.linspace({RAMP_START}, {RAMP_STOP}, num={}, dtype=\"{DTYPE}\").reshape({shape})",
                element_count(out)?
            ),
            OpName::Relu => format!("{m}.maximum({}, 0)", arg(0)),
            OpName::Sigmoid => format!("1 / (1 + {m}.exp(-{}))", arg(0)),
            OpName::Exp
            | OpName::Negative
            | OpName::Abs
            | OpName::Tanh
            | OpName::Sin
            | OpName::Cos => format!("{m}.{}({})", instr.op.as_str(), arg(0)),
            OpName::Add
            | OpName::Subtract
            | OpName::Multiply
            | OpName::Maximum
            | OpName::Minimum => format!("{m}.{}({}, {})", instr.op.as_str(), arg(0), arg(1)),
            OpName::Expand => format!("{m}.broadcast_to({}, {shape})", arg(0)),
            OpName::ReduceSum => format!("{m}.sum({}, axis={axes}, keepdims=True)", arg(0)),
            OpName::ReduceMax => format!("{m}.max({}, axis={axes}, keepdims=True)", arg(0)),
            OpName::ReduceMin => format!("{m}.min({}, axis={axes}, keepdims=True)", arg(0)),
        };
        Ok(format!("{} = {rhs}", out.name))
    }

    fn fetch_statement(&self, fetched: &TensorDecl) -> String {
        format!(
            "assert {}.shape == {}",
            fetched.name,
            tuple_literal(&fetched.shape.dims)
        )
    }
}
