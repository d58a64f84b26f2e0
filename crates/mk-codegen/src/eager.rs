//! Eager tensor backend in the style of `paddle`: shapes are lists,
//! reductions take `keepdim`, activations live under `nn.functional`.

use crate::{
    BackendKind, CodegenError, DTYPE, RAMP_START, RAMP_STOP, ScriptGenerator, element_count,
    list_literal, tuple_literal,
};
use mk_core::{Instruction, OpName, TensorDecl};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EagerGenerator {
    module_name: String,
}

impl EagerGenerator {
    #[must_use]
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
        }
    }
}

impl ScriptGenerator for EagerGenerator {
    fn backend(&self) -> BackendKind {
        BackendKind::Eager
    }

    fn module_name(&self) -> &str {
        &self.module_name
    }

    fn source_statement(&self, source: &TensorDecl) -> Result<String, CodegenError> {
        let m = &self.module_name;
        Ok(format!(
            "{} = {m}.linspace({RAMP_START}, {RAMP_STOP}, {}, dtype=\"{DTYPE}\").reshape({})",
            source.name,
            element_count(source)?,
            list_literal(&source.shape.dims),
        ))
    }

    fn instruction_statement(&self, instr: &Instruction) -> Result<String, CodegenError> {
        let m = &self.module_name;
        let out = &instr.output;
        let shape = list_literal(&out.shape.dims);
        let arg = |slot: usize| instr.inputs.get(slot).map_or("", |decl| decl.name.as_str());
        let axes = list_literal(instr.axes.as_slice());
        let rhs = match instr.op {
            OpName::Ones | OpName::Zeros => {
                format!("{m}.{}({shape}, dtype=\"{DTYPE}\")", instr.op.as_str())
            }
            OpName::Linspace => format!(
                "{m}.linspace({RAMP_START}, {RAMP_STOP}, {}, dtype=\"{DTYPE}\").reshape({shape})",
                element_count(out)?
            ),
            OpName::Negative => format!("{m}.neg({})", arg(0)),
            OpName::Relu | OpName::Sigmoid => {
                format!("{m}.nn.functional.{}({})", instr.op.as_str(), arg(0))
            }
            OpName::Exp | OpName::Abs | OpName::Tanh | OpName::Sin | OpName::Cos => {
                format!("{m}.{}({})", instr.op.as_str(), arg(0))
            }
            OpName::Add
            | OpName::Subtract
            | OpName::Multiply
            | OpName::Maximum
            | OpName::Minimum => format!("{m}.{}({}, {})", instr.op.as_str(), arg(0), arg(1)),
            OpName::Expand => format!("{m}.expand({}, {shape})", arg(0)),
            OpName::ReduceSum => format!("{m}.sum({}, axis={axes}, keepdim=True)", arg(0)),
            OpName::ReduceMax => format!("{m}.max({}, axis={axes}, keepdim=True)", arg(0)),
            OpName::ReduceMin => format!("{m}.min({}, axis={axes}, keepdim=True)", arg(0)),
        };
        Ok(format!("{} = {rhs}", out.name))
    }

    /// Eager shapes are lists, so they are compared as tuples.
    fn fetch_statement(&self, fetched: &TensorDecl) -> String {
        format!(
            "assert tuple({}.shape) == {}",
            fetched.name,
            tuple_literal(&fetched.shape.dims)
        )
    }
}
