#![forbid(unsafe_code)]

//! Renders a [`UnitTestCaseSpec`] into source text for one execution
//! backend. Every script has the same layout: one ramp initializer per
//! source, one statement per instruction, then one shape assertion per
//! fetch with the final output asserted last. Scripts carry no import
//! line; the runner binds the module name before executing them.

pub mod eager;
pub mod numpy;

pub use eager::EagerGenerator;
pub use numpy::NumpyGenerator;

use mk_case::UnitTestCaseSpec;
use mk_core::{Instruction, Program, ProgramValidationError, TensorDecl, TensorName};
use serde::{Deserialize, Serialize};

/// Lower and upper end of the deterministic ramp every source is filled
/// with.
pub const RAMP_START: &str = "-0.5";
pub const RAMP_STOP: &str = "0.5";
pub const DTYPE: &str = "float32";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Eager tensor API in the style of `paddle`.
    Eager,
    /// `numpy` reference semantics.
    Numpy,
}

impl BackendKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eager => "eager",
            Self::Numpy => "numpy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpCallCodeGenRequirement {
    pub backend: BackendKind,
    /// Name the generated statements call through, e.g. `paddle.exp(..)`.
    pub module_name: String,
}

impl OpCallCodeGenRequirement {
    #[must_use]
    pub fn eager() -> Self {
        Self {
            backend: BackendKind::Eager,
            module_name: "paddle".to_owned(),
        }
    }

    #[must_use]
    pub fn numpy() -> Self {
        Self {
            backend: BackendKind::Numpy,
            module_name: "numpy".to_owned(),
        }
    }
}

impl Default for OpCallCodeGenRequirement {
    fn default() -> Self {
        Self::numpy()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub backend: BackendKind,
    pub file_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    InvalidModuleName { module_name: String },
    InvalidProgram(ProgramValidationError),
    /// A ramp-filled tensor whose element count does not fit in `u64`.
    ElementCountOverflow { name: TensorName, dims: Vec<u32> },
}

impl std::fmt::Display for CodegenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidModuleName { module_name } => {
                write!(f, "module name {module_name:?} is not a dotted identifier")
            }
            Self::InvalidProgram(err) => write!(f, "program cannot be rendered: {err}"),
            Self::ElementCountOverflow { name, dims } => {
                write!(f, "element count of {name} {dims:?} overflows u64")
            }
        }
    }
}

impl std::error::Error for CodegenError {}

impl From<ProgramValidationError> for CodegenError {
    fn from(value: ProgramValidationError) -> Self {
        Self::InvalidProgram(value)
    }
}

/// Capability shared by every backend. Implementors supply the three
/// statement forms; the layout of a script lives in [`render_program`].
///
/// [`render_program`]: ScriptGenerator::render_program
pub trait ScriptGenerator {
    fn backend(&self) -> BackendKind;

    fn module_name(&self) -> &str;

    fn source_statement(&self, source: &TensorDecl) -> Result<String, CodegenError>;

    fn instruction_statement(&self, instr: &Instruction) -> Result<String, CodegenError>;

    fn fetch_statement(&self, fetched: &TensorDecl) -> String;

    fn render_program(&self, program: &Program) -> Result<Script, CodegenError> {
        if !is_dotted_identifier(self.module_name()) {
            return Err(CodegenError::InvalidModuleName {
                module_name: self.module_name().to_owned(),
            });
        }
        program.validate_well_formed()?;

        let shapes = program.tensor_shapes();
        let mut lines = Vec::with_capacity(
            program.sources.len() + program.instructions.len() + program.fetches.len(),
        );
        for source in &program.sources {
            lines.push(self.source_statement(source)?);
        }
        for instr in &program.instructions {
            lines.push(self.instruction_statement(instr)?);
        }
        for name in &program.fetches {
            // Validation guarantees every fetch is bound.
            if let Some(shape) = shapes.get(name) {
                let fetched = TensorDecl {
                    name: name.clone(),
                    shape: (*shape).clone(),
                };
                lines.push(self.fetch_statement(&fetched));
            }
        }

        let mut file_content = lines.join("\n");
        file_content.push('\n');
        Ok(Script {
            backend: self.backend(),
            file_content,
        })
    }

    fn generate(&self, spec: &UnitTestCaseSpec) -> Result<Script, CodegenError> {
        self.render_program(&spec.program)
    }
}

pub fn generate_script(
    spec: &UnitTestCaseSpec,
    requirement: &OpCallCodeGenRequirement,
) -> Result<Script, CodegenError> {
    let module_name = requirement.module_name.as_str();
    match requirement.backend {
        BackendKind::Eager => EagerGenerator::new(module_name).generate(spec),
        BackendKind::Numpy => NumpyGenerator::new(module_name).generate(spec),
    }
}

fn is_dotted_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Python tuple literal: `(8,)` for rank 1, `(4, 8)` otherwise.
#[must_use]
pub fn tuple_literal<T: std::fmt::Display>(items: &[T]) -> String {
    match items {
        [] => "()".to_owned(),
        [single] => format!("({single},)"),
        _ => format!("({})", join(items)),
    }
}

/// Python list literal: `[4, 8]`.
#[must_use]
pub fn list_literal<T: std::fmt::Display>(items: &[T]) -> String {
    format!("[{}]", join(items))
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Ramp length for a tensor filled with `linspace`.
pub(crate) fn element_count(decl: &TensorDecl) -> Result<u64, CodegenError> {
    decl.shape
        .element_count()
        .ok_or_else(|| CodegenError::ElementCountOverflow {
            name: decl.name.clone(),
            dims: decl.shape.dims.clone(),
        })
}
