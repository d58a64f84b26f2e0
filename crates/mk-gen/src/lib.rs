#![forbid(unsafe_code)]

pub mod context;
pub mod dag_generator;
pub mod dims_eq1_generator;
pub mod instruction_util;
pub mod op_name_generator;
pub mod shape_signature_inferer;
pub mod tensor_name_generator;

pub use context::GenContext;
pub use dag_generator::{
    DagGenInstruction, GeneratedDag, generate_dag, generate_dag_around, is_step_valid,
};
pub use dims_eq1_generator::generate_dims_eq1;
pub use instruction_util::{linearize, topological_order};
pub use op_name_generator::generate_op_names;
pub use shape_signature_inferer::infer_shapes;
pub use tensor_name_generator::{TensorNameGenerator, generate_tensor_names};
