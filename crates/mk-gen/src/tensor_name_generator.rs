use crate::topological_order;
use mk_core::{Dag, EdgeId, GenerationError, TensorName, TensorNameGenRequirement};
use std::collections::BTreeMap;

/// Hands out `{prefix}{index}` names, one per edge, memoized so asking for
/// the same edge twice returns the same name.
#[derive(Debug, Clone)]
pub struct TensorNameGenerator<'a> {
    requirement: &'a TensorNameGenRequirement,
    next_index: Option<u64>,
    names: BTreeMap<EdgeId, TensorName>,
}

impl<'a> TensorNameGenerator<'a> {
    #[must_use]
    pub fn new(requirement: &'a TensorNameGenRequirement) -> Self {
        Self {
            requirement,
            next_index: Some(requirement.start_index),
            names: BTreeMap::new(),
        }
    }

    /// Fails once the index counter would pass `u64::MAX`.
    pub fn name_of(&mut self, edge: EdgeId) -> Result<TensorName, GenerationError> {
        if let Some(name) = self.names.get(&edge) {
            return Ok(name.clone());
        }
        let index = self.next_index.ok_or_else(|| self.exhausted(edge))?;
        let name = TensorName(format!("{}{index}", self.requirement.prefix));
        self.next_index = index.checked_add(1);
        self.names.insert(edge, name.clone());
        Ok(name)
    }

    fn exhausted(&self, edge: EdgeId) -> GenerationError {
        GenerationError::StructuralGeneration {
            detail: format!(
                "tensor name index overflowed after {} name(s) from start_index {}; {edge} is unnamed",
                self.names.len(),
                self.requirement.start_index
            ),
            attempts: 0,
            requirement: serde_json::to_string(self.requirement).unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Names every edge in topological order of its producer. The result is
/// indexed by edge id.
pub fn generate_tensor_names(
    dag: &Dag,
    requirement: &TensorNameGenRequirement,
) -> Result<Vec<TensorName>, GenerationError> {
    let mut generator = TensorNameGenerator::new(requirement);
    for node_id in topological_order(dag) {
        for edge in &dag.node(node_id).outputs {
            generator.name_of(*edge)?;
        }
    }
    (0..dag.num_edges() as u32)
        .map(|raw| generator.name_of(EdgeId(raw)))
        .collect()
}
