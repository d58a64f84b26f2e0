use mk_core::{
    Dag, DagAnnotations, EdgeId, GenerationError, Instruction, NodeId, NodeKind, Program,
    TensorDecl, TensorName,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Kahn's algorithm; among ready nodes the lowest id goes first.
#[must_use]
pub fn topological_order(dag: &Dag) -> Vec<NodeId> {
    let mut pending: Vec<usize> = dag.nodes().iter().map(|node| node.inputs.len()).collect();
    let mut ready: BinaryHeap<Reverse<NodeId>> = dag
        .nodes()
        .iter()
        .filter(|node| node.inputs.is_empty())
        .map(|node| Reverse(node.id))
        .collect();
    let mut order = Vec::with_capacity(dag.num_nodes());
    while let Some(Reverse(id)) = ready.pop() {
        order.push(id);
        for edge in &dag.node(id).outputs {
            // A consumer listed twice (x op x) is decremented twice, matching
            // its two input slots.
            for consumer in &dag.edge(*edge).consumers {
                let count = &mut pending[consumer.index()];
                *count -= 1;
                if *count == 0 {
                    ready.push(Reverse(*consumer));
                }
            }
        }
    }
    order
}

fn decl(annotations: &DagAnnotations, edge: EdgeId) -> TensorDecl {
    TensorDecl {
        name: annotations.names[edge.index()].clone(),
        shape: annotations.shapes[edge.index()].clone(),
    }
}

/// Flattens an annotated DAG into a program. Sources are declared up front,
/// operator nodes become instructions in topological order, and sinks become
/// fetches ordered by where their tensor is defined: sources first, then
/// instruction outputs.
pub fn linearize(dag: &Dag, annotations: &DagAnnotations) -> Result<Program, GenerationError> {
    let order = topological_order(dag);
    let mut sources = Vec::new();
    let mut instructions = Vec::new();
    let mut fetched: Vec<EdgeId> = Vec::new();
    for id in &order {
        let node = dag.node(*id);
        match node.kind {
            NodeKind::Source => sources.push(decl(annotations, node.outputs[0])),
            NodeKind::Sink => fetched.push(node.inputs[0]),
            _ => {
                let assignment = annotations
                    .ops
                    .get(id.index())
                    .and_then(Option::as_ref)
                    .ok_or_else(|| GenerationError::UnresolvableOperator {
                        node: *id,
                        kind: node.kind,
                        detail: "node reached linearization without an operator".to_owned(),
                    })?;
                instructions.push(Instruction {
                    op: assignment.op,
                    axes: assignment.axes.clone(),
                    inputs: node
                        .inputs
                        .iter()
                        .map(|edge| decl(annotations, *edge))
                        .collect(),
                    output: decl(annotations, node.outputs[0]),
                });
            }
        }
    }

    let position: FxHashMap<&TensorName, usize> = sources
        .iter()
        .chain(instructions.iter().map(|instr| &instr.output))
        .enumerate()
        .map(|(index, decl)| (&decl.name, index))
        .collect();
    let mut fetches: Vec<(usize, TensorName)> = Vec::with_capacity(fetched.len());
    let mut seen: FxHashSet<EdgeId> = FxHashSet::default();
    for edge in fetched {
        if !seen.insert(edge) {
            continue;
        }
        let name = &annotations.names[edge.index()];
        let pos = position.get(name).copied().unwrap_or(usize::MAX);
        fetches.push((pos, name.clone()));
    }
    fetches.sort_by_key(|(pos, _)| *pos);
    let fetches = fetches.into_iter().map(|(_, name)| name).collect();
    Ok(Program::new(sources, instructions, fetches))
}

#[cfg(test)]
mod tests {
    use super::{linearize, topological_order};
    use mk_core::{
        Dag, DagAnnotations, DimsEq1, NodeId, NodeKind, OpAssignment, OpName, Shape, TensorName,
    };

    /// Two sources feeding an add, plus a sink directly on the second
    /// source.
    fn fan_in() -> (Dag, DagAnnotations) {
        let mut dag = Dag::new();
        let a = dag.add_node(NodeKind::Source, &[]).expect("a");
        let b = dag.add_node(NodeKind::Source, &[]).expect("b");
        let (ea, eb) = (dag.node(a).outputs[0], dag.node(b).outputs[0]);
        let add = dag.add_node(NodeKind::Binary, &[ea, eb]).expect("add");
        let ec = dag.node(add).outputs[0];
        dag.add_node(NodeKind::Sink, &[ec]).expect("sink c");
        dag.add_node(NodeKind::Sink, &[eb]).expect("sink b");
        let shape = Shape::new(vec![4]);
        let annotations = DagAnnotations {
            dims_eq1: vec![DimsEq1(vec![false]); 3],
            ops: vec![None, None, Some(OpAssignment::new(OpName::Add)), None, None],
            names: ["tensor1", "tensor2", "tensor3"]
                .into_iter()
                .map(TensorName::from)
                .collect(),
            shapes: vec![shape; 3],
        };
        (dag, annotations)
    }

    #[test]
    fn ready_nodes_are_taken_lowest_id_first() {
        let (dag, _) = fan_in();
        let order = topological_order(&dag);
        assert_eq!(
            order,
            vec![NodeId(0), NodeId(1), NodeId(2), NodeId(3), NodeId(4)]
        );
    }

    #[test]
    fn fetches_list_sources_before_instruction_outputs() {
        let (dag, annotations) = fan_in();
        let program = linearize(&dag, &annotations).expect("linearize");
        assert_eq!(program.sources.len(), 2);
        assert_eq!(program.instructions.len(), 1);
        assert_eq!(
            program.fetches,
            vec![TensorName::from("tensor2"), TensorName::from("tensor3")]
        );
        program.validate_well_formed().expect("program is well formed");
    }

    #[test]
    fn missing_operator_is_reported() {
        let (dag, mut annotations) = fan_in();
        annotations.ops[2] = None;
        assert!(linearize(&dag, &annotations).is_err());
    }

    mod proptests {
        use super::topological_order;
        use crate::{GenContext, generate_dag};
        use mk_core::DagGenRequirement;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_order_is_a_topological_permutation(
                seed in any::<u64>(),
                max_width in 1_usize..=6,
                max_instructions in 0_usize..=24,
            ) {
                let requirement = DagGenRequirement {
                    max_num_sources: max_width.min(4),
                    max_width,
                    max_instructions,
                    ..DagGenRequirement::default()
                };
                let mut ctx = GenContext::from_seed(seed);
                let generated = generate_dag(&requirement, &mut ctx).expect("dag");
                let dag = &generated.dag;
                let order = topological_order(dag);
                prop_assert_eq!(order.len(), dag.num_nodes());
                let mut position = vec![usize::MAX; dag.num_nodes()];
                for (index, id) in order.iter().enumerate() {
                    position[id.index()] = index;
                }
                prop_assert!(position.iter().all(|pos| *pos != usize::MAX));
                for edge in dag.edges() {
                    for consumer in &edge.consumers {
                        prop_assert!(position[edge.producer.index()] < position[consumer.index()]);
                    }
                }
            }
        }
    }
}
