use crate::GenContext;
use mk_core::{
    Dag, DagNode, DimsEq1, GenerationError, NodeKind, OpAssignment, OpNameGenRequirement,
};
use smallvec::SmallVec;

/// Assigns an operator to every operator node, in node id order.
///
/// Reduce nodes reduce exactly the axes marked on the output but not on
/// the input; broadcast nodes expand the axes marked on the input but not on
/// the output. A node with no such axis, or whose kind has an empty
/// vocabulary, is unresolvable for this draw.
pub fn generate_op_names(
    dag: &Dag,
    dims_eq1: &[DimsEq1],
    requirement: &OpNameGenRequirement,
    ctx: &mut GenContext,
) -> Result<Vec<Option<OpAssignment>>, GenerationError> {
    let mut ops = Vec::with_capacity(dag.num_nodes());
    for node in dag.nodes() {
        if !node.kind.is_operator() {
            ops.push(None);
            continue;
        }
        let vocabulary = requirement.op_names_for(node.kind);
        if vocabulary.is_empty() {
            return Err(GenerationError::UnresolvableOperator {
                node: node.id,
                kind: node.kind,
                detail: format!("{} vocabulary is empty", node.kind.as_str()),
            });
        }
        let axes = eligible_axes(node, dims_eq1)?;
        let op = vocabulary[ctx.gen_index(vocabulary.len())];
        ops.push(Some(OpAssignment { op, axes }));
    }
    Ok(ops)
}

fn eligible_axes(
    node: &DagNode,
    dims_eq1: &[DimsEq1],
) -> Result<SmallVec<[usize; 4]>, GenerationError> {
    let (shrinking, label) = match node.kind {
        NodeKind::Reduce => (true, "reducible"),
        NodeKind::Broadcast => (false, "expandable"),
        _ => return Ok(SmallVec::new()),
    };
    let input = &dims_eq1[node.inputs[0].index()];
    let output = &dims_eq1[node.outputs[0].index()];
    let axes: SmallVec<[usize; 4]> = (0..input.rank())
        .filter(|axis| {
            let (inp, out) = (input.is_eq1(*axis), output.is_eq1(*axis));
            if shrinking { out && !inp } else { inp && !out }
        })
        .collect();
    if axes.is_empty() {
        return Err(GenerationError::UnresolvableOperator {
            node: node.id,
            kind: node.kind,
            detail: format!(
                "no {label} axis between input {:?} and output {:?}",
                input.0, output.0
            ),
        });
    }
    Ok(axes)
}
