//! Resolves a static shape for every edge from the axis-1 markers and the
//! assigned operators.
//!
//! Each (edge, axis) pair is a slot. Slots that must hold the same size
//! (elementwise links and the kept axes of reduce/expand) or that meet in a
//! broadcast are unioned into one class. Size-1 markers are propagated to a
//! fixpoint, then each class draws one size from the pool and slots that are
//! not forced to 1 take that size.

use crate::GenContext;
use mk_core::{
    Dag, DimSizeRequirement, DimsEq1, EdgeId, GenerationError, NodeKind, OpAssignment, Shape,
    StaticDim,
};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy)]
enum Constraint {
    Equal(usize, usize),
    Broadcast { out: usize, lhs: usize, rhs: usize },
}

#[derive(Debug, Clone)]
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, slot: usize) -> usize {
        let mut root = slot;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = slot;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Lower slot wins so roots do not depend on union order.
            let (keep, drop) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[drop] = keep;
        }
    }
}

struct SlotSpace {
    rank: usize,
}

impl SlotSpace {
    fn slot(&self, edge: EdgeId, axis: usize) -> usize {
        edge.index() * self.rank + axis
    }

    fn edge_axis(&self, slot: usize) -> (EdgeId, usize) {
        (EdgeId((slot / self.rank) as u32), slot % self.rank)
    }
}

pub fn infer_shapes(
    dag: &Dag,
    dims_eq1: &[DimsEq1],
    ops: &[Option<OpAssignment>],
    requirement: &DimSizeRequirement,
    ctx: &mut GenContext,
) -> Result<Vec<Shape>, GenerationError> {
    let rank = dims_eq1.first().map_or(0, DimsEq1::rank);
    let space = SlotSpace { rank };
    let slot_count = dag.num_edges() * rank;

    let mut is_one = vec![false; slot_count];
    for (edge, markers) in dims_eq1.iter().enumerate() {
        for axis in 0..rank {
            is_one[edge * rank + axis] = markers.is_eq1(axis);
        }
    }
    let mut must_exceed_one = vec![false; slot_count];
    let mut constraints = Vec::new();

    for node in dag.nodes() {
        let Some(assignment) = ops.get(node.id.index()).and_then(Option::as_ref) else {
            continue;
        };
        match node.kind {
            NodeKind::Unary => {
                let (input, output) = (node.inputs[0], node.outputs[0]);
                for axis in 0..rank {
                    constraints.push(Constraint::Equal(
                        space.slot(input, axis),
                        space.slot(output, axis),
                    ));
                }
            }
            NodeKind::Binary => {
                let (lhs, rhs, out) = (node.inputs[0], node.inputs[1], node.outputs[0]);
                for axis in 0..rank {
                    constraints.push(Constraint::Broadcast {
                        out: space.slot(out, axis),
                        lhs: space.slot(lhs, axis),
                        rhs: space.slot(rhs, axis),
                    });
                }
            }
            NodeKind::Reduce | NodeKind::Broadcast => {
                let (input, output) = (node.inputs[0], node.outputs[0]);
                let varying = if node.kind == NodeKind::Reduce { input } else { output };
                for axis in 0..rank {
                    if assignment.axes.contains(&axis) {
                        must_exceed_one[space.slot(varying, axis)] = true;
                    } else {
                        constraints.push(Constraint::Equal(
                            space.slot(input, axis),
                            space.slot(output, axis),
                        ));
                    }
                }
            }
            NodeKind::Source | NodeKind::Constant | NodeKind::Sink => {}
        }
    }

    let mut classes = UnionFind::new(slot_count);
    for constraint in &constraints {
        match *constraint {
            Constraint::Equal(a, b) => classes.union(a, b),
            Constraint::Broadcast { out, lhs, rhs } => {
                classes.union(out, lhs);
                classes.union(out, rhs);
            }
        }
    }

    // Each pass flips at least one slot to 1 or stops, so this terminates
    // within `slot_count` passes.
    let mut changed = true;
    while changed {
        changed = false;
        for constraint in &constraints {
            match *constraint {
                Constraint::Equal(a, b) => {
                    if is_one[a] != is_one[b] {
                        is_one[a] = true;
                        is_one[b] = true;
                        changed = true;
                    }
                }
                Constraint::Broadcast { out, lhs, rhs } => {
                    if is_one[out] && !(is_one[lhs] && is_one[rhs]) {
                        is_one[lhs] = true;
                        is_one[rhs] = true;
                        changed = true;
                    }
                    if is_one[lhs] && is_one[rhs] && !is_one[out] {
                        is_one[out] = true;
                        changed = true;
                    }
                }
            }
        }
    }

    if let Some(slot) = (0..slot_count).find(|slot| must_exceed_one[*slot] && is_one[*slot]) {
        let (edge, axis) = space.edge_axis(slot);
        return Err(GenerationError::ShapeConflict {
            edge,
            axis,
            detail: "reduced or expanded axis is forced to size 1".to_owned(),
        });
    }

    let mut class_needs_big = vec![false; slot_count];
    for slot in 0..slot_count {
        if must_exceed_one[slot] {
            let root = classes.find(slot);
            class_needs_big[root] = true;
        }
    }

    let pool = &requirement.dim_size;
    let big_pool: Vec<StaticDim> = pool.iter().copied().filter(|dim| dim.get() > 1).collect();
    let mut representative: FxHashMap<usize, u32> = FxHashMap::default();
    let mut sizes = vec![1_u32; slot_count];
    for slot in 0..slot_count {
        if is_one[slot] {
            continue;
        }
        let root = classes.find(slot);
        let size = match representative.get(&root) {
            Some(size) => *size,
            None => {
                let candidates = if class_needs_big[root] { &big_pool } else { pool };
                if candidates.is_empty() {
                    let (edge, axis) = space.edge_axis(slot);
                    return Err(GenerationError::ShapeConflict {
                        edge,
                        axis,
                        detail: "dimension pool has no size greater than 1".to_owned(),
                    });
                }
                let size = candidates[ctx.gen_index(candidates.len())].get();
                representative.insert(root, size);
                size
            }
        };
        sizes[slot] = size;
    }

    Ok((0..dag.num_edges())
        .map(|edge| Shape::new(sizes[edge * rank..(edge + 1) * rank].to_vec()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::infer_shapes;
    use crate::GenContext;
    use mk_core::{
        Dag, DimSizeRequirement, DimsEq1, EdgeId, GenerationError, NodeKind, OpAssignment,
        OpName, StaticDim, broadcast_shape,
    };

    fn pool(sizes: &[u32]) -> DimSizeRequirement {
        DimSizeRequirement {
            dim_size: sizes.iter().copied().map(StaticDim).collect(),
        }
    }

    /// source -> op -> sink
    fn single(kind: NodeKind) -> Dag {
        let mut dag = Dag::new();
        let source = dag.add_node(NodeKind::Source, &[]).expect("source");
        let input = dag.node(source).outputs[0];
        let op = dag.add_node(kind, &[input]).expect("op");
        let output = dag.node(op).outputs[0];
        dag.add_node(NodeKind::Sink, &[output]).expect("sink");
        dag
    }

    /// two sources -> binary -> sink
    fn binary() -> Dag {
        let mut dag = Dag::new();
        let a = dag.add_node(NodeKind::Source, &[]).expect("lhs");
        let b = dag.add_node(NodeKind::Source, &[]).expect("rhs");
        let inputs = [dag.node(a).outputs[0], dag.node(b).outputs[0]];
        let add = dag.add_node(NodeKind::Binary, &inputs).expect("binary");
        let out = dag.node(add).outputs[0];
        dag.add_node(NodeKind::Sink, &[out]).expect("sink");
        dag
    }

    #[test]
    fn unary_links_input_and_output() {
        let dag = single(NodeKind::Unary);
        let markers = vec![DimsEq1(vec![false, true]), DimsEq1(vec![false, false])];
        let ops = vec![None, Some(OpAssignment::new(OpName::Exp)), None];
        let mut ctx = GenContext::from_seed(2);
        let shapes = infer_shapes(&dag, &markers, &ops, &pool(&[16, 32]), &mut ctx).expect("shapes");
        assert_eq!(shapes[0], shapes[1]);
        assert_eq!(shapes[0].dims[1], 1, "eq1 propagates across strict equality");
    }

    #[test]
    fn single_pool_size_without_markers() {
        let dag = single(NodeKind::Unary);
        let markers = vec![DimsEq1(vec![false]), DimsEq1(vec![false])];
        let ops = vec![None, Some(OpAssignment::new(OpName::Abs)), None];
        let mut ctx = GenContext::from_seed(0);
        let shapes = infer_shapes(&dag, &markers, &ops, &pool(&[8]), &mut ctx).expect("shapes");
        assert_eq!(shapes[0].dims, vec![8]);
        assert_eq!(shapes[1].dims, vec![8]);
    }

    #[test]
    fn binary_output_broadcasts_inputs() {
        let dag = binary();
        let markers = vec![
            DimsEq1(vec![true, false]),
            DimsEq1(vec![false, false]),
            DimsEq1(vec![false, false]),
        ];
        let ops = vec![None, None, Some(OpAssignment::new(OpName::Add)), None];
        for seed in 0..16 {
            let mut ctx = GenContext::from_seed(seed);
            let shapes =
                infer_shapes(&dag, &markers, &ops, &pool(&[4, 8, 16]), &mut ctx).expect("shapes");
            assert_eq!(shapes[0].dims[0], 1);
            let expected = broadcast_shape(&shapes[0], &shapes[1]).expect("broadcastable");
            assert_eq!(expected, shapes[2]);
        }
    }

    #[test]
    fn binary_output_of_one_forces_inputs_to_one() {
        let dag = binary();
        let markers = vec![
            DimsEq1(vec![false]),
            DimsEq1(vec![false]),
            DimsEq1(vec![true]),
        ];
        let ops = vec![None, None, Some(OpAssignment::new(OpName::Multiply)), None];
        let mut ctx = GenContext::from_seed(0);
        let shapes = infer_shapes(&dag, &markers, &ops, &pool(&[8]), &mut ctx).expect("shapes");
        assert!(shapes.iter().all(|shape| shape.dims == vec![1]));
    }

    #[test]
    fn reduce_shrinks_marked_axis() {
        let dag = single(NodeKind::Reduce);
        let markers = vec![DimsEq1(vec![false, false]), DimsEq1(vec![true, false])];
        let ops = vec![
            None,
            Some(OpAssignment::with_axes(OpName::ReduceSum, [0])),
            None,
        ];
        let mut ctx = GenContext::from_seed(4);
        let shapes = infer_shapes(&dag, &markers, &ops, &pool(&[1, 8]), &mut ctx).expect("shapes");
        assert_eq!(shapes[0].dims[0], 8, "reduced axis must exceed 1");
        assert_eq!(shapes[1].dims[0], 1);
        assert_eq!(shapes[0].dims[1], shapes[1].dims[1]);
    }

    #[test]
    fn expand_grows_marked_axis() {
        let dag = single(NodeKind::Broadcast);
        let markers = vec![DimsEq1(vec![true, false]), DimsEq1(vec![false, false])];
        let ops = vec![None, Some(OpAssignment::with_axes(OpName::Expand, [0])), None];
        let mut ctx = GenContext::from_seed(4);
        let shapes = infer_shapes(&dag, &markers, &ops, &pool(&[32]), &mut ctx).expect("shapes");
        assert_eq!(shapes[0].dims, vec![1, 32]);
        assert_eq!(shapes[1].dims, vec![32, 32]);
    }

    #[test]
    fn reduce_is_rejected_when_pool_has_only_ones() {
        let dag = single(NodeKind::Reduce);
        let markers = vec![DimsEq1(vec![false]), DimsEq1(vec![true])];
        let ops = vec![
            None,
            Some(OpAssignment::with_axes(OpName::ReduceMax, [0])),
            None,
        ];
        let mut ctx = GenContext::from_seed(0);
        let err = infer_shapes(&dag, &markers, &ops, &pool(&[1]), &mut ctx)
            .expect_err("no size above 1");
        assert!(matches!(
            err,
            GenerationError::ShapeConflict {
                edge: EdgeId(0),
                axis: 0,
                ..
            }
        ));
    }

    #[test]
    fn reduced_axis_forced_to_one_is_a_conflict() {
        // source -> exp -> reduce(axis 0) -> sink with the source axis
        // marked: exp copies the 1 onto the reduce input.
        let mut dag = Dag::new();
        let source = dag.add_node(NodeKind::Source, &[]).expect("source");
        let e0 = dag.node(source).outputs[0];
        let exp = dag.add_node(NodeKind::Unary, &[e0]).expect("exp");
        let e1 = dag.node(exp).outputs[0];
        let reduce = dag.add_node(NodeKind::Reduce, &[e1]).expect("reduce");
        let e2 = dag.node(reduce).outputs[0];
        dag.add_node(NodeKind::Sink, &[e2]).expect("sink");
        let markers = vec![DimsEq1(vec![true]), DimsEq1(vec![false]), DimsEq1(vec![true])];
        let ops = vec![
            None,
            Some(OpAssignment::new(OpName::Exp)),
            Some(OpAssignment::with_axes(OpName::ReduceSum, [0])),
            None,
        ];
        let mut ctx = GenContext::from_seed(0);
        let err = infer_shapes(&dag, &markers, &ops, &pool(&[8]), &mut ctx)
            .expect_err("reduce input forced to 1");
        assert!(matches!(
            err,
            GenerationError::ShapeConflict {
                edge: EdgeId(1),
                axis: 0,
                ..
            }
        ));
    }
}
