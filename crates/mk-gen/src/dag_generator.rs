//! Reverse ("sinks first") random DAG growth.
//!
//! Growth works on a frontier of open tensor slots, each waiting for a
//! producer. Steps attach producers to open slots, merge two open slots into
//! one shared upstream, or close a slot as a leaf. Whatever is still open at
//! the end becomes a leaf. The pending nodes are then emitted in reverse
//! creation order, which puts every producer before its consumers.
//!
//! Growth may start from a core: a step log replayed verbatim before any
//! random step. Slots opened by the core stay core slots. Random steps only
//! grow non-core slots, except `InsertBinaryUpstreamOp`, which splices a
//! binary op into a core slot, and the clone step, whose kept side may be a
//! core slot.

use crate::GenContext;
use mk_core::{Dag, DagGenRequirement, DagGenType, EdgeId, GenerationError, NodeKind};
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

/// Frontier indices are positions in the open-slot list at the time the
/// step is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DagGenInstruction {
    Nope,
    AddSinkTensor,
    AddUnaryUpstreamOp {
        source_tensor_index: usize,
    },
    AddBinaryUpstreamOp {
        source_tensor_index: usize,
    },
    InsertBinaryUpstreamOp {
        source_tensor_index: usize,
    },
    AddBroadcastUpstreamOp {
        source_tensor_index: usize,
    },
    AddReduceUpstreamOp {
        source_tensor_index: usize,
    },
    AddBinaryCloneUpstream {
        lhs_source_tensor_index: usize,
        rhs_source_tensor_index: usize,
    },
    MarkFinalSourceTensor {
        source_tensor_index: usize,
    },
}

impl DagGenInstruction {
    #[must_use]
    pub fn gen_type(self) -> DagGenType {
        match self {
            Self::Nope => DagGenType::Nope,
            Self::AddSinkTensor => DagGenType::AddSinkTensor,
            Self::AddUnaryUpstreamOp { .. } => DagGenType::AddUnaryUpstreamOp,
            Self::AddBinaryUpstreamOp { .. } => DagGenType::AddBinaryUpstreamOp,
            Self::InsertBinaryUpstreamOp { .. } => DagGenType::InsertBinaryUpstreamOp,
            Self::AddBroadcastUpstreamOp { .. } => DagGenType::AddBroadcastUpstreamOp,
            Self::AddReduceUpstreamOp { .. } => DagGenType::AddReduceUpstreamOp,
            Self::AddBinaryCloneUpstream { .. } => DagGenType::AddBinaryCloneUpstream,
            Self::MarkFinalSourceTensor { .. } => DagGenType::MarkFinalSourceTensor,
        }
    }
}

/// Whether a random step type can be drawn for a frontier of `width` open
/// slots, `core_width` of them core slots.
#[must_use]
pub fn is_step_valid(
    gen_type: DagGenType,
    core_width: usize,
    width: usize,
    max_width: usize,
) -> bool {
    let free = width.saturating_sub(core_width);
    match gen_type {
        DagGenType::Nope => true,
        DagGenType::AddSinkTensor => width < max_width,
        DagGenType::AddUnaryUpstreamOp
        | DagGenType::AddBroadcastUpstreamOp
        | DagGenType::AddReduceUpstreamOp => free >= 1,
        DagGenType::AddBinaryUpstreamOp => free >= 1 && width < max_width,
        DagGenType::InsertBinaryUpstreamOp => core_width >= 1 && width < max_width,
        DagGenType::AddBinaryCloneUpstream | DagGenType::MarkFinalSourceTensor => {
            free >= 1 && width >= 2
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDag {
    pub dag: Dag,
    /// Every step applied: replayed core steps first, then random growth,
    /// then closure steps.
    pub instructions: Vec<DagGenInstruction>,
    /// Length of the replayed core prefix of `instructions`.
    pub num_core_instructions: usize,
    /// Leaves folded onto kept leaves to respect `max_num_sources`.
    pub aliased_leaves: usize,
}

pub fn generate_dag(
    requirement: &DagGenRequirement,
    ctx: &mut GenContext,
) -> Result<GeneratedDag, GenerationError> {
    generate_dag_around(requirement, &[], ctx)
}

/// Replays `core` and then grows random steps around it. Any step log
/// produced by this module is a valid core.
pub fn generate_dag_around(
    requirement: &DagGenRequirement,
    core: &[DagGenInstruction],
    ctx: &mut GenContext,
) -> Result<GeneratedDag, GenerationError> {
    if requirement.min_num_sources > requirement.max_num_sources {
        return Err(structural(
            requirement,
            format!(
                "min_num_sources {} exceeds max_num_sources {}",
                requirement.min_num_sources, requirement.max_num_sources
            ),
        ));
    }
    if requirement.max_width == 0 {
        return Err(structural(requirement, "max_width must be positive"));
    }
    if requirement.max_num_sources == 0 && !requirement.allow_constant_sources {
        return Err(structural(
            requirement,
            "no sources allowed and constant leaves are disabled",
        ));
    }

    let mut builder = ReverseBuilder::default();
    let mut instructions = Vec::with_capacity(core.len() + requirement.max_instructions + 4);
    builder.core_mode = true;
    for (position, step) in core.iter().enumerate() {
        if !builder.can_replay(*step) {
            return Err(structural(
                requirement,
                format!(
                    "core step {position} ({}) does not apply to a frontier of {} slot(s)",
                    step.gen_type().as_str(),
                    builder.frontier.len()
                ),
            ));
        }
        builder.apply(*step);
        instructions.push(*step);
    }
    builder.core_mode = false;

    for _ in 0..requirement.max_instructions {
        let step = draw_step(&builder, requirement, ctx);
        builder.apply(step);
        instructions.push(step);
    }

    if builder.num_sinks == 0 {
        builder.apply(DagGenInstruction::AddSinkTensor);
        instructions.push(DagGenInstruction::AddSinkTensor);
    }
    if builder.num_operators == 0 {
        let step = DagGenInstruction::AddUnaryUpstreamOp {
            source_tensor_index: ctx.gen_index(builder.frontier.len()),
        };
        builder.apply(step);
        instructions.push(step);
    }
    while builder.leaf_count() < requirement.min_num_sources {
        let step = DagGenInstruction::AddBinaryUpstreamOp {
            source_tensor_index: ctx.gen_index(builder.frontier.len()),
        };
        builder.apply(step);
        instructions.push(step);
    }

    let mut leaves = builder.leaves();
    let mut leaf_kind = NodeKind::Source;
    let mut aliased_leaves = 0;
    if leaves.len() > requirement.max_num_sources {
        if requirement.max_num_sources == 0 {
            leaf_kind = NodeKind::Constant;
        } else {
            let excess = leaves.split_off(requirement.max_num_sources);
            aliased_leaves = excess.len();
            for slot in excess {
                let target = leaves[ctx.gen_index(leaves.len())];
                builder.alias[slot] = Some(target);
            }
        }
    }

    let dag = builder
        .emit(&leaves, leaf_kind)
        .map_err(|detail| structural(requirement, detail))?;
    Ok(GeneratedDag {
        dag,
        instructions,
        num_core_instructions: core.len(),
        aliased_leaves,
    })
}

fn structural(requirement: &DagGenRequirement, detail: impl Into<String>) -> GenerationError {
    GenerationError::StructuralGeneration {
        detail: detail.into(),
        attempts: 0,
        requirement: serde_json::to_string(requirement).unwrap_or_default(),
    }
}

fn draw_step(
    builder: &ReverseBuilder,
    requirement: &DagGenRequirement,
    ctx: &mut GenContext,
) -> DagGenInstruction {
    let width = builder.frontier.len();
    let (core_indices, free_indices): (Vec<usize>, Vec<usize>) =
        (0..width).partition(|index| builder.is_core(builder.frontier[*index]));
    let weights = DagGenType::ALL.map(|gen_type| {
        if is_step_valid(gen_type, core_indices.len(), width, requirement.max_width) {
            requirement.pick_probability.weight(gen_type).get()
        } else {
            0.0
        }
    });
    let gen_type = ctx
        .gen_weighted(&weights)
        .map_or(DagGenType::Nope, |index| DagGenType::ALL[index]);

    match gen_type {
        DagGenType::Nope => DagGenInstruction::Nope,
        DagGenType::AddSinkTensor => DagGenInstruction::AddSinkTensor,
        DagGenType::AddUnaryUpstreamOp => DagGenInstruction::AddUnaryUpstreamOp {
            source_tensor_index: pick(&free_indices, ctx),
        },
        DagGenType::AddBinaryUpstreamOp => DagGenInstruction::AddBinaryUpstreamOp {
            source_tensor_index: pick(&free_indices, ctx),
        },
        DagGenType::AddBroadcastUpstreamOp => DagGenInstruction::AddBroadcastUpstreamOp {
            source_tensor_index: pick(&free_indices, ctx),
        },
        DagGenType::AddReduceUpstreamOp => DagGenInstruction::AddReduceUpstreamOp {
            source_tensor_index: pick(&free_indices, ctx),
        },
        DagGenType::MarkFinalSourceTensor => DagGenInstruction::MarkFinalSourceTensor {
            source_tensor_index: pick(&free_indices, ctx),
        },
        DagGenType::InsertBinaryUpstreamOp => DagGenInstruction::InsertBinaryUpstreamOp {
            source_tensor_index: pick(&core_indices, ctx),
        },
        DagGenType::AddBinaryCloneUpstream => {
            // The merged side must be a non-core slot; the kept side is any
            // other slot.
            let rhs = pick(&free_indices, ctx);
            let mut lhs = ctx.gen_index(width - 1);
            if lhs >= rhs {
                lhs += 1;
            }
            DagGenInstruction::AddBinaryCloneUpstream {
                lhs_source_tensor_index: lhs,
                rhs_source_tensor_index: rhs,
            }
        }
    }
}

fn pick(indices: &[usize], ctx: &mut GenContext) -> usize {
    indices[ctx.gen_index(indices.len())]
}

#[derive(Debug, Clone)]
struct PendingNode {
    kind: NodeKind,
    inputs: SmallVec<[usize; 2]>,
    output: Option<usize>,
}

#[derive(Debug, Default)]
struct ReverseBuilder {
    nodes: Vec<PendingNode>,
    /// Per slot: the slot it was merged into, if any.
    alias: Vec<Option<usize>>,
    /// Per slot: opened while replaying the core.
    core_slot: Vec<bool>,
    frontier: Vec<usize>,
    closed: Vec<usize>,
    num_sinks: usize,
    num_operators: usize,
    core_mode: bool,
}

impl ReverseBuilder {
    fn new_slot(&mut self, core: bool) -> usize {
        self.alias.push(None);
        self.core_slot.push(core);
        self.alias.len() - 1
    }

    fn is_core(&self, slot: usize) -> bool {
        self.core_slot[slot]
    }

    fn leaf_count(&self) -> usize {
        self.frontier.len() + self.closed.len()
    }

    fn leaves(&self) -> Vec<usize> {
        self.closed.iter().chain(&self.frontier).copied().collect()
    }

    fn resolve(&self, mut slot: usize) -> usize {
        while let Some(next) = self.alias[slot] {
            slot = next;
        }
        slot
    }

    /// Index bounds for a replayed step. Width limits do not apply to a
    /// core, which was valid when it was first grown.
    fn can_replay(&self, step: DagGenInstruction) -> bool {
        let width = self.frontier.len();
        match step {
            DagGenInstruction::Nope | DagGenInstruction::AddSinkTensor => true,
            DagGenInstruction::AddUnaryUpstreamOp {
                source_tensor_index,
            }
            | DagGenInstruction::AddBinaryUpstreamOp {
                source_tensor_index,
            }
            | DagGenInstruction::InsertBinaryUpstreamOp {
                source_tensor_index,
            }
            | DagGenInstruction::AddBroadcastUpstreamOp {
                source_tensor_index,
            }
            | DagGenInstruction::AddReduceUpstreamOp {
                source_tensor_index,
            } => source_tensor_index < width,
            DagGenInstruction::AddBinaryCloneUpstream {
                lhs_source_tensor_index,
                rhs_source_tensor_index,
            } => {
                lhs_source_tensor_index < width
                    && rhs_source_tensor_index < width
                    && lhs_source_tensor_index != rhs_source_tensor_index
            }
            DagGenInstruction::MarkFinalSourceTensor {
                source_tensor_index,
            } => source_tensor_index < width && width >= 2,
        }
    }

    fn grow_single(&mut self, kind: NodeKind, index: usize) {
        let output = self.frontier[index];
        let input = self.new_slot(self.is_core(output));
        self.nodes.push(PendingNode {
            kind,
            inputs: smallvec![input],
            output: Some(output),
        });
        self.frontier[index] = input;
        self.num_operators += 1;
    }

    fn grow_binary(&mut self, index: usize) {
        let output = self.frontier[index];
        let lhs = self.new_slot(self.is_core(output));
        let rhs = self.new_slot(self.core_mode);
        self.nodes.push(PendingNode {
            kind: NodeKind::Binary,
            inputs: smallvec![lhs, rhs],
            output: Some(output),
        });
        self.frontier[index] = lhs;
        self.frontier.push(rhs);
        self.num_operators += 1;
    }

    fn apply(&mut self, step: DagGenInstruction) {
        match step {
            DagGenInstruction::Nope => {}
            DagGenInstruction::AddSinkTensor => {
                let slot = self.new_slot(self.core_mode);
                self.nodes.push(PendingNode {
                    kind: NodeKind::Sink,
                    inputs: smallvec![slot],
                    output: None,
                });
                self.frontier.push(slot);
                self.num_sinks += 1;
            }
            DagGenInstruction::AddUnaryUpstreamOp {
                source_tensor_index,
            } => self.grow_single(NodeKind::Unary, source_tensor_index),
            DagGenInstruction::AddBroadcastUpstreamOp {
                source_tensor_index,
            } => self.grow_single(NodeKind::Broadcast, source_tensor_index),
            DagGenInstruction::AddReduceUpstreamOp {
                source_tensor_index,
            } => self.grow_single(NodeKind::Reduce, source_tensor_index),
            DagGenInstruction::AddBinaryUpstreamOp {
                source_tensor_index,
            }
            | DagGenInstruction::InsertBinaryUpstreamOp {
                source_tensor_index,
            } => self.grow_binary(source_tensor_index),
            DagGenInstruction::AddBinaryCloneUpstream {
                lhs_source_tensor_index,
                rhs_source_tensor_index,
            } => {
                let keep = self.frontier[lhs_source_tensor_index];
                let merged = self.frontier.remove(rhs_source_tensor_index);
                self.alias[merged] = Some(keep);
            }
            DagGenInstruction::MarkFinalSourceTensor {
                source_tensor_index,
            } => {
                let slot = self.frontier.remove(source_tensor_index);
                self.closed.push(slot);
            }
        }
    }

    /// Leaves first, then pending nodes in reverse creation order.
    fn emit(&self, leaves: &[usize], leaf_kind: NodeKind) -> Result<Dag, String> {
        let mut dag = Dag::new();
        let mut edge_of_slot: Vec<Option<EdgeId>> = vec![None; self.alias.len()];
        for slot in leaves {
            let node = dag
                .add_node(leaf_kind, &[])
                .map_err(|err| err.to_string())?;
            edge_of_slot[*slot] = Some(dag.node(node).outputs[0]);
        }
        for pending in self.nodes.iter().rev() {
            let mut inputs: SmallVec<[EdgeId; 2]> = SmallVec::new();
            for slot in &pending.inputs {
                let resolved = self.resolve(*slot);
                let edge = edge_of_slot[resolved]
                    .ok_or_else(|| format!("slot {resolved} has no producer at emission"))?;
                inputs.push(edge);
            }
            let node = dag
                .add_node(pending.kind, &inputs)
                .map_err(|err| err.to_string())?;
            if let Some(output) = pending.output {
                edge_of_slot[output] = Some(dag.node(node).outputs[0]);
            }
        }
        dag.validate().map_err(|err| err.to_string())?;
        Ok(dag)
    }
}
