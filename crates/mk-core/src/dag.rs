use crate::{DimsEq1, OpAssignment, Shape, TensorName};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub u32);

impl NodeId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl EdgeId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Source,
    Constant,
    Unary,
    Binary,
    Broadcast,
    Reduce,
    Sink,
}

impl NodeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Constant => "constant",
            Self::Unary => "unary",
            Self::Binary => "binary",
            Self::Broadcast => "broadcast",
            Self::Reduce => "reduce",
            Self::Sink => "sink",
        }
    }

    #[must_use]
    pub fn input_arity(self) -> usize {
        match self {
            Self::Source | Self::Constant => 0,
            Self::Unary | Self::Broadcast | Self::Reduce | Self::Sink => 1,
            Self::Binary => 2,
        }
    }

    #[must_use]
    pub fn output_arity(self) -> usize {
        match self {
            Self::Sink => 0,
            _ => 1,
        }
    }

    /// Leaves have no inputs and count toward the source bounds.
    #[must_use]
    pub fn is_leaf(self) -> bool {
        matches!(self, Self::Source | Self::Constant)
    }

    /// Kinds that receive an operator from the op name generator.
    #[must_use]
    pub fn is_operator(self) -> bool {
        !matches!(self, Self::Source | Self::Sink)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub inputs: SmallVec<[EdgeId; 2]>,
    pub outputs: SmallVec<[EdgeId; 1]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub producer: NodeId,
    pub consumers: SmallVec<[NodeId; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DagError {
    UnknownEdge {
        edge: EdgeId,
    },
    ArityMismatch {
        kind: NodeKind,
        expected: usize,
        actual: usize,
    },
    DanglingEdge {
        edge: EdgeId,
    },
    NonTopologicalEdge {
        edge: EdgeId,
        producer: NodeId,
        consumer: NodeId,
    },
    AdjacencyMismatch {
        edge: EdgeId,
        node: NodeId,
    },
}

impl fmt::Display for DagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownEdge { edge } => write!(f, "edge {edge} does not exist"),
            Self::ArityMismatch {
                kind,
                expected,
                actual,
            } => write!(
                f,
                "{} node expects {} inputs, got {}",
                kind.as_str(),
                expected,
                actual
            ),
            Self::DanglingEdge { edge } => write!(f, "edge {edge} has no consumer"),
            Self::NonTopologicalEdge {
                edge,
                producer,
                consumer,
            } => write!(
                f,
                "edge {edge} runs from {producer} to earlier node {consumer}"
            ),
            Self::AdjacencyMismatch { edge, node } => {
                write!(f, "edge {edge} and node {node} disagree on adjacency")
            }
        }
    }
}

impl std::error::Error for DagError {}

/// Arena of nodes and edges. Node ids are handed out in insertion order and
/// a node may only consume edges that already exist, so id order is a
/// topological order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dag {
    nodes: Vec<DagNode>,
    edges: Vec<Edge>,
}

impl Dag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node consuming `inputs` and allocates its output edges.
    pub fn add_node(&mut self, kind: NodeKind, inputs: &[EdgeId]) -> Result<NodeId, DagError> {
        if inputs.len() != kind.input_arity() {
            return Err(DagError::ArityMismatch {
                kind,
                expected: kind.input_arity(),
                actual: inputs.len(),
            });
        }
        if let Some(edge) = inputs.iter().find(|edge| edge.index() >= self.edges.len()) {
            return Err(DagError::UnknownEdge { edge: *edge });
        }

        let id = NodeId(self.nodes.len() as u32);
        for edge in inputs {
            self.edges[edge.index()].consumers.push(id);
        }
        let mut outputs = SmallVec::new();
        for _ in 0..kind.output_arity() {
            let edge_id = EdgeId(self.edges.len() as u32);
            self.edges.push(Edge {
                id: edge_id,
                producer: id,
                consumers: SmallVec::new(),
            });
            outputs.push(edge_id);
        }
        self.nodes.push(DagNode {
            id,
            kind,
            inputs: inputs.iter().copied().collect(),
            outputs,
        });
        Ok(id)
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &DagNode {
        &self.nodes[id.index()]
    }

    #[must_use]
    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.index()]
    }

    #[must_use]
    pub fn nodes(&self) -> &[DagNode] {
        &self.nodes
    }

    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &DagNode> + '_ {
        self.nodes.iter().filter(move |node| node.kind == kind)
    }

    /// Number of leaf nodes (sources and constants).
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.kind.is_leaf()).count()
    }

    #[must_use]
    pub fn source_count(&self) -> usize {
        self.nodes_of_kind(NodeKind::Source).count()
    }

    /// Checks arity, adjacency symmetry, topological id order and that every
    /// edge is consumed.
    pub fn validate(&self) -> Result<(), DagError> {
        for node in &self.nodes {
            if node.inputs.len() != node.kind.input_arity()
                || node.outputs.len() != node.kind.output_arity()
            {
                return Err(DagError::ArityMismatch {
                    kind: node.kind,
                    expected: node.kind.input_arity(),
                    actual: node.inputs.len(),
                });
            }
            for edge_id in &node.inputs {
                let edge = self
                    .edges
                    .get(edge_id.index())
                    .ok_or(DagError::UnknownEdge { edge: *edge_id })?;
                if edge.producer >= node.id {
                    return Err(DagError::NonTopologicalEdge {
                        edge: edge.id,
                        producer: edge.producer,
                        consumer: node.id,
                    });
                }
                if !edge.consumers.contains(&node.id) {
                    return Err(DagError::AdjacencyMismatch {
                        edge: edge.id,
                        node: node.id,
                    });
                }
            }
            for edge_id in &node.outputs {
                let edge = self
                    .edges
                    .get(edge_id.index())
                    .ok_or(DagError::UnknownEdge { edge: *edge_id })?;
                if edge.producer != node.id {
                    return Err(DagError::AdjacencyMismatch {
                        edge: edge.id,
                        node: node.id,
                    });
                }
            }
        }
        for edge in &self.edges {
            if edge.consumers.is_empty() {
                return Err(DagError::DanglingEdge { edge: edge.id });
            }
        }
        Ok(())
    }
}

/// Per-edge and per-node annotations layered on a [`Dag`]: `dims_eq1`,
/// `names` and `shapes` are indexed by edge id, `ops` by node id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagAnnotations {
    pub dims_eq1: Vec<DimsEq1>,
    pub ops: Vec<Option<OpAssignment>>,
    pub names: Vec<TensorName>,
    pub shapes: Vec<Shape>,
}
