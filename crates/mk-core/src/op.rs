use crate::NodeKind;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// How an operator's output shape relates to its input shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeRelation {
    /// No inputs; the output shape is imposed from outside.
    Fill,
    Elementwise,
    Broadcasting,
    /// Listed size-1 axes of the input grow to the output size.
    Expansion,
    /// Reduced axes shrink to size 1 (keepdims).
    Reduction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpName {
    Ones,
    Zeros,
    Linspace,
    Exp,
    Negative,
    Abs,
    Relu,
    Sigmoid,
    Tanh,
    Sin,
    Cos,
    Add,
    Subtract,
    Multiply,
    Maximum,
    Minimum,
    Expand,
    ReduceSum,
    ReduceMax,
    ReduceMin,
}

impl OpName {
    pub const ALL: [OpName; 20] = [
        Self::Ones,
        Self::Zeros,
        Self::Linspace,
        Self::Exp,
        Self::Negative,
        Self::Abs,
        Self::Relu,
        Self::Sigmoid,
        Self::Tanh,
        Self::Sin,
        Self::Cos,
        Self::Add,
        Self::Subtract,
        Self::Multiply,
        Self::Maximum,
        Self::Minimum,
        Self::Expand,
        Self::ReduceSum,
        Self::ReduceMax,
        Self::ReduceMin,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ones => "ones",
            Self::Zeros => "zeros",
            Self::Linspace => "linspace",
            Self::Exp => "exp",
            Self::Negative => "negative",
            Self::Abs => "abs",
            Self::Relu => "relu",
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Multiply => "multiply",
            Self::Maximum => "maximum",
            Self::Minimum => "minimum",
            Self::Expand => "expand",
            Self::ReduceSum => "reduce_sum",
            Self::ReduceMax => "reduce_max",
            Self::ReduceMin => "reduce_min",
        }
    }

    #[must_use]
    pub fn node_kind(self) -> NodeKind {
        match self {
            Self::Ones | Self::Zeros | Self::Linspace => NodeKind::Constant,
            Self::Exp
            | Self::Negative
            | Self::Abs
            | Self::Relu
            | Self::Sigmoid
            | Self::Tanh
            | Self::Sin
            | Self::Cos => NodeKind::Unary,
            Self::Add | Self::Subtract | Self::Multiply | Self::Maximum | Self::Minimum => {
                NodeKind::Binary
            }
            Self::Expand => NodeKind::Broadcast,
            Self::ReduceSum | Self::ReduceMax | Self::ReduceMin => NodeKind::Reduce,
        }
    }

    #[must_use]
    pub fn input_arity(self) -> usize {
        self.node_kind().input_arity()
    }

    #[must_use]
    pub fn shape_relation(self) -> ShapeRelation {
        match self.node_kind() {
            NodeKind::Constant => ShapeRelation::Fill,
            NodeKind::Binary => ShapeRelation::Broadcasting,
            NodeKind::Broadcast => ShapeRelation::Expansion,
            NodeKind::Reduce => ShapeRelation::Reduction,
            NodeKind::Unary | NodeKind::Source | NodeKind::Sink => ShapeRelation::Elementwise,
        }
    }

    /// Whether the operator carries an axis list.
    #[must_use]
    pub fn takes_axes(self) -> bool {
        matches!(
            self.shape_relation(),
            ShapeRelation::Expansion | ShapeRelation::Reduction
        )
    }

    pub fn of_kind(kind: NodeKind) -> impl Iterator<Item = OpName> {
        Self::ALL.into_iter().filter(move |op| op.node_kind() == kind)
    }
}

/// Operator chosen for one node. `axes` lists the reduced axes of a reduce
/// or the expanded axes of a broadcast and is empty otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpAssignment {
    pub op: OpName,
    pub axes: SmallVec<[usize; 4]>,
}

impl OpAssignment {
    #[must_use]
    pub fn new(op: OpName) -> Self {
        Self {
            op,
            axes: SmallVec::new(),
        }
    }

    #[must_use]
    pub fn with_axes(op: OpName, axes: impl IntoIterator<Item = usize>) -> Self {
        Self {
            op,
            axes: axes.into_iter().collect(),
        }
    }
}
