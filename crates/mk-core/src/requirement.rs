use crate::{NodeKind, OpName, RequirementError, StaticDim};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_GENERATION_ATTEMPTS: u32 = 64;
pub const MAX_GENERATION_ATTEMPTS_LIMIT: u32 = 1024;
pub const MAX_RANK: usize = 8;
pub const MAX_WIDTH_LIMIT: usize = 64;
pub const MAX_INSTRUCTIONS_LIMIT: usize = 4096;
/// Largest `start_index` that leaves room to name every edge of a
/// maximal DAG.
pub const MAX_TENSOR_NAME_START_INDEX: u64 = u64::MAX - (MAX_INSTRUCTIONS_LIMIT as u64) * 8;

/// One growth step of the reverse DAG generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DagGenType {
    Nope,
    AddSinkTensor,
    AddUnaryUpstreamOp,
    AddBinaryUpstreamOp,
    /// Splices a binary op into a core slot. Only valid around a core.
    InsertBinaryUpstreamOp,
    AddBroadcastUpstreamOp,
    AddReduceUpstreamOp,
    AddBinaryCloneUpstream,
    MarkFinalSourceTensor,
}

impl DagGenType {
    pub const ALL: [DagGenType; 9] = [
        Self::Nope,
        Self::AddSinkTensor,
        Self::AddUnaryUpstreamOp,
        Self::AddBinaryUpstreamOp,
        Self::InsertBinaryUpstreamOp,
        Self::AddBroadcastUpstreamOp,
        Self::AddReduceUpstreamOp,
        Self::AddBinaryCloneUpstream,
        Self::MarkFinalSourceTensor,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nope => "nope",
            Self::AddSinkTensor => "add_sink_tensor",
            Self::AddUnaryUpstreamOp => "add_unary_upstream_op",
            Self::AddBinaryUpstreamOp => "add_binary_upstream_op",
            Self::InsertBinaryUpstreamOp => "insert_binary_upstream_op",
            Self::AddBroadcastUpstreamOp => "add_broadcast_upstream_op",
            Self::AddReduceUpstreamOp => "add_reduce_upstream_op",
            Self::AddBinaryCloneUpstream => "add_binary_clone_upstream",
            Self::MarkFinalSourceTensor => "mark_final_source_tensor",
        }
    }
}

/// Non-negative relative weight. Negative and NaN inputs clamp to zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct PickWeight(f64);

impl PickWeight {
    #[must_use]
    pub fn new(weight: f64) -> Self {
        if weight.is_nan() || weight < 0.0 {
            Self(0.0)
        } else {
            Self(weight)
        }
    }

    #[must_use]
    pub fn get(self) -> f64 {
        self.0
    }

    #[must_use]
    pub fn is_positive(self) -> bool {
        self.0 > 0.0
    }
}

impl From<f64> for PickWeight {
    fn from(weight: f64) -> Self {
        Self::new(weight)
    }
}

impl From<PickWeight> for f64 {
    fn from(weight: PickWeight) -> Self {
        weight.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DagGenTypePickProbability {
    pub nope: PickWeight,
    pub add_sink_tensor: PickWeight,
    pub add_unary_upstream_op: PickWeight,
    pub add_binary_upstream_op: PickWeight,
    pub insert_binary_upstream_op: PickWeight,
    pub add_broadcast_upstream_op: PickWeight,
    pub add_reduce_upstream_op: PickWeight,
    pub add_binary_clone_upstream: PickWeight,
    pub mark_final_source_tensor: PickWeight,
}

impl Default for DagGenTypePickProbability {
    fn default() -> Self {
        Self {
            nope: PickWeight::new(0.1),
            add_sink_tensor: PickWeight::new(0.1),
            add_unary_upstream_op: PickWeight::new(0.3),
            add_binary_upstream_op: PickWeight::new(0.25),
            insert_binary_upstream_op: PickWeight::new(0.1),
            add_broadcast_upstream_op: PickWeight::new(0.05),
            add_reduce_upstream_op: PickWeight::new(0.05),
            add_binary_clone_upstream: PickWeight::new(0.1),
            mark_final_source_tensor: PickWeight::new(0.05),
        }
    }
}

impl DagGenTypePickProbability {
    #[must_use]
    pub fn weight(&self, gen_type: DagGenType) -> PickWeight {
        match gen_type {
            DagGenType::Nope => self.nope,
            DagGenType::AddSinkTensor => self.add_sink_tensor,
            DagGenType::AddUnaryUpstreamOp => self.add_unary_upstream_op,
            DagGenType::AddBinaryUpstreamOp => self.add_binary_upstream_op,
            DagGenType::InsertBinaryUpstreamOp => self.insert_binary_upstream_op,
            DagGenType::AddBroadcastUpstreamOp => self.add_broadcast_upstream_op,
            DagGenType::AddReduceUpstreamOp => self.add_reduce_upstream_op,
            DagGenType::AddBinaryCloneUpstream => self.add_binary_clone_upstream,
            DagGenType::MarkFinalSourceTensor => self.mark_final_source_tensor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DagGenRequirement {
    pub min_num_sources: usize,
    pub max_num_sources: usize,
    /// Upper bound on the number of open tensor slots during growth.
    pub max_width: usize,
    /// Number of random growth steps before the closure phase.
    pub max_instructions: usize,
    /// Whether a zero-source configuration may use constant leaves.
    pub allow_constant_sources: bool,
    pub pick_probability: DagGenTypePickProbability,
}

impl Default for DagGenRequirement {
    fn default() -> Self {
        Self {
            min_num_sources: 1,
            max_num_sources: 4,
            max_width: 4,
            max_instructions: 16,
            allow_constant_sources: true,
            pick_probability: DagGenTypePickProbability::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimsEq1GenRequirement {
    /// Probability that each axis is forced to size 1; the length is the
    /// tensor rank.
    pub dims_eq1_probability: Vec<f64>,
}

impl Default for DimsEq1GenRequirement {
    fn default() -> Self {
        Self {
            dims_eq1_probability: vec![0.1, 0.2, 0.2],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpNameGenRequirement {
    pub constant_op_names: Vec<OpName>,
    pub unary_op_names: Vec<OpName>,
    pub binary_op_names: Vec<OpName>,
    pub broadcast_op_names: Vec<OpName>,
    pub reduce_op_names: Vec<OpName>,
}

impl Default for OpNameGenRequirement {
    fn default() -> Self {
        Self {
            constant_op_names: OpName::of_kind(NodeKind::Constant).collect(),
            unary_op_names: OpName::of_kind(NodeKind::Unary).collect(),
            binary_op_names: OpName::of_kind(NodeKind::Binary).collect(),
            broadcast_op_names: OpName::of_kind(NodeKind::Broadcast).collect(),
            reduce_op_names: OpName::of_kind(NodeKind::Reduce).collect(),
        }
    }
}

impl OpNameGenRequirement {
    /// Allowed vocabulary for a node kind. Sources and sinks carry no
    /// operator and always get an empty slice.
    #[must_use]
    pub fn op_names_for(&self, kind: NodeKind) -> &[OpName] {
        match kind {
            NodeKind::Constant => &self.constant_op_names,
            NodeKind::Unary => &self.unary_op_names,
            NodeKind::Binary => &self.binary_op_names,
            NodeKind::Broadcast => &self.broadcast_op_names,
            NodeKind::Reduce => &self.reduce_op_names,
            NodeKind::Source | NodeKind::Sink => &[],
        }
    }

    fn field_for(kind: NodeKind) -> &'static str {
        match kind {
            NodeKind::Constant => "constant_op_names",
            NodeKind::Unary => "unary_op_names",
            NodeKind::Binary => "binary_op_names",
            NodeKind::Broadcast => "broadcast_op_names",
            NodeKind::Reduce => "reduce_op_names",
            NodeKind::Source | NodeKind::Sink => "op_name_gen_requirement",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TensorNameGenRequirement {
    pub prefix: String,
    pub start_index: u64,
}

impl Default for TensorNameGenRequirement {
    fn default() -> Self {
        Self {
            prefix: "tensor".to_owned(),
            start_index: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimSizeRequirement {
    pub dim_size: Vec<StaticDim>,
}

impl Default for DimSizeRequirement {
    fn default() -> Self {
        Self {
            dim_size: vec![StaticDim(128), StaticDim(64), StaticDim(32)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitTestCaseRequirement {
    pub dag_gen_requirement: DagGenRequirement,
    pub dims_eq1_gen_requirement: DimsEq1GenRequirement,
    pub op_name_gen_requirement: OpNameGenRequirement,
    pub tensor_name_gen_requirement: TensorNameGenRequirement,
    pub dim_size_requirement: DimSizeRequirement,
    pub max_generation_attempts: u32,
}

impl Default for UnitTestCaseRequirement {
    fn default() -> Self {
        Self {
            dag_gen_requirement: DagGenRequirement::default(),
            dims_eq1_gen_requirement: DimsEq1GenRequirement::default(),
            op_name_gen_requirement: OpNameGenRequirement::default(),
            tensor_name_gen_requirement: TensorNameGenRequirement::default(),
            dim_size_requirement: DimSizeRequirement::default(),
            max_generation_attempts: DEFAULT_MAX_GENERATION_ATTEMPTS,
        }
    }
}

fn invalid(field: &'static str, detail: impl Into<String>) -> RequirementError {
    RequirementError::InvalidField {
        field,
        detail: detail.into(),
    }
}

impl UnitTestCaseRequirement {
    /// Parses a requirement from JSON. Missing fields take their defaults
    /// and the result is validated.
    pub fn from_json_str(json: &str) -> Result<Self, RequirementError> {
        let requirement: Self = serde_json::from_str(json).map_err(|err| RequirementError::Json {
            detail: err.to_string(),
        })?;
        requirement.validated()
    }

    pub fn validated(self) -> Result<Self, RequirementError> {
        self.validate()?;
        Ok(self)
    }

    /// Tensor rank shared by every edge.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims_eq1_gen_requirement.dims_eq1_probability.len()
    }

    #[must_use]
    pub fn to_json_snapshot(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| format!("{{\"unserializable\":\"{err}\"}}"))
    }

    pub fn validate(&self) -> Result<(), RequirementError> {
        let dag = &self.dag_gen_requirement;
        if dag.min_num_sources > dag.max_num_sources {
            return Err(invalid(
                "min_num_sources",
                format!(
                    "min_num_sources {} exceeds max_num_sources {}",
                    dag.min_num_sources, dag.max_num_sources
                ),
            ));
        }
        if dag.max_width == 0 || dag.max_width > MAX_WIDTH_LIMIT {
            return Err(invalid(
                "max_width",
                format!("must be within 1..={MAX_WIDTH_LIMIT}, got {}", dag.max_width),
            ));
        }
        if dag.min_num_sources > dag.max_width {
            return Err(invalid(
                "min_num_sources",
                format!(
                    "min_num_sources {} exceeds max_width {}",
                    dag.min_num_sources, dag.max_width
                ),
            ));
        }
        if dag.max_instructions > MAX_INSTRUCTIONS_LIMIT {
            return Err(invalid(
                "max_instructions",
                format!("must be at most {MAX_INSTRUCTIONS_LIMIT}, got {}", dag.max_instructions),
            ));
        }
        if dag.max_num_sources == 0 {
            if !dag.allow_constant_sources {
                return Err(invalid(
                    "allow_constant_sources",
                    "zero-source configuration requires constant leaves",
                ));
            }
            if self.op_name_gen_requirement.constant_op_names.is_empty() {
                return Err(invalid(
                    "constant_op_names",
                    "zero-source configuration requires a constant vocabulary",
                ));
            }
        }

        let probabilities = &self.dims_eq1_gen_requirement.dims_eq1_probability;
        if probabilities.is_empty() || probabilities.len() > MAX_RANK {
            return Err(invalid(
                "dims_eq1_probability",
                format!("rank must be within 1..={MAX_RANK}, got {}", probabilities.len()),
            ));
        }
        if let Some(p) = probabilities
            .iter()
            .find(|p| !p.is_finite() || **p < 0.0 || **p > 1.0)
        {
            return Err(invalid(
                "dims_eq1_probability",
                format!("probability {p} is outside [0, 1]"),
            ));
        }

        self.validate_vocabulary()?;

        let prefix = &self.tensor_name_gen_requirement.prefix;
        let starts_ok = prefix
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !starts_ok || !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid(
                "prefix",
                format!("`{prefix}` is not a valid identifier prefix"),
            ));
        }

        let start_index = self.tensor_name_gen_requirement.start_index;
        if start_index > MAX_TENSOR_NAME_START_INDEX {
            return Err(invalid(
                "start_index",
                format!("must be at most {MAX_TENSOR_NAME_START_INDEX}, got {start_index}"),
            ));
        }

        let pool = &self.dim_size_requirement.dim_size;
        if pool.is_empty() {
            return Err(invalid("dim_size", "dimension pool is empty"));
        }
        if pool.iter().any(|dim| dim.get() == 0) {
            return Err(invalid("dim_size", "dimension pool contains a zero size"));
        }

        if self.max_generation_attempts == 0
            || self.max_generation_attempts > MAX_GENERATION_ATTEMPTS_LIMIT
        {
            return Err(invalid(
                "max_generation_attempts",
                format!(
                    "must be within 1..={MAX_GENERATION_ATTEMPTS_LIMIT}, got {}",
                    self.max_generation_attempts
                ),
            ));
        }
        Ok(())
    }

    fn validate_vocabulary(&self) -> Result<(), RequirementError> {
        let vocab = &self.op_name_gen_requirement;
        let weights = &self.dag_gen_requirement.pick_probability;
        let kinds = [
            NodeKind::Constant,
            NodeKind::Unary,
            NodeKind::Binary,
            NodeKind::Broadcast,
            NodeKind::Reduce,
        ];
        for kind in kinds {
            if let Some(op) = vocab
                .op_names_for(kind)
                .iter()
                .find(|op| op.node_kind() != kind)
            {
                return Err(invalid(
                    OpNameGenRequirement::field_for(kind),
                    format!("{} is not a {} operator", op.as_str(), kind.as_str()),
                ));
            }
        }

        // The closure phase always inserts one unary op and grows with
        // binary ops until the leaf minimum is met.
        let required = [
            (NodeKind::Unary, true),
            (
                NodeKind::Binary,
                weights.add_binary_upstream_op.is_positive()
                    || weights.insert_binary_upstream_op.is_positive()
                    || self.dag_gen_requirement.min_num_sources > 1,
            ),
            (NodeKind::Broadcast, weights.add_broadcast_upstream_op.is_positive()),
            (NodeKind::Reduce, weights.add_reduce_upstream_op.is_positive()),
        ];
        for (kind, needed) in required {
            if needed && vocab.op_names_for(kind).is_empty() {
                return Err(invalid(
                    OpNameGenRequirement::field_for(kind),
                    format!("{} vocabulary is empty but the kind can be generated", kind.as_str()),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DagGenRequirement, DagGenType, DagGenTypePickProbability, DimSizeRequirement,
        DimsEq1GenRequirement, OpNameGenRequirement, PickWeight, UnitTestCaseRequirement,
    };
    use crate::{NodeKind, OpName, RequirementError, StaticDim};

    fn field_of(err: RequirementError) -> &'static str {
        match err {
            RequirementError::InvalidField { field, .. } => field,
            RequirementError::Json { .. } => "<json>",
        }
    }

    #[test]
    fn default_requirement_is_valid() {
        let requirement = UnitTestCaseRequirement::default();
        requirement.validate().expect("defaults should validate");
        assert_eq!(requirement.rank(), 3);
        assert_eq!(requirement.max_generation_attempts, 64);
    }

    #[test]
    fn pick_weight_clamps_negative_and_nan() {
        assert_eq!(PickWeight::new(-0.5).get(), 0.0);
        assert_eq!(PickWeight::new(f64::NAN).get(), 0.0);
        assert_eq!(PickWeight::new(0.25).get(), 0.25);
        let parsed: PickWeight = serde_json::from_str("-3.0").expect("weight json");
        assert!(!parsed.is_positive());
    }

    #[test]
    fn weights_are_addressable_by_gen_type() {
        let weights = DagGenTypePickProbability::default();
        let total: f64 = DagGenType::ALL
            .iter()
            .filter(|ty| **ty != DagGenType::InsertBinaryUpstreamOp)
            .map(|ty| weights.weight(*ty).get())
            .sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(weights.weight(DagGenType::InsertBinaryUpstreamOp).get(), 0.1);
        assert_eq!(weights.weight(DagGenType::AddUnaryUpstreamOp).get(), 0.3);
    }

    #[test]
    fn empty_dimension_pool_is_rejected() {
        let requirement = UnitTestCaseRequirement {
            dim_size_requirement: DimSizeRequirement { dim_size: vec![] },
            ..UnitTestCaseRequirement::default()
        };
        let err = requirement.validate().expect_err("empty pool must fail");
        assert_eq!(field_of(err), "dim_size");
    }

    #[test]
    fn zero_sized_dimension_is_rejected() {
        let requirement = UnitTestCaseRequirement {
            dim_size_requirement: DimSizeRequirement {
                dim_size: vec![StaticDim(8), StaticDim(0)],
            },
            ..UnitTestCaseRequirement::default()
        };
        assert_eq!(field_of(requirement.validate().expect_err("zero dim")), "dim_size");
    }

    #[test]
    fn inverted_source_bounds_are_rejected() {
        let requirement = UnitTestCaseRequirement {
            dag_gen_requirement: DagGenRequirement {
                min_num_sources: 3,
                max_num_sources: 2,
                ..DagGenRequirement::default()
            },
            ..UnitTestCaseRequirement::default()
        };
        assert_eq!(
            field_of(requirement.validate().expect_err("min > max")),
            "min_num_sources"
        );
    }

    #[test]
    fn probabilities_must_be_in_unit_interval() {
        for bad in [vec![], vec![0.5, 1.5], vec![f64::NAN]] {
            let requirement = UnitTestCaseRequirement {
                dims_eq1_gen_requirement: DimsEq1GenRequirement {
                    dims_eq1_probability: bad,
                },
                ..UnitTestCaseRequirement::default()
            };
            assert_eq!(
                field_of(requirement.validate().expect_err("bad probability")),
                "dims_eq1_probability"
            );
        }
    }

    #[test]
    fn zero_sources_needs_constant_leaves() {
        let mut requirement = UnitTestCaseRequirement {
            dag_gen_requirement: DagGenRequirement {
                min_num_sources: 0,
                max_num_sources: 0,
                allow_constant_sources: false,
                ..DagGenRequirement::default()
            },
            ..UnitTestCaseRequirement::default()
        };
        assert_eq!(
            field_of(requirement.validate().expect_err("constants disallowed")),
            "allow_constant_sources"
        );
        requirement.dag_gen_requirement.allow_constant_sources = true;
        requirement.validate().expect("constants allowed");
    }

    #[test]
    fn vocabulary_must_match_kind_and_cover_weighted_kinds() {
        let mismatched = UnitTestCaseRequirement {
            op_name_gen_requirement: OpNameGenRequirement {
                unary_op_names: vec![OpName::Add],
                ..OpNameGenRequirement::default()
            },
            ..UnitTestCaseRequirement::default()
        };
        assert_eq!(
            field_of(mismatched.validate().expect_err("add is not unary")),
            "unary_op_names"
        );

        let mut no_reduce = UnitTestCaseRequirement {
            op_name_gen_requirement: OpNameGenRequirement {
                reduce_op_names: vec![],
                ..OpNameGenRequirement::default()
            },
            ..UnitTestCaseRequirement::default()
        };
        assert_eq!(
            field_of(no_reduce.validate().expect_err("reduce weight is positive")),
            "reduce_op_names"
        );
        no_reduce
            .dag_gen_requirement
            .pick_probability
            .add_reduce_upstream_op = PickWeight::new(0.0);
        no_reduce.validate().expect("reduce is never generated");
    }

    #[test]
    fn attempt_bound_is_checked() {
        for attempts in [0, 1025] {
            let requirement = UnitTestCaseRequirement {
                max_generation_attempts: attempts,
                ..UnitTestCaseRequirement::default()
            };
            assert_eq!(
                field_of(requirement.validate().expect_err("attempt bound")),
                "max_generation_attempts"
            );
        }
    }

    #[test]
    fn start_index_leaves_room_for_every_name() {
        let mut requirement = UnitTestCaseRequirement::default();
        requirement.tensor_name_gen_requirement.start_index = u64::MAX;
        assert_eq!(field_of(requirement.validate().expect_err("no headroom")), "start_index");
        requirement.tensor_name_gen_requirement.start_index = super::MAX_TENSOR_NAME_START_INDEX;
        requirement.validate().expect("largest start index");
    }

    #[test]
    fn invalid_prefix_is_rejected() {
        let mut requirement = UnitTestCaseRequirement::default();
        requirement.tensor_name_gen_requirement.prefix = "9lives".to_owned();
        assert_eq!(field_of(requirement.validate().expect_err("prefix")), "prefix");
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let requirement = UnitTestCaseRequirement::from_json_str(
            r#"{"dag_gen_requirement":{"min_num_sources":1,"max_num_sources":1},
                "dims_eq1_gen_requirement":{"dims_eq1_probability":[0.0]},
                "dim_size_requirement":{"dim_size":[8]}}"#,
        )
        .expect("json should parse");
        assert_eq!(requirement.dag_gen_requirement.max_width, 4);
        assert_eq!(requirement.dim_size_requirement.dim_size, vec![StaticDim(8)]);
        assert_eq!(requirement.rank(), 1);
        assert_eq!(
            requirement.op_name_gen_requirement.op_names_for(NodeKind::Reduce),
            &[OpName::ReduceSum, OpName::ReduceMax, OpName::ReduceMin]
        );
    }

    #[test]
    fn json_errors_are_reported() {
        let err = UnitTestCaseRequirement::from_json_str("{not json")
            .expect_err("malformed json must fail");
        assert!(matches!(err, RequirementError::Json { .. }));
        let err = UnitTestCaseRequirement::from_json_str(r#"{"dim_size_requirement":{"dim_size":[]}}"#)
            .expect_err("empty pool must fail");
        assert_eq!(field_of(err), "dim_size");
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let requirement = UnitTestCaseRequirement::default();
        let snapshot = requirement.to_json_snapshot();
        let back = UnitTestCaseRequirement::from_json_str(&snapshot).expect("snapshot parses");
        assert_eq!(back, requirement);
    }
}
