#![allow(dead_code)]

use mk_core::{
    DagGenRequirement, DimSizeRequirement, DimsEq1GenRequirement, PickWeight, StaticDim,
    UnitTestCaseRequirement,
};

pub struct ByteCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteCursor<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take_raw_u8(&mut self) -> u8 {
        if self.data.is_empty() {
            return 0;
        }

        let byte = self.data[self.offset % self.data.len()];
        self.offset = self.offset.saturating_add(1);
        byte
    }

    #[must_use]
    pub fn take_u8(&mut self) -> u8 {
        self.take_raw_u8()
    }

    #[must_use]
    pub fn take_bool(&mut self) -> bool {
        self.take_raw_u8() % 2 == 0
    }

    #[must_use]
    pub fn take_u32(&mut self) -> u32 {
        u32::from(self.take_raw_u8())
            | (u32::from(self.take_raw_u8()) << 8)
            | (u32::from(self.take_raw_u8()) << 16)
            | (u32::from(self.take_raw_u8()) << 24)
    }

    #[must_use]
    pub fn take_u64(&mut self) -> u64 {
        u64::from(self.take_u32()) | (u64::from(self.take_u32()) << 32)
    }

    #[must_use]
    pub fn take_usize(&mut self, inclusive_max: usize) -> usize {
        if inclusive_max == 0 {
            return 0;
        }
        usize::from(self.take_raw_u8()) % (inclusive_max + 1)
    }

    /// Value in `[0, 1]` with 1/255 resolution.
    #[must_use]
    pub fn take_unit_f64(&mut self) -> f64 {
        f64::from(self.take_raw_u8()) / 255.0
    }

    #[must_use]
    pub fn take_i64_size(&mut self, inclusive_max: usize) -> i64 {
        if self.take_u8() % 8 == 0 {
            return -1;
        }
        i64::try_from(self.take_usize(inclusive_max)).unwrap_or(-1)
    }
}

/// Small requirements only, so a single input stays fast. Bounds may come
/// out inverted; generation is expected to reject those cleanly.
#[must_use]
pub fn sample_requirement(cursor: &mut ByteCursor<'_>) -> UnitTestCaseRequirement {
    let mut requirement = UnitTestCaseRequirement {
        dag_gen_requirement: DagGenRequirement {
            min_num_sources: cursor.take_usize(4),
            max_num_sources: cursor.take_usize(4),
            max_width: cursor.take_usize(6),
            max_instructions: cursor.take_usize(24),
            allow_constant_sources: cursor.take_bool(),
            ..DagGenRequirement::default()
        },
        dims_eq1_gen_requirement: DimsEq1GenRequirement {
            dims_eq1_probability: (0..=cursor.take_usize(3))
                .map(|_| cursor.take_unit_f64())
                .collect(),
        },
        dim_size_requirement: DimSizeRequirement {
            dim_size: (0..=cursor.take_usize(2))
                .map(|_| StaticDim(u32::from(cursor.take_u8() % 16)))
                .collect(),
        },
        max_generation_attempts: u32::from(cursor.take_u8() % 16),
        ..UnitTestCaseRequirement::default()
    };

    let weights = &mut requirement.dag_gen_requirement.pick_probability;
    for weight in [
        &mut weights.nope,
        &mut weights.add_sink_tensor,
        &mut weights.add_unary_upstream_op,
        &mut weights.add_binary_upstream_op,
        &mut weights.insert_binary_upstream_op,
        &mut weights.add_broadcast_upstream_op,
        &mut weights.add_reduce_upstream_op,
        &mut weights.add_binary_clone_upstream,
        &mut weights.mark_final_source_tensor,
    ] {
        *weight = PickWeight::new(cursor.take_unit_f64());
    }
    requirement
}
