//! Energy cost accounting for a single instruction dispatch (spec.md §4.2 cost model).

use crate::isa::Opcode;

/// Tunable coefficients layered on top of each opcode's catalog base cost.
/// Populated from [`crate::config::Config`].
#[derive(Debug, Clone, Copy)]
pub struct CostModel {
    /// Added per unit of positive scalar written to the environment.
    pub write_value_factor: i64,
    /// Added when a write targets a cell owned by another, unrelated organism.
    pub ownership_surcharge: i64,
    /// Added on top of base cost when an instruction fails.
    pub failure_penalty: i64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            write_value_factor: 1,
            ownership_surcharge: 5,
            failure_penalty: 2,
        }
    }
}

impl CostModel {
    /// The base cost for a non-failing, non-writing dispatch of `op`.
    pub fn base_cost(&self, op: Opcode) -> i64 {
        op.info().base_cost
    }

    /// Extra cost for writing `scalar` into a cell whose current owner is
    /// `target_owner`, from the perspective of an organism `writer_id` whose parent is
    /// `writer_parent_id` (a parent's cells count as the writer's own, spec.md §4.2).
    pub fn write_surcharge(
        &self,
        op: Opcode,
        scalar: i64,
        target_owner: Option<u64>,
        writer_id: u64,
        writer_parent_id: Option<u64>,
    ) -> i64 {
        if !op.writes_environment() {
            return 0;
        }
        let value_cost = if scalar > 0 { scalar * self.write_value_factor } else { 0 };
        let foreign = match target_owner {
            None => false,
            Some(owner) => owner != writer_id && Some(owner) != writer_parent_id,
        };
        let ownership_cost = if op.info().ownership_sensitive && foreign {
            self.ownership_surcharge
        } else {
            0
        };
        value_cost + ownership_cost
    }

    pub fn failure_cost(&self, op: Opcode) -> i64 {
        self.base_cost(op) + self.failure_penalty
    }
}
