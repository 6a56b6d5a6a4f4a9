//! Per-node record of resources promised to executions.
//!
//! The ledger itself is not synchronized. Callers hold it behind a single
//! mutex so that the fit check in [`CapacityLedger::try_reserve`] and the
//! execution record it guards are created in one critical section.

use std::collections::BTreeMap;

use tracing::debug;

use jobgrid_core::{ExecutionId, ResourceUsageData, fits};

use crate::error::{AdmissionError, AdmissionResult};

#[derive(Debug, Clone)]
pub struct CapacityLedger {
    capacity: ResourceUsageData,
    reservations: BTreeMap<ExecutionId, ResourceUsageData>,
}

impl CapacityLedger {
    pub fn new(capacity: ResourceUsageData) -> Self {
        Self {
            capacity,
            reservations: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> ResourceUsageData {
        self.capacity
    }

    /// Sum of all live reservations.
    ///
    /// Recomputed from the reservation set rather than tracked as a running
    /// total, so releasing everything yields exactly zero.
    pub fn committed(&self) -> ResourceUsageData {
        self.reservations
            .values()
            .fold(ResourceUsageData::default(), |acc, r| acc.add(r))
    }

    /// Capacity minus committed usage, floored at zero per dimension.
    pub fn remaining(&self) -> ResourceUsageData {
        self.capacity.saturating_sub(&self.committed())
    }

    /// Reserve `required` for an execution if it still fits.
    pub fn try_reserve(
        &mut self,
        execution_id: &str,
        required: ResourceUsageData,
    ) -> AdmissionResult<()> {
        if self.reservations.contains_key(execution_id) {
            return Err(AdmissionError::AlreadyReserved(execution_id.to_string()));
        }
        let remaining = self.remaining();
        if !fits(&required, &remaining) {
            return Err(AdmissionError::InsufficientResources {
                required,
                remaining,
            });
        }
        self.reservations.insert(execution_id.to_string(), required);
        debug!(%execution_id, %required, "resources reserved");
        Ok(())
    }

    /// Release an execution's reservation. Releasing twice is a no-op.
    pub fn release(&mut self, execution_id: &str) -> Option<ResourceUsageData> {
        let released = self.reservations.remove(execution_id);
        if let Some(usage) = &released {
            debug!(%execution_id, %usage, "resources released");
        }
        released
    }

    pub fn is_reserved(&self, execution_id: &str) -> bool {
        self.reservations.contains_key(execution_id)
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }
}
