//! Job selection policy evaluation.
//!
//! Checks run in a fixed order and stop at the first rejection:
//! stateless jobs, data locality, resource fit, then any probes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use jobgrid_core::{JobSelectionPolicy, JobSpec, Locality, ResourceUsageData, fits};

use crate::probe::{BidProbe, ExecProbe, HttpProbe, ProbeVerdict};

pub const REASON_STATELESS_REJECTED: &str = "stateless job rejected by policy";
pub const REASON_NON_LOCAL_DATA: &str = "non-local data under Local policy";
pub const REASON_INSUFFICIENT_RESOURCES: &str = "insufficient resources";

/// Outcome of admission. A rejection carries the reason shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidDecision {
    pub accept: bool,
    pub reason: String,
}

impl BidDecision {
    pub fn accept() -> Self {
        Self {
            accept: true,
            reason: String::new(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accept: false,
            reason: reason.into(),
        }
    }
}

/// What admission needs to know about an announced job.
#[derive(Debug, Clone, Copy)]
pub struct BidRequest<'a> {
    pub job: &'a JobSpec,
    /// Converted resource requirement, disk possibly sized from the inputs.
    pub required: ResourceUsageData,
    /// Whether every declared input is already on this node.
    pub inputs_local: bool,
}

/// The synchronous checks: stateless, locality, fit.
pub fn should_bid(
    request: &BidRequest<'_>,
    capacity: &ResourceUsageData,
    committed: &ResourceUsageData,
    policy: &JobSelectionPolicy,
) -> BidDecision {
    if policy.reject_stateless_jobs && request.job.is_stateless() {
        return BidDecision::reject(REASON_STATELESS_REJECTED);
    }

    if policy.locality == Locality::Local && !request.inputs_local {
        return BidDecision::reject(REASON_NON_LOCAL_DATA);
    }

    let remaining = capacity.saturating_sub(committed);
    if !fits(&request.required, &remaining) {
        debug!(
            job_id = %request.job.id,
            required = %request.required,
            %remaining,
            "job does not fit"
        );
        return BidDecision::reject(REASON_INSUFFICIENT_RESOURCES);
    }

    BidDecision::accept()
}

/// Policy plus the probes configured for this node.
#[derive(Clone, Default)]
pub struct AdmissionControl {
    policy: JobSelectionPolicy,
    probes: Vec<Arc<dyn BidProbe>>,
}

impl AdmissionControl {
    pub fn new(policy: JobSelectionPolicy, probes: Vec<Arc<dyn BidProbe>>) -> Self {
        Self { policy, probes }
    }

    /// Build from a policy, installing the HTTP and exec probes it names.
    pub fn from_policy(policy: JobSelectionPolicy) -> Self {
        let mut probes: Vec<Arc<dyn BidProbe>> = Vec::new();
        if let Some(url) = &policy.probe_http {
            probes.push(Arc::new(HttpProbe::new(url)));
        }
        if let Some(probe) = policy
            .probe_exec
            .as_deref()
            .and_then(ExecProbe::from_command_line)
        {
            probes.push(Arc::new(probe));
        }
        Self { policy, probes }
    }

    pub fn policy(&self) -> &JobSelectionPolicy {
        &self.policy
    }

    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    /// Run the synchronous checks, then each probe in order.
    pub async fn should_bid(
        &self,
        request: &BidRequest<'_>,
        capacity: &ResourceUsageData,
        committed: &ResourceUsageData,
    ) -> BidDecision {
        let decision = should_bid(request, capacity, committed, &self.policy);
        if !decision.accept {
            return decision;
        }

        for probe in &self.probes {
            if let ProbeVerdict::Reject(reason) = probe.check(request.job).await {
                debug!(job_id = %request.job.id, probe = probe.name(), %reason, "probe vetoed bid");
                return BidDecision::reject(reason);
            }
        }

        BidDecision::accept()
    }
}
