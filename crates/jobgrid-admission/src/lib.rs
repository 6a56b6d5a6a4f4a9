//! jobgrid-admission: decides whether a compute node bids on a job.
//!
//! # Components
//!
//! - **`ledger`**: committed usage per node; reserve/release under the
//!   caller's mutex
//! - **`policy`**: the ordered bid checks (stateless, locality, fit)
//! - **`probe`**: external allow/deny hooks (HTTP endpoint, local command)
//!
//! Rejections are not errors: they come back as a [`BidDecision`] with a
//! human-readable reason. [`AdmissionError`] is reserved for ledger misuse.

pub mod error;
pub mod ledger;
pub mod policy;
pub mod probe;

pub use error::{AdmissionError, AdmissionResult};
pub use ledger::CapacityLedger;
pub use policy::{
    AdmissionControl, BidDecision, BidRequest, REASON_INSUFFICIENT_RESOURCES, REASON_NON_LOCAL_DATA,
    REASON_STATELESS_REJECTED, should_bid,
};
pub use probe::{BidProbe, ExecProbe, HttpProbe, ProbeVerdict};
