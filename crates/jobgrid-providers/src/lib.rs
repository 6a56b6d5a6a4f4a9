//! jobgrid-providers: pluggable backends behind narrow capability traits.
//!
//! The compute node never names a concrete backend. It looks one up by
//! tag in a registry built once at startup:
//!
//! - [`StorageRegistry`] maps a [`StorageSourceType`](jobgrid_core::StorageSourceType)
//!   to a [`StorageProvider`] that sizes and prepares input volumes.
//! - [`PublisherRegistry`] maps a [`PublisherType`](jobgrid_core::PublisherType)
//!   to a [`Publisher`]. A missing entry is an error, never a fallback.
//!
//! [`Executor`] runs the job itself and [`Verifier`] judges its output on
//! the requester side. Every storage and publish call takes a deadline; a
//! zero deadline has already expired.

pub mod deadline;
pub mod error;
pub mod executor;
pub mod publisher;
pub mod storage;
pub mod verifier;

pub use deadline::with_deadline;
pub use error::{ProviderError, ProviderResult};
pub use executor::{Executor, NoopExecutor, ProcessExecutor, RunHook};
pub use publisher::{LocalPublisher, NoopPublisher, Publisher, PublisherRegistry};
pub use storage::{
    InlineStorage, LocalDirectoryStorage, NoopStorage, PreparedStorage, StorageProvider,
    StorageRegistry,
};
pub use verifier::{ExitCodeVerifier, NoopVerifier, Verdict, Verifier};
