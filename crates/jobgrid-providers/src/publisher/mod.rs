//! Publisher capability trait and its registry.

mod local;
mod noop;

pub use local::LocalPublisher;
pub use noop::NoopPublisher;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use jobgrid_core::{PublishedResult, PublisherType};
use jobgrid_state::Execution;

use crate::error::{ProviderError, ProviderResult};

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn is_installed(&self) -> ProviderResult<bool>;

    /// Upload the files in `result_dir` for `execution`.
    async fn publish(
        &self,
        execution: &Execution,
        result_dir: &Path,
        deadline: Duration,
    ) -> ProviderResult<PublishedResult>;
}

/// Publisher lookup by type, fixed at node assembly.
#[derive(Clone, Default)]
pub struct PublisherRegistry {
    publishers: HashMap<PublisherType, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publisher type answered by a [`NoopPublisher`].
    pub fn noop() -> Self {
        let noop: Arc<dyn Publisher> = Arc::new(NoopPublisher);
        let mut registry = Self::new();
        for ty in [PublisherType::Noop, PublisherType::Ipfs, PublisherType::Local] {
            registry.register(ty, noop.clone());
        }
        registry
    }

    /// `noop` and `local` publishers; results land under `root`.
    pub fn local(root: PathBuf) -> Self {
        let mut registry = Self::new();
        registry.register(PublisherType::Noop, Arc::new(NoopPublisher));
        registry.register(PublisherType::Local, Arc::new(LocalPublisher::new(root)));
        registry
    }

    pub fn register(&mut self, ty: PublisherType, publisher: Arc<dyn Publisher>) {
        self.publishers.insert(ty, publisher);
    }

    pub fn contains(&self, ty: PublisherType) -> bool {
        self.publishers.contains_key(&ty)
    }

    pub fn get(&self, ty: PublisherType) -> ProviderResult<Arc<dyn Publisher>> {
        self.publishers
            .get(&ty)
            .cloned()
            .ok_or(ProviderError::UnknownPublisherType(ty))
    }
}
