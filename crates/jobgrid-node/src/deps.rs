//! Collaborators a node is assembled from.
//!
//! Everything a node talks to is passed in once through
//! [`NodeDependencies`]. Two stock sets exist: `noop` for tests and the
//! devstack, `standard` for a node that really runs processes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use jobgrid_compute::ComputeDependencies;
use jobgrid_providers::{
    ExitCodeVerifier, Executor, NoopExecutor, NoopVerifier, ProcessExecutor, PublisherRegistry,
    StorageRegistry, Verifier,
};
use jobgrid_state::ExecutionStore;
use jobgrid_transport::Transport;

use crate::error::NodeResult;

#[derive(Clone)]
pub struct NodeDependencies {
    pub transport: Arc<dyn Transport>,
    pub store: ExecutionStore,
    pub storages: StorageRegistry,
    pub publishers: PublisherRegistry,
    pub executor: Arc<dyn Executor>,
    pub verifier: Arc<dyn Verifier>,
    /// Scratch space for execution outputs.
    pub workdir: PathBuf,
}

impl NodeDependencies {
    /// In-memory store and noop backends throughout.
    pub fn noop(transport: Arc<dyn Transport>) -> NodeResult<Self> {
        let workdir = std::env::temp_dir()
            .join("jobgrid")
            .join(transport.host_id());
        Ok(Self {
            transport,
            store: ExecutionStore::open_in_memory()?,
            storages: StorageRegistry::noop(),
            publishers: PublisherRegistry::noop(),
            executor: Arc::new(NoopExecutor::new()),
            verifier: Arc::new(NoopVerifier),
            workdir,
        })
    }

    /// On-disk store, inline and host-directory storage, local publishing
    /// and real processes, all rooted at `root`.
    pub fn standard(transport: Arc<dyn Transport>, root: &Path) -> NodeResult<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            transport,
            store: ExecutionStore::open(&root.join("jobgrid.redb"))?,
            storages: StorageRegistry::standard(&root.join("storage")),
            publishers: PublisherRegistry::local(root.join("results")),
            executor: Arc::new(ProcessExecutor::new()),
            verifier: Arc::new(ExitCodeVerifier),
            workdir: root.join("work"),
        })
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_publishers(mut self, publishers: PublisherRegistry) -> Self {
        self.publishers = publishers;
        self
    }

    pub fn with_storages(mut self, storages: StorageRegistry) -> Self {
        self.storages = storages;
        self
    }

    pub(crate) fn compute(&self) -> ComputeDependencies {
        ComputeDependencies {
            transport: self.transport.clone(),
            store: self.store.clone(),
            storages: self.storages.clone(),
            publishers: self.publishers.clone(),
            executor: self.executor.clone(),
            workdir: self.workdir.clone(),
        }
    }
}
