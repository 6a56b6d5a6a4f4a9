//! ExecutionStore: redb-backed persistence for execution records.
//!
//! Records are JSON-serialized into redb's `&[u8]` value columns. Every
//! state change goes through [`ExecutionStore::apply_event`], which reads,
//! validates and writes the record inside one write transaction, so an
//! invalid event never leaves a partial write behind.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use jobgrid_core::epoch_millis;

use crate::error::{StateError, StateResult};
use crate::tables::EXECUTIONS;
use crate::types::{Execution, ExecutionEvent, StateTransition};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Read-only access to the executions recorded for a job.
///
/// The resolver consumes this so it can merge records from several
/// stores without being able to mutate any of them.
pub trait ExecutionSource: Send + Sync {
    fn executions_for_job(&self, job_id: &str) -> StateResult<Vec<Execution>>;
}

/// Thread-safe execution store backed by redb.
#[derive(Clone)]
pub struct ExecutionStore {
    db: Arc<Database>,
}

impl ExecutionStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "execution store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory execution store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert a new execution. Fails if one with the same key exists.
    pub fn create_execution(&self, execution: &Execution) -> StateResult<()> {
        let key = execution.table_key();
        let value = serde_json::to_vec(execution).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(key));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, state = %execution.state, "execution created");
        Ok(())
    }

    /// Get an execution by job and execution ID.
    pub fn get_execution(&self, job_id: &str, execution_id: &str) -> StateResult<Option<Execution>> {
        let key = format!("{job_id}:{execution_id}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let execution: Execution =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(execution))
            }
            None => Ok(None),
        }
    }

    /// The execution a given node holds for a job, if any.
    pub fn find_execution(&self, job_id: &str, node_id: &str) -> StateResult<Option<Execution>> {
        Ok(self
            .list_executions_for_job(job_id)?
            .into_iter()
            .find(|e| e.node_id == node_id))
    }

    /// List all executions for a job.
    pub fn list_executions_for_job(&self, job_id: &str) -> StateResult<Vec<Execution>> {
        let prefix = format!("{job_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let execution: Execution =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(execution);
        }
        Ok(results)
    }

    /// List every execution in the store.
    pub fn list_executions(&self) -> StateResult<Vec<Execution>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let execution: Execution =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(execution);
        }
        Ok(results)
    }

    /// Apply an event to a stored execution and persist the result.
    ///
    /// Returns the updated record and the transition that was appended.
    /// An invalid event aborts the transaction; nothing is written.
    pub fn apply_event(
        &self,
        job_id: &str,
        execution_id: &str,
        event: &ExecutionEvent,
    ) -> StateResult<(Execution, StateTransition)> {
        let key = format!("{job_id}:{execution_id}");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let (execution, record) = {
            let mut table = txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
            let mut execution: Execution = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(key)),
            };

            let record = execution.apply(event, epoch_millis())?;
            let value = serde_json::to_vec(&execution).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            (execution, record)
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            %key,
            from = %record.from,
            to = %record.to,
            event = %record.event,
            "execution transitioned"
        );
        Ok((execution, record))
    }
}

impl ExecutionSource for ExecutionStore {
    fn executions_for_job(&self, job_id: &str) -> StateResult<Vec<Execution>> {
        self.list_executions_for_job(job_id)
    }
}
