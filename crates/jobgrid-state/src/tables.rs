//! redb table definitions for the execution store.

use redb::TableDefinition;

/// Execution records keyed by `{job_id}:{execution_id}`.
pub const EXECUTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("executions");
