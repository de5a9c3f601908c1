//! redb table definitions for persisted cluster state.
//!
//! Both tables use `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Node records keyed by host name.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Job allocation records keyed by zero-padded job id.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");
