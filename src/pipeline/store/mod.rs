//! # Checkpoint Store Trait
//!
//! The contract between the pipeline and wherever checkpoints persist.
//! A store holds the ordered checkpoint history plus one stored version of
//! a table per checkpoint that replaced it.
//!
//! ## Implementations
//!
//! | Store | Module | Description |
//! |-------|--------|-------------|
//! | `MemoryStore` | `memory` | In-memory, clones share state |
//! | `FileStore` | `file` | bincode files under a directory |

pub mod file;
pub mod memory;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::random::RngState;
use crate::model::Table;
use crate::Result;

pub use file::FileStore;
pub use memory::MemoryStore;

// ============================================================================
// Checkpoint
// ============================================================================

/// Snapshot taken after a model step completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Name of the step that produced it.
    pub name: String,
    pub timestamp: DateTime<Utc>,
    /// table name → checkpoint whose stored version is current here.
    pub tables: BTreeMap<String, String>,
    pub rng: RngState,
}

impl Checkpoint {
    pub fn new(name: impl Into<String>, tables: BTreeMap<String, String>, rng: RngState) -> Self {
        Self { name: name.into(), timestamp: Utc::now(), tables, rng }
    }

    pub fn has_table(&self, table_name: &str) -> bool {
        self.tables.contains_key(table_name)
    }
}

/// How to open a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Discard any previous run.
    Create,
    /// Keep the existing history (resume).
    Append,
}

// ============================================================================
// The Trait
// ============================================================================

/// Persistence for checkpoint history and table versions.
///
/// Single writer. History and table reads work whether or not the store is
/// open; writes require it to be open.
pub trait CheckpointStore: Send + Sync {
    fn open(&self, mode: OpenMode) -> Result<()>;

    /// Flush and release. Closing a closed store is a no-op.
    fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Checkpoint history, oldest first.
    fn checkpoints(&self) -> Result<Vec<Checkpoint>>;

    fn append_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Remove every checkpoint after `checkpoint_name` along with the table
    /// versions they wrote.
    fn truncate_after(&self, checkpoint_name: &str) -> Result<()>;

    fn put_table(&self, table_name: &str, checkpoint_name: &str, table: &Table) -> Result<()>;

    fn get_table(&self, table_name: &str, checkpoint_name: &str) -> Result<Table>;
}

/// Split a history at `checkpoint_name`: `(kept, removed)`.
pub(crate) fn split_history(
    mut history: Vec<Checkpoint>,
    checkpoint_name: &str,
) -> Result<(Vec<Checkpoint>, Vec<Checkpoint>)> {
    let pos = history
        .iter()
        .position(|c| c.name == checkpoint_name)
        .ok_or_else(|| crate::Error::Pipeline(format!("checkpoint '{checkpoint_name}' not in checkpoints.")))?;
    let removed = history.split_off(pos + 1);
    Ok((history, removed))
}
