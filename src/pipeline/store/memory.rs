//! In-memory checkpoint store.
//!
//! Clones share one history, so a second `Pipeline` built over a clone sees
//! what an earlier one wrote, the way a reopened file store would.
//!
//! Use this store for:
//! - Testing pipelines and resume behaviour
//! - Embedding runs that don't need to survive the process

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use super::{split_history, Checkpoint, CheckpointStore, OpenMode};
use crate::model::Table;
use crate::{Error, Result};

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    open: RwLock<bool>,
    checkpoints: RwLock<Vec<Checkpoint>>,
    /// (table, checkpoint) → stored version
    tables: RwLock<HashMap<(String, String), Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn require_open(&self) -> Result<()> {
        if !*self.inner.open.read() {
            return Err(Error::State("checkpoint store is not open".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("open", &*self.inner.open.read())
            .field("checkpoints", &self.inner.checkpoints.read().len())
            .finish()
    }
}

// ============================================================================
// CheckpointStore impl
// ============================================================================

impl CheckpointStore for MemoryStore {
    fn open(&self, mode: OpenMode) -> Result<()> {
        let mut open = self.inner.open.write();
        if *open {
            return Err(Error::State("checkpoint store is already open".into()));
        }
        if mode == OpenMode::Create {
            self.inner.checkpoints.write().clear();
            self.inner.tables.write().clear();
        }
        *open = true;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        *self.inner.open.write() = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        *self.inner.open.read()
    }

    fn checkpoints(&self) -> Result<Vec<Checkpoint>> {
        Ok(self.inner.checkpoints.read().clone())
    }

    fn append_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.require_open()?;
        self.inner.checkpoints.write().push(checkpoint.clone());
        Ok(())
    }

    fn truncate_after(&self, checkpoint_name: &str) -> Result<()> {
        self.require_open()?;
        let mut checkpoints = self.inner.checkpoints.write();
        let (kept, removed) = split_history(checkpoints.clone(), checkpoint_name)?;
        *checkpoints = kept;
        if !removed.is_empty() {
            let mut tables = self.inner.tables.write();
            tables.retain(|(_, cp), _| !removed.iter().any(|r| r.name == *cp));
        }
        Ok(())
    }

    fn put_table(&self, table_name: &str, checkpoint_name: &str, table: &Table) -> Result<()> {
        self.require_open()?;
        self.inner
            .tables
            .write()
            .insert((table_name.to_string(), checkpoint_name.to_string()), table.clone());
        Ok(())
    }

    fn get_table(&self, table_name: &str, checkpoint_name: &str) -> Result<Table> {
        self.inner
            .tables
            .read()
            .get(&(table_name.to_string(), checkpoint_name.to_string()))
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("table '{table_name}' stored at checkpoint '{checkpoint_name}'"))
            })
    }
}
