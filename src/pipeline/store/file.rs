//! File checkpoint store.
//!
//! Layout under the store directory:
//!
//! ```text
//! checkpoints.bin                      versioned history (bincode)
//! tables/<table>/<checkpoint>.bin      one stored table version
//! ```
//!
//! Only these files are ever created or removed.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use super::{split_history, Checkpoint, CheckpointStore, OpenMode};
use crate::model::Table;
use crate::{Error, Result};

/// History format version (increment when the layout changes).
const STORE_VERSION: u32 = 1;
const HISTORY_FILE: &str = "checkpoints.bin";
const TABLES_DIR: &str = "tables";

#[derive(Serialize, Deserialize)]
struct History {
    version: u32,
    checkpoints: Vec<Checkpoint>,
}

#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    open: AtomicBool,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), open: AtomicBool::new(false) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    fn table_path(&self, table_name: &str, checkpoint_name: &str) -> Result<PathBuf> {
        check_name(table_name)?;
        check_name(checkpoint_name)?;
        Ok(self.dir.join(TABLES_DIR).join(table_name).join(format!("{checkpoint_name}.bin")))
    }

    fn require_open(&self) -> Result<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(Error::State(format!("checkpoint store {} is not open", self.dir.display())));
        }
        Ok(())
    }

    fn write_history(&self, checkpoints: &[Checkpoint]) -> Result<()> {
        let tmp = self.dir.join(format!("{HISTORY_FILE}.tmp"));
        {
            let file = fs::File::create(&tmp)?;
            let history = History { version: STORE_VERSION, checkpoints: checkpoints.to_vec() };
            let mut writer = BufWriter::new(file);
            bincode::serialize_into(&mut writer, &history)?;
            writer.flush()?;
        }
        fs::rename(&tmp, self.history_path())?;
        Ok(())
    }
}

/// Names become path components.
fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(Error::Pipeline(format!("'{name}' cannot be used as a stored table or checkpoint name")));
    }
    Ok(())
}

impl CheckpointStore for FileStore {
    fn open(&self, mode: OpenMode) -> Result<()> {
        if self.open.load(Ordering::Acquire) {
            return Err(Error::State(format!("checkpoint store {} is already open", self.dir.display())));
        }
        fs::create_dir_all(&self.dir)?;
        if mode == OpenMode::Create {
            let history = self.history_path();
            if history.exists() {
                fs::remove_file(&history)?;
            }
            let tables = self.dir.join(TABLES_DIR);
            if tables.exists() {
                fs::remove_dir_all(&tables)?;
            }
        }
        fs::create_dir_all(self.dir.join(TABLES_DIR))?;
        self.open.store(true, Ordering::Release);
        tracing::debug!(dir = %self.dir.display(), ?mode, "opened checkpoint store");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn checkpoints(&self) -> Result<Vec<Checkpoint>> {
        let path = self.history_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&path)?;
        let history: History = bincode::deserialize_from(BufReader::new(file))?;
        if history.version != STORE_VERSION {
            return Err(Error::Pipeline(format!(
                "checkpoint store {} version mismatch: expected {STORE_VERSION}, found {}",
                path.display(),
                history.version
            )));
        }
        Ok(history.checkpoints)
    }

    fn append_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.require_open()?;
        let mut checkpoints = self.checkpoints()?;
        checkpoints.push(checkpoint.clone());
        self.write_history(&checkpoints)
    }

    fn truncate_after(&self, checkpoint_name: &str) -> Result<()> {
        self.require_open()?;
        let (kept, removed) = split_history(self.checkpoints()?, checkpoint_name)?;
        if removed.is_empty() {
            return Ok(());
        }
        self.write_history(&kept)?;
        for checkpoint in &removed {
            for (table_name, written_at) in &checkpoint.tables {
                if *written_at != checkpoint.name {
                    continue;
                }
                let path = self.table_path(table_name, written_at)?;
                if path.exists() {
                    fs::remove_file(&path)?;
                }
            }
        }
        tracing::debug!(dir = %self.dir.display(), kept = kept.len(), removed = removed.len(), "truncated checkpoint history");
        Ok(())
    }

    fn put_table(&self, table_name: &str, checkpoint_name: &str, table: &Table) -> Result<()> {
        self.require_open()?;
        let path = self.table_path(table_name, checkpoint_name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::File::create(&path)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, table)?;
        writer.flush()?;
        Ok(())
    }

    fn get_table(&self, table_name: &str, checkpoint_name: &str) -> Result<Table> {
        let path = self.table_path(table_name, checkpoint_name)?;
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "table '{table_name}' stored at checkpoint '{checkpoint_name}'"
            )));
        }
        let file = fs::File::open(&path)?;
        Ok(bincode::deserialize_from(BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::random::RngState;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn cp(name: &str, tables: &[(&str, &str)]) -> Checkpoint {
        let tables: BTreeMap<String, String> =
            tables.iter().map(|(t, c)| (t.to_string(), c.to_string())).collect();
        Checkpoint::new(name, tables, RngState { base_seed: 9, channels: vec!["persons".into()] })
    }

    #[test]
    fn test_history_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.open(OpenMode::Create).unwrap();
        let first = cp("init", &[("persons", "init")]);
        store.append_checkpoint(&first).unwrap();
        store.close().unwrap();

        let reopened = FileStore::new(dir.path());
        assert_eq!(reopened.checkpoints().unwrap(), vec![first]);
    }

    #[test]
    fn test_table_round_trip_and_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.open(OpenMode::Create).unwrap();
        let t = Table::new("PERID", vec![1, 2]).unwrap().with_column("age", vec![30i64, 41]).unwrap();
        store.put_table("persons", "init", &t).unwrap();
        store.append_checkpoint(&cp("init", &[("persons", "init")])).unwrap();
        store.put_table("persons", "cdap", &t).unwrap();
        store.append_checkpoint(&cp("cdap", &[("persons", "cdap")])).unwrap();

        assert_eq!(store.get_table("persons", "cdap").unwrap(), t);
        store.truncate_after("init").unwrap();
        assert_eq!(store.checkpoints().unwrap().len(), 1);
        assert!(store.get_table("persons", "cdap").is_err());
        assert_eq!(store.get_table("persons", "init").unwrap(), t);
    }

    #[test]
    fn test_create_discards_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.open(OpenMode::Create).unwrap();
        store.append_checkpoint(&cp("init", &[])).unwrap();
        store.close().unwrap();
        store.open(OpenMode::Create).unwrap();
        assert!(store.checkpoints().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.open(OpenMode::Create).unwrap();
        let t = Table::new("id", vec![]).unwrap();
        assert!(store.put_table("../escape", "init", &t).is_err());
    }
}
