//! # Pipeline
//!
//! Runs named model steps strictly in order, checkpointing every table and
//! the random state after each one, and resumes a run from any checkpoint.
//!
//! ```text
//! closed ─open_pipeline─▶ open ─run_model─▶ open ─ ... ─close_pipeline─▶ closed
//!                          │
//!                          └─ checkpoint "init" (fresh) / restore (resume)
//! ```
//!
//! Steps never see the pipeline itself: they get a [`StepContext`] holding
//! the run settings, the network LOS, the current tables and the random
//! streams.

pub mod random;
pub mod store;

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::Settings;
use crate::los::NetworkLos;
use crate::model::Table;
use crate::{Error, Result};

pub use random::{Random, RngState};
pub use store::{Checkpoint, CheckpointStore, FileStore, MemoryStore, OpenMode};

/// Name of the checkpoint written when a fresh run opens.
pub const INIT_CHECKPOINT: &str = "init";

/// `resume_after` value meaning "the last checkpoint".
pub const LAST_CHECKPOINT: &str = "_";

// ============================================================================
// Run context
// ============================================================================

/// Everything a run shares with its steps.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub settings: Arc<Settings>,
    pub los: Option<Arc<NetworkLos>>,
}

impl RunContext {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings, los: None }
    }

    pub fn with_los(mut self, los: Arc<NetworkLos>) -> Self {
        self.los = Some(los);
        self
    }

    pub fn los(&self) -> Result<&NetworkLos> {
        self.los
            .as_deref()
            .ok_or_else(|| Error::State("no network_los in this run context".into()))
    }
}

// ============================================================================
// Tables
// ============================================================================

/// Current tables plus which ones changed since the last checkpoint.
#[derive(Debug, Default, Clone)]
struct TableState {
    current: BTreeMap<String, Table>,
    replaced: BTreeSet<String>,
}

impl TableState {
    fn get(&self, name: &str) -> Option<&Table> {
        self.current.get(name)
    }

    fn add(&mut self, name: &str, table: Table) -> Result<()> {
        if self.current.contains_key(name) {
            return Err(Error::Pipeline(format!(
                "table '{name}' already exists; use replace_table to change it"
            )));
        }
        self.replace(name, table);
        Ok(())
    }

    fn replace(&mut self, name: &str, table: Table) {
        self.current.insert(name.to_string(), table);
        self.replaced.insert(name.to_string());
    }

    fn drop(&mut self, name: &str) -> Result<Table> {
        self.replaced.remove(name);
        self.current
            .remove(name)
            .ok_or_else(|| Error::Pipeline(format!("table '{name}' not in pipeline.")))
    }

    fn clear(&mut self) {
        self.current.clear();
        self.replaced.clear();
    }
}

// ============================================================================
// Model steps
// ============================================================================

/// What a running step can see and change.
pub struct StepContext<'a> {
    run: &'a RunContext,
    step_name: &'a str,
    tables: &'a mut TableState,
    rng: &'a mut Random,
}

impl<'a> StepContext<'a> {
    pub fn step_name(&self) -> &str {
        self.step_name
    }

    pub fn run_context(&self) -> &RunContext {
        self.run
    }

    pub fn settings(&self) -> &Settings {
        &self.run.settings
    }

    pub fn los(&self) -> Result<&NetworkLos> {
        self.run.los()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.get(name).is_some()
    }

    pub fn get_table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::Pipeline(format!("table '{name}' never checkpointed.")))
    }

    pub fn add_table(&mut self, name: &str, table: Table) -> Result<()> {
        self.tables.add(name, table)
    }

    pub fn replace_table(&mut self, name: &str, table: Table) {
        self.tables.replace(name, table)
    }

    pub fn drop_table(&mut self, name: &str) -> Result<Table> {
        self.tables.drop(name)
    }

    pub fn rng(&mut self) -> &mut Random {
        self.rng
    }
}

/// One model step.
pub trait ModelStep: Send + Sync {
    fn run(&self, ctx: &mut StepContext<'_>) -> Result<()>;
}

impl<F> ModelStep for F
where
    F: Fn(&mut StepContext<'_>) -> Result<()> + Send + Sync,
{
    fn run(&self, ctx: &mut StepContext<'_>) -> Result<()> {
        self(ctx)
    }
}

/// Model steps by name.
#[derive(Default)]
pub struct ModelRegistry {
    steps: BTreeMap<String, Box<dyn ModelStep>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.steps.keys()).finish()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, step: impl ModelStep + 'static) -> Result<()> {
        if name == INIT_CHECKPOINT || name == LAST_CHECKPOINT {
            return Err(Error::Pipeline(format!("'{name}' is reserved and cannot name a model step")));
        }
        if self.steps.contains_key(name) {
            return Err(Error::Pipeline(format!("model step '{name}' registered twice")));
        }
        self.steps.insert(name.to_string(), Box::new(step));
        Ok(())
    }

    /// Builder form of [`ModelRegistry::register`].
    pub fn with_step(mut self, name: &str, step: impl ModelStep + 'static) -> Result<Self> {
        self.register(name, step)?;
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    fn get(&self, name: &str) -> Result<&dyn ModelStep> {
        self.steps
            .get(name)
            .map(|s| s.as_ref())
            .ok_or_else(|| Error::NotFound(format!("model step '{name}'")))
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Checkpointed, resumable sequence of model steps.
pub struct Pipeline<S: CheckpointStore> {
    store: S,
    registry: ModelRegistry,
    context: RunContext,
    is_open: bool,
    /// Set once the pipeline has been opened in this process.
    started: bool,
    explicit_seed: Option<u64>,
    rng: Random,
    tables: TableState,
    checkpoints: Vec<Checkpoint>,
}

impl<S: CheckpointStore> Pipeline<S> {
    pub fn new(store: S, registry: ModelRegistry, context: RunContext) -> Self {
        let base_seed = context.settings.rng_base_seed.unwrap_or(0);
        Self {
            store,
            registry,
            context,
            is_open: false,
            started: false,
            explicit_seed: None,
            rng: Random::new(base_seed),
            tables: TableState::default(),
            checkpoints: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn require_open(&self) -> Result<()> {
        if !self.is_open {
            return Err(Error::Pipeline("Pipeline is not open.".into()));
        }
        Ok(())
    }

    // ========================================================================
    // Open / close
    // ========================================================================

    /// Open the store. `None` starts a fresh run with an `init` checkpoint;
    /// `Some(name)` restores the run as of checkpoint `name` (`"_"` for the
    /// last one) and discards every later checkpoint.
    pub fn open_pipeline(&mut self, resume_after: Option<&str>) -> Result<()> {
        if self.is_open {
            return Err(Error::Pipeline("Pipeline is already open.".into()));
        }
        self.started = true;
        self.tables.clear();
        self.checkpoints.clear();

        match resume_after {
            None => {
                self.store.open(OpenMode::Create)?;
                self.is_open = true;
                self.rng.begin_step(INIT_CHECKPOINT)?;
                let written = self.add_checkpoint(INIT_CHECKPOINT);
                self.rng.end_step(INIT_CHECKPOINT)?;
                written?;
                tracing::info!(base_seed = self.rng.base_seed(), "opened pipeline");
            }
            Some(resume_after) => {
                self.store.open(OpenMode::Append)?;
                self.is_open = true;
                if let Err(e) = self.load_checkpoint(resume_after) {
                    self.is_open = false;
                    self.store.close()?;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn load_checkpoint(&mut self, resume_after: &str) -> Result<()> {
        let history = self.store.checkpoints()?;
        let name = if resume_after == LAST_CHECKPOINT {
            history
                .last()
                .map(|c| c.name.clone())
                .ok_or_else(|| Error::Pipeline("no checkpoints to resume from.".into()))?
        } else {
            resume_after.to_string()
        };
        let pos = history
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::Pipeline(format!("checkpoint '{name}' not in checkpoints.")))?;
        let checkpoint = history[pos].clone();

        if let Some(seed) = self.explicit_seed {
            if seed != checkpoint.rng.base_seed {
                return Err(Error::Pipeline(format!(
                    "base seed {seed} differs from seed {} of checkpoint '{name}'",
                    checkpoint.rng.base_seed
                )));
            }
        }

        let mut restored = BTreeMap::new();
        for (table_name, written_at) in &checkpoint.tables {
            restored.insert(table_name.clone(), self.store.get_table(table_name, written_at)?);
        }

        self.store.truncate_after(&name)?;
        self.rng.restore(&checkpoint.rng)?;
        self.tables.current = restored;
        self.tables.replaced.clear();
        let discarded = history.len() - pos - 1;
        self.checkpoints = history;
        self.checkpoints.truncate(pos + 1);

        tracing::info!(checkpoint = %name, tables = self.tables.current.len(), discarded, "resumed pipeline");
        Ok(())
    }

    /// Flush and release the store. Closing twice is tolerated.
    pub fn close_pipeline(&mut self) -> Result<()> {
        if !self.is_open {
            tracing::warn!("close_pipeline called on a closed pipeline");
            return Ok(());
        }
        self.store.close()?;
        self.is_open = false;
        self.tables.clear();
        tracing::info!(checkpoints = self.checkpoints.len(), "closed pipeline");
        Ok(())
    }

    // ========================================================================
    // Running
    // ========================================================================

    /// Run one model step and checkpoint it.
    pub fn run_model(&mut self, name: &str) -> Result<()> {
        self.require_open()?;
        if self.checkpoints.iter().any(|c| c.name == name) {
            return Err(Error::Pipeline(format!("Cannot run model '{name}' more than once")));
        }
        let step = self.registry.get(name)?;

        // a failed step leaves tables and channels as they were
        let mut staged = self.tables.clone();
        let rng_before = self.rng.state();

        self.rng.begin_step(name)?;
        let started = std::time::Instant::now();
        let mut ctx = StepContext {
            run: &self.context,
            step_name: name,
            tables: &mut staged,
            rng: &mut self.rng,
        };
        let result = step.run(&mut ctx);
        self.rng.end_step(name)?;
        if let Err(e) = result {
            self.rng.restore(&rng_before)?;
            tracing::warn!(model = name, error = %e, "model step failed");
            return Err(e);
        }
        self.tables = staged;

        tracing::info!(model = name, elapsed_ms = started.elapsed().as_millis() as u64, "ran model step");
        self.add_checkpoint(name)
    }

    /// Open (resuming after `resume_after` if given) and run `models`,
    /// skipping those up to and including the resume point.
    pub fn run<M: AsRef<str>>(&mut self, models: &[M], resume_after: Option<&str>) -> Result<()> {
        let resume_name = match resume_after {
            Some(LAST_CHECKPOINT) => self.store.checkpoints()?.last().map(|c| c.name.clone()),
            other => other.map(str::to_string),
        };
        let start = resume_name
            .as_deref()
            .and_then(|r| models.iter().position(|m| m.as_ref() == r))
            .map_or(0, |pos| pos + 1);

        self.open_pipeline(resume_after)?;
        for model in &models[start..] {
            self.run_model(model.as_ref())?;
        }
        Ok(())
    }

    fn add_checkpoint(&mut self, name: &str) -> Result<()> {
        let previous = self.checkpoints.last().map(|c| &c.tables);
        let mut pointers = BTreeMap::new();
        let mut written = 0usize;
        for (table_name, table) in &self.tables.current {
            let carried = previous
                .filter(|_| !self.tables.replaced.contains(table_name))
                .and_then(|p| p.get(table_name));
            match carried {
                Some(at) => {
                    pointers.insert(table_name.clone(), at.clone());
                }
                None => {
                    self.store.put_table(table_name, name, table)?;
                    pointers.insert(table_name.clone(), name.to_string());
                    written += 1;
                }
            }
        }

        let checkpoint = Checkpoint::new(name, pointers, self.rng.state());
        self.store.append_checkpoint(&checkpoint)?;
        self.checkpoints.push(checkpoint);
        self.tables.replaced.clear();
        tracing::info!(checkpoint = name, tables = self.tables.current.len(), written, "wrote checkpoint");
        Ok(())
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// A table now, or as of a named checkpoint.
    pub fn get_table(&self, name: &str, checkpoint_name: Option<&str>) -> Result<Cow<'_, Table>> {
        self.require_open()?;
        let Some(checkpoint_name) = checkpoint_name else {
            if let Some(table) = self.tables.get(name) {
                return Ok(Cow::Borrowed(table));
            }
            if self.checkpoints.last().is_some_and(|c| c.has_table(name)) {
                return Err(Error::Pipeline(format!("table '{name}' was dropped.")));
            }
            return Err(Error::Pipeline(format!("table '{name}' never checkpointed.")));
        };

        let checkpoint = self
            .checkpoints
            .iter()
            .find(|c| c.name == checkpoint_name)
            .ok_or_else(|| Error::Pipeline(format!("checkpoint '{checkpoint_name}' not in checkpoints.")))?;
        let written_at = checkpoint.tables.get(name).ok_or_else(|| {
            Error::Pipeline(format!("table '{name}' not in checkpoint '{checkpoint_name}'."))
        })?;

        let latest = self.checkpoints.last().and_then(|c| c.tables.get(name));
        if latest == Some(written_at) && !self.tables.replaced.contains(name) {
            if let Some(table) = self.tables.get(name) {
                return Ok(Cow::Borrowed(table));
            }
        }
        Ok(Cow::Owned(self.store.get_table(name, written_at)?))
    }

    /// Checkpoint history, oldest first. Works while closed.
    pub fn get_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        if self.is_open {
            return Ok(self.checkpoints.clone());
        }
        self.store.checkpoints()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.current.keys().map(String::as_str)
    }

    pub fn add_table(&mut self, name: &str, table: Table) -> Result<()> {
        self.require_open()?;
        self.tables.add(name, table)
    }

    pub fn replace_table(&mut self, name: &str, table: Table) -> Result<()> {
        self.require_open()?;
        self.tables.replace(name, table);
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> Result<Table> {
        self.require_open()?;
        self.tables.drop(name)
    }

    // ========================================================================
    // Random streams
    // ========================================================================

    /// Set the base seed. Only allowed before the pipeline is first opened.
    pub fn set_rn_generator_base_seed(&mut self, seed: u64) -> Result<()> {
        if self.started {
            return Err(Error::Pipeline(
                "Can only call set_rn_generator_base_seed before the first step.".into(),
            ));
        }
        self.rng.set_base_seed(seed)?;
        self.explicit_seed = Some(seed);
        Ok(())
    }

    pub fn get_rn_generator(&self) -> &Random {
        &self.rng
    }

    pub fn get_rn_generator_mut(&mut self) -> &mut Random {
        &mut self.rng
    }
}
