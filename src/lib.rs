//! # travelsim: skim serving and checkpointed model pipeline
//!
//! The systems core of an activity-based travel demand microsimulation:
//! households and persons make daily travel choices evaluated against
//! large origin × destination × period matrices ("skims").
//!
//! ## Design Principles
//!
//! 1. **Layout once, read forever**: a `SkimCatalog` fixes every skim's
//!    offset before any byte is loaded; buffers are immutable after load
//! 2. **Explicit context**: settings, the network LOS and tables are passed
//!    down through `RunContext` / `StepContext`, never looked up globally
//! 3. **Trait at the seams**: `MatrixSource` for skim inputs and
//!    `CheckpointStore` for pipeline persistence
//! 4. **Fail fast**: every inconsistency is a typed `Error`; resuming from a
//!    checkpoint is the only recovery
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use travelsim::{NetworkLos, Settings, SkimKey};
//! use travelsim::skim::MatrixFileStore;
//!
//! # fn example() -> travelsim::Result<()> {
//! let settings = Arc::new(Settings::from_json_file("configs/settings.json")?);
//! let sources = MatrixFileStore::new(settings.clone());
//!
//! let mut los = NetworkLos::new(settings, Box::new(sources));
//! los.read_los_settings()?;
//! los.load_skim_info()?;
//! los.load_all_tables()?;
//! los.load_all_skims()?;
//!
//! let dist = los.skim_lookup("taz", &[1, 2], &[3, 4], &SkimKey::scalar("DIST"))?;
//! println!("{dist:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Checkpoint Stores
//!
//! | Store | Description |
//! |-------|-------------|
//! | `MemoryStore` | In-memory, clones share state (testing/embedding) |
//! | `FileStore` | bincode files under the checkpoint directory |

// ============================================================================
// Modules
// ============================================================================

pub mod config;
pub mod model;
pub mod skim;
pub mod los;
pub mod pipeline;
pub mod export;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{Column, Table, Value};

// ============================================================================
// Re-exports: Configuration
// ============================================================================

pub use config::{Settings, ZoneSystem};

// ============================================================================
// Re-exports: Skims
// ============================================================================

pub use skim::{
    SkimBuffer, SkimCatalog, SkimDict, SkimDtype, SkimKey, OffsetMapper,
    SharedSkimBuffers, MatrixSource, MatrixSourceProvider,
};

// ============================================================================
// Re-exports: Network LOS
// ============================================================================

pub use los::{NetworkLos, LosStage, ZonePairTable};

// ============================================================================
// Re-exports: Pipeline
// ============================================================================

pub use pipeline::{
    Pipeline, RunContext, StepContext, ModelStep, ModelRegistry,
    Checkpoint, CheckpointStore, MemoryStore, FileStore, Random, RngState,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Duplicate skim '{name}' found in {first} and {second}")]
    DuplicateSkim { name: String, first: String, second: String },

    #[error("Shape mismatch for skim tag '{tag}' in {source_id}: expected {expected:?}, got {found:?}")]
    ShapeMismatch {
        tag: String,
        source_id: String,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Multiple different mappings for skim tag '{tag}': {first} != {second}")]
    ConflictingOffsetMap { tag: String, first: String, second: String },

    #[error("Unsupported dtype: {0}")]
    UnsupportedDtype(String),

    #[error("Skim buffer for '{tag}' too large: {elements} elements")]
    BufferTooLarge { tag: String, elements: u128 },

    #[error("Matrix '{name}' in {source_id} is not floating point ({dtype})")]
    NonFloatMatrix { name: String, source_id: String, dtype: String },

    #[error("Skim cache error: {0}")]
    Cache(String),

    #[error("Lookup error: {0}")]
    Lookup(String),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Table error: {0}")]
    Table(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
