//! # Skims
//!
//! Origin × destination (× period) matrices for one zone system, served
//! from a single flat buffer per skim tag.
//!
//! ```text
//! MatrixSource files ──▶ SkimCatalog ──▶ SkimBuffer::allocate
//!                                              │
//!                          load_skims (matrices or cached_<tag>.mmap)
//!                                              │
//!                                              ▼
//!                             SkimDict::lookup(origins, destinations, key)
//! ```

pub mod buffer;
pub mod cache;
pub mod catalog;
pub mod dict;
pub mod key;
pub mod loader;
pub mod offset;
pub mod source;

pub use buffer::{SharedSkimBuffers, SkimBuffer, SkimBufferDescriptor, SkimDtype};
pub use cache::{cache_file_name, read_cache_into, write_cache_from};
pub use catalog::{SkimCatalog, SkimManifestEntry};
pub use dict::SkimDict;
pub use key::{SkimKey, SKIM_KEY_SEPARATOR};
pub use loader::{load_skims, read_matrices_into};
pub use offset::OffsetMapper;
pub use source::{InMemoryMatrices, MatrixData, MatrixFile, MatrixFileStore, MatrixSource, MatrixSourceProvider};
