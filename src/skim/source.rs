//! Matrix sources: where skim matrices come from.
//!
//! A matrix source is one file contributing named 2-D matrices of a fixed
//! shape plus zero or more zone-id mappings. `MatrixSource` is the contract;
//! `MatrixFile` is the bundled bincode container and `MatrixFileStore`
//! resolves file identifiers against the configured data directories.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::{Error, Result};

/// Container format version (increment when the layout changes).
const MATRIX_FILE_VERSION: u32 = 1;

// ============================================================================
// Matrix payloads
// ============================================================================

/// Row-major payload of one matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatrixData {
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Int32(Vec<i32>),
}

impl MatrixData {
    pub fn len(&self) -> usize {
        match self {
            MatrixData::Float32(v) => v.len(),
            MatrixData::Float64(v) => v.len(),
            MatrixData::Int32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_float(&self) -> bool {
        matches!(self, MatrixData::Float32(_) | MatrixData::Float64(_))
    }

    pub fn dtype_name(&self) -> &'static str {
        match self {
            MatrixData::Float32(_) => "float32",
            MatrixData::Float64(_) => "float64",
            MatrixData::Int32(_) => "int32",
        }
    }
}

// ============================================================================
// MatrixSource trait
// ============================================================================

/// One opened matrix source file.
pub trait MatrixSource {
    /// Identifier used in log and error messages.
    fn source_id(&self) -> &str;

    /// (rows, cols) shared by every matrix in the file.
    fn shape(&self) -> (usize, usize);

    /// Matrix names in file order.
    fn matrix_names(&self) -> Vec<String>;

    /// Names of zone-id mappings in the file.
    fn mapping_names(&self) -> Vec<String>;

    /// External zone ids in row order for a mapping.
    fn mapping(&self, name: &str) -> Result<Vec<i64>>;

    /// Read a full matrix.
    fn read_matrix(&self, name: &str) -> Result<MatrixData>;
}

/// Opens matrix sources by file identifier.
pub trait MatrixSourceProvider: Send + Sync {
    fn open(&self, file_id: &str) -> Result<Box<dyn MatrixSource>>;
}

// ============================================================================
// MatrixFile
// ============================================================================

#[derive(Serialize, Deserialize)]
struct MatrixFileData {
    version: u32,
    shape: (usize, usize),
    matrices: Vec<(String, MatrixData)>,
    mappings: Vec<(String, Vec<i64>)>,
}

/// In-memory image of a matrix container file.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixFile {
    id: String,
    shape: (usize, usize),
    matrices: Vec<(String, MatrixData)>,
    mappings: Vec<(String, Vec<i64>)>,
}

impl MatrixFile {
    pub fn new(id: impl Into<String>, shape: (usize, usize)) -> Self {
        Self { id: id.into(), shape, matrices: Vec::new(), mappings: Vec::new() }
    }

    /// Add a matrix. The payload must hold `rows * cols` elements.
    pub fn with_matrix(mut self, name: impl Into<String>, data: MatrixData) -> Result<Self> {
        self.add_matrix(name, data)?;
        Ok(self)
    }

    pub fn add_matrix(&mut self, name: impl Into<String>, data: MatrixData) -> Result<()> {
        let name = name.into();
        let expected = self.shape.0 * self.shape.1;
        if data.len() != expected {
            return Err(Error::Config(format!(
                "matrix '{name}' in {} has {} elements, shape {:?} needs {expected}",
                self.id,
                data.len(),
                self.shape
            )));
        }
        if self.matrices.iter().any(|(n, _)| *n == name) {
            return Err(Error::Config(format!("matrix '{name}' added twice to {}", self.id)));
        }
        self.matrices.push((name, data));
        Ok(())
    }

    /// Add a zone-id mapping.
    pub fn with_mapping(mut self, name: impl Into<String>, zone_ids: Vec<i64>) -> Self {
        self.mappings.push((name.into(), zone_ids));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Write the container with bincode.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = MatrixFileData {
            version: MATRIX_FILE_VERSION,
            shape: self.shape,
            matrices: self.matrices.clone(),
            mappings: self.mappings.clone(),
        };
        let file = std::fs::File::create(path.as_ref())?;
        let mut writer = std::io::BufWriter::new(file);
        bincode::serialize_into(&mut writer, &data)?;
        writer.flush()?;
        Ok(())
    }

    /// Read a container written by [`MatrixFile::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let data: MatrixFileData = bincode::deserialize_from(std::io::BufReader::new(file))?;
        if data.version != MATRIX_FILE_VERSION {
            return Err(Error::Config(format!(
                "matrix file {} version mismatch: expected {MATRIX_FILE_VERSION}, found {}",
                path.display(),
                data.version
            )));
        }
        Ok(Self {
            id: path.display().to_string(),
            shape: data.shape,
            matrices: data.matrices,
            mappings: data.mappings,
        })
    }
}

impl MatrixSource for MatrixFile {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn shape(&self) -> (usize, usize) {
        self.shape
    }

    fn matrix_names(&self) -> Vec<String> {
        self.matrices.iter().map(|(n, _)| n.clone()).collect()
    }

    fn mapping_names(&self) -> Vec<String> {
        self.mappings.iter().map(|(n, _)| n.clone()).collect()
    }

    fn mapping(&self, name: &str) -> Result<Vec<i64>> {
        self.mappings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ids)| ids.clone())
            .ok_or_else(|| Error::NotFound(format!("mapping '{name}' in {}", self.id)))
    }

    fn read_matrix(&self, name: &str) -> Result<MatrixData> {
        self.matrices
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.clone())
            .ok_or_else(|| Error::NotFound(format!("matrix '{name}' in {}", self.id)))
    }
}

impl MatrixSource for Arc<MatrixFile> {
    fn source_id(&self) -> &str { self.as_ref().source_id() }
    fn shape(&self) -> (usize, usize) { self.as_ref().shape() }
    fn matrix_names(&self) -> Vec<String> { self.as_ref().matrix_names() }
    fn mapping_names(&self) -> Vec<String> { self.as_ref().mapping_names() }
    fn mapping(&self, name: &str) -> Result<Vec<i64>> { self.as_ref().mapping(name) }
    fn read_matrix(&self, name: &str) -> Result<MatrixData> { self.as_ref().read_matrix(name) }
}

// ============================================================================
// Providers
// ============================================================================

/// Resolves file identifiers to `MatrixFile`s under the data directories.
pub struct MatrixFileStore {
    settings: Arc<Settings>,
}

impl MatrixFileStore {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }
}

impl MatrixSourceProvider for MatrixFileStore {
    fn open(&self, file_id: &str) -> Result<Box<dyn MatrixSource>> {
        let path = self.settings.data_file_path(file_id)?;
        tracing::debug!(file_id, path = %path.display(), "opening matrix file");
        Ok(Box::new(MatrixFile::load(path)?))
    }
}

/// Matrix files held in memory, keyed by file identifier.
#[derive(Default, Clone)]
pub struct InMemoryMatrices {
    files: HashMap<String, Arc<MatrixFile>>,
}

impl InMemoryMatrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file_id: impl Into<String>, file: MatrixFile) {
        self.files.insert(file_id.into(), Arc::new(file));
    }

    pub fn with_file(mut self, file_id: impl Into<String>, file: MatrixFile) -> Self {
        self.insert(file_id, file);
        self
    }
}

impl MatrixSourceProvider for InMemoryMatrices {
    fn open(&self, file_id: &str) -> Result<Box<dyn MatrixSource>> {
        self.files
            .get(file_id)
            .map(|f| Box::new(Arc::clone(f)) as Box<dyn MatrixSource>)
            .ok_or_else(|| Error::NotFound(format!("matrix file '{file_id}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_matrix_checks_length() {
        let f = MatrixFile::new("skims.omx", (2, 2));
        assert!(f.with_matrix("DIST", MatrixData::Float32(vec![1.0; 3])).is_err());
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skims.omx");
        let f = MatrixFile::new("skims.omx", (2, 2))
            .with_matrix("DIST", MatrixData::Float32(vec![1.0, 2.0, 3.0, 4.0]))
            .unwrap()
            .with_mapping("zone_number", vec![10, 20]);
        f.save(&path).unwrap();

        let back = MatrixFile::load(&path).unwrap();
        assert_eq!(back.shape(), (2, 2));
        assert_eq!(back.matrix_names(), vec!["DIST".to_string()]);
        assert_eq!(back.mapping("zone_number").unwrap(), vec![10, 20]);
        assert_eq!(back.read_matrix("DIST").unwrap(), f.read_matrix("DIST").unwrap());
    }

    #[test]
    fn test_in_memory_unknown_file() {
        let m = InMemoryMatrices::new();
        assert!(matches!(m.open("nope.omx"), Err(Error::NotFound(_))));
    }
}
