//! Skim buffers: one contiguous block of numeric storage per skim tag.
//!
//! Layout is row-major `(rows, cols, num_skims)`: the skim offset is the
//! fastest-varying dimension, so all skims for one zone pair are adjacent.
//!
//! ## Regions
//!
//! | Region | Backing | Use |
//! |--------|---------|-----|
//! | Private | heap `Vec<u64>` (8-byte aligned) | single-process runs |
//! | Shared | anonymous memory map (page aligned) | loaded once, read by worker threads of this process through `Arc` |

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use memmap2::{MmapMut, MmapOptions};
use serde::{Deserialize, Serialize};

use super::catalog::SkimCatalog;
use super::source::MatrixData;
use crate::{Error, Result};

// ============================================================================
// Element type
// ============================================================================

/// Element type shared by every matrix under one skim tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SkimDtype {
    #[default]
    Float32,
    Float64,
}

impl SkimDtype {
    /// Size of one element in bytes.
    pub const fn item_size(self) -> usize {
        match self {
            SkimDtype::Float32 => 4,
            SkimDtype::Float64 => 8,
        }
    }
}

impl FromStr for SkimDtype {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "float32" | "f4" => Ok(SkimDtype::Float32),
            "float64" | "f8" => Ok(SkimDtype::Float64),
            other => Err(Error::UnsupportedDtype(other.to_string())),
        }
    }
}

impl TryFrom<String> for SkimDtype {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<SkimDtype> for String {
    fn from(d: SkimDtype) -> String {
        d.to_string()
    }
}

impl fmt::Display for SkimDtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkimDtype::Float32 => write!(f, "float32"),
            SkimDtype::Float64 => write!(f, "float64"),
        }
    }
}

/// Bytes as a GB string for log lines.
pub(crate) fn gb(bytes: usize) -> String {
    format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
}

// ============================================================================
// SkimBuffer
// ============================================================================

enum Region {
    Private(Vec<u64>),
    Shared(MmapMut),
}

/// Flat storage of `rows * cols * num_skims` elements.
pub struct SkimBuffer {
    skim_tag: String,
    dtype: SkimDtype,
    rows: usize,
    cols: usize,
    num_skims: usize,
    len: usize,
    region: Region,
}

impl fmt::Debug for SkimBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkimBuffer")
            .field("skim_tag", &self.skim_tag)
            .field("dtype", &self.dtype)
            .field("shape", &self.shape())
            .field("shared", &self.is_shared())
            .finish()
    }
}

impl SkimBuffer {
    /// Allocate a zeroed buffer sized from the catalog.
    ///
    /// The element count is computed in `u128` and narrowed once, so an
    /// oversized catalog fails instead of wrapping.
    pub fn allocate(catalog: &SkimCatalog, shared: bool) -> Result<Self> {
        let (rows, cols) = catalog.omx_shape;
        let num_skims = catalog.num_skims();
        let dtype = catalog.dtype;
        let item_size = dtype.item_size();

        let elements = rows as u128 * cols as u128 * num_skims as u128;
        let too_large = || Error::BufferTooLarge { tag: catalog.skim_tag.clone(), elements };
        let len = usize::try_from(elements).map_err(|_| too_large())?;
        let nbytes = usize::try_from(elements * item_size as u128).map_err(|_| too_large())?;

        tracing::info!(
            skim_tag = %catalog.skim_tag,
            num_skims,
            rows,
            cols,
            item_size,
            elements = len,
            bytes = nbytes,
            size = %gb(nbytes),
            shared,
            "allocating skim buffer"
        );

        let region = if shared && nbytes > 0 {
            Region::Shared(MmapOptions::new().len(nbytes).map_anon()?)
        } else {
            Region::Private(vec![0u64; nbytes.div_ceil(8)])
        };

        Ok(Self {
            skim_tag: catalog.skim_tag.clone(),
            dtype,
            rows,
            cols,
            num_skims,
            len,
            region,
        })
    }

    pub fn skim_tag(&self) -> &str {
        &self.skim_tag
    }

    pub fn dtype(&self) -> SkimDtype {
        self.dtype
    }

    /// `(rows, cols, num_skims)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.rows, self.cols, self.num_skims)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn nbytes(&self) -> usize {
        self.len * self.dtype.item_size()
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.region, Region::Shared(_))
    }

    /// Raw bytes in native endianness, exactly `nbytes()` long.
    pub fn as_bytes(&self) -> &[u8] {
        let n = self.nbytes();
        match &self.region {
            Region::Private(words) => &bytemuck::cast_slice::<u64, u8>(words)[..n],
            Region::Shared(map) => &map[..n],
        }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let n = self.nbytes();
        match &mut self.region {
            Region::Private(words) => &mut bytemuck::cast_slice_mut::<u64, u8>(words)[..n],
            Region::Shared(map) => &mut map[..n],
        }
    }

    /// Flat element index of `[row, col, offset]`. Callers check bounds.
    #[inline]
    pub(crate) fn flat_index(&self, row: usize, col: usize, offset: usize) -> usize {
        (row * self.cols + col) * self.num_skims + offset
    }

    /// Gather elements by flat index, widened to f64. Panics on an index
    /// past `len()`.
    pub(crate) fn gather(&self, flat: impl IntoIterator<Item = usize>) -> Vec<f64> {
        let bytes = self.as_bytes();
        match self.dtype {
            SkimDtype::Float32 => {
                let data: &[f32] = bytemuck::cast_slice(bytes);
                flat.into_iter().map(|i| data[i] as f64).collect()
            }
            SkimDtype::Float64 => {
                let data: &[f64] = bytemuck::cast_slice(bytes);
                flat.into_iter().map(|i| data[i]).collect()
            }
        }
    }

    #[cfg(test)]
    fn get(&self, row: usize, col: usize, offset: usize) -> f64 {
        self.gather([self.flat_index(row, col, offset)])[0]
    }

    /// Copy a full `rows × cols` matrix into slice `[:, :, offset]`.
    pub fn write_matrix(&mut self, offset: usize, data: &MatrixData) -> Result<()> {
        let plane = self.rows * self.cols;
        if data.len() != plane {
            let n = data.len();
            let found = match self.cols {
                c if c > 0 && n % c == 0 => (n / c, c),
                _ => (1, n),
            };
            return Err(Error::ShapeMismatch {
                tag: self.skim_tag.clone(),
                source_id: format!("matrix for offset {offset}"),
                expected: (self.rows, self.cols),
                found,
            });
        }
        if offset >= self.num_skims {
            return Err(Error::Lookup(format!(
                "offset {offset} out of range for {} skims in '{}'",
                self.num_skims, self.skim_tag
            )));
        }
        let stride = self.num_skims;
        let dtype = self.dtype;
        let bytes = self.as_bytes_mut();
        match (dtype, data) {
            (SkimDtype::Float32, MatrixData::Float32(src)) => {
                let dst: &mut [f32] = bytemuck::cast_slice_mut(bytes);
                for (i, v) in src.iter().enumerate() {
                    dst[i * stride + offset] = *v;
                }
            }
            (SkimDtype::Float32, MatrixData::Float64(src)) => {
                let dst: &mut [f32] = bytemuck::cast_slice_mut(bytes);
                for (i, v) in src.iter().enumerate() {
                    dst[i * stride + offset] = *v as f32;
                }
            }
            (SkimDtype::Float64, MatrixData::Float32(src)) => {
                let dst: &mut [f64] = bytemuck::cast_slice_mut(bytes);
                for (i, v) in src.iter().enumerate() {
                    dst[i * stride + offset] = *v as f64;
                }
            }
            (SkimDtype::Float64, MatrixData::Float64(src)) => {
                let dst: &mut [f64] = bytemuck::cast_slice_mut(bytes);
                for (i, v) in src.iter().enumerate() {
                    dst[i * stride + offset] = *v;
                }
            }
            (_, other) => {
                return Err(Error::UnsupportedDtype(format!(
                    "cannot store {} matrix in {dtype} skim buffer",
                    other.dtype_name()
                )))
            }
        }
        Ok(())
    }

    /// Copy out slice `[:, :, offset]` as a row-major matrix.
    pub fn matrix(&self, offset: usize) -> Result<Vec<f64>> {
        if offset >= self.num_skims {
            return Err(Error::Lookup(format!(
                "offset {offset} out of range for {} skims in '{}'",
                self.num_skims, self.skim_tag
            )));
        }
        let stride = self.num_skims;
        Ok(self.gather((0..self.rows * self.cols).map(|i| i * stride + offset)))
    }

    /// Shape/dtype summary for handing to workers.
    pub fn descriptor(&self) -> SkimBufferDescriptor {
        SkimBufferDescriptor {
            skim_tag: self.skim_tag.clone(),
            shape: self.shape(),
            dtype: self.dtype,
            nbytes: self.nbytes(),
            shared: self.is_shared(),
        }
    }
}

/// What a worker needs to know about a buffer it is attaching to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkimBufferDescriptor {
    pub skim_tag: String,
    pub shape: (usize, usize, usize),
    pub dtype: SkimDtype,
    pub nbytes: usize,
    pub shared: bool,
}

// ============================================================================
// SharedSkimBuffers
// ============================================================================

/// Registry of shared buffers by skim tag.
///
/// Filled by exactly one writer; cloning the registry hands read-only
/// references to workers, after which further writes are refused.
#[derive(Debug, Default, Clone)]
pub struct SharedSkimBuffers {
    buffers: BTreeMap<String, Arc<SkimBuffer>>,
}

impl SharedSkimBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, buffer: SkimBuffer) {
        self.buffers.insert(buffer.skim_tag().to_string(), Arc::new(buffer));
    }

    pub fn get(&self, skim_tag: &str) -> Option<&Arc<SkimBuffer>> {
        self.buffers.get(skim_tag)
    }

    /// Mutable access for the loading writer.
    pub fn get_mut(&mut self, skim_tag: &str) -> Result<&mut SkimBuffer> {
        let arc = self
            .buffers
            .get_mut(skim_tag)
            .ok_or_else(|| Error::NotFound(format!("shared skim buffer '{skim_tag}'")))?;
        Arc::get_mut(arc).ok_or_else(|| {
            Error::State(format!(
                "shared skim buffer '{skim_tag}' is already attached by readers and can no longer be written"
            ))
        })
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(String::as_str)
    }

    pub fn descriptors(&self) -> Vec<SkimBufferDescriptor> {
        self.buffers.values().map(|b| b.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
