//! Skim catalog: the layout of one skim tag's buffer, fixed before load.
//!
//! Matrix names are split into [`SkimKey`]s; every base name gets a
//! contiguous block of sub-offsets (one per period, in first-seen order) and
//! blocks are laid end to end in first-seen base order. The resulting
//! `block_offsets` are always a dense assignment of `0..num_skims`.

use hashbrown::HashMap;

use super::buffer::SkimDtype;
use super::key::SkimKey;
use super::offset::OffsetMapper;
use super::source::MatrixSourceProvider;
use crate::{Error, Result};

/// One source file and the matrices it contributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkimManifestEntry {
    pub file_id: String,
    pub matrix_names: Vec<String>,
}

/// Layout and metadata for every skim under one tag.
#[derive(Debug, Clone)]
pub struct SkimCatalog {
    pub skim_tag: String,
    pub file_ids: Vec<String>,
    pub manifest: Vec<SkimManifestEntry>,
    /// `(rows, cols)` of every matrix under this tag.
    pub omx_shape: (usize, usize),
    pub dtype: SkimDtype,
    /// Retained keys in first-seen order, with the matrix name each came from.
    pub skim_keys: Vec<(SkimKey, String)>,
    /// Base name → sub-labels; a label's sub-offset is its position.
    pub key1_subkeys: Vec<(String, Vec<String>)>,
    /// Base name → starting offset of its block.
    pub key1_block_offsets: Vec<(String, usize)>,
    pub block_offsets: HashMap<SkimKey, usize>,
    pub offset_map_name: Option<String>,
    /// External zone ids in row order.
    pub offset_map: Option<Vec<i64>>,
}

impl SkimCatalog {
    /// Scan the source files for `skim_tag` and compute the buffer layout.
    pub fn build(
        skim_tag: &str,
        file_ids: &[String],
        time_periods: Option<&[String]>,
        dtype: SkimDtype,
        sources: &dyn MatrixSourceProvider,
    ) -> Result<Self> {
        if file_ids.is_empty() {
            return Err(Error::Config(format!("no matrix files listed for skim tag '{skim_tag}'")));
        }

        let mut omx_shape: Option<(usize, usize)> = None;
        let mut manifest: Vec<SkimManifestEntry> = Vec::with_capacity(file_ids.len());
        let mut owner: HashMap<String, String> = HashMap::new();
        let mut offset_map: Option<(String, Vec<i64>, String)> = None;

        for file_id in file_ids {
            let source = sources.open(file_id)?;
            let shape = source.shape();
            match omx_shape {
                None => omx_shape = Some(shape),
                Some(expected) if expected != shape => {
                    return Err(Error::ShapeMismatch {
                        tag: skim_tag.to_string(),
                        source_id: file_id.clone(),
                        expected,
                        found: shape,
                    });
                }
                Some(_) => {}
            }

            let matrix_names = source.matrix_names();
            for name in &matrix_names {
                if let Some(first) = owner.insert(name.clone(), file_id.clone()) {
                    return Err(Error::DuplicateSkim {
                        name: name.clone(),
                        first,
                        second: file_id.clone(),
                    });
                }
            }

            for mapping_name in source.mapping_names() {
                let ids = source.mapping(&mapping_name)?;
                match &offset_map {
                    None => {
                        if ids.len() != shape.0 {
                            return Err(Error::Config(format!(
                                "mapping '{mapping_name}' in {file_id} has {} zone ids for {} rows",
                                ids.len(),
                                shape.0
                            )));
                        }
                        offset_map = Some((mapping_name, ids, file_id.clone()));
                    }
                    Some((first_name, first_ids, first_file)) if *first_ids != ids => {
                        return Err(Error::ConflictingOffsetMap {
                            tag: skim_tag.to_string(),
                            first: format!("{first_file}:{first_name}"),
                            second: format!("{file_id}:{mapping_name}"),
                        });
                    }
                    Some(_) => {}
                }
            }

            tracing::debug!(skim_tag, file_id = %file_id, matrices = matrix_names.len(), "scanned matrix file");
            manifest.push(SkimManifestEntry { file_id: file_id.clone(), matrix_names });
        }

        let keep = |key: &SkimKey| match (key.time_period(), time_periods) {
            (Some(period), Some(periods)) if !periods.is_empty() => {
                periods.iter().any(|p| p == period)
            }
            _ => true,
        };
        let skim_keys: Vec<(SkimKey, String)> = manifest
            .iter()
            .flat_map(|entry| entry.matrix_names.iter())
            .map(|name| (SkimKey::parse(name), name.clone()))
            .filter(|(key, _)| keep(key))
            .collect();

        let (offset_map_name, offset_map) = match offset_map {
            Some((name, ids, _)) => (Some(name), Some(ids)),
            None => (None, None),
        };

        let catalog = Self::layout(
            skim_tag,
            file_ids.to_vec(),
            manifest,
            omx_shape.unwrap_or_default(),
            dtype,
            skim_keys,
            offset_map_name,
            offset_map,
        )?;
        tracing::info!(
            skim_tag,
            files = catalog.file_ids.len(),
            num_skims = catalog.num_skims(),
            rows = catalog.omx_shape.0,
            cols = catalog.omx_shape.1,
            offset_map = catalog.offset_map_name.as_deref().unwrap_or("-"),
            "built skim catalog"
        );
        Ok(catalog)
    }

    /// Catalog over a plain list of matrix names with no source files.
    pub fn from_keys(
        skim_tag: &str,
        omx_shape: (usize, usize),
        dtype: SkimDtype,
        matrix_names: impl IntoIterator<Item = String>,
    ) -> Result<Self> {
        let mut seen = hashbrown::HashSet::new();
        let mut skim_keys = Vec::new();
        for name in matrix_names {
            if !seen.insert(name.clone()) {
                return Err(Error::DuplicateSkim { name, first: skim_tag.into(), second: skim_tag.into() });
            }
            skim_keys.push((SkimKey::parse(&name), name));
        }
        Self::layout(skim_tag, Vec::new(), Vec::new(), omx_shape, dtype, skim_keys, None, None)
    }

    #[allow(clippy::too_many_arguments)]
    fn layout(
        skim_tag: &str,
        file_ids: Vec<String>,
        manifest: Vec<SkimManifestEntry>,
        omx_shape: (usize, usize),
        dtype: SkimDtype,
        skim_keys: Vec<(SkimKey, String)>,
        offset_map_name: Option<String>,
        offset_map: Option<Vec<i64>>,
    ) -> Result<Self> {
        let mut key1_subkeys: Vec<(String, Vec<String>)> = Vec::new();
        for (key, _) in &skim_keys {
            let base = key.base();
            let pos = match key1_subkeys.iter().position(|(b, _)| b == base) {
                Some(pos) => pos,
                None => {
                    key1_subkeys.push((base.to_string(), Vec::new()));
                    key1_subkeys.len() - 1
                }
            };
            let labels = &mut key1_subkeys[pos].1;
            if labels.iter().any(|l| l == key.sub_label()) {
                return Err(Error::Config(format!(
                    "skim '{key}' in tag '{skim_tag}' collides with another key of base '{base}'"
                )));
            }
            labels.push(key.sub_label().to_string());
        }

        let mut next = 0usize;
        let key1_block_offsets: Vec<(String, usize)> = key1_subkeys
            .iter()
            .map(|(base, labels)| {
                let start = next;
                next += labels.len();
                (base.clone(), start)
            })
            .collect();

        let mut block_offsets = HashMap::with_capacity(skim_keys.len());
        for (key, _) in &skim_keys {
            let (block, labels) = key1_block_offsets
                .iter()
                .zip(&key1_subkeys)
                .find(|((base, _), _)| base == key.base())
                .map(|((_, start), (_, labels))| (*start, labels))
                .ok_or_else(|| Error::Config(format!("no block for skim '{key}'")))?;
            let sub = labels
                .iter()
                .position(|l| l == key.sub_label())
                .ok_or_else(|| Error::Config(format!("no sub-offset for skim '{key}'")))?;
            block_offsets.insert(key.clone(), block + sub);
        }

        Ok(Self {
            skim_tag: skim_tag.to_string(),
            file_ids,
            manifest,
            omx_shape,
            dtype,
            skim_keys,
            key1_subkeys,
            key1_block_offsets,
            block_offsets,
            offset_map_name,
            offset_map,
        })
    }

    /// Number of matrices in the third buffer dimension.
    pub fn num_skims(&self) -> usize {
        self.skim_keys.len()
    }

    pub fn contains_key(&self, key: &SkimKey) -> bool {
        self.block_offsets.contains_key(key)
    }

    /// Offset of `key` in the third buffer dimension.
    pub fn block_offset(&self, key: &SkimKey) -> Result<usize> {
        self.block_offsets
            .get(key)
            .copied()
            .ok_or_else(|| Error::Lookup(format!("key '{key}' not in skims for tag '{}'", self.skim_tag)))
    }

    /// Retained keys in first-seen order.
    pub fn keys(&self) -> impl Iterator<Item = &SkimKey> {
        self.skim_keys.iter().map(|(k, _)| k)
    }

    /// Retained `(key, matrix name, offset)` contributed by one file.
    pub fn keys_from_file(&self, file_id: &str) -> Vec<(&SkimKey, &str, usize)> {
        let Some(entry) = self.manifest.iter().find(|e| e.file_id == file_id) else {
            return Vec::new();
        };
        self.skim_keys
            .iter()
            .filter(|(_, name)| entry.matrix_names.contains(name))
            .filter_map(|(key, name)| {
                self.block_offsets.get(key).map(|off| (key, name.as_str(), *off))
            })
            .collect()
    }

    /// Offset mapper for this tag: the file mapping if there is one,
    /// otherwise one-based sequential zone ids.
    pub fn offset_mapper(&self) -> Result<OffsetMapper> {
        match &self.offset_map {
            Some(ids) => OffsetMapper::from_offset_list(ids),
            None => Ok(OffsetMapper::Int(-1)),
        }
    }
}
