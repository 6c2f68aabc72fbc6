//! Fill skim buffers from matrix sources or the skim cache.

use std::time::Instant;

use super::buffer::SkimBuffer;
use super::cache::{read_cache_into, write_cache_from};
use super::catalog::SkimCatalog;
use super::source::MatrixSourceProvider;
use crate::config::CacheSettings;
use crate::{Error, Result};

/// Copy every retained matrix into its slice of `buffer`.
///
/// Returns the number of matrices copied.
pub fn read_matrices_into(
    catalog: &SkimCatalog,
    sources: &dyn MatrixSourceProvider,
    buffer: &mut SkimBuffer,
) -> Result<usize> {
    let (rows, cols) = catalog.omx_shape;
    if buffer.shape() != (rows, cols, catalog.num_skims()) {
        return Err(Error::State(format!(
            "skim buffer {:?} was not allocated for catalog '{}'",
            buffer.shape(),
            catalog.skim_tag
        )));
    }

    let mut copied = 0;
    for file_id in &catalog.file_ids {
        let source = sources.open(file_id)?;
        if source.shape() != catalog.omx_shape {
            return Err(Error::ShapeMismatch {
                tag: catalog.skim_tag.clone(),
                source_id: file_id.clone(),
                expected: catalog.omx_shape,
                found: source.shape(),
            });
        }
        for (key, name, offset) in catalog.keys_from_file(file_id) {
            let data = source.read_matrix(name)?;
            if !data.is_float() {
                return Err(Error::NonFloatMatrix {
                    name: name.to_string(),
                    source_id: file_id.clone(),
                    dtype: data.dtype_name().to_string(),
                });
            }
            buffer.write_matrix(offset, &data)?;
            tracing::debug!(skim_tag = %catalog.skim_tag, %key, offset, file_id = %file_id, "loaded skim");
            copied += 1;
        }
    }
    Ok(copied)
}

/// Load one skim tag: from the cache when reading it, otherwise from the
/// matrix sources, then write the cache when asked to.
pub fn load_skims(
    catalog: &SkimCatalog,
    sources: &dyn MatrixSourceProvider,
    cache: &CacheSettings,
    buffer: &mut SkimBuffer,
) -> Result<()> {
    cache.validate()?;
    let started = Instant::now();

    if cache.read {
        read_cache_into(&cache.dir, catalog, buffer)?;
    } else {
        let copied = read_matrices_into(catalog, sources, buffer)?;
        tracing::info!(
            skim_tag = %catalog.skim_tag,
            matrices = copied,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "read skims from matrix files"
        );
    }

    if cache.write {
        write_cache_from(&cache.dir, catalog, buffer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skim::buffer::SkimDtype;
    use crate::skim::source::{InMemoryMatrices, MatrixData, MatrixFile};

    fn sources() -> InMemoryMatrices {
        let f = MatrixFile::new("skims.omx", (2, 2))
            .with_matrix("DIST", MatrixData::Float32(vec![1.0, 2.0, 3.0, 4.0]))
            .unwrap()
            .with_matrix("ZONE", MatrixData::Int32(vec![1, 2, 3, 4]))
            .unwrap();
        InMemoryMatrices::new().with_file("skims.omx", f)
    }

    #[test]
    fn test_non_float_matrix_rejected() {
        let files = vec!["skims.omx".to_string()];
        let cat = SkimCatalog::build("taz", &files, None, SkimDtype::Float32, &sources()).unwrap();
        let mut buf = SkimBuffer::allocate(&cat, false).unwrap();
        let err = read_matrices_into(&cat, &sources(), &mut buf).unwrap_err();
        assert!(matches!(err, Error::NonFloatMatrix { ref name, .. } if name == "ZONE"));
    }

    #[test]
    fn test_read_and_write_cache_exclusive() {
        let files = vec!["skims.omx".to_string()];
        let cat = SkimCatalog::build("taz", &files, None, SkimDtype::Float32, &sources()).unwrap();
        let mut buf = SkimBuffer::allocate(&cat, false).unwrap();
        let cache = CacheSettings { read: true, write: true, dir: std::env::temp_dir() };
        assert!(matches!(
            load_skims(&cat, &sources(), &cache, &mut buf),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_then_cache() {
        let dir = tempfile::tempdir().unwrap();
        let only_dist = InMemoryMatrices::new().with_file(
            "skims.omx",
            MatrixFile::new("skims.omx", (2, 2))
                .with_matrix("DIST", MatrixData::Float32(vec![1.0, 2.0, 3.0, 4.0]))
                .unwrap(),
        );
        let files = vec!["skims.omx".to_string()];
        let cat = SkimCatalog::build("taz", &files, None, SkimDtype::Float32, &only_dist).unwrap();

        let mut buf = SkimBuffer::allocate(&cat, false).unwrap();
        let write = CacheSettings { read: false, write: true, dir: dir.path().to_path_buf() };
        load_skims(&cat, &only_dist, &write, &mut buf).unwrap();
        assert!(dir.path().join("cached_taz.mmap").exists());

        // reading the cache never touches the matrix sources
        let mut cached = SkimBuffer::allocate(&cat, false).unwrap();
        let read = CacheSettings { read: true, write: false, dir: dir.path().to_path_buf() };
        load_skims(&cat, &InMemoryMatrices::new(), &read, &mut cached).unwrap();
        assert_eq!(cached.matrix(0).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }
}
