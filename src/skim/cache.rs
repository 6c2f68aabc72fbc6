//! On-disk skim cache: one raw file per skim tag, byte-identical to the
//! in-memory buffer.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};

use super::buffer::{gb, SkimBuffer};
use super::catalog::SkimCatalog;
use crate::{Error, Result};

/// File name of the cache artifact for a skim tag.
pub fn cache_file_name(skim_tag: &str) -> String {
    format!("cached_{skim_tag}.mmap")
}

pub fn cache_path(cache_dir: &Path, skim_tag: &str) -> PathBuf {
    cache_dir.join(cache_file_name(skim_tag))
}

/// Fill `buffer` from the cache file for the catalog's tag.
pub fn read_cache_into(cache_dir: &Path, catalog: &SkimCatalog, buffer: &mut SkimBuffer) -> Result<()> {
    let path = cache_path(cache_dir, &catalog.skim_tag);
    if !path.exists() {
        return Err(Error::Cache(format!("skim cache file not found: {}", path.display())));
    }
    let file = std::fs::File::open(&path)?;
    let on_disk = file.metadata()?.len();
    let nbytes = buffer.nbytes();
    if on_disk != nbytes as u64 {
        return Err(Error::Cache(format!(
            "skim cache {} holds {on_disk} bytes, buffer {:?} needs {nbytes}",
            path.display(),
            buffer.shape()
        )));
    }
    if nbytes > 0 {
        let map = unsafe { Mmap::map(&file)? };
        buffer.as_bytes_mut().copy_from_slice(&map[..nbytes]);
    }
    tracing::info!(skim_tag = %catalog.skim_tag, path = %path.display(), size = %gb(nbytes), "read skim cache");
    Ok(())
}

/// Write the whole buffer to the cache file, replacing any previous one.
pub fn write_cache_from(cache_dir: &Path, catalog: &SkimCatalog, buffer: &SkimBuffer) -> Result<()> {
    std::fs::create_dir_all(cache_dir)?;
    let path = cache_path(cache_dir, &catalog.skim_tag);
    let nbytes = buffer.nbytes();
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)?;
    file.set_len(nbytes as u64)?;
    if nbytes > 0 {
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        map.copy_from_slice(buffer.as_bytes());
        map.flush()?;
    }
    tracing::info!(skim_tag = %catalog.skim_tag, path = %path.display(), size = %gb(nbytes), "wrote skim cache");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skim::buffer::SkimDtype;
    use crate::skim::source::MatrixData;

    fn filled(dtype: SkimDtype) -> (SkimCatalog, SkimBuffer) {
        let names = ["DIST", "TIME__AM"].map(String::from);
        let cat = SkimCatalog::from_keys("taz", (2, 3), dtype, names).unwrap();
        let mut buf = SkimBuffer::allocate(&cat, false).unwrap();
        buf.write_matrix(0, &MatrixData::Float64(vec![0.5, 1.5, 2.5, 3.5, 4.5, f64::NAN])).unwrap();
        buf.write_matrix(1, &MatrixData::Float32(vec![-1.0; 6])).unwrap();
        (cat, buf)
    }

    #[test]
    fn test_cache_file_name() {
        assert_eq!(cache_file_name("taz"), "cached_taz.mmap");
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (cat, buf) = filled(SkimDtype::Float64);
        write_cache_from(dir.path(), &cat, &buf).unwrap();

        let mut back = SkimBuffer::allocate(&cat, true).unwrap();
        read_cache_into(dir.path(), &cat, &mut back).unwrap();
        assert_eq!(back.as_bytes(), buf.as_bytes());
    }

    #[test]
    fn test_missing_cache() {
        let dir = tempfile::tempdir().unwrap();
        let (cat, mut buf) = filled(SkimDtype::Float32);
        assert!(matches!(read_cache_into(dir.path(), &cat, &mut buf), Err(Error::Cache(_))));
    }

    #[test]
    fn test_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let (cat, buf) = filled(SkimDtype::Float32);
        write_cache_from(dir.path(), &cat, &buf).unwrap();

        let (cat64, mut buf64) = filled(SkimDtype::Float64);
        assert!(matches!(read_cache_into(dir.path(), &cat64, &mut buf64), Err(Error::Cache(_))));
    }
}
