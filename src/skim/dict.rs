//! Skim dictionary: vectorized lookups over a loaded buffer.

use std::sync::Arc;

use super::buffer::SkimBuffer;
use super::catalog::SkimCatalog;
use super::key::SkimKey;
use super::offset::OffsetMapper;
use crate::{Error, Result};

/// A loaded skim tag: catalog, buffer and zone id mapper bound together.
///
/// Cheap to clone; clones share the same immutable buffer.
#[derive(Debug, Clone)]
pub struct SkimDict {
    catalog: Arc<SkimCatalog>,
    buffer: Arc<SkimBuffer>,
    mapper: OffsetMapper,
}

impl SkimDict {
    pub fn new(catalog: Arc<SkimCatalog>, buffer: Arc<SkimBuffer>) -> Result<Self> {
        let (rows, cols) = catalog.omx_shape;
        let expected = (rows, cols, catalog.num_skims());
        if buffer.shape() != expected || buffer.dtype() != catalog.dtype {
            return Err(Error::State(format!(
                "skim buffer {:?}/{} does not match catalog {expected:?}/{} for tag '{}'",
                buffer.shape(),
                buffer.dtype(),
                catalog.dtype,
                catalog.skim_tag
            )));
        }
        let mapper = catalog.offset_mapper()?;
        Ok(Self { catalog, buffer, mapper })
    }

    /// Replace the default mapper.
    pub fn with_mapper(mut self, mapper: OffsetMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn skim_tag(&self) -> &str {
        &self.catalog.skim_tag
    }

    pub fn catalog(&self) -> &SkimCatalog {
        &self.catalog
    }

    pub fn buffer(&self) -> &Arc<SkimBuffer> {
        &self.buffer
    }

    pub fn mapper(&self) -> &OffsetMapper {
        &self.mapper
    }

    pub fn keys(&self) -> impl Iterator<Item = &SkimKey> {
        self.catalog.keys()
    }

    pub fn key_offset(&self, key: &SkimKey) -> Result<usize> {
        self.catalog.block_offset(key)
    }

    /// Values of `key` for each `(origin, destination)` pair, in input order.
    pub fn lookup(&self, origins: &[i64], destinations: &[i64], key: &SkimKey) -> Result<Vec<f64>> {
        check_lengths(origins.len(), destinations.len())?;
        let offset = self.key_offset(key)?;
        let (rows, cols) = self.catalog.omx_shape;
        let o = self.mapper.map_all(origins, rows)?;
        let d = self.mapper.map_all(destinations, cols)?;
        Ok(self
            .buffer
            .gather(o.into_iter().zip(d).map(|(r, c)| self.buffer.flat_index(r, c, offset))))
    }

    /// Single value.
    pub fn get(&self, origin: i64, destination: i64, key: &SkimKey) -> Result<f64> {
        Ok(self.lookup(&[origin], &[destination], key)?[0])
    }

    /// Per-row period lookup: row `i` reads `base__periods[i]`.
    pub fn lookup_by_period<P: AsRef<str>>(
        &self,
        origins: &[i64],
        destinations: &[i64],
        base: &str,
        periods: &[P],
    ) -> Result<Vec<f64>> {
        check_lengths(origins.len(), destinations.len())?;
        check_lengths(origins.len(), periods.len())?;
        let (rows, cols) = self.catalog.omx_shape;
        let mut flat = Vec::with_capacity(origins.len());
        for ((o, d), period) in origins.iter().zip(destinations).zip(periods) {
            let offset = self.key_offset(&SkimKey::period(base, period.as_ref()))?;
            let r = self.mapper.map(*o, rows)?;
            let c = self.mapper.map(*d, cols)?;
            flat.push(self.buffer.flat_index(r, c, offset));
        }
        Ok(self.buffer.gather(flat))
    }
}

fn check_lengths(a: usize, b: usize) -> Result<()> {
    if a != b {
        return Err(Error::Lookup(format!("lookup inputs differ in length: {a} != {b}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skim::buffer::SkimDtype;
    use crate::skim::source::MatrixData;

    fn dict() -> SkimDict {
        let names = ["DIST", "TIME__AM", "TIME__PM"].map(String::from);
        let cat = SkimCatalog::from_keys("taz", (3, 3), SkimDtype::Float32, names).unwrap();
        let mut buf = SkimBuffer::allocate(&cat, false).unwrap();
        for off in 0..3 {
            let data = (0..9).map(|i| (off * 100 + i) as f32).collect();
            buf.write_matrix(off, &MatrixData::Float32(data)).unwrap();
        }
        SkimDict::new(Arc::new(cat), Arc::new(buf)).unwrap()
    }

    #[test]
    fn test_lookup_one_based() {
        let d = dict();
        // zone 1 → row 0, zone 3 → col 2
        let v = d.lookup(&[1, 3], &[3, 1], &SkimKey::scalar("DIST")).unwrap();
        assert_eq!(v, vec![2.0, 6.0]);
        assert_eq!(d.get(2, 2, &SkimKey::period("TIME", "PM")).unwrap(), 204.0);
    }

    #[test]
    fn test_unknown_key() {
        let d = dict();
        assert!(matches!(
            d.lookup(&[1], &[1], &SkimKey::scalar("FARE")),
            Err(Error::Lookup(_))
        ));
    }

    #[test]
    fn test_zone_outside_index_is_error() {
        let d = dict();
        let dist = SkimKey::scalar("DIST");
        assert!(matches!(d.lookup(&[4], &[1], &dist), Err(Error::Lookup(_))));
        assert!(matches!(d.lookup(&[1], &[0], &dist), Err(Error::Lookup(_))));
        assert!(matches!(d.get(i64::MAX, 1, &dist), Err(Error::Lookup(_))));
        assert!(d.lookup_by_period(&[1], &[-1], "TIME", &["AM"]).is_err());
    }

    #[test]
    fn test_length_mismatch() {
        assert!(dict().lookup(&[1, 2], &[1], &SkimKey::scalar("DIST")).is_err());
    }

    #[test]
    fn test_lookup_by_period() {
        let v = dict().lookup_by_period(&[1, 1], &[2, 2], "TIME", &["AM", "PM"]).unwrap();
        assert_eq!(v, vec![101.0, 201.0]);
    }

    #[test]
    fn test_list_mapper() {
        let d = dict().with_mapper(OffsetMapper::from_offset_list(&[10, 20, 30]).unwrap());
        assert_eq!(d.get(30, 10, &SkimKey::scalar("DIST")).unwrap(), 6.0);
    }
}
