//! Zone id → dense row/column index translation.

use hashbrown::HashMap;

use crate::{Error, Result};

/// Translates external zone ids to internal positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OffsetMapper {
    /// Ids already are positions.
    Identity,
    /// Explicit id → position table covering every row.
    List(HashMap<i64, usize>),
    /// Constant bias added to the id (`-1` for one-based ids).
    Int(i64),
}

impl OffsetMapper {
    /// Build a `List` mapper from zone ids in row order.
    pub fn from_offset_list(zone_ids: &[i64]) -> Result<Self> {
        let mut map = HashMap::with_capacity(zone_ids.len());
        for (pos, id) in zone_ids.iter().enumerate() {
            if map.insert(*id, pos).is_some() {
                return Err(Error::Config(format!("duplicate zone id {id} in offset list")));
            }
        }
        Ok(OffsetMapper::List(map))
    }

    /// Position of one id in a dimension of `len` entries.
    #[inline]
    pub fn map(&self, id: i64, len: usize) -> Result<usize> {
        let pos = match self {
            OffsetMapper::Identity => usize::try_from(id).ok(),
            OffsetMapper::List(map) => map.get(&id).copied(),
            OffsetMapper::Int(bias) => id.checked_add(*bias).and_then(|p| usize::try_from(p).ok()),
        };
        match pos {
            Some(p) if p < len => Ok(p),
            _ => Err(Error::Lookup(format!("zone id {id} is not in the skim zone index"))),
        }
    }

    pub fn map_all(&self, ids: &[i64], len: usize) -> Result<Vec<usize>> {
        ids.iter().map(|id| self.map(*id, len)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_bias() {
        let m = OffsetMapper::Int(-1);
        assert_eq!(m.map_all(&[1, 2, 3], 3).unwrap(), vec![0, 1, 2]);
        assert!(m.map(0, 3).is_err());
        assert!(m.map(4, 3).is_err());
    }

    #[test]
    fn test_list() {
        let m = OffsetMapper::from_offset_list(&[101, 205, 150]).unwrap();
        assert_eq!(m.map_all(&[150, 101], 3).unwrap(), vec![2, 0]);
        assert!(matches!(m.map(7, 3), Err(Error::Lookup(_))));
    }

    #[test]
    fn test_list_rejects_duplicates() {
        assert!(OffsetMapper::from_offset_list(&[1, 2, 1]).is_err());
    }

    #[test]
    fn test_identity() {
        assert_eq!(OffsetMapper::Identity.map(2, 3).unwrap(), 2);
        assert!(OffsetMapper::Identity.map(-1, 3).is_err());
    }
}
