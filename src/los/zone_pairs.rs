//! Zone-pair attribute tables (`maz_to_maz`, `maz_to_tap`).
//!
//! Rows are keyed by a synthetic index `origin * cardinality + destination`
//! so a pair lookup is one hash lookup instead of a join.

use hashbrown::HashMap;

use crate::model::Table;
use crate::{Error, Result};

/// Float attributes for zone pairs, keyed by synthetic index.
#[derive(Debug, Clone)]
pub struct ZonePairTable {
    name: String,
    origin_col: String,
    dest_col: String,
    cardinality: i64,
    /// Synthetic index per row.
    index: Vec<i64>,
    positions: HashMap<i64, usize>,
    columns: Vec<(String, Vec<f64>)>,
}

impl ZonePairTable {
    /// Join one or more source tables on the synthetic pair index.
    ///
    /// Each source must carry integer `origin_col` and `dest_col` columns.
    /// Every other column becomes a float attribute; the union of all pairs
    /// forms the rows and cells missing from a source are NaN.
    pub fn from_tables(
        name: &str,
        origin_col: &str,
        dest_col: &str,
        cardinality: i64,
        sources: &[(String, Table)],
    ) -> Result<Self> {
        if cardinality <= 0 {
            return Err(Error::Table(format!("{name}: cardinality must be positive, got {cardinality}")));
        }

        let mut index: Vec<i64> = Vec::new();
        let mut positions: HashMap<i64, usize> = HashMap::new();
        let mut per_source: Vec<Vec<usize>> = Vec::with_capacity(sources.len());

        for (source_id, table) in sources {
            let origins = int_column(name, source_id, table, origin_col)?;
            let dests = int_column(name, source_id, table, dest_col)?;
            let mut seen = hashbrown::HashSet::with_capacity(origins.len());
            let mut rows = Vec::with_capacity(origins.len());
            for (o, d) in origins.iter().zip(dests) {
                let key = pair_index(*o, *d, cardinality).ok_or_else(|| {
                    Error::Table(format!(
                        "{name} ({source_id}): pair ({o}, {d}) outside zone range 0..{cardinality}"
                    ))
                })?;
                if !seen.insert(key) {
                    return Err(Error::Table(format!(
                        "{name} ({source_id}): duplicate {origin_col}/{dest_col} pair ({o}, {d})"
                    )));
                }
                let pos = *positions.entry(key).or_insert_with(|| {
                    index.push(key);
                    index.len() - 1
                });
                rows.push(pos);
            }
            per_source.push(rows);
        }

        let n = index.len();
        let mut columns: Vec<(String, Vec<f64>)> = Vec::new();
        for ((source_id, table), rows) in sources.iter().zip(&per_source) {
            for (col_name, column) in table.columns() {
                if col_name == origin_col || col_name == dest_col {
                    continue;
                }
                if columns.iter().any(|(c, _)| c == col_name) {
                    return Err(Error::Table(format!(
                        "{name}: attribute '{col_name}' in {source_id} duplicates an earlier file"
                    )));
                }
                let values = column.to_f64().ok_or_else(|| {
                    Error::Table(format!(
                        "{name}: attribute '{col_name}' in {source_id} is not numeric ({})",
                        column.type_name()
                    ))
                })?;
                let mut joined = vec![f64::NAN; n];
                for (pos, v) in rows.iter().zip(values) {
                    joined[*pos] = v;
                }
                columns.push((col_name.to_string(), joined));
            }
        }

        tracing::info!(table = name, rows = n, attributes = columns.len(), files = sources.len(), cardinality, "loaded zone pair table");
        Ok(Self {
            name: name.to_string(),
            origin_col: origin_col.to_string(),
            dest_col: dest_col.to_string(),
            cardinality,
            index,
            positions,
            columns,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cardinality(&self) -> i64 {
        self.cardinality
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    /// `origin * cardinality + destination`, or None when either id is
    /// outside the zone range.
    #[inline]
    pub fn synthetic_index(&self, origin: i64, destination: i64) -> Option<i64> {
        pair_index(origin, destination, self.cardinality)
    }

    /// Row position of a synthetic index.
    pub fn position(&self, synthetic: i64) -> Option<usize> {
        self.positions.get(&synthetic).copied()
    }

    /// Attribute value at a row position.
    pub fn value_at(&self, position: usize, attribute: &str) -> Result<f64> {
        let column = self.attribute(attribute)?;
        column
            .get(position)
            .copied()
            .ok_or_else(|| Error::Lookup(format!("{}: row {position} out of range", self.name)))
    }

    fn attribute(&self, attribute: &str) -> Result<&[f64]> {
        self.columns
            .iter()
            .find(|(n, _)| n == attribute)
            .map(|(_, v)| v.as_slice())
            .ok_or_else(|| Error::NotFound(format!("attribute '{attribute}' in {}", self.name)))
    }

    /// `attribute` for each pair, aligned to input; absent pairs are NaN.
    pub fn get(&self, origins: &[i64], destinations: &[i64], attribute: &str) -> Result<Vec<f64>> {
        if origins.len() != destinations.len() {
            return Err(Error::Lookup(format!(
                "{}: {} {} values but {} {} values",
                self.name,
                origins.len(),
                self.origin_col,
                destinations.len(),
                self.dest_col
            )));
        }
        let column = self.attribute(attribute)?;
        Ok(origins
            .iter()
            .zip(destinations)
            .map(|(o, d)| {
                self.synthetic_index(*o, *d)
                    .and_then(|key| self.position(key))
                    .map(|pos| column[pos])
                    .unwrap_or(f64::NAN)
            })
            .collect())
    }
}

fn pair_index(origin: i64, destination: i64, cardinality: i64) -> Option<i64> {
    if origin < 0 || !(0..cardinality).contains(&destination) {
        return None;
    }
    origin.checked_mul(cardinality)?.checked_add(destination)
}

fn int_column<'a>(name: &str, source_id: &str, table: &'a Table, col: &str) -> Result<&'a [i64]> {
    table.column(col)?.as_int().ok_or_else(|| {
        Error::Table(format!("{name} ({source_id}): column '{col}' must be integer"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m2m() -> Table {
        Table::new("index", vec![0, 1, 2])
            .unwrap()
            .with_column("OMAZ", vec![0i64, 1, 2])
            .unwrap()
            .with_column("DMAZ", vec![1i64, 2, 0])
            .unwrap()
            .with_column("DISTWALK", vec![0.5, 0.25, 0.75])
            .unwrap()
    }

    #[test]
    fn test_synthetic_index_lookup() {
        let t = ZonePairTable::from_tables("maz_to_maz", "OMAZ", "DMAZ", 3, &[("m2m.csv".into(), m2m())]).unwrap();
        assert_eq!(t.position(5), Some(1));
        assert_eq!(t.get(&[1], &[2], "DISTWALK").unwrap(), vec![0.25]);
        let missing = t.get(&[2], &[2], "DISTWALK").unwrap();
        assert!(missing[0].is_nan());
        assert!(matches!(t.get(&[1], &[2], "BIKE"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_out_of_range_pairs_are_absent() {
        let t = ZonePairTable::from_tables("maz_to_maz", "OMAZ", "DMAZ", 3, &[("m2m.csv".into(), m2m())]).unwrap();
        // (0, 5) and (2, -1) would alias row (1, 2) without range checks
        let v = t.get(&[0, -1, 2, i64::MAX], &[5, 6, -1, 0], "DISTWALK").unwrap();
        assert!(v.iter().all(|x| x.is_nan()), "{v:?}");
        assert_eq!(t.synthetic_index(0, 5), None);
        assert_eq!(t.synthetic_index(i64::MAX, 0), None);
        assert_eq!(t.synthetic_index(1, 2), Some(5));
    }

    #[test]
    fn test_pair_index_overflow_rejected_on_load() {
        let t = Table::new("index", vec![0])
            .unwrap()
            .with_column("OMAZ", vec![i64::MAX])
            .unwrap()
            .with_column("DMAZ", vec![0i64])
            .unwrap();
        let result = ZonePairTable::from_tables("maz_to_maz", "OMAZ", "DMAZ", 3, &[("x.csv".into(), t)]);
        assert!(matches!(result, Err(Error::Table(_))));
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let t = Table::new("index", vec![0, 1])
            .unwrap()
            .with_column("OMAZ", vec![1i64, 1])
            .unwrap()
            .with_column("DMAZ", vec![2i64, 2])
            .unwrap();
        assert!(ZonePairTable::from_tables("maz_to_maz", "OMAZ", "DMAZ", 3, &[("x.csv".into(), t)]).is_err());
    }

    #[test]
    fn test_outer_join_across_files() {
        let bike = Table::new("index", vec![0, 1])
            .unwrap()
            .with_column("OMAZ", vec![1i64, 2])
            .unwrap()
            .with_column("DMAZ", vec![2i64, 2])
            .unwrap()
            .with_column("DISTBIKE", vec![3.0, 4.0])
            .unwrap();
        let t = ZonePairTable::from_tables(
            "maz_to_maz",
            "OMAZ",
            "DMAZ",
            3,
            &[("walk.csv".into(), m2m()), ("bike.csv".into(), bike)],
        )
        .unwrap();
        assert_eq!(t.len(), 4);
        assert_eq!(t.get(&[1, 2], &[2, 2], "DISTBIKE").unwrap(), vec![3.0, 4.0]);
        let walk = t.get(&[1, 2], &[2, 2], "DISTWALK").unwrap();
        assert_eq!(walk[0], 0.25);
        assert!(walk[1].is_nan());
    }

    #[test]
    fn test_duplicate_attribute_across_files() {
        let result = ZonePairTable::from_tables(
            "maz_to_maz",
            "OMAZ",
            "DMAZ",
            3,
            &[("a.csv".into(), m2m()), ("b.csv".into(), m2m())],
        );
        assert!(matches!(result, Err(Error::Table(_))));
    }
}
