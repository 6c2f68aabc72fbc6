//! Columnar table keyed by a unique `i64` index.
//!
//! Pipeline state (households, persons, tours, ...) and the MAZ-level LOS
//! tables are all `Table`s. Columns are typed vectors so a checkpoint is a
//! straight serialization of the vectors.

use std::io::Read;
use std::path::Path;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::Value;
use crate::{Error, Result};

// ============================================================================
// Column
// ============================================================================

/// A typed column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Str(Vec<String>),
    Bool(Vec<bool>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::Str(v) => v.len(),
            Column::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Column::Int(_) => "INTEGER",
            Column::Float(_) => "FLOAT",
            Column::Str(_) => "STRING",
            Column::Bool(_) => "BOOLEAN",
        }
    }

    /// Cell at `row`, or `Value::Null` when out of range.
    pub fn get(&self, row: usize) -> Value {
        match self {
            Column::Int(v) => v.get(row).map(|x| Value::Int(*x)),
            Column::Float(v) => v.get(row).map(|x| Value::Float(*x)),
            Column::Str(v) => v.get(row).map(|x| Value::String(x.clone())),
            Column::Bool(v) => v.get(row).map(|x| Value::Bool(*x)),
        }
        .unwrap_or(Value::Null)
    }

    pub fn as_int(&self) -> Option<&[i64]> {
        match self {
            Column::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<&[f64]> {
        match self {
            Column::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&[String]> {
        match self {
            Column::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric view as f64 (ints widened). None for string/bool columns.
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            Column::Int(v) => Some(v.iter().map(|x| *x as f64).collect()),
            Column::Float(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Gather rows by position.
    pub fn take(&self, positions: &[usize]) -> Column {
        match self {
            Column::Int(v) => Column::Int(positions.iter().map(|&p| v[p]).collect()),
            Column::Float(v) => Column::Float(positions.iter().map(|&p| v[p]).collect()),
            Column::Str(v) => Column::Str(positions.iter().map(|&p| v[p].clone()).collect()),
            Column::Bool(v) => Column::Bool(positions.iter().map(|&p| v[p]).collect()),
        }
    }

    /// Infer the narrowest column type for raw CSV fields.
    ///
    /// All-integer → `Int`, all-numeric (blanks as NaN) → `Float`,
    /// anything else → `Str`.
    pub fn infer(raw: Vec<String>) -> Column {
        if let Ok(ints) = raw.iter().map(|s| s.trim().parse::<i64>()).collect::<std::result::Result<Vec<_>, _>>() {
            return Column::Int(ints);
        }
        let floats: std::result::Result<Vec<f64>, _> = raw
            .iter()
            .map(|s| {
                let s = s.trim();
                if s.is_empty() { Ok(f64::NAN) } else { s.parse::<f64>() }
            })
            .collect();
        match floats {
            Ok(v) => Column::Float(v),
            Err(_) => Column::Str(raw),
        }
    }
}

impl From<Vec<i64>> for Column { fn from(v: Vec<i64>) -> Self { Column::Int(v) } }
impl From<Vec<f64>> for Column { fn from(v: Vec<f64>) -> Self { Column::Float(v) } }
impl From<Vec<String>> for Column { fn from(v: Vec<String>) -> Self { Column::Str(v) } }
impl From<Vec<bool>> for Column { fn from(v: Vec<bool>) -> Self { Column::Bool(v) } }
impl From<Vec<&str>> for Column {
    fn from(v: Vec<&str>) -> Self { Column::Str(v.into_iter().map(str::to_owned).collect()) }
}

// ============================================================================
// Table
// ============================================================================

#[derive(Serialize, Deserialize)]
struct TableData {
    index_name: String,
    index: Vec<i64>,
    columns: Vec<(String, Column)>,
}

/// Named, uniquely indexed columnar table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "TableData", into = "TableData")]
pub struct Table {
    index_name: String,
    index: Vec<i64>,
    columns: Vec<(String, Column)>,
    positions: HashMap<i64, usize>,
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.index_name == other.index_name
            && self.index == other.index
            && self.columns == other.columns
    }
}

impl TryFrom<TableData> for Table {
    type Error = Error;

    fn try_from(data: TableData) -> Result<Self> {
        let mut table = Table::new(data.index_name, data.index)?;
        for (name, column) in data.columns {
            table.set_column(name, column)?;
        }
        Ok(table)
    }
}

impl From<Table> for TableData {
    fn from(t: Table) -> Self {
        TableData { index_name: t.index_name, index: t.index, columns: t.columns }
    }
}

impl Table {
    /// Create an empty-column table. Index values must be unique.
    pub fn new(index_name: impl Into<String>, index: Vec<i64>) -> Result<Self> {
        let index_name = index_name.into();
        let mut positions = HashMap::with_capacity(index.len());
        for (pos, id) in index.iter().enumerate() {
            if positions.insert(*id, pos).is_some() {
                return Err(Error::Table(format!(
                    "duplicate index value {id} in '{index_name}'"
                )));
            }
        }
        Ok(Self { index_name, index, columns: Vec::new(), positions })
    }

    /// Builder form of [`Table::set_column`].
    pub fn with_column(mut self, name: impl Into<String>, column: impl Into<Column>) -> Result<Self> {
        self.set_column(name, column)?;
        Ok(self)
    }

    /// Insert or replace a column. Length must match the index.
    pub fn set_column(&mut self, name: impl Into<String>, column: impl Into<Column>) -> Result<()> {
        let name = name.into();
        let column = column.into();
        if column.len() != self.index.len() {
            return Err(Error::Table(format!(
                "column '{name}' has {} rows, table has {}",
                column.len(),
                self.index.len()
            )));
        }
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = column,
            None => self.columns.push((name, column)),
        }
        Ok(())
    }

    /// Remove a column, returning it.
    pub fn drop_column(&mut self, name: &str) -> Result<Column> {
        let pos = self
            .columns
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| Error::NotFound(format!("column '{name}'")))?;
        Ok(self.columns.remove(pos).1)
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn index(&self) -> &[i64] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
            .ok_or_else(|| Error::NotFound(format!("column '{name}' in table indexed by '{}'", self.index_name)))
    }

    /// Row position of an index value.
    pub fn position(&self, id: i64) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    /// Single cell by index value.
    pub fn get(&self, id: i64, column: &str) -> Result<Value> {
        let pos = self
            .position(id)
            .ok_or_else(|| Error::NotFound(format!("{} {id}", self.index_name)))?;
        Ok(self.column(column)?.get(pos))
    }

    /// Row positions for many index values; unknown values are an error.
    pub fn positions_of(&self, ids: &[i64]) -> Result<Vec<usize>> {
        ids.iter()
            .map(|id| {
                self.position(*id)
                    .ok_or_else(|| Error::NotFound(format!("{} {id}", self.index_name)))
            })
            .collect()
    }

    /// Largest index value, if any.
    pub fn max_index(&self) -> Option<i64> {
        self.index.iter().copied().max()
    }

    /// Read a CSV with a header row, using `index_col` as the index.
    ///
    /// When `index_col` is None the index is the row number and is named
    /// `"index"`. The index column itself is not kept as a data column.
    pub fn from_csv_reader<R: Read>(reader: R, index_col: Option<&str>) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let mut raw: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for record in rdr.records() {
            let record = record?;
            for (i, field) in record.iter().enumerate() {
                if let Some(col) = raw.get_mut(i) {
                    col.push(field.to_string());
                }
            }
        }

        let (index_name, index) = match index_col {
            Some(name) => {
                let pos = headers
                    .iter()
                    .position(|h| h == name)
                    .ok_or_else(|| Error::Table(format!("index column '{name}' not in csv header")))?;
                let values = std::mem::take(&mut raw[pos]);
                let ids = match Column::infer(values) {
                    Column::Int(ids) => ids,
                    other => {
                        return Err(Error::Table(format!(
                            "index column '{name}' must be integer, got {}",
                            other.type_name()
                        )))
                    }
                };
                (name.to_string(), ids)
            }
            None => {
                let n = raw.first().map(Vec::len).unwrap_or(0);
                ("index".to_string(), (0..n as i64).collect())
            }
        };

        let mut table = Table::new(index_name, index)?;
        for (name, values) in headers.into_iter().zip(raw) {
            if Some(name.as_str()) == index_col {
                continue;
            }
            table.set_column(name, Column::infer(values))?;
        }
        Ok(table)
    }

    /// Read a CSV file; see [`Table::from_csv_reader`].
    pub fn from_csv_path(path: impl AsRef<Path>, index_col: Option<&str>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_csv_reader(file, index_col)
    }
}
