//! CSV export: dump pipeline tables for inspection or downstream tools.
//!
//! ```text
//! Pipeline tables → write_pipeline_tables(dir) → <dir>/<table>.csv
//! ```
//!
//! The index is written as the first column under its own name; nulls and
//! NaN floats are written as empty cells.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::model::{Table, Value};
use crate::pipeline::{CheckpointStore, Pipeline};
use crate::Result;

/// Write one table as CSV with a header row.
pub fn write_table_csv<W: Write>(table: &Table, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header = vec![table.index_name().to_string()];
    header.extend(table.column_names().map(str::to_string));
    wtr.write_record(&header)?;

    let columns: Vec<_> = table.columns().map(|(_, c)| c).collect();
    for (row, id) in table.index().iter().enumerate() {
        let mut record = Vec::with_capacity(columns.len() + 1);
        record.push(id.to_string());
        for column in &columns {
            record.push(format_cell(&column.get(row)));
        }
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

fn format_cell(value: &Value) -> String {
    match value {
        Value::Float(f) if f.is_nan() => String::new(),
        other => other.to_string(),
    }
}

/// Write one table to `path`.
pub fn write_table_csv_path(table: &Table, path: impl AsRef<Path>) -> Result<()> {
    let file = std::fs::File::create(path.as_ref())?;
    write_table_csv(table, std::io::BufWriter::new(file))
}

/// Write every current pipeline table to `<dir>/<table>.csv`.
pub fn write_pipeline_tables<S: CheckpointStore>(pipeline: &Pipeline<S>, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let names: Vec<String> = pipeline.table_names().map(str::to_string).collect();
    let mut written = Vec::with_capacity(names.len());
    for name in names {
        let table = pipeline.get_table(&name, None)?;
        let path = dir.join(format!("{name}.csv"));
        write_table_csv_path(&table, &path)?;
        tracing::info!(table = %name, rows = table.len(), path = %path.display(), "wrote table");
        written.push(path);
    }
    Ok(written)
}
