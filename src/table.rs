//! In-memory tables shared by every stage.
//!
//! A [`Table`] is loaded wholesale and never mutated once built; stages derive
//! new tables from it. Cells are kept as text, with absent values as `None`.

use crate::error::{SchemaError, TableError};
use csv::{ReaderBuilder, WriterBuilder};
use flate2::read::GzDecoder;
use log::debug;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use std::fs::File;
use std::io::Read;
use std::ops::Range;
use std::path::Path;

pub type Row = Vec<Option<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    /// Builds a table, padding or truncating each row to the column count.
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, None);
                row
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn value(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column)?.as_deref()
    }

    /// Fails with the full list of `required` names not present in this table.
    pub fn require_columns(&self, table: &str, required: &[&str]) -> Result<(), SchemaError> {
        let missing: Vec<String> = required
            .iter()
            .filter(|name| self.column_index(name).is_none())
            .map(|name| name.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SchemaError {
                table: table.to_string(),
                columns: missing,
            })
        }
    }

    /// Copies the rows in `range` (clamped to the table) into a new table.
    pub fn slice(&self, range: Range<usize>) -> Table {
        let end = range.end.min(self.rows.len());
        let start = range.start.min(end);
        Table {
            columns: self.columns.clone(),
            rows: self.rows[start..end].to_vec(),
        }
    }

    /// Keeps the rows for which `keep` returns true, in their original order.
    pub fn filter_rows<F>(&self, mut keep: F) -> Table
    where
        F: FnMut(&Row) -> bool,
    {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|row| keep(row)).cloned().collect(),
        }
    }

    /// Returns a copy of this table with one extra column appended.
    pub fn with_column(&self, name: &str, values: Vec<Option<String>>) -> Table {
        let mut columns = self.columns.clone();
        columns.push(name.to_string());
        let rows = self
            .rows
            .iter()
            .zip(values.into_iter().chain(std::iter::repeat(None)))
            .map(|(row, value)| {
                let mut row = row.clone();
                row.push(value);
                row
            })
            .collect();
        Table { columns, rows }
    }

    /// Loads a table, choosing the reader from the file name:
    /// `.parquet`, `.csv` or `.csv.gz`.
    pub fn load(path: &Path) -> Result<Table, TableError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.ends_with(".parquet") {
            Self::from_parquet(path)
        } else if name.ends_with(".csv.gz") {
            let file = open(path)?;
            Self::from_csv_reader(GzDecoder::new(file), path)
        } else if name.ends_with(".csv") {
            Self::from_csv(path)
        } else {
            Err(TableError::UnsupportedFormat(path.to_path_buf()))
        }
    }

    pub fn from_csv(path: &Path) -> Result<Table, TableError> {
        let file = open(path)?;
        Self::from_csv_reader(file, path)
    }

    /// Reads CSV with a header row. Empty fields become `None`, short rows
    /// are padded, and a row with more fields than the header is an error.
    pub fn from_csv_reader<R: Read>(reader: R, path: &Path) -> Result<Table, TableError> {
        let csv_err = |source| TableError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
        let columns: Vec<String> = rdr
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for (i, result) in rdr.records().enumerate() {
            let record = result.map_err(csv_err)?;
            if record.len() > columns.len() {
                return Err(TableError::RowWidth {
                    path: path.to_path_buf(),
                    row: i + 1,
                    expected: columns.len(),
                    found: record.len(),
                });
            }
            let row: Row = record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        None
                    } else {
                        Some(field.to_string())
                    }
                })
                .collect();
            rows.push(row);
        }
        debug!("Read {} rows x {} columns from {}", rows.len(), columns.len(), path.display());
        Ok(Table::new(columns, rows))
    }

    pub fn from_parquet(path: &Path) -> Result<Table, TableError> {
        let parquet_err = |source| TableError::Parquet {
            path: path.to_path_buf(),
            source,
        };
        let file = open(path)?;
        let reader = SerializedFileReader::new(file).map_err(parquet_err)?;
        let columns: Vec<String> = reader
            .metadata()
            .file_metadata()
            .schema()
            .get_fields()
            .iter()
            .map(|field| field.name().to_string())
            .collect();

        let mut rows = Vec::new();
        for row_result in reader.get_row_iter(None).map_err(parquet_err)? {
            let row = row_result.map_err(parquet_err)?;
            let cells: Row = row
                .get_column_iter()
                .map(|(_, field)| field_to_cell(field))
                .collect();
            rows.push(cells);
        }
        debug!("Read {} rows x {} columns from {}", rows.len(), columns.len(), path.display());
        Ok(Table::new(columns, rows))
    }

    /// Writes the table as CSV with a header row; `None` becomes an empty field.
    pub fn write_csv(&self, path: &Path) -> Result<(), TableError> {
        let csv_err = |source| TableError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut wtr = WriterBuilder::new().from_path(path).map_err(csv_err)?;
        wtr.write_record(&self.columns).map_err(csv_err)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))
                .map_err(csv_err)?;
        }
        wtr.flush().map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}

fn open(path: &Path) -> Result<File, TableError> {
    File::open(path).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn field_to_cell(field: &Field) -> Option<String> {
    match field {
        Field::Null => None,
        Field::Str(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn cell(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    fn sample() -> Table {
        Table::new(
            vec!["a".to_string(), "b".to_string()],
            vec![
                vec![cell("1"), cell("x")],
                vec![cell("2"), None],
                vec![cell("3"), cell("z")],
            ],
        )
    }

    #[test]
    fn slice_is_clamped() {
        let t = sample();
        assert_eq!(t.slice(1..10).len(), 2);
        assert_eq!(t.slice(5..10).len(), 0);
        assert_eq!(t.slice(0..1).value(0, 1), Some("x"));
    }

    #[test]
    fn require_columns_lists_every_missing_name() {
        let err = sample().require_columns("chunk 1", &["a", "c", "d"]).unwrap_err();
        assert_eq!(err.columns, vec!["c".to_string(), "d".to_string()]);
        assert_eq!(err.table, "chunk 1");
    }

    #[test]
    fn with_column_appends_values() {
        let t = sample().with_column("c", vec![cell("p"), None, cell("r")]);
        assert_eq!(t.columns().len(), 3);
        assert_eq!(t.value(2, 2), Some("r"));
        assert_eq!(t.value(1, 2), None);
    }

    #[test]
    fn csv_round_trip_keeps_nulls_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.csv");
        sample().write_csv(&path).unwrap();
        let loaded = Table::load(&path).unwrap();
        assert_eq!(loaded, sample());
    }

    #[test]
    fn reads_gzipped_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.csv.gz");
        let file = File::create(&path).unwrap();
        let mut gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        gz.write_all(b"a,b\n1,x\n2,\n").unwrap();
        gz.finish().unwrap();

        let loaded = Table::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.value(1, 1), None);
    }

    #[test]
    fn short_csv_rows_are_padded() {
        let t = Table::from_csv_reader("a,b,c\n1,2\n".as_bytes(), Path::new("short.csv")).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.value(0, 1), Some("2"));
        assert_eq!(t.value(0, 2), None);
    }

    #[test]
    fn long_csv_row_is_rejected() {
        // Unquoted comma in the query spills into the next column.
        let text = "original_query,unsupported_functions,udf_list\nselect a,b,['nvl'],[]\n";
        let err = Table::from_csv_reader(text.as_bytes(), Path::new("part_1_result.csv")).unwrap_err();
        match err {
            TableError::RowWidth { row, expected, found, .. } => {
                assert_eq!((row, expected, found), (1, 3, 4));
            }
            other => panic!("expected a row width error, got {:?}", other),
        }
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = Table::load(Path::new("data.json")).unwrap_err();
        assert!(matches!(err, TableError::UnsupportedFormat(_)));
    }
}
