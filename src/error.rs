use std::path::PathBuf;
use thiserror::Error;

/// An invalid tunable. Fatal to the run that triggered it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("filter spec needs exactly 4 columns (statement type, client application, execution status, join key), got {found}")]
    FilterColumnCount { found: usize },

    #[error("chunk size must be a positive integer, got {0}")]
    ChunkSize(usize),

    #[error("list field name for '{0}' must not be empty")]
    EmptyListField(&'static str),

    #[error("chunk numbers start at 1 and the range must not be reversed, got {start}..={end}")]
    ChunkNumberRange { start: u32, end: u32 },
}

/// A required column is absent from an input table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("missing required columns in {table}: {columns:?}")]
pub struct SchemaError {
    pub table: String,
    pub columns: Vec<String>,
}

#[derive(Error, Debug)]
pub enum TableError {
    #[error("failed to open {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {path}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to read parquet file {path}")]
    Parquet {
        path: PathBuf,
        #[source]
        source: parquet::errors::ParquetError,
    },

    #[error("row {row} of {path} has {found} fields, but the header has {expected}")]
    RowWidth {
        path: PathBuf,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("unsupported table format: {0}")]
    UnsupportedFormat(PathBuf),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O failed for {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed ledger CSV in {path}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("malformed chunk list for '{name}': {value:?}")]
    ChunkList { name: String, value: String },

    #[error("chunk {0} has already been counted in this ledger")]
    ChunkAlreadyCounted(u32),
}
