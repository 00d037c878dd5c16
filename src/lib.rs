//! Narrows query-log exports to finished PowerBI SELECTs, joins them against
//! per-chunk translation results, and tallies the unsupported functions and
//! UDFs those results report.

pub mod chunk;
pub mod companion;
pub mod config;
pub mod error;
pub mod filter_join;
pub mod ledger;
pub mod list_field;
pub mod pipeline;
pub mod table;
pub mod tabulate;

pub use config::{FilterSpec, ListFieldNames, MergePolicy, PipelineConfig};
pub use error::{ConfigError, LedgerError, SchemaError, TableError};
pub use table::Table;
