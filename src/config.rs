use crate::error::ConfigError;
use std::path::PathBuf;

pub const STATEMENT_TYPE_MATCH: &str = "SELECT";
pub const CLIENT_APPLICATION_MATCH: &str = "PowerBI";
pub const EXECUTION_STATUS_MATCH: &str = "FINISHED";

pub const DEFAULT_FILTER_COLUMNS: [&str; 4] = [
    "statement_type",
    "client_application",
    "execution_status",
    "query_Hash",
];
pub const DEFAULT_CHUNK_SIZE: usize = 2000;
pub const DEFAULT_OUTPUT_DIR: &str = "Inmobi_queries";

/// Column names the filter/join stage reads from a source chunk. The match
/// literals are fixed; only the names are configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    pub statement_type: String,
    pub client_application: String,
    pub execution_status: String,
    pub join_key: String,
}

impl FilterSpec {
    pub fn from_columns<S: AsRef<str>>(columns: &[S]) -> Result<Self, ConfigError> {
        match columns {
            [stmt, app, status, key] => Ok(Self {
                statement_type: stmt.as_ref().trim().to_string(),
                client_application: app.as_ref().trim().to_string(),
                execution_status: status.as_ref().trim().to_string(),
                join_key: key.as_ref().trim().to_string(),
            }),
            _ => Err(ConfigError::FilterColumnCount { found: columns.len() }),
        }
    }

    /// Parses a comma-separated list such as
    /// `statement_type,client_application,execution_status,query_Hash`.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let columns: Vec<&str> = spec
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        Self::from_columns(&columns)
    }

    pub fn columns(&self) -> [&str; 4] {
        [
            &self.statement_type,
            &self.client_application,
            &self.execution_status,
            &self.join_key,
        ]
    }
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            statement_type: DEFAULT_FILTER_COLUMNS[0].to_string(),
            client_application: DEFAULT_FILTER_COLUMNS[1].to_string(),
            execution_status: DEFAULT_FILTER_COLUMNS[2].to_string(),
            join_key: DEFAULT_FILTER_COLUMNS[3].to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFieldNames {
    pub unsupported: String,
    pub udf: String,
}

impl ListFieldNames {
    pub fn new(unsupported: &str, udf: &str) -> Result<Self, ConfigError> {
        let unsupported = unsupported.trim();
        let udf = udf.trim();
        if unsupported.is_empty() {
            return Err(ConfigError::EmptyListField("unsupported"));
        }
        if udf.is_empty() {
            return Err(ConfigError::EmptyListField("udf"));
        }
        Ok(Self {
            unsupported: unsupported.to_string(),
            udf: udf.to_string(),
        })
    }
}

impl Default for ListFieldNames {
    fn default() -> Self {
        Self {
            unsupported: "unsupported_functions".to_string(),
            udf: "udf_list".to_string(),
        }
    }
}

/// What the driver does when a chunk id is merged into a ledger that has
/// already counted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Refuse the increment and record the chunk as failed.
    #[default]
    RejectSeenChunks,
    /// Add the increment again; counts double.
    Accumulate,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub filter_spec: FilterSpec,
    pub chunk_size: usize,
    pub list_field_names: ListFieldNames,
    pub merge_policy: MergePolicy,
    pub output_dir: PathBuf,
}

impl PipelineConfig {
    pub fn new(
        filter_spec: FilterSpec,
        chunk_size: usize,
        list_field_names: ListFieldNames,
        merge_policy: MergePolicy,
        output_dir: PathBuf,
    ) -> Result<Self, ConfigError> {
        if chunk_size == 0 {
            return Err(ConfigError::ChunkSize(chunk_size));
        }
        Ok(Self {
            filter_spec,
            chunk_size,
            list_field_names,
            merge_policy,
            output_dir,
        })
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter_spec: FilterSpec::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            list_field_names: ListFieldNames::default(),
            merge_policy: MergePolicy::default(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}
