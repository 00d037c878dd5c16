//! Locating the externally produced result table for a chunk.

use crate::table::Table;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Supplies the companion table for one chunk of a dataset, or `None` when no
/// companion was produced for it.
pub trait CompanionSource: Sync {
    fn companion(&self, dataset: &str, chunk_index: u32) -> Result<Option<Table>>;
}

/// Resolves `{dataset}_part_{chunk_index}_result.csv` inside a directory.
#[derive(Debug, Clone)]
pub struct DirectoryCompanions {
    dir: PathBuf,
}

impl DirectoryCompanions {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, dataset: &str, chunk_index: u32) -> PathBuf {
        self.dir.join(format!("{}_part_{}_result.csv", dataset, chunk_index))
    }
}

impl CompanionSource for DirectoryCompanions {
    fn companion(&self, dataset: &str, chunk_index: u32) -> Result<Option<Table>> {
        let path = self.path_for(dataset, chunk_index);
        if !path.is_file() {
            return Ok(None);
        }
        let table = Table::from_csv(&path)
            .with_context(|| format!("Failed to read companion table {}", path.display()))?;
        Ok(Some(table))
    }
}

/// Companions held in memory, keyed by chunk index.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCompanions {
    tables: HashMap<u32, Table>,
}

impl InMemoryCompanions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, chunk_index: u32, table: Table) {
        self.tables.insert(chunk_index, table);
    }
}

impl CompanionSource for InMemoryCompanions {
    fn companion(&self, _dataset: &str, chunk_index: u32) -> Result<Option<Table>> {
        Ok(self.tables.get(&chunk_index).cloned())
    }
}
