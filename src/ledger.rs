//! Running per-name occurrence totals, merged chunk by chunk and persisted
//! as a summary CSV.

use crate::error::LedgerError;
use csv::{ReaderBuilder, WriterBuilder};
use indexmap::IndexMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Which list field a ledger summarises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerKind {
    Unsupported,
    Udf,
}

impl LedgerKind {
    pub fn file_name(self) -> &'static str {
        match self {
            LedgerKind::Unsupported => "unsupported_functions_summary.csv",
            LedgerKind::Udf => "udf_summary.csv",
        }
    }

    pub fn name_header(self) -> &'static str {
        match self {
            LedgerKind::Unsupported => "function_name",
            LedgerKind::Udf => "udf_name",
        }
    }
}

/// Occurrence counts of names within a single chunk, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTally {
    pub chunk_id: u32,
    counts: IndexMap<String, u64>,
}

impl ChunkTally {
    pub fn new(chunk_id: u32) -> Self {
        Self {
            chunk_id,
            counts: IndexMap::new(),
        }
    }

    pub fn record(&mut self, name: &str) {
        *self.counts.entry(name.to_string()).or_insert(0) += 1;
    }

    pub fn counts(&self) -> &IndexMap<String, u64> {
        &self.counts
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.counts.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub name: String,
    pub total_count: u64,
    pub source_chunks: BTreeSet<u32>,
}

impl LedgerEntry {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            total_count: 0,
            source_chunks: BTreeSet::new(),
        }
    }

    pub fn chunk_list(&self) -> String {
        self.source_chunks
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerRow {
    #[serde(alias = "function_name", alias = "udf_name")]
    name: String,
    total_occurrences: u64,
    number_of_chunks: usize,
    #[serde(default)]
    chunk_list: String,
}

/// Name -> (total count, contributing chunk ids). Totals only ever grow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameOccurrenceLedger {
    entries: IndexMap<String, LedgerEntry>,
    counted_chunks: BTreeSet<u32>,
}

impl NameOccurrenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&LedgerEntry> {
        self.entries.get(name)
    }

    /// Entries in encounter order.
    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    pub fn has_counted(&self, chunk_id: u32) -> bool {
        self.counted_chunks.contains(&chunk_id)
    }

    fn entry_mut(&mut self, name: &str) -> &mut LedgerEntry {
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| LedgerEntry::new(name))
    }

    /// Adds a chunk's counts. Merging the same chunk twice counts it twice;
    /// use [`merge_once`](Self::merge_once) to refuse that.
    pub fn merge(&mut self, incoming: &ChunkTally) {
        for (name, count) in incoming.counts() {
            let entry = self.entry_mut(name);
            entry.total_count += count;
            entry.source_chunks.insert(incoming.chunk_id);
        }
        self.counted_chunks.insert(incoming.chunk_id);
    }

    /// Like [`merge`](Self::merge), but fails without touching the ledger if
    /// the chunk id has been counted before.
    pub fn merge_once(&mut self, incoming: &ChunkTally) -> Result<(), LedgerError> {
        if self.has_counted(incoming.chunk_id) {
            return Err(LedgerError::ChunkAlreadyCounted(incoming.chunk_id));
        }
        self.merge(incoming);
        Ok(())
    }

    /// Entries sorted by total count, highest first; ties keep encounter order.
    pub fn sorted_entries(&self) -> Vec<&LedgerEntry> {
        let mut sorted: Vec<&LedgerEntry> = self.entries.values().collect();
        sorted.sort_by(|a, b| b.total_count.cmp(&a.total_count));
        sorted
    }

    /// Loads a persisted ledger; a missing file yields an empty ledger.
    ///
    /// Chunk ids come from both the `chunk_list` column and the
    /// [`counted_chunks_path`] sidecar, so chunks that contributed no names
    /// are still known after a reload.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let mut ledger = Self::new();
        if path.exists() {
            let csv_err = |source| LedgerError::Csv {
                path: path.to_path_buf(),
                source,
            };
            let mut rdr = ReaderBuilder::new().from_path(path).map_err(csv_err)?;
            for result in rdr.deserialize::<LedgerRow>() {
                let row = result.map_err(csv_err)?;
                let chunks = parse_chunk_list(&row.name, &row.chunk_list)?;
                let entry = ledger.entry_mut(&row.name);
                entry.total_count += row.total_occurrences;
                entry.source_chunks.extend(chunks.iter().copied());
                ledger.counted_chunks.extend(chunks);
            }
            info!("Loaded existing ledger with {} names from {}", ledger.len(), path.display());
        } else {
            debug!("No existing ledger at {}, starting empty", path.display());
        }

        let sidecar = counted_chunks_path(path);
        if sidecar.exists() {
            let csv_err = |source| LedgerError::Csv {
                path: sidecar.clone(),
                source,
            };
            let mut rdr = ReaderBuilder::new().from_path(&sidecar).map_err(csv_err)?;
            for result in rdr.deserialize::<CountedChunkRow>() {
                ledger.counted_chunks.insert(result.map_err(csv_err)?.chunk_id);
            }
        }
        Ok(ledger)
    }

    /// Rewrites the whole ledger at `path`, sorted by total count, and the
    /// counted chunk ids at [`counted_chunks_path`]. Both files are written
    /// to temporary siblings first and renamed into place once complete.
    pub fn persist(&self, path: &Path, name_header: &str) -> Result<(), LedgerError> {
        let summary_tmp = temporary_sibling(path);
        write_csv_file(&summary_tmp, |wtr| {
            wtr.write_record([name_header, "total_occurrences", "number_of_chunks", "chunk_list"])?;
            for entry in self.sorted_entries() {
                wtr.serialize(LedgerRow {
                    name: entry.name.clone(),
                    total_occurrences: entry.total_count,
                    number_of_chunks: entry.source_chunks.len(),
                    chunk_list: entry.chunk_list(),
                })?;
            }
            Ok(())
        })?;

        let sidecar = counted_chunks_path(path);
        let sidecar_tmp = temporary_sibling(&sidecar);
        write_csv_file(&sidecar_tmp, |wtr| {
            wtr.write_record(["chunk_id"])?;
            for &chunk_id in &self.counted_chunks {
                wtr.serialize(CountedChunkRow { chunk_id })?;
            }
            Ok(())
        })?;

        rename(&sidecar_tmp, &sidecar)?;
        rename(&summary_tmp, path)?;
        debug!(
            "Persisted {} ledger rows and {} counted chunks to {}",
            self.len(),
            self.counted_chunks.len(),
            path.display()
        );
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CountedChunkRow {
    chunk_id: u32,
}

/// `udf_summary.csv` keeps its counted chunk ids in `udf_summary_counted_chunks.csv`.
pub fn counted_chunks_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}_counted_chunks.csv", stem))
}

fn write_csv_file<F>(path: &Path, write_rows: F) -> Result<(), LedgerError>
where
    F: FnOnce(&mut csv::Writer<File>) -> Result<(), csv::Error>,
{
    let io_err = |source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(file);
    write_rows(&mut wtr).map_err(|source| LedgerError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    wtr.flush().map_err(io_err)
}

fn rename(from: &Path, to: &Path) -> Result<(), LedgerError> {
    fs::rename(from, to).map_err(|source| LedgerError::Io {
        path: to.to_path_buf(),
        source,
    })
}

fn parse_chunk_list(name: &str, value: &str) -> Result<Vec<u32>, LedgerError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u32>().map_err(|_| LedgerError::ChunkList {
                name: name.to_string(),
                value: value.to_string(),
            })
        })
        .collect()
}

fn temporary_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", file_name))
}
