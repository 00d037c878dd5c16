//! Drives one dataset through chunking, filter/join, tabulation and ledger
//! merging, writing the per-chunk artifacts along the way.

use crate::chunk::{self, ChunkRange};
use crate::companion::{CompanionSource, DirectoryCompanions};
use crate::config::{MergePolicy, PipelineConfig};
use crate::error::LedgerError;
use crate::filter_join::{self, FilterJoinOutcome, FilterJoinOutput, SkipReason};
use crate::ledger::{LedgerKind, NameOccurrenceLedger};
use crate::table::Table;
use crate::tabulate::{self, TabulationResult};
use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File layout of one dataset's output directory.
#[derive(Debug, Clone)]
pub struct DatasetPaths {
    pub dataset: String,
    pub dir: PathBuf,
}

impl DatasetPaths {
    pub fn new(config: &PipelineConfig, dataset: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            dir: config.output_dir.join(dataset),
        }
    }

    /// Raw chunk rows as exported for translation.
    pub fn chunk_export(&self, chunk_index: u32) -> PathBuf {
        self.dir.join(format!("{}_part_{}.csv", self.dataset, chunk_index))
    }

    fn part(&self, chunk_index: u32, suffix: &str) -> PathBuf {
        self.dir
            .join(format!("{}_part_{}_{}.csv", self.dataset, chunk_index, suffix))
    }

    pub fn filtered(&self, chunk_index: u32) -> PathBuf {
        self.part(chunk_index, "filtered")
    }

    pub fn final_rows(&self, chunk_index: u32) -> PathBuf {
        self.part(chunk_index, "final")
    }

    pub fn unsupported_rows(&self, chunk_index: u32) -> PathBuf {
        self.part(chunk_index, "final_unsupported")
    }

    pub fn udf_rows(&self, chunk_index: u32) -> PathBuf {
        self.part(chunk_index, "final_udfs")
    }

    pub fn ledger(&self, kind: LedgerKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }
}

/// Strips the table extension from a source file name:
/// `queries-hashed.snappy.parquet` becomes `queries-hashed.snappy`.
pub fn dataset_name(source: &Path) -> String {
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    for ext in [".parquet", ".csv.gz", ".csv"] {
        if let Some(stem) = file_name.strip_suffix(ext) {
            return stem.to_string();
        }
    }
    file_name
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub unit: String,
    pub reason: String,
}

const TOP_UNSUPPORTED: usize = 5;
const TOP_UDFS: usize = 10;

/// One row of a ledger's leaderboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopName {
    pub name: String,
    pub total_count: u64,
    pub chunks: usize,
}

fn top_names(ledger: &NameOccurrenceLedger, n: usize) -> Vec<TopName> {
    ledger
        .sorted_entries()
        .into_iter()
        .take(n)
        .map(|entry| TopName {
            name: entry.name.clone(),
            total_count: entry.total_count,
            chunks: entry.source_chunks.len(),
        })
        .collect()
}

/// Outcome counts for one dataset run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub dataset: String,
    pub source_rows: usize,
    pub chunks_total: usize,
    pub chunks_joined: usize,
    pub joined_records: usize,
    pub chunks_tabulated: usize,
    pub skipped: Vec<(u32, SkipReason)>,
    pub failures: Vec<UnitFailure>,
    pub unsupported_records: usize,
    pub udf_records: usize,
    pub chunks_with_unsupported: usize,
    pub chunks_with_udfs: usize,
    pub unique_unsupported: usize,
    pub unique_udfs: usize,
    /// Highest ledger totals after the run, across every run so far.
    pub top_unsupported: Vec<TopName>,
    pub top_udfs: Vec<TopName>,
}

impl RunReport {
    pub fn skip_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for (_, reason) in &self.skipped {
            *counts.entry(reason.to_string()).or_insert(0) += 1;
        }
        counts
    }

    fn fail(&mut self, unit: String, reason: &anyhow::Error) {
        warn!("{} failed: {:#}", unit, reason);
        self.failures.push(UnitFailure {
            unit,
            reason: format!("{:#}", reason),
        });
    }

    pub fn log_summary(&self) {
        info!("Summary for dataset {}:", self.dataset);
        if self.source_rows > 0 {
            info!("  Source rows: {}", self.source_rows);
            info!("  Chunks joined: {}/{}", self.chunks_joined, self.chunks_total);
            info!("  Joined records: {}", self.joined_records);
        }
        for (reason, count) in self.skip_counts() {
            info!("  Chunks skipped ({}): {}", reason, count);
        }
        info!("  Chunks tabulated: {}/{}", self.chunks_tabulated, self.chunks_total);
        info!("  Chunks with unsupported functions: {}", self.chunks_with_unsupported);
        info!("  Chunks with UDFs: {}", self.chunks_with_udfs);
        info!("  Records with unsupported functions: {}", self.unsupported_records);
        info!("  Records with UDFs: {}", self.udf_records);
        info!("  Distinct unsupported functions: {}", self.unique_unsupported);
        info!("  Distinct UDFs: {}", self.unique_udfs);
        log_top_names("unsupported functions", &self.top_unsupported);
        log_top_names("UDFs", &self.top_udfs);
        if !self.failures.is_empty() {
            warn!("  Failed units: {}", self.failures.len());
            for failure in self.failures.iter().take(10) {
                warn!("    - {}: {}", failure.unit, failure.reason);
            }
            if self.failures.len() > 10 {
                warn!("    ... (and {} more)", self.failures.len() - 10);
            }
        }
    }
}

fn log_top_names(label: &str, names: &[TopName]) {
    if names.is_empty() {
        return;
    }
    info!("  Top {} {}:", names.len(), label);
    for top in names {
        info!("    {:<40} {:>8} in {} chunks", top.name, top.total_count, top.chunks);
    }
}

struct Ledgers {
    unsupported: NameOccurrenceLedger,
    udf: NameOccurrenceLedger,
}

impl Ledgers {
    fn load(paths: &DatasetPaths) -> Result<Self> {
        Ok(Self {
            unsupported: load_ledger(paths, LedgerKind::Unsupported)?,
            udf: load_ledger(paths, LedgerKind::Udf)?,
        })
    }

    /// Fails if either ledger already holds `chunk_index` and recounting is off.
    fn ensure_uncounted(&self, chunk_index: u32, policy: MergePolicy) -> Result<(), LedgerError> {
        if policy == MergePolicy::RejectSeenChunks
            && (self.unsupported.has_counted(chunk_index) || self.udf.has_counted(chunk_index))
        {
            return Err(LedgerError::ChunkAlreadyCounted(chunk_index));
        }
        Ok(())
    }

    fn merge(&mut self, result: &TabulationResult, policy: MergePolicy) -> Result<(), LedgerError> {
        match policy {
            MergePolicy::RejectSeenChunks => {
                self.ensure_uncounted(result.unsupported.chunk_id, policy)?;
                self.unsupported.merge_once(&result.unsupported)?;
                self.udf.merge_once(&result.udf)?;
            }
            MergePolicy::Accumulate => {
                self.unsupported.merge(&result.unsupported);
                self.udf.merge(&result.udf);
            }
        }
        Ok(())
    }

    fn persist(&self, paths: &DatasetPaths, report: &mut RunReport) -> Result<()> {
        report.unique_unsupported = self.unsupported.len();
        report.unique_udfs = self.udf.len();
        report.top_unsupported = top_names(&self.unsupported, TOP_UNSUPPORTED);
        report.top_udfs = top_names(&self.udf, TOP_UDFS);
        persist_ledger(paths, LedgerKind::Unsupported, &self.unsupported)?;
        persist_ledger(paths, LedgerKind::Udf, &self.udf)
    }
}

fn load_source(source: &Path) -> Result<(String, Table)> {
    let dataset = dataset_name(source);
    info!("Loading dataset {} from {}", dataset, source.display());
    let table = Table::load(source)
        .with_context(|| format!("Failed to load source table {}", source.display()))?;
    info!("  {} rows, columns: {:?}", table.len(), table.columns());
    Ok((dataset, table))
}

/// Loads `source` and runs it as a dataset named after the file, reading
/// companions from the dataset's output directory.
pub fn run_source(source: &Path, config: &PipelineConfig) -> Result<RunReport> {
    let (dataset, table) = load_source(source)?;
    let companions = DirectoryCompanions::new(DatasetPaths::new(config, &dataset).dir);
    run_dataset(&dataset, &table, config, &companions)
}

/// Runs every chunk of `source` and persists both summary ledgers.
///
/// Per-chunk problems (missing columns, unreadable companions, artifact write
/// errors, already-counted chunks) are recorded in the report and do not stop
/// the run. Failing to load or persist a ledger is fatal.
pub fn run_dataset(
    dataset: &str,
    source: &Table,
    config: &PipelineConfig,
    companions: &dyn CompanionSource,
) -> Result<RunReport> {
    let paths = DatasetPaths::new(config, dataset);
    create_dataset_dir(&paths)?;

    let ranges = chunk::plan(source.len(), config.chunk_size)?;
    info!(
        "Dataset {}: {} chunks of up to {} rows",
        dataset,
        ranges.len(),
        config.chunk_size
    );

    let mut report = RunReport {
        dataset: dataset.to_string(),
        source_rows: source.len(),
        chunks_total: ranges.len(),
        ..Default::default()
    };

    // Chunks share nothing mutable, so filter/join runs in parallel; the
    // artifact writes and ledger merges below stay on this thread.
    let outcomes: Vec<(ChunkRange, Result<FilterJoinOutcome>)> = ranges
        .par_iter()
        .map(|range| (*range, filter_join_chunk(dataset, source, range, config, companions)))
        .collect();

    let mut ledgers = Ledgers::load(&paths)?;
    for (range, outcome) in outcomes {
        let unit = format!("{} part {}", dataset, range.index);
        match outcome {
            Ok(FilterJoinOutcome::Skipped(reason)) => {
                debug!("{} skipped: {}", unit, reason);
                report.skipped.push((range.index, reason));
            }
            Ok(FilterJoinOutcome::Joined(output)) => {
                if let Err(e) = process_joined(&paths, range.index, &output, config, &mut ledgers, &mut report) {
                    report.fail(unit, &e);
                }
            }
            Err(e) => report.fail(unit, &e),
        }
    }
    ledgers.persist(&paths, &mut report)?;

    info!(
        "Dataset {} complete: {} joined, {} skipped, {} failed",
        dataset,
        report.chunks_joined,
        report.skipped.len(),
        report.failures.len()
    );
    Ok(report)
}

/// Loads `source` and writes its chunks with [`export_chunks`].
pub fn export_source(source: &Path, config: &PipelineConfig) -> Result<Vec<PathBuf>> {
    let (dataset, table) = load_source(source)?;
    export_chunks(&dataset, &table, config)
}

/// Writes each chunk of `source` to `{dataset}_part_{n}.csv`, the files an
/// external translator turns into `{dataset}_part_{n}_result.csv` companions.
/// Returns the written paths in chunk order.
pub fn export_chunks(dataset: &str, source: &Table, config: &PipelineConfig) -> Result<Vec<PathBuf>> {
    let paths = DatasetPaths::new(config, dataset);
    create_dataset_dir(&paths)?;

    let ranges = chunk::plan(source.len(), config.chunk_size)?;
    let written = ranges
        .par_iter()
        .map(|range| -> Result<PathBuf> {
            let path = paths.chunk_export(range.index);
            write_table(&source.slice(range.rows()), &path)?;
            Ok(path)
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        "Exported {} rows of {} as {} chunk files in {}",
        source.len(),
        dataset,
        written.len(),
        paths.dir.display()
    );
    Ok(written)
}

/// Tabulates already joined `{dataset}_part_{n}_final.csv` files for chunk
/// numbers `start..=end` and merges them into the dataset's ledgers.
///
/// A missing or unreadable final file fails that chunk only.
pub fn tabulate_range(dataset: &str, start: u32, end: u32, config: &PipelineConfig) -> Result<RunReport> {
    let numbers = chunk::chunk_numbers(start, end)?;
    let paths = DatasetPaths::new(config, dataset);
    create_dataset_dir(&paths)?;
    info!("Tabulating {} final files {} to {}", dataset, start, end);

    let mut report = RunReport {
        dataset: dataset.to_string(),
        chunks_total: (end - start + 1) as usize,
        ..Default::default()
    };

    let mut ledgers = Ledgers::load(&paths)?;
    for chunk_index in numbers {
        if let Err(e) = tabulate_final_file(&paths, chunk_index, config, &mut ledgers, &mut report) {
            report.fail(format!("{} part {}", dataset, chunk_index), &e);
        }
    }
    ledgers.persist(&paths, &mut report)?;

    info!(
        "Dataset {} tabulation complete: {} tabulated, {} failed",
        dataset,
        report.chunks_tabulated,
        report.failures.len()
    );
    Ok(report)
}

fn create_dataset_dir(paths: &DatasetPaths) -> Result<()> {
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("Failed to create output directory {}", paths.dir.display()))
}

fn filter_join_chunk(
    dataset: &str,
    source: &Table,
    range: &ChunkRange,
    config: &PipelineConfig,
    companions: &dyn CompanionSource,
) -> Result<FilterJoinOutcome> {
    let chunk_rows = source.slice(range.rows());
    let keys = match filter_join::filter_unique_keys(&chunk_rows, &config.filter_spec)? {
        Some(keys) => keys,
        None => return Ok(FilterJoinOutcome::Skipped(SkipReason::NoFilterMatch)),
    };
    // Only chunks with surviving keys touch their companion.
    let companion = companions.companion(dataset, range.index)?;
    let outcome = filter_join::join(keys, companion.as_ref(), &config.filter_spec.join_key)?;
    Ok(outcome)
}

fn process_joined(
    paths: &DatasetPaths,
    chunk_index: u32,
    output: &FilterJoinOutput,
    config: &PipelineConfig,
    ledgers: &mut Ledgers,
    report: &mut RunReport,
) -> Result<()> {
    ledgers.ensure_uncounted(chunk_index, config.merge_policy)?;
    write_table(&output.unique_keys, &paths.filtered(chunk_index))?;
    write_table(&output.joined, &paths.final_rows(chunk_index))?;
    tabulate_and_merge(paths, chunk_index, &output.joined, config, ledgers, report)?;

    report.chunks_joined += 1;
    report.joined_records += output.joined.len();
    Ok(())
}

fn tabulate_final_file(
    paths: &DatasetPaths,
    chunk_index: u32,
    config: &PipelineConfig,
    ledgers: &mut Ledgers,
    report: &mut RunReport,
) -> Result<()> {
    let path = paths.final_rows(chunk_index);
    if !path.is_file() {
        bail!("final file not found: {}", path.display());
    }
    ledgers.ensure_uncounted(chunk_index, config.merge_policy)?;
    let joined = Table::from_csv(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    debug!("Part {}: {} final records", chunk_index, joined.len());
    tabulate_and_merge(paths, chunk_index, &joined, config, ledgers, report)
}

fn tabulate_and_merge(
    paths: &DatasetPaths,
    chunk_index: u32,
    joined: &Table,
    config: &PipelineConfig,
    ledgers: &mut Ledgers,
    report: &mut RunReport,
) -> Result<()> {
    let result = tabulate::run(joined, &config.list_field_names, chunk_index)?;
    if !result.unsupported_rows.is_empty() {
        write_table(&result.unsupported_rows, &paths.unsupported_rows(chunk_index))?;
    }
    if !result.udf_rows.is_empty() {
        write_table(&result.udf_rows, &paths.udf_rows(chunk_index))?;
    }
    ledgers.merge(&result, config.merge_policy)?;

    report.chunks_tabulated += 1;
    report.unsupported_records += result.unsupported_records();
    report.udf_records += result.udf_records();
    if result.unsupported_records() > 0 {
        report.chunks_with_unsupported += 1;
    }
    if result.udf_records() > 0 {
        report.chunks_with_udfs += 1;
    }
    debug!(
        "Part {}: {} unsupported records, {} UDF records",
        chunk_index,
        result.unsupported_records(),
        result.udf_records()
    );
    Ok(())
}

fn write_table(table: &Table, path: &Path) -> Result<()> {
    table
        .write_csv(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn load_ledger(paths: &DatasetPaths, kind: LedgerKind) -> Result<NameOccurrenceLedger> {
    let path = paths.ledger(kind);
    NameOccurrenceLedger::load(&path)
        .with_context(|| format!("Failed to load existing summary {}", path.display()))
}

fn persist_ledger(paths: &DatasetPaths, kind: LedgerKind, ledger: &NameOccurrenceLedger) -> Result<()> {
    let path = paths.ledger(kind);
    ledger
        .persist(&path, kind.name_header())
        .with_context(|| format!("Failed to write summary {}", path.display()))?;
    info!("Saved {} ({} names)", path.display(), ledger.len());
    Ok(())
}
