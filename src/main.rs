use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info, warn, LevelFilter};
use query_function_tally::config::{DEFAULT_CHUNK_SIZE, DEFAULT_OUTPUT_DIR};
use query_function_tally::pipeline;
use query_function_tally::{FilterSpec, ListFieldNames, MergePolicy, PipelineConfig};
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use time::macros::format_description;

#[derive(Parser, Debug)]
#[command(name = "Query Function Tally")]
#[command(about = "Filter PowerBI query logs, join them with translation results, and tally unsupported functions and UDFs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, global = true, default_value = DEFAULT_OUTPUT_DIR, help = "Directory holding one sub-directory per dataset")]
    output_dir: PathBuf,

    #[arg(
        short,
        long,
        global = true,
        default_value = "statement_type,client_application,execution_status,query_Hash",
        help = "Comma-separated filter columns: statement type, client application, execution status, join key"
    )]
    columns: String,

    #[arg(short = 's', long, global = true, default_value_t = DEFAULT_CHUNK_SIZE, help = "Rows per chunk")]
    chunk_size: usize,

    #[arg(long, global = true, default_value = "unsupported_functions", help = "Column listing unsupported functions")]
    unsupported_field: String,

    #[arg(long, global = true, default_value = "udf_list", help = "Column listing user-defined functions")]
    udf_field: String,

    #[arg(long, global = true, help = "Count chunks again even if the summaries already include them")]
    allow_recount: bool,

    #[arg(short, long, global = true, default_value = "info", help = "Logging level (trace, debug, info, warn, error)")]
    log_level: String,

    #[arg(short, long, global = true, default_value = "0", help = "Number of threads to use (0 for auto)")]
    threads: usize,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Filter, join and tally every chunk of each source file
    Run {
        #[arg(required = true, help = "Source query-log files (.parquet, .csv or .csv.gz)")]
        sources: Vec<PathBuf>,
    },
    /// Write each source file's chunks as {dataset}_part_{n}.csv for translation
    Export {
        #[arg(required = true, help = "Source query-log files (.parquet, .csv or .csv.gz)")]
        sources: Vec<PathBuf>,
    },
    /// Tally existing {dataset}_part_{n}_final.csv files for chunks START..=END
    Tabulate {
        #[arg(help = "Dataset directory name under the output directory")]
        dataset: String,
        start: u32,
        end: u32,
    },
}

fn init_logger(requested: &str) -> Result<()> {
    let level = requested.parse::<LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Unknown log level '{}', logging at info", requested);
        LevelFilter::Info
    });
    SimpleLogger::new()
        .with_level(level)
        .with_timestamp_format(format_description!("[hour]:[minute]:[second].[subsecond digits:3]"))
        .init()?;
    Ok(())
}

/// Sizes the global rayon pool and returns the worker count it was asked for.
fn configure_workers(requested: usize) -> usize {
    let workers = match requested {
        0 => num_cpus::get(),
        n => n,
    };
    if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(workers).build_global() {
        warn!("Could not size the worker pool ({}), rayon defaults apply", e);
    }
    workers
}

fn elapsed_label(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    match secs {
        0..=59 => format!("{:.2}s", elapsed.as_secs_f64()),
        60..=3599 => format!("{}m {:02}s", secs / 60, secs % 60),
        _ => format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let merge_policy = if cli.allow_recount {
        MergePolicy::Accumulate
    } else {
        MergePolicy::RejectSeenChunks
    };
    let config = PipelineConfig::new(
        FilterSpec::parse(&cli.columns)?,
        cli.chunk_size,
        ListFieldNames::new(&cli.unsupported_field, &cli.udf_field)?,
        merge_policy,
        cli.output_dir.clone(),
    )?;
    Ok(config)
}

/// Runs `step` on every source, logging failures and returning how many failed.
fn for_each_source<F>(sources: &[PathBuf], mut step: F) -> usize
where
    F: FnMut(&PathBuf) -> Result<()>,
{
    let mut failed = 0;
    for source in sources {
        if let Err(e) = step(source) {
            error!("{}: {:#}", source.display(), e);
            failed += 1;
        }
    }
    failed
}

fn main() -> Result<()> {
    let started = Instant::now();
    let cli = Cli::parse();

    init_logger(&cli.log_level)?;
    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            return Err(e);
        }
    };

    let workers = configure_workers(cli.threads);
    info!(
        "Output {} | chunk size {} | {:?} | {} workers",
        config.output_dir.display(),
        config.chunk_size,
        config.merge_policy,
        workers
    );
    info!("Filter columns: {:?}", config.filter_spec.columns());

    let failed = match &cli.command {
        Command::Run { sources } => for_each_source(sources, |source| {
            pipeline::run_source(source, &config)?.log_summary();
            Ok(())
        }),
        Command::Export { sources } => for_each_source(sources, |source| {
            let written = pipeline::export_source(source, &config)?;
            info!("{}: {} chunk files", source.display(), written.len());
            Ok(())
        }),
        Command::Tabulate { dataset, start, end } => {
            pipeline::tabulate_range(dataset, *start, *end, &config)?.log_summary();
            0
        }
    };

    if failed > 0 {
        warn!("{} source file(s) failed", failed);
    }
    info!("Finished in {}", elapsed_label(started.elapsed()));
    Ok(())
}
