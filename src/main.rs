use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use price_ledger::{
    LedgerError, MarketRule, MultiSinkWriter, Pipeline, PipelineConfig, RunReport, SinkConfig,
    SinkKind, SuffixRule,
};
use std::path::PathBuf;
use std::process::ExitCode;

mod download;
mod verify;

use download::{default_target_date, Downloader, FetchOutcome, DEFAULT_BASE_URL};

#[derive(Parser)]
#[command(name = "omie_processor")]
#[command(about = "Maintain a deduplicated history of OMIE day-ahead marginal prices")]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    /// Worker threads for parsing (defaults to the CPU count)
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreArgs {
    /// Directory holding raw marginalpdbc files
    #[arg(long, global = true, env = "OMIE_STAGING_DIR", default_value = "data")]
    staging_dir: PathBuf,

    /// Directory holding the persisted sinks
    #[arg(long, global = true, env = "OMIE_OUTPUT_DIR", default_value = "process")]
    output_dir: PathBuf,

    /// File stem shared by every sink file
    #[arg(long, global = true, default_value = "omie_prices")]
    dataset_name: String,

    /// Table name inside the SQLite store
    #[arg(long, global = true, default_value = "prices")]
    table: String,

    /// Sinks to maintain: csv, parquet, sqlite, ipc
    #[arg(long, global = true, value_delimiter = ',', default_value = "csv,parquet,sqlite")]
    sinks: Vec<SinkKind>,

    /// File suffix to market assignment, e.g. 1=Spain (repeatable)
    #[arg(long = "market-suffix", global = true, value_name = "SUFFIX=MARKET")]
    market_suffix: Vec<String>,
}

impl StoreArgs {
    fn sink_config(&self) -> SinkConfig {
        let mut config = SinkConfig::new(&self.output_dir);
        config.dataset_name = self.dataset_name.clone();
        config.table = self.table.clone();
        config.kinds = self.sinks.clone();
        config
    }

    fn market_rule(&self) -> Result<SuffixRule, LedgerError> {
        if self.market_suffix.is_empty() {
            Ok(SuffixRule::default())
        } else {
            SuffixRule::from_assignments(&self.market_suffix)
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest staged files, merge into history, persist and audit
    Run {
        /// Skip decoding the sinks again after writing
        #[arg(long)]
        no_verify: bool,

        /// Hide the parsing progress bar
        #[arg(long)]
        no_progress: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Download raw files for one day into the staging directory
    Fetch {
        /// Delivery date, YYYY-MM-DD (defaults to tomorrow, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,

        #[arg(long, env = "OMIE_BASE_URL", default_value = DEFAULT_BASE_URL)]
        base_url: String,
    },

    /// Check the persisted sinks for consistency and report gaps
    Verify,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match execute(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            log::error!("❌ {:#}", err);
            let code = err
                .downcast_ref::<LedgerError>()
                .map(LedgerError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

fn execute(cli: Cli) -> Result<u8> {
    let threads = cli.threads.unwrap_or_else(num_cpus::get).max(1);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .context("configuring the rayon thread pool")?;

    match cli.command {
        Commands::Run {
            no_verify,
            no_progress,
            format,
        } => run(&cli.store, !no_verify, !no_progress, format),
        Commands::Fetch { date, base_url } => fetch(&cli.store, date, base_url),
        Commands::Verify => {
            let writer = MultiSinkWriter::from_config(&cli.store.sink_config())?;
            verify::verify_store(writer.sinks())?;
            Ok(0)
        }
    }
}

fn run(store: &StoreArgs, verify_readback: bool, show_progress: bool, format: OutputFormat) -> Result<u8> {
    let mut config = PipelineConfig::new(&store.staging_dir, &store.output_dir);
    config.sinks = store.sink_config();
    config.verify_readback = verify_readback;
    config.show_progress = show_progress && format == OutputFormat::Text;

    if format == OutputFormat::Text {
        println!("🚀 OMIE Marginal Price Processor");
        println!("Rayon thread pool configured with {} threads", rayon::current_num_threads());
        println!("{}", "=".repeat(60));
    }

    let start = std::time::Instant::now();
    let pipeline = Pipeline::new(config, Box::new(store.market_rule()?))?;
    let report = pipeline.run()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            print_report(&report);
            println!("\n✅ Processing complete in {:?}!", start.elapsed());
        }
    }

    Ok(report.exit_code())
}

fn print_report(report: &RunReport) {
    println!("\n📁 Files: {} seen, {} parsed", report.files_seen, report.files_parsed);
    for skipped in &report.files_skipped {
        println!("  ❌ Skipped {}: {}", skipped.file, skipped.reason);
    }
    println!("  🧹 Provisional rows dropped: {}", report.provisional_rows_dropped);
    println!("📥 Records parsed: {}", report.records_parsed);
    println!(
        "🔀 Merge: {} added, {} updated, {} unchanged",
        report.merge.added, report.merge.updated, report.merge.unchanged
    );
    println!("📊 Total records: {}", report.total_records);
    match report.latest_timestamp {
        Some(ts) => println!("🕐 Latest timestamp: {}", ts),
        None => println!("🕐 Latest timestamp: none"),
    }
    if let Some(source) = &report.loaded_from {
        println!("📂 History loaded from {}", source);
    }
    if report.merge.cross_day > 0 {
        println!(
            "  ⚠️  {} record(s) replaced by a file published on another day",
            report.merge.cross_day
        );
    }
    if report.persisted {
        println!("💾 Sinks rebuilt");
    } else {
        println!("💾 Nothing to persist");
    }

    if report.gaps.is_empty() {
        println!("✅ No gaps in time series");
    } else {
        println!("⚠️  Found {} missing hours", report.gaps.total_missing());
        for range in &report.gap_ranges {
            println!(
                "    {} missing {} hour(s): {} .. {}",
                range.market, range.hours, range.start, range.end
            );
        }
    }
}

fn fetch(store: &StoreArgs, date: Option<NaiveDate>, base_url: String) -> Result<u8> {
    let rule = store.market_rule()?;
    let date = date.unwrap_or_else(default_target_date);
    println!("⬇️  Fetching OMIE marginal prices for {}", date);

    let downloader = Downloader::new(base_url, &store.staging_dir)?;
    for outcome in downloader.fetch_day(date, &rule.suffixes())? {
        match outcome {
            FetchOutcome::Downloaded { path, bytes } => {
                println!("  ✅ Saved {} ({} bytes)", path.display(), bytes)
            }
            FetchOutcome::AlreadyPresent { path } => {
                println!("  📌 Already staged: {}", path.display())
            }
            FetchOutcome::NotPublished { file_name, status } => {
                println!("  ⚠️  {} not available (HTTP {})", file_name, status)
            }
        }
    }
    Ok(0)
}
