//! imgdup CLI - near-duplicate image scans over channel history.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;

mod commands;
mod exit_codes;
mod logging;
mod utils;

use exit_codes::ExitCode;

const EXIT_CODES_HELP: &str = "\
Exit codes:
  0   Success
  1   General error
  64  Usage error or invalid configuration
  66  Cannot open input (export directory, database)
  69  Message source unavailable
  74  I/O error (report or database write)
  75  Another scan is already running";

#[derive(Parser)]
#[command(name = "imgdup")]
#[command(author, version, about = "Near-duplicate image detection for channel history", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// SQLite database holding image records (":memory:" for a throwaway store)
    #[arg(long, global = true, value_name = "PATH", env = "IMGDUP_DB", default_value = "imgdup.db")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a channel and report near-duplicate images
    Scan(ScanArgs),

    /// Build a duplicate report from records already in the database
    Report(ReportArgs),
}

/// Options left unset fall back to the `IMGDUP_*` environment, then to the
/// built-in defaults.
#[derive(Args)]
pub struct ScanArgs {
    /// Channel identity (@username or numeric id)
    #[arg(value_name = "CHANNEL")]
    pub channel: String,

    /// Message source: auto, bot, history or export [default: auto]
    #[arg(short, long)]
    pub method: Option<String>,

    /// Directory containing an exported result.json (with --method export)
    #[arg(long, value_name = "DIR")]
    pub export_dir: Option<PathBuf>,

    /// Ingestion mode for explicit methods: download or lightweight [default: download]
    #[arg(long)]
    pub mode: Option<String>,

    /// Perceptual hash: phash, dhash or blockhash [default: phash]
    #[arg(long)]
    pub hash: Option<String>,

    /// Hash grid edge length [default: 8]
    #[arg(long)]
    pub hash_size: Option<u32>,

    /// Maximum dissimilarity percentage still counted as a duplicate [default: 10]
    #[arg(short, long)]
    pub threshold: Option<u32>,

    /// Messages requested per batch [default: 100]
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Seconds to wait between batch fetches [default: 1.0]
    #[arg(long)]
    pub cooldown: Option<f64>,

    /// Stop after this many messages, 0 for no limit [default: 0]
    #[arg(long)]
    pub max_messages: Option<usize>,

    /// Records kept in the in-memory working set [default: 10000]
    #[arg(long)]
    pub max_working_set: Option<usize>,

    /// Directory the JSON report is written to
    #[arg(short, long, value_name = "DIR", default_value = "reports")]
    pub output_dir: PathBuf,

    /// Print the scan summary as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct ReportArgs {
    /// Channel identity the report is labelled with
    #[arg(value_name = "CHANNEL")]
    pub channel: String,

    /// Only group records with this provenance tag (e.g. export/download)
    #[arg(long)]
    pub provenance: Option<String>,

    /// Maximum dissimilarity percentage still counted as a duplicate [default: 10]
    #[arg(short, long)]
    pub threshold: Option<u32>,

    /// Directory the JSON report is written to; prints to stdout when omitted
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Scan(args) => commands::scan::execute(args, &cli.db, cli.quiet).await,
        Commands::Report(args) => commands::report::execute(args, &cli.db).await,
    };

    let exit = match result {
        Ok(()) => ExitCode::success(),
        Err(err) => ExitCode::from_anyhow(&err),
    };
    if let Some(message) = &exit.message {
        eprintln!("{} {}", "error:".red().bold(), message);
    }
    std::process::exit(exit.code);
}
