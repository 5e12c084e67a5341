//! Scan command implementation.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use imgdup_core::{
    resolve_method, shared, BotApiConfig, BotApiSource, ExportSource, HashMethod,
    HistoryApiConfig, HistoryApiSource, IngestionMode, JsonFileSink, ResolvedSource, ScanConfig,
    ScanStatus, ScanSummary, Scanner, SourceMethod,
};
use tracing::{info, warn};

use crate::utils::open_store;
use crate::ScanArgs;

/// Execute the scan command.
pub async fn execute(args: ScanArgs, db: &str, quiet: bool) -> Result<()> {
    let config = scan_config(&args)?;
    config.validate()?;

    let resolved = build_source(&args, &config).await?;
    info!(
        channel = %args.channel,
        provenance = %resolved.provenance(),
        resolution = ?resolved.resolution,
        "Source ready"
    );

    let store = open_store(db, config.max_working_set_size).await?;
    let scanner = Scanner::new(store.clone(), config)?;
    let sink = JsonFileSink::new(&args.output_dir);

    let summary = scanner.scan(&args.channel, &resolved, &sink).await?;
    store.close().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if !quiet {
        print_summary(&args.channel, &summary);
    }

    match summary.status {
        ScanStatus::Completed => Ok(()),
        ScanStatus::Busy => bail!("A scan is already running"),
        ScanStatus::Failed(reason) => bail!("Scan aborted: {reason}"),
    }
}

/// Layer explicit flags over `ScanConfig::from_env()`.
fn scan_config(args: &ScanArgs) -> Result<ScanConfig> {
    apply_args(ScanConfig::from_env(), args)
}

fn apply_args(mut config: ScanConfig, args: &ScanArgs) -> Result<ScanConfig> {
    if let Some(method) = &args.method {
        config = config.with_source_method(method.parse::<SourceMethod>()?);
    }
    if let Some(mode) = &args.mode {
        config = config.with_ingestion_mode(mode.parse::<IngestionMode>()?);
    }
    if let Some(hash) = &args.hash {
        config = config.with_hash_method(hash.parse::<HashMethod>()?);
    }
    if let Some(hash_size) = args.hash_size {
        config = config.with_hash_size(hash_size);
    }
    if let Some(threshold) = args.threshold {
        config = config.with_threshold(threshold);
    }
    if let Some(batch_size) = args.batch_size {
        config = config.with_batch_size(batch_size);
    }
    if let Some(cooldown) = args.cooldown {
        config = config.with_cooldown_seconds(cooldown);
    }
    if let Some(max_messages) = args.max_messages {
        config = config.with_max_messages(max_messages);
    }
    if let Some(max_working_set) = args.max_working_set {
        config = config.with_max_working_set_size(max_working_set);
    }
    Ok(config)
}

async fn build_source(args: &ScanArgs, config: &ScanConfig) -> Result<ResolvedSource> {
    let resolved = match config.source_method {
        SourceMethod::Export => {
            let Some(dir) = &args.export_dir else {
                bail!("--method export requires --export-dir");
            };
            let source = ExportSource::open(dir)
                .await
                .with_context(|| format!("Failed to open export: {}", dir.display()))?;
            ResolvedSource::explicit(shared(source), config.ingestion_mode)
        }
        SourceMethod::Bot => {
            let source = BotApiSource::new(BotApiConfig::from_env()?)?;
            ResolvedSource::explicit(shared(source), config.ingestion_mode)
        }
        SourceMethod::History => {
            let source = HistoryApiSource::new(HistoryApiConfig::from_env()?)?;
            ResolvedSource::explicit(shared(source), config.ingestion_mode)
        }
        SourceMethod::Auto => {
            let bot = BotApiSource::new(
                BotApiConfig::from_env().context("--method auto requires a bot token")?,
            )?;
            let history = match HistoryApiConfig::from_env() {
                Ok(cfg) => Some(shared(HistoryApiSource::new(cfg)?)),
                Err(e) => {
                    warn!(error = %e, "History API not configured");
                    None
                }
            };
            resolve_method(shared(bot), history, &args.channel).await
        }
    };
    Ok(resolved)
}

fn print_summary(channel: &str, summary: &ScanSummary) {
    println!();
    let headline = match &summary.status {
        ScanStatus::Completed => "SCAN COMPLETE".green().bold(),
        ScanStatus::Busy => "SCAN SKIPPED (BUSY)".yellow().bold(),
        ScanStatus::Failed(_) => "SCAN ABORTED".red().bold(),
    };
    println!("{headline}");
    println!();
    println!("   {} {}", "Channel:".dimmed(), channel);
    if let Some(provenance) = &summary.provenance {
        println!("   {} {}", "Source:".dimmed(), provenance);
    }
    if let Some(resolution) = &summary.resolution {
        println!("   {} {}", "Resolution:".dimmed(), resolution);
    }
    println!(
        "   {} {}",
        "Messages:".dimmed(),
        summary.stats.total_messages
    );
    println!(
        "   {} {}",
        "Images:".dimmed(),
        summary.stats.processed_images
    );
    if summary.stats.errors > 0 {
        println!(
            "   {} {}",
            "Errors:".dimmed(),
            summary.stats.errors.to_string().yellow()
        );
    }
    println!(
        "   {} {} ({} duplicates)",
        "Groups:".dimmed(),
        summary.duplicate_groups,
        summary.stats.duplicates_found
    );
    if let Some(location) = &summary.report_location {
        println!("   {} {}", "Report:".dimmed(), location.cyan());
    }
    if let ScanStatus::Failed(reason) = &summary.status {
        println!("   {} {}", "Reason:".dimmed(), reason.red());
    }
    println!();
}
