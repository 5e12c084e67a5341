//! Report command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use imgdup_core::{
    build_report, ChannelInfo, DuplicateReport, JsonFileSink, ReportContext, ReportSink,
    ScanConfig,
};
use tracing::info;

use crate::utils::{format_date, open_store};
use crate::ReportArgs;

/// Execute the report command.
pub async fn execute(args: ReportArgs, db: &str) -> Result<()> {
    let mut config = ScanConfig::from_env();
    if let Some(threshold) = args.threshold {
        config = config.with_threshold(threshold);
    }
    config.validate()?;

    let store = open_store(db, config.max_working_set_size).await?;
    let records = match &args.provenance {
        Some(provenance) => store.get_all_by_provenance(provenance).await?,
        None => store.get_all().await?,
    };
    store.close().await?;
    info!(records = records.len(), provenance = ?args.provenance, "Records loaded");

    let channel = ChannelInfo::from_identity(&args.channel);
    let ctx = ReportContext {
        channel: &channel,
        total_messages: 0,
        processed_images: records.len() as u64,
        threshold_percent: config.similarity_threshold_percent,
        link_base_url: &config.link_base_url,
    };
    let report = build_report(&records, &ctx);

    match &args.output_dir {
        Some(dir) => {
            let location = JsonFileSink::new(dir)
                .write(&report)
                .await
                .with_context(|| format!("Failed to write report to {}", dir.display()))?;
            print_overview(&report);
            if let Some(location) = location {
                println!("   {} {}", "Report:".dimmed(), location.cyan());
            }
        }
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn print_overview(report: &DuplicateReport) {
    println!();
    println!(
        "{} {} group(s), {} duplicate(s) across {} image(s)",
        "Duplicates:".bold(),
        report.stats.duplicate_groups,
        report.stats.total_duplicates,
        report.stats.processed_images
    );
    for group in &report.duplicate_groups {
        println!(
            "   {} {} ({})",
            "Original:".dimmed(),
            group.original.link,
            format_date(&group.original.date)
        );
        for duplicate in &group.duplicates {
            println!("     {} {}", "↳".yellow(), duplicate.link);
        }
    }
    println!();
}
