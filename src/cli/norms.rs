//! Norms command - directory migration status and established norms

use super::{print_json, severity_label, Workspace};
use crate::norms::{DirectoryStatus, DirectorySummarizer, DirectorySummary};
use anyhow::{Context, Result};
use console::style;

fn status_label(status: DirectoryStatus) -> String {
    match status {
        DirectoryStatus::Migrated => style("migrated").green().bold().to_string(),
        DirectoryStatus::InProgress => style("in progress").yellow().to_string(),
        DirectoryStatus::NotStarted => style("not started").dim().to_string(),
    }
}

fn print_summary(summary: &DirectorySummary) {
    let directory = if summary.directory.is_empty() {
        "."
    } else {
        summary.directory.as_str()
    };
    println!(
        "\n{} {}  {}",
        style("Directory").bold(),
        style(directory).cyan(),
        status_label(summary.status)
    );
    println!(
        "  Files: {} total, {} clean, {} with violations",
        summary.files.total, summary.files.clean, summary.files.with_violations
    );
    if let Some(since) = summary.clean_since {
        println!("  Clean since {}", since.format("%Y-%m-%d %H:%M UTC"));
    }
    println!(
        "  Latest checkpoint: {} (revision {})",
        style(&summary.latest_checkpoint.id).dim(),
        summary.latest_checkpoint.revision
    );

    if summary.norms.is_empty() {
        println!("\n  {}\n", style("No norms established yet").dim());
        return;
    }
    println!("\n  {} ({})", style("Norms").bold(), summary.norms.len());
    for norm in &summary.norms {
        println!(
            "    {} {} [{}] since {}, {} violations fixed",
            style(&norm.rule_id).cyan(),
            severity_label(norm.severity),
            norm.rule_kind,
            norm.established_at.format("%Y-%m-%d"),
            norm.violations_fixed
        );
        if let Some(url) = &norm.docs_url {
            println!("      {}", style(url).dim());
        }
    }
    println!();
}

/// Run the norms command
pub fn run(
    workspace: &Workspace,
    directory: &str,
    lookback: Option<usize>,
    limit: Option<usize>,
    write: bool,
    json: bool,
) -> Result<()> {
    let mut options = workspace.settings.summary_options();
    if let Some(lookback) = lookback {
        options.lookback_window = lookback;
    }
    if let Some(limit) = limit {
        options.checkpoint_limit = limit;
    }

    let summarizer = DirectorySummarizer::new(&workspace.store, options);
    let summary = summarizer
        .summarize(directory)
        .with_context(|| format!("Failed to summarize {}", directory))?;

    let written = if write {
        let key = summarizer.write_summary(&summary)?;
        Some(workspace.output.join(key))
    } else {
        None
    };

    if json {
        return print_json(&summary);
    }

    print_summary(&summary);
    if let Some(path) = written {
        println!("  Summary written to {}\n", style(path.display()).dim());
    }
    Ok(())
}
