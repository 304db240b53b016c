//! History and show commands - browse recorded checkpoints

use super::{delta_label, print_json, severity_label, Workspace};
use anyhow::{Context, Result};
use console::style;
use std::collections::BTreeMap;

/// Run the history command
pub fn run(workspace: &Workspace, limit: usize, offset: usize, json: bool) -> Result<()> {
    let entries = workspace
        .store
        .list_page(offset, limit)
        .context("Failed to read checkpoint manifest")?;

    if json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        println!(
            "\nNo checkpoints yet. Run {}\n",
            style("normscope record <violations.json>").cyan()
        );
        return Ok(());
    }

    println!("\n{}\n", style("Checkpoint history").bold());
    for meta in &entries {
        let delta = meta
            .delta
            .map(|d| format!("  ({})", delta_label(d.total)))
            .unwrap_or_default();
        let session = meta
            .attribution
            .as_ref()
            .map(|a| format!("  {}", style(&a.session_id).dim()))
            .unwrap_or_default();
        println!(
            "  r{:<4} {}  {}  {:>5} total  {:>4} err  {:>4} warn{}{}",
            meta.revision,
            style(&meta.id).cyan(),
            meta.timestamp.format("%Y-%m-%d %H:%M"),
            meta.summary.total,
            meta.summary.errors,
            meta.summary.warnings,
            delta,
            session
        );
    }
    println!();
    Ok(())
}

/// Run the show command
pub fn show(workspace: &Workspace, id: &str, json: bool) -> Result<()> {
    let id = if id == "latest" {
        let manifest = workspace
            .store
            .read_manifest()
            .context("Failed to read checkpoint manifest")?;
        match manifest.latest() {
            Some(meta) => meta.id.clone(),
            None => anyhow::bail!("No checkpoints recorded yet"),
        }
    } else {
        id.to_string()
    };

    let checkpoint = workspace
        .store
        .read(&id)
        .with_context(|| format!("Failed to load checkpoint {}", id))?;

    if json {
        return print_json(&checkpoint);
    }

    let summary = checkpoint.findings.summary();
    println!(
        "\n{} {} (revision {}, {})",
        style("Checkpoint").bold(),
        style(&checkpoint.id).cyan(),
        checkpoint.revision,
        checkpoint.timestamp.to_rfc3339()
    );
    if let Some(attribution) = &checkpoint.attribution {
        match &attribution.source {
            Some(source) => println!("  Session: {} ({})", attribution.session_id, source),
            None => println!("  Session: {}", attribution.session_id),
        }
    }
    println!(
        "  {} violations in {} files across {} rules\n",
        summary.total,
        summary.files,
        checkpoint.findings.rules().len()
    );

    let mut by_file: BTreeMap<String, Vec<_>> = BTreeMap::new();
    for violation in checkpoint.findings.expand_all() {
        let file = violation
            .file
            .clone()
            .unwrap_or_else(|| "(project)".to_string());
        by_file.entry(file).or_default().push(violation);
    }
    for (file, violations) in &by_file {
        println!("  {}", style(file).bold());
        for v in violations {
            let location = v.range.map(|r| format!("{r}  ")).unwrap_or_default();
            println!(
                "    {}{} {} {}",
                location,
                severity_label(v.severity),
                style(&v.id).dim(),
                v.message
            );
        }
    }
    println!();
    Ok(())
}
