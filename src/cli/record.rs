//! Record command - normalize a violations file and persist a checkpoint

use super::{delta_label, print_json, Workspace};
use crate::findings::normalize;
use crate::models::{Attribution, Violation};
use anyhow::{Context, Result};
use console::style;
use std::io::Read;
use std::path::Path;

fn read_violations(input: &Path) -> Result<Vec<Violation>> {
    let content = if input == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read violations from stdin")?;
        buf
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read {}", input.display()))?
    };
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid violations JSON in {}", input.display()))
}

pub fn run(
    workspace: &Workspace,
    input: &Path,
    session: Option<String>,
    source: Option<String>,
    json: bool,
) -> Result<()> {
    let violations = read_violations(input)?;
    let findings = normalize(&violations);
    let attribution = session.map(|session_id| Attribution { session_id, source });
    let config =
        serde_json::to_value(&workspace.settings).context("Failed to encode settings")?;

    let metadata = workspace
        .store
        .record(findings, config, attribution)
        .with_context(|| {
            format!(
                "Failed to record checkpoint in {}",
                workspace.output.display()
            )
        })?;

    if json {
        return print_json(&metadata);
    }

    let summary = metadata.summary;
    println!(
        "\n{} Recorded checkpoint {} (revision {})",
        style("[OK]").green(),
        style(&metadata.id).cyan(),
        metadata.revision
    );
    println!(
        "  {} violations in {} files: {} errors, {} warnings, {} info",
        style(summary.total).bold(),
        summary.files,
        summary.errors,
        summary.warnings,
        summary.info
    );
    match metadata.delta {
        Some(delta) => println!(
            "  Since previous: {} total ({} errors, {} warnings, {} info)",
            delta_label(delta.total),
            delta_label(delta.errors),
            delta_label(delta.warnings),
            delta_label(delta.info)
        ),
        None => println!("  {}", style("First checkpoint at this location").dim()),
    }
    println!();
    Ok(())
}
