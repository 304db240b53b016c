//! Diff command - compare two checkpoints by stable result key

use super::{print_json, severity_label, Workspace};
use crate::findings::{diff_findings, FindingsDiff};
use crate::models::Violation;
use anyhow::{Context, Result};
use console::style;
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DiffReport<'a> {
    from: &'a str,
    to: &'a str,
    #[serde(flatten)]
    diff: &'a FindingsDiff,
}

/// Pick baseline and target ids, defaulting to the two newest checkpoints
fn resolve_ids(
    workspace: &Workspace,
    from: Option<String>,
    to: Option<String>,
) -> Result<(String, String)> {
    if let (Some(from), Some(to)) = (&from, &to) {
        return Ok((from.clone(), to.clone()));
    }

    let manifest = workspace
        .store
        .read_manifest()
        .context("Failed to read checkpoint manifest")?;
    let ids: Vec<&str> = manifest.checkpoints.iter().map(|m| m.id.as_str()).collect();

    match (from, ids.as_slice()) {
        (Some(from), [newest, ..]) => Ok((from, newest.to_string())),
        (None, [newest, previous, ..]) => Ok((previous.to_string(), newest.to_string())),
        _ => anyhow::bail!(
            "Need at least two checkpoints to diff ({} recorded)",
            ids.len()
        ),
    }
}

fn print_section(title: &str, marker: console::StyledObject<&str>, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    println!("  {} ({})", style(title).bold(), violations.len());
    for v in violations {
        let file = v.file.as_deref().unwrap_or("(project)");
        let location = v.range.map(|r| format!(":{r}")).unwrap_or_default();
        println!(
            "    {} {} {}{}  {}",
            marker,
            severity_label(v.severity),
            file,
            location,
            style(&v.id).dim()
        );
    }
    println!();
}

/// Run the diff command
pub fn run(workspace: &Workspace, from: Option<String>, to: Option<String>, json: bool) -> Result<()> {
    let (from_id, to_id) = resolve_ids(workspace, from, to)?;

    let before = workspace
        .store
        .read(&from_id)
        .with_context(|| format!("Failed to load checkpoint {}", from_id))?;
    let after = workspace
        .store
        .read(&to_id)
        .with_context(|| format!("Failed to load checkpoint {}", to_id))?;

    let diff = diff_findings(&before.findings, &after.findings);

    if json {
        return print_json(&DiffReport {
            from: &from_id,
            to: &to_id,
            diff: &diff,
        });
    }

    println!(
        "\n{} {} -> {}\n",
        style("Diff").bold(),
        style(&from_id).cyan(),
        style(&to_id).cyan()
    );
    if diff.is_empty() {
        println!("  No changes ({} unchanged)\n", diff.unchanged);
        return Ok(());
    }
    print_section("New", style("+").red(), &diff.added);
    print_section("Fixed", style("-").green(), &diff.removed);
    println!(
        "  {} new, {} fixed, {} unchanged\n",
        diff.added.len(),
        diff.removed.len(),
        diff.unchanged
    );
    Ok(())
}
