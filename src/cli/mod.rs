//! CLI command definitions and handlers

mod diff;
mod history;
mod norms;
mod record;

use crate::checkpoint::CheckpointStore;
use crate::clock::SystemClock;
use crate::config::{load_settings, Settings};
use crate::models::Severity;
use crate::storage::{BlobStore, FsBlobStore};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Parse a count that must be at least 1
fn parse_positive(s: &str) -> Result<usize, String> {
    let n: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if n == 0 {
        Err("value must be at least 1".to_string())
    } else {
        Ok(n)
    }
}

/// normscope - longitudinal migration audits
///
/// Records each audit run as an immutable checkpoint and works out which
/// rules have become established conventions in which directories.
#[derive(Parser, Debug)]
#[command(name = "normscope")]
#[command(
    version,
    about = "Versioned migration audit checkpoints and per-directory norm detection",
    after_help = "\
Examples:
  normscope record violations.json          Record an audit run
  normscope history --limit 5               Five most recent checkpoints
  normscope diff                            Compare the two newest checkpoints
  normscope norms src/legacy                Which rules are now norms in src/legacy
  normscope norms src/legacy --write        ...and persist the summary"
)]
pub struct Cli {
    /// Project root (default: current directory)
    #[arg(long, short = 'C', global = true, default_value = ".")]
    pub project: PathBuf,

    /// Checkpoint directory (overrides output_dir from settings)
    #[arg(long, short = 'o', global = true)]
    pub output: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG wins when set
    #[arg(long, global = true, default_value = "warn", value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a violations file as a new checkpoint
    #[command(after_help = "\
The input is a JSON array of violations:
  [{\"id\": \"no-moment\", \"severity\": \"error\", \"message\": \"...\",
    \"file\": \"src/a.ts\", \"range\": [1, 0, 1, 20]}]

Use - to read from stdin.")]
    Record {
        /// Violations JSON file
        input: PathBuf,

        /// Session id to attribute this run to
        #[arg(long)]
        session: Option<String>,

        /// Where the session came from (e.g. ci, local)
        #[arg(long, requires = "session")]
        source: Option<String>,

        /// Print checkpoint metadata as JSON
        #[arg(long)]
        json: bool,
    },

    /// List recorded checkpoints, newest first
    History {
        /// Maximum checkpoints to show
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Skip this many of the newest checkpoints
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one checkpoint (use "latest" for the newest)
    Show {
        /// Checkpoint id
        id: String,

        /// Output the full checkpoint as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compare two checkpoints (default: the two newest)
    Diff {
        /// Baseline checkpoint id
        from: Option<String>,

        /// Target checkpoint id (default: newest)
        to: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Detect norms and migration status for a directory
    Norms {
        /// Directory relative to the project root ("." for the whole project)
        directory: String,

        /// Consecutive clean checkpoints required for a norm
        #[arg(long, value_parser = parse_positive)]
        lookback: Option<usize>,

        /// Only consider the most recent N checkpoints
        #[arg(long, value_parser = parse_positive)]
        limit: Option<usize>,

        /// Persist the summary under <output>/norms/
        #[arg(long)]
        write: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Resolved settings and the store every command works against
pub(crate) struct Workspace {
    pub settings: Settings,
    pub output: PathBuf,
    pub store: CheckpointStore,
}

impl Workspace {
    fn open(project: &Path, output: Option<&Path>) -> Result<Self> {
        let root = project
            .canonicalize()
            .with_context(|| format!("Path does not exist: {}", project.display()))?;
        let settings = load_settings(&root);

        let output = match output {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => root.join(dir),
            None => settings.output_location(&root),
        };
        let project_root = settings
            .project_root
            .clone()
            .unwrap_or_else(|| root.display().to_string());
        let blobs = FsBlobStore::new(&output);
        debug!(
            "Using {} checkpoint store at {}",
            blobs.name(),
            blobs.root().display()
        );

        let store = CheckpointStore::new(
            Arc::new(blobs),
            PathBuf::new(),
            Arc::new(SystemClock),
        )
        .with_project_root(project_root);

        Ok(Self {
            settings,
            output,
            store,
        })
    }
}

pub fn run(cli: Cli) -> Result<()> {
    let workspace = Workspace::open(&cli.project, cli.output.as_deref())?;

    match cli.command {
        Commands::Record {
            input,
            session,
            source,
            json,
        } => record::run(&workspace, &input, session, source, json),

        Commands::History {
            limit,
            offset,
            json,
        } => history::run(&workspace, limit, offset, json),

        Commands::Show { id, json } => history::show(&workspace, &id, json),

        Commands::Diff { from, to, json } => diff::run(&workspace, from, to, json),

        Commands::Norms {
            directory,
            lookback,
            limit,
            write,
            json,
        } => norms::run(&workspace, &directory, lookback, limit, write, json),
    }
}

/// Print any serializable value as pretty JSON on stdout
fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to encode JSON output")?
    );
    Ok(())
}

fn severity_label(severity: Severity) -> String {
    match severity {
        Severity::Error => style("error").red().bold().to_string(),
        Severity::Warning => style("warning").yellow().to_string(),
        Severity::Info => style("info").cyan().to_string(),
    }
}

/// Signed change, green when going down
fn delta_label(delta: i64) -> String {
    match delta {
        d if d < 0 => style(format!("{d}")).green().to_string(),
        d if d > 0 => style(format!("+{d}")).red().to_string(),
        _ => style("0").dim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_positive() {
        assert_eq!(parse_positive("3"), Ok(3));
        assert!(parse_positive("0").is_err());
        assert!(parse_positive("x").is_err());
    }

    #[test]
    fn test_cli_parses_norms() {
        let cli = Cli::try_parse_from([
            "normscope",
            "--output",
            "audit",
            "norms",
            "src/legacy",
            "--lookback",
            "3",
            "--write",
        ])
        .unwrap();
        assert_eq!(cli.output, Some(PathBuf::from("audit")));
        match cli.command {
            Commands::Norms {
                directory,
                lookback,
                limit,
                write,
                json,
            } => {
                assert_eq!(directory, "src/legacy");
                assert_eq!(lookback, Some(3));
                assert_eq!(limit, None);
                assert!(write);
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_source_requires_session() {
        assert!(Cli::try_parse_from(["normscope", "record", "v.json", "--source", "ci"]).is_err());
        assert!(Cli::try_parse_from([
            "normscope", "record", "v.json", "--session", "s1", "--source", "ci"
        ])
        .is_ok());
    }

    #[test]
    fn test_zero_lookback_rejected() {
        assert!(Cli::try_parse_from(["normscope", "norms", "src", "--lookback", "0"]).is_err());
    }

    #[test]
    fn test_delta_label() {
        console::set_colors_enabled(false);
        assert_eq!(delta_label(-3), "-3");
        assert_eq!(delta_label(2), "+2");
        assert_eq!(delta_label(0), "0");
    }
}
