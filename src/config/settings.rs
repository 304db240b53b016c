//! Project settings
//!
//! Loaded from the project root, TOML preferred:
//!
//! ```toml
//! output_dir = ".normscope"
//! lookback_window = 5
//! checkpoint_limit = 50
//! read_concurrency = 4
//! ```
//!
//! Settings are advisory. A file that cannot be read or parsed is logged and
//! ignored, and nonsensical values fall back to their defaults.

use crate::norms::{
    SummaryOptions, DEFAULT_CHECKPOINT_LIMIT, DEFAULT_LOOKBACK_WINDOW, DEFAULT_READ_CONCURRENCY,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_OUTPUT_DIR: &str = ".normscope";

const TOML_FILE: &str = "normscope.toml";
const JSON_FILE: &str = ".normscoperc.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where checkpoints live, relative to the project root unless absolute
    pub output_dir: PathBuf,
    /// Trailing clean checkpoints required before a rule counts as a norm
    pub lookback_window: usize,
    /// Most recent checkpoints considered by `norms`
    pub checkpoint_limit: usize,
    /// Parallel checkpoint reads
    pub read_concurrency: usize,
    /// Recorded in the manifest instead of the resolved project path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_root: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            lookback_window: DEFAULT_LOOKBACK_WINDOW,
            checkpoint_limit: DEFAULT_CHECKPOINT_LIMIT,
            read_concurrency: DEFAULT_READ_CONCURRENCY,
            project_root: None,
        }
    }
}

impl Settings {
    /// Absolute (or project-relative) checkpoint location
    pub fn output_location(&self, project_root: &Path) -> PathBuf {
        if self.output_dir.is_absolute() {
            self.output_dir.clone()
        } else {
            project_root.join(&self.output_dir)
        }
    }

    pub fn summary_options(&self) -> SummaryOptions {
        SummaryOptions {
            lookback_window: self.lookback_window,
            checkpoint_limit: self.checkpoint_limit,
            read_concurrency: self.read_concurrency,
        }
    }

    /// Replace zero counts with defaults
    fn sanitized(mut self, source: &Path) -> Self {
        let defaults = Settings::default();
        let fields = [
            ("lookback_window", &mut self.lookback_window, defaults.lookback_window),
            ("checkpoint_limit", &mut self.checkpoint_limit, defaults.checkpoint_limit),
            ("read_concurrency", &mut self.read_concurrency, defaults.read_concurrency),
        ];
        for (name, value, default) in fields {
            if *value == 0 {
                warn!(
                    "{} in {} must be at least 1, using {}",
                    name,
                    source.display(),
                    default
                );
                *value = default;
            }
        }
        if self.output_dir.as_os_str().is_empty() {
            self.output_dir = defaults.output_dir;
        }
        self
    }
}

/// Load settings from `normscope.toml` or `.normscoperc.json`, falling back
/// to defaults
pub fn load_settings(repo_path: &Path) -> Settings {
    let toml_path = repo_path.join(TOML_FILE);
    if toml_path.exists() {
        match load_toml_settings(&toml_path) {
            Ok(settings) => {
                debug!("Loaded settings from {}", toml_path.display());
                return settings.sanitized(&toml_path);
            }
            Err(e) => {
                warn!("Failed to load {}: {}", toml_path.display(), e);
            }
        }
    }

    let json_path = repo_path.join(JSON_FILE);
    if json_path.exists() {
        match load_json_settings(&json_path) {
            Ok(settings) => {
                debug!("Loaded settings from {}", json_path.display());
                return settings.sanitized(&json_path);
            }
            Err(e) => {
                warn!("Failed to load {}: {}", json_path.display(), e);
            }
        }
    }

    debug!("No settings file found, using defaults");
    Settings::default()
}

fn load_toml_settings(path: &Path) -> anyhow::Result<Settings> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

fn load_json_settings(path: &Path) -> anyhow::Result<Settings> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let settings = load_settings(dir.path());
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.output_dir, PathBuf::from(".normscope"));
        assert_eq!(settings.summary_options(), SummaryOptions::default());
    }

    #[test]
    fn test_toml_partial_override() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("normscope.toml"),
            "lookback_window = 3\noutput_dir = \"audit\"\n",
        )
        .unwrap();
        let settings = load_settings(dir.path());
        assert_eq!(settings.lookback_window, 3);
        assert_eq!(settings.checkpoint_limit, 50);
        assert_eq!(settings.output_location(dir.path()), dir.path().join("audit"));
    }

    #[test]
    fn test_toml_preferred_over_json() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("normscope.toml"), "checkpoint_limit = 10").unwrap();
        fs::write(
            dir.path().join(".normscoperc.json"),
            r#"{"checkpoint_limit": 20}"#,
        )
        .unwrap();
        assert_eq!(load_settings(dir.path()).checkpoint_limit, 10);
    }

    #[test]
    fn test_broken_toml_falls_through_to_json() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("normscope.toml"), "lookback_window = [").unwrap();
        fs::write(
            dir.path().join(".normscoperc.json"),
            r#"{"read_concurrency": 2, "project_root": "/srv/app"}"#,
        )
        .unwrap();
        let settings = load_settings(dir.path());
        assert_eq!(settings.read_concurrency, 2);
        assert_eq!(settings.project_root.as_deref(), Some("/srv/app"));
    }

    #[test]
    fn test_unparseable_settings_use_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".normscoperc.json"), "not json").unwrap();
        assert_eq!(load_settings(dir.path()), Settings::default());
    }

    #[test]
    fn test_zero_values_replaced() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("normscope.toml"),
            "lookback_window = 0\nread_concurrency = 0\ncheckpoint_limit = 7",
        )
        .unwrap();
        let settings = load_settings(dir.path());
        assert_eq!(settings.lookback_window, 5);
        assert_eq!(settings.read_concurrency, 4);
        assert_eq!(settings.checkpoint_limit, 7);
    }

    #[test]
    fn test_absolute_output_dir() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            output_dir: dir.path().join("elsewhere"),
            ..Settings::default()
        };
        assert_eq!(
            settings.output_location(Path::new("/unused")),
            dir.path().join("elsewhere")
        );
    }
}
