//! Configuration module for normscope
//!
//! Project-level settings (`normscope.toml` / `.normscoperc.json`) and the
//! defaults used when none are present.

mod settings;

pub use settings::{load_settings, Settings, DEFAULT_OUTPUT_DIR};
