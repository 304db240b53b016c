//! normscope - longitudinal migration audit engine
//!
//! Raw rule violations are normalized into compact [`findings::FindingsGroup`]s,
//! persisted as immutable, monotonically versioned checkpoints by
//! [`checkpoint::CheckpointStore`], and replayed by [`norms`] to find which
//! rules have become established conventions in which directories.

pub mod checkpoint;
pub mod cli;
pub mod clock;
pub mod config;
pub mod findings;
pub mod models;
pub mod norms;
pub mod storage;
