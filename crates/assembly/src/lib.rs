//! Exactly-once assembly of chunked uploads.
//!
//! Chunks of a file arrive independently, in any order and from any number
//! of concurrent callers. Each chunk is staged under the staging root, and
//! once every index of a destination is present the chunks are merged in
//! index order into a single artifact under the upload root.
//!
//! All coordination goes through filesystem primitives (atomic rename,
//! exclusive create, no-clobber hard links), so several engines in separate
//! processes can share the same roots.

mod checksum;
mod engine;
mod merge;
mod reaper;
mod staging;
mod types;
mod validation;

pub use checksum::{calculate_file_checksum, checksum_bytes};
pub use engine::{AssemblyEngine, EngineConfig};
pub use merge::merge_session;
pub use reaper::reap_staging;
pub use staging::{StagedEntry, StagingArea};
pub use types::{Accepted, DigestAlgorithm, MergeOutcome, ReapReport};
pub use validation::{MAX_DESTINATION_LEN, validate_chunk_position, validate_destination_name};

use std::time::Duration;

/// How long an untouched staging entry survives before the reaper removes it.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(10 * 60);

/// Buffer size used when streaming payloads and artifacts.
pub const COPY_BUFFER_SIZE: usize = 8192;

/// Errors produced by the assembly engine.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}
