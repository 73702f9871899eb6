//! HTTP front end for the chunk assembly engine.
//!
//! Exposes two endpoints:
//!
//! - `POST /api/upload`: multipart form with `file`, `index` and
//!   `totalCount`; stages one chunk and merges the file once complete.
//! - `GET /api/upload/hash?fileName=`: digest of a fully assembled file.
//!
//! Whether a file has been assembled is only observable through the hash
//! endpoint; upload responses acknowledge the single chunk.

mod error;
mod handler;
mod reaper;
mod server;
mod validation;

pub use error::UploadError;
pub use reaper::spawn_reaper;
pub use server::{ServerConfig, UploadServer};
pub use validation::{check_chunk_position, check_extension, normalize_extensions};

/// Extensions accepted by default.
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".gif", ".png", ".txt"];

/// Default request body limit (one chunk plus form overhead).
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 64 * 1024 * 1024;

/// Errors produced while running the upload server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
