//! Ordered, exactly-once merge of a complete session.
//!
//! The merge claim is created with `create_new`, which fails if it already
//! exists. Whoever holds the claim writes the artifact into it and then
//! publishes it with `hard_link`, which also refuses to replace an existing
//! artifact. The published path therefore only ever holds a complete file.

use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::staging::{StagingArea, sync_dir};
use crate::types::MergeOutcome;

/// Removes the claim file when dropped.
struct ClaimGuard {
    path: PathBuf,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(file = %self.path.display(), error = %e, "failed to release merge claim");
            }
        }
    }
}

/// Merges the staged chunks of `destination` into `upload_dir/destination`.
///
/// Safe to call concurrently from any number of threads or processes; at
/// most one call returns [`MergeOutcome::Merged`] for a destination and the
/// others return [`MergeOutcome::AlreadyDone`]. The name must already be
/// validated.
pub fn merge_session(
    staging: &StagingArea,
    upload_dir: &Path,
    destination: &str,
    total_count: u32,
) -> MergeOutcome {
    let artifact = upload_dir.join(destination);

    match artifact.try_exists() {
        Ok(true) => {
            debug!(destination, "artifact already exists, skipping merge");
            return MergeOutcome::AlreadyDone;
        }
        Ok(false) => {}
        Err(e) => return failed(destination, "checking artifact", e),
    }

    let claim_path = staging.claim_path(destination);
    let mut claim = match File::options()
        .write(true)
        .create_new(true)
        .open(&claim_path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            debug!(destination, "merge already claimed by another caller");
            return MergeOutcome::AlreadyDone;
        }
        Err(e) => return failed(destination, "creating merge claim", e),
    };
    let _guard = ClaimGuard {
        path: claim_path.clone(),
    };

    // A previous winner may have published and released its claim between
    // the first check and our create.
    match artifact.try_exists() {
        Ok(true) => {
            debug!(destination, "artifact published while claiming, skipping merge");
            return MergeOutcome::AlreadyDone;
        }
        Ok(false) => {}
        Err(e) => return failed(destination, "checking artifact", e),
    }

    let mut bytes = 0u64;
    for index in 0..total_count {
        let slot = staging.slot_path(destination, index);
        let appended = File::open(&slot).and_then(|mut chunk| io::copy(&mut chunk, &mut claim));
        match appended {
            Ok(n) => bytes += n,
            Err(e) => return failed(destination, &format!("appending chunk {index}"), e),
        }
    }
    if let Err(e) = claim.sync_all() {
        return failed(destination, "flushing artifact", e);
    }
    drop(claim);

    match publish(&claim_path, &artifact) {
        Ok(true) => {}
        Ok(false) => {
            debug!(destination, "artifact published by another caller");
            return MergeOutcome::AlreadyDone;
        }
        Err(e) => return failed(destination, "publishing artifact", e),
    }
    sync_dir(upload_dir);

    let removed = staging.remove_session(destination, total_count);
    info!(
        destination,
        chunks = total_count,
        bytes,
        removed,
        "artifact assembled"
    );
    MergeOutcome::Merged { bytes }
}

/// Publishes the finished claim at `artifact` without replacing an existing
/// file. Returns `Ok(false)` if the artifact already exists.
fn publish(claim: &Path, artifact: &Path) -> io::Result<bool> {
    match fs::hard_link(claim, artifact) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => {
            // No hard links on this filesystem. The claim is still held, so
            // nobody else can publish until it is released.
            debug!(error = %e, "hard link unavailable, publishing by rename");
            fs::rename(claim, artifact)?;
            Ok(true)
        }
    }
}

fn failed(destination: &str, stage: &str, e: io::Error) -> MergeOutcome {
    error!(
        destination,
        stage,
        error = %e,
        "merge failed, nothing published; chunks stay staged for a retry"
    );
    MergeOutcome::Failed {
        reason: format!("{stage}: {e}"),
    }
}
