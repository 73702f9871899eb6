//! Removal of abandoned staging entries.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::AssemblyError;
use crate::staging::StagedEntry;
use crate::types::ReapReport;

struct Candidate {
    path: PathBuf,
    entry: StagedEntry,
    age: Duration,
}

/// Deletes staging entries whose last modification is older than `retention`
/// relative to `now`.
///
/// Each chunk is judged on its own age, so a session can lose single chunks;
/// re-uploading such a chunk recreates it. Chunks of a destination that has
/// a fresh merge claim are kept, since a merge is reading them. Stale claims
/// left by a crashed merger are removed.
pub fn reap_staging(
    staging_dir: &Path,
    retention: Duration,
    now: SystemTime,
) -> Result<ReapReport, AssemblyError> {
    let entries = match fs::read_dir(staging_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ReapReport::default()),
        Err(e) => return Err(e.into()),
    };

    let mut candidates = Vec::new();
    for dir_entry in entries {
        let dir_entry = dir_entry?;
        let name = dir_entry.file_name();
        let Some(entry) = name.to_str().and_then(StagedEntry::parse) else {
            continue;
        };
        // Entries can vanish under us (merged or reaped by someone else).
        let Ok(meta) = dir_entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let Ok(modified) = meta.modified() else {
            continue;
        };
        candidates.push(Candidate {
            path: dir_entry.path(),
            entry,
            age: now.duration_since(modified).unwrap_or_default(),
        });
    }

    let merging: HashSet<String> = candidates
        .iter()
        .filter(|c| matches!(c.entry, StagedEntry::Claim { .. }) && c.age <= retention)
        .map(|c| c.entry.destination().to_string())
        .collect();

    let mut report = ReapReport::default();
    for candidate in candidates {
        if candidate.age <= retention {
            continue;
        }
        if matches!(candidate.entry, StagedEntry::Chunk { .. })
            && merging.contains(candidate.entry.destination())
        {
            debug!(file = %candidate.path.display(), "keeping stale chunk of a session being merged");
            continue;
        }

        match fs::remove_file(&candidate.path) {
            Ok(()) => match candidate.entry {
                StagedEntry::Part { .. } => report.parts += 1,
                StagedEntry::Chunk { .. } => report.chunks += 1,
                StagedEntry::Claim { .. } => report.claims += 1,
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(file = %candidate.path.display(), error = %e, "failed to reap staging entry");
            }
        }
    }

    if report.total() > 0 {
        info!(
            parts = report.parts,
            chunks = report.chunks,
            claims = report.claims,
            "reaped stale staging entries"
        );
    }

    Ok(report)
}
