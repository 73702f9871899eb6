//! Staging area for chunks that have not been merged yet.
//!
//! Layout inside the staging root:
//!
//! | Entry | Meaning |
//! |-------|---------|
//! | `{dest}.{index}.{uuid}.part` | payload still being written, never trusted |
//! | `{dest}.{index}.chunk` | confirmed payload for one slot |
//! | `{dest}.merge` | merge claim, holds the artifact while it is built |
//!
//! A `.part` file only becomes a `.chunk` through `rename`, so a slot path
//! always holds a complete payload.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::AssemblyError;

const PART_SUFFIX: &str = ".part";
const CHUNK_SUFFIX: &str = ".chunk";
const CLAIM_SUFFIX: &str = ".merge";

/// A staging entry recognised by its file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedEntry {
    /// In-flight write for a slot.
    Part { destination: String, index: u32 },
    /// Confirmed slot.
    Chunk { destination: String, index: u32 },
    /// Merge claim for a destination.
    Claim { destination: String },
}

impl StagedEntry {
    /// Parses a staging file name. Returns `None` for foreign files.
    pub fn parse(file_name: &str) -> Option<Self> {
        if let Some(rest) = file_name.strip_suffix(CHUNK_SUFFIX) {
            let (destination, index) = split_index(rest)?;
            return Some(Self::Chunk { destination, index });
        }

        if let Some(rest) = file_name.strip_suffix(PART_SUFFIX) {
            let (rest, nonce) = rest.rsplit_once('.')?;
            Uuid::parse_str(nonce).ok()?;
            let (destination, index) = split_index(rest)?;
            return Some(Self::Part { destination, index });
        }

        if let Some(destination) = file_name.strip_suffix(CLAIM_SUFFIX) {
            if destination.is_empty() {
                return None;
            }
            return Some(Self::Claim {
                destination: destination.to_string(),
            });
        }

        None
    }

    /// Destination name the entry belongs to.
    pub fn destination(&self) -> &str {
        match self {
            Self::Part { destination, .. }
            | Self::Chunk { destination, .. }
            | Self::Claim { destination } => destination,
        }
    }
}

fn split_index(rest: &str) -> Option<(String, u32)> {
    let (destination, index) = rest.rsplit_once('.')?;
    if destination.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((destination.to_string(), index.parse().ok()?))
}

/// Filename-keyed view over the staging root.
///
/// Holds no state besides the root path; every query goes to the filesystem.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the staging root if needed.
    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    /// Path of the confirmed slot for `(destination, index)`.
    pub fn slot_path(&self, destination: &str, index: u32) -> PathBuf {
        self.root.join(format!("{destination}.{index}{CHUNK_SUFFIX}"))
    }

    /// Path of the merge claim for `destination`.
    pub fn claim_path(&self, destination: &str) -> PathBuf {
        self.root.join(format!("{destination}{CLAIM_SUFFIX}"))
    }

    fn part_path(&self, destination: &str, index: u32) -> PathBuf {
        self.root.join(format!(
            "{destination}.{index}.{}{PART_SUFFIX}",
            Uuid::new_v4()
        ))
    }

    /// Writes `payload` into the slot for `(destination, index)`.
    ///
    /// The payload goes to a private `.part` file first and is renamed onto
    /// the slot only after it was fully written and flushed. A previous
    /// payload in the same slot is replaced. Returns the bytes written.
    pub fn stage(
        &self,
        destination: &str,
        index: u32,
        mut payload: impl Read,
    ) -> Result<u64, AssemblyError> {
        let part = self.part_path(destination, index);

        let written = match write_part(&part, &mut payload) {
            Ok(n) => n,
            Err(e) => {
                discard(&part);
                return Err(e.into());
            }
        };

        if written == 0 {
            discard(&part);
            return Err(AssemblyError::InvalidArgument(
                "chunk payload is empty".into(),
            ));
        }

        let slot = self.slot_path(destination, index);
        if let Err(e) = fs::rename(&part, &slot) {
            discard(&part);
            return Err(e.into());
        }
        sync_dir(&self.root);

        debug!(destination, index, bytes = written, "chunk confirmed");
        Ok(written)
    }

    /// Returns `true` if a confirmed slot exists for `(destination, index)`.
    pub fn is_confirmed(&self, destination: &str, index: u32) -> io::Result<bool> {
        self.slot_path(destination, index).try_exists()
    }

    /// Returns the lowest index in `0..total_count` without a confirmed slot.
    pub fn first_missing(&self, destination: &str, total_count: u32) -> io::Result<Option<u32>> {
        for index in 0..total_count {
            if !self.is_confirmed(destination, index)? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Returns `true` if every slot in `0..total_count` is confirmed.
    pub fn is_complete(&self, destination: &str, total_count: u32) -> io::Result<bool> {
        Ok(self.first_missing(destination, total_count)?.is_none())
    }

    /// Deletes the slots of a session. Best effort: failures are logged.
    ///
    /// Returns the number of slots removed.
    pub fn remove_session(&self, destination: &str, total_count: u32) -> usize {
        let mut removed = 0;
        for index in 0..total_count {
            let slot = self.slot_path(destination, index);
            match fs::remove_file(&slot) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(file = %slot.display(), error = %e, "failed to delete staged chunk");
                }
            }
        }
        removed
    }
}

fn write_part(part: &Path, payload: &mut impl Read) -> io::Result<u64> {
    let mut file = File::options().write(true).create_new(true).open(part)?;
    let written = io::copy(payload, &mut file)?;
    file.sync_all()?;
    Ok(written)
}

/// Flushes directory entries of `dir` so a completed rename or link
/// survives a crash. Platforms that cannot open or sync a directory are
/// skipped.
pub(crate) fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), error = %e, "directory sync skipped");
    }
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(file = %path.display(), error = %e, "failed to remove partial chunk");
        }
    }
}
