use serde::{Deserialize, Serialize};

/// A chunk was durably staged.
///
/// `merge` is only informational: it reports what this call observed when
/// it found the session complete. Whether the artifact exists must be
/// checked independently, since other arrivals race with this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    /// Bytes written for this chunk.
    pub bytes: u64,
    /// `None` while the session still has missing chunks.
    pub merge: Option<MergeOutcome>,
}

impl Accepted {
    /// Returns `true` if this call published the artifact.
    pub fn merged(&self) -> bool {
        matches!(self.merge, Some(MergeOutcome::Merged { .. }))
    }
}

/// Result of a merge attempt for one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// This call built and published the artifact.
    Merged { bytes: u64 },
    /// The artifact exists already, or another merger holds the claim.
    AlreadyDone,
    /// Merging failed before publish; nothing was published.
    Failed { reason: String },
}

/// Counts of staging entries removed by one reaper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub parts: usize,
    pub chunks: usize,
    pub claims: usize,
}

impl ReapReport {
    /// Total entries removed.
    pub fn total(&self) -> usize {
        self.parts + self.chunks + self.claims
    }
}

/// Content digest used for published artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// MD5, lowercase hex (32 chars).
    #[default]
    Md5,
    /// SHA-256, lowercase hex (64 chars).
    Sha256,
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5 => f.write_str("md5"),
            Self::Sha256 => f.write_str("sha256"),
        }
    }
}
