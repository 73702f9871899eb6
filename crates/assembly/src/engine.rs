use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::checksum::calculate_file_checksum;
use crate::merge::merge_session;
use crate::reaper::reap_staging;
use crate::staging::StagingArea;
use crate::types::{Accepted, DigestAlgorithm, MergeOutcome, ReapReport};
use crate::validation::{validate_chunk_position, validate_destination_name};
use crate::{AssemblyError, COPY_BUFFER_SIZE, DEFAULT_RETENTION};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root for staged chunks and merge claims.
    pub staging_dir: PathBuf,
    /// Root for published artifacts. Must not overlap `staging_dir`.
    pub upload_dir: PathBuf,
    /// Age after which untouched staging entries are reaped.
    pub retention: Duration,
    /// Digest reported for published artifacts.
    pub digest: DigestAlgorithm,
}

impl EngineConfig {
    /// Creates a config with the default retention and digest.
    pub fn new(staging_dir: impl Into<PathBuf>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            upload_dir: upload_dir.into(),
            retention: DEFAULT_RETENTION,
            digest: DigestAlgorithm::default(),
        }
    }
}

/// Chunk assembly engine.
///
/// Cheap to clone and safe to share between threads. Holds no mutable
/// state: every decision is taken against the filesystem, so independent
/// engines (or processes) over the same roots cooperate correctly.
#[derive(Debug, Clone)]
pub struct AssemblyEngine {
    staging: StagingArea,
    upload_dir: PathBuf,
    retention: Duration,
    digest: DigestAlgorithm,
}

impl AssemblyEngine {
    /// Creates an engine. Fails if the staging and upload roots overlap.
    pub fn new(config: EngineConfig) -> Result<Self, AssemblyError> {
        let staging = resolve(&config.staging_dir);
        let uploads = resolve(&config.upload_dir);
        if staging.starts_with(&uploads) || uploads.starts_with(&staging) {
            return Err(AssemblyError::Config(format!(
                "staging dir {} and upload dir {} must not overlap",
                config.staging_dir.display(),
                config.upload_dir.display()
            )));
        }

        Ok(Self {
            staging: StagingArea::new(config.staging_dir),
            upload_dir: config.upload_dir,
            retention: config.retention,
            digest: config.digest,
        })
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Stages one chunk and merges the session if it is now complete.
    ///
    /// Returns [`Accepted`] once the chunk is durably staged, whatever the
    /// merge outcome. Argument errors are reported before anything touches
    /// the filesystem.
    pub fn receive_chunk(
        &self,
        destination: &str,
        index: u32,
        total_count: u32,
        payload: impl Read,
    ) -> Result<Accepted, AssemblyError> {
        validate_destination_name(destination)?;
        validate_chunk_position(index, total_count)?;

        let mut payload = BufReader::with_capacity(COPY_BUFFER_SIZE, payload);
        match payload.fill_buf() {
            Ok([]) => {
                return Err(AssemblyError::InvalidArgument(
                    "chunk payload is empty".into(),
                ));
            }
            Ok(_) => {}
            Err(e) => {
                return Err(AssemblyError::InvalidArgument(format!(
                    "chunk payload unreadable: {e}"
                )));
            }
        }

        self.ensure_roots()?;

        if let Err(e) = self.reap() {
            warn!(error = %e, "opportunistic reap failed");
        }

        let bytes = self.staging.stage(destination, index, payload)?;

        let missing = self.staging.first_missing(destination, total_count)?;
        if let Some(missing) = missing {
            debug!(destination, index, total_count, missing, "assembly pending");
            return Ok(Accepted { bytes, merge: None });
        }

        let outcome = merge_session(&self.staging, &self.upload_dir, destination, total_count);
        Ok(Accepted {
            bytes,
            merge: Some(outcome),
        })
    }

    /// Merges the session for `destination` if its artifact does not exist yet.
    pub fn merge(&self, destination: &str, total_count: u32) -> Result<MergeOutcome, AssemblyError> {
        validate_destination_name(destination)?;
        validate_chunk_position(0, total_count)?;
        self.ensure_roots()?;
        Ok(merge_session(
            &self.staging,
            &self.upload_dir,
            destination,
            total_count,
        ))
    }

    /// Returns `true` if every chunk of the session is confirmed.
    pub fn is_complete(&self, destination: &str, total_count: u32) -> Result<bool, AssemblyError> {
        validate_destination_name(destination)?;
        Ok(self.staging.is_complete(destination, total_count)?)
    }

    /// Removes staging entries older than the retention window.
    pub fn reap(&self) -> Result<ReapReport, AssemblyError> {
        reap_staging(self.staging.root(), self.retention, SystemTime::now())
    }

    /// Path at which the artifact for `destination` is published.
    pub fn artifact_path(&self, destination: &str) -> Result<PathBuf, AssemblyError> {
        validate_destination_name(destination)?;
        Ok(self.upload_dir.join(destination))
    }

    /// Returns `true` if the artifact for `destination` has been published.
    pub fn artifact_exists(&self, destination: &str) -> Result<bool, AssemblyError> {
        Ok(self.artifact_path(destination)?.try_exists()?)
    }

    /// Hex digest of the published artifact, or `None` if there is none.
    ///
    /// Artifacts only appear through an atomic publish, so this never hashes
    /// a partially merged file.
    pub fn artifact_digest(&self, destination: &str) -> Result<Option<String>, AssemblyError> {
        let path = self.artifact_path(destination)?;
        match calculate_file_checksum(self.digest, &path) {
            Ok(digest) => Ok(Some(digest)),
            Err(AssemblyError::Storage(e)) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn ensure_roots(&self) -> Result<(), AssemblyError> {
        self.staging.ensure()?;
        std::fs::create_dir_all(&self.upload_dir)?;
        Ok(())
    }
}

/// Resolves `path` the way the filesystem will: symlinks in the longest
/// existing ancestor are followed, and `.`/`..` in the rest are applied
/// lexically. Roots need not exist yet.
fn resolve(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let components: Vec<Component<'_>> = absolute.components().collect();

    for split in (1..=components.len()).rev() {
        let prefix: PathBuf = components[..split].iter().collect();
        if let Ok(mut resolved) = prefix.canonicalize() {
            push_lexically(&mut resolved, &components[split..]);
            return resolved;
        }
    }

    let mut resolved = PathBuf::new();
    push_lexically(&mut resolved, &components);
    resolved
}

fn push_lexically(base: &mut PathBuf, components: &[Component<'_>]) {
    for component in components {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                base.pop();
            }
            other => base.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum_bytes;
    use std::fs::File;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> AssemblyEngine {
        AssemblyEngine::new(EngineConfig::new(
            dir.path().join("staging"),
            dir.path().join("uploads"),
        ))
        .unwrap()
    }

    fn staged_count(engine: &AssemblyEngine) -> usize {
        std::fs::read_dir(engine.staging().root()).unwrap().count()
    }

    #[test]
    fn rejects_overlapping_roots() {
        let dir = TempDir::new().unwrap();
        let same = EngineConfig::new(dir.path(), dir.path());
        assert!(matches!(
            AssemblyEngine::new(same),
            Err(AssemblyError::Config(_))
        ));

        let nested = EngineConfig::new(dir.path().join("uploads/staging"), dir.path().join("uploads"));
        assert!(matches!(
            AssemblyEngine::new(nested),
            Err(AssemblyError::Config(_))
        ));
    }

    #[test]
    fn rejects_roots_overlapping_through_parent_components() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::new(
            dir.path().join("x").join("..").join("u").join("staging"),
            dir.path().join("u"),
        );
        assert!(matches!(
            AssemblyEngine::new(config),
            Err(AssemblyError::Config(_))
        ));

        // Same layout with the directories already present.
        std::fs::create_dir_all(dir.path().join("x")).unwrap();
        std::fs::create_dir_all(dir.path().join("u").join("staging")).unwrap();
        let config = EngineConfig::new(
            dir.path().join("x").join("..").join("u").join("staging"),
            dir.path().join("u"),
        );
        assert!(matches!(
            AssemblyEngine::new(config),
            Err(AssemblyError::Config(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_roots_overlapping_through_symlink() {
        let dir = TempDir::new().unwrap();
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        std::os::unix::fs::symlink(&uploads, dir.path().join("alias")).unwrap();

        let config = EngineConfig::new(dir.path().join("alias").join("staging"), &uploads);
        assert!(matches!(
            AssemblyEngine::new(config),
            Err(AssemblyError::Config(_))
        ));
    }

    #[test]
    fn sibling_roots_with_shared_prefix_are_fine() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::new(dir.path().join("up"), dir.path().join("uploads"));
        assert!(AssemblyEngine::new(config).is_ok());
    }

    #[test]
    fn invalid_arguments_have_no_side_effects() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        let cases: [(&str, u32, u32, &[u8]); 5] = [
            ("f.txt", 3, 3, b"x"),
            ("f.txt", 0, 0, b"x"),
            ("", 0, 1, b"x"),
            ("../f.txt", 0, 1, b"x"),
            ("f.txt", 0, 1, b""),
        ];
        for (name, index, total, payload) in cases {
            let result = engine.receive_chunk(name, index, total, payload);
            assert!(
                matches!(result, Err(AssemblyError::InvalidArgument(_))),
                "{name} {index}/{total}"
            );
        }
        assert!(!engine.staging().root().exists());
        assert!(!engine.upload_dir().exists());
    }

    #[test]
    fn out_of_order_arrival_merges_by_index() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        let first = engine.receive_chunk("testo.txt", 1, 3, &b"AAA"[..]).unwrap();
        assert_eq!(first.merge, None);
        let second = engine.receive_chunk("testo.txt", 2, 3, &b"BBB"[..]).unwrap();
        assert_eq!(second.merge, None);
        assert!(!engine.artifact_exists("testo.txt").unwrap());

        let last = engine.receive_chunk("testo.txt", 0, 3, &b"CCC"[..]).unwrap();
        assert_eq!(last.bytes, 3);
        assert_eq!(last.merge, Some(MergeOutcome::Merged { bytes: 9 }));

        let artifact = engine.artifact_path("testo.txt").unwrap();
        assert_eq!(std::fs::read(artifact).unwrap(), b"CCCAAABBB");
        assert_eq!(staged_count(&engine), 0);
    }

    #[test]
    fn every_arrival_order_gives_same_artifact() {
        let payloads: [&[u8]; 3] = [b"zero-", b"one-", b"two"];
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        for order in orders {
            let dir = TempDir::new().unwrap();
            let engine = engine(&dir);
            for index in order {
                engine
                    .receive_chunk("perm.txt", index, 3, payloads[index as usize])
                    .unwrap();
            }
            let artifact = std::fs::read(engine.artifact_path("perm.txt").unwrap()).unwrap();
            assert_eq!(artifact, b"zero-one-two", "order {order:?}");
        }
    }

    #[test]
    fn single_chunk_session_merges_immediately() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        let accepted = engine.receive_chunk("one.png", 0, 1, &b"\x89PNG"[..]).unwrap();
        assert!(accepted.merged());
        assert!(engine.artifact_exists("one.png").unwrap());
    }

    #[test]
    fn retried_chunk_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        engine.receive_chunk("f.txt", 0, 2, &b"old"[..]).unwrap();
        engine.receive_chunk("f.txt", 0, 2, &b"new"[..]).unwrap();
        engine.receive_chunk("f.txt", 1, 2, &b"!"[..]).unwrap();

        let artifact = std::fs::read(engine.artifact_path("f.txt").unwrap()).unwrap();
        assert_eq!(artifact, b"new!");
    }

    #[test]
    fn resending_full_set_after_merge_is_noop() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        engine.receive_chunk("f.txt", 0, 2, &b"ab"[..]).unwrap();
        engine.receive_chunk("f.txt", 1, 2, &b"cd"[..]).unwrap();

        engine.receive_chunk("f.txt", 0, 2, &b"XX"[..]).unwrap();
        let again = engine.receive_chunk("f.txt", 1, 2, &b"YY"[..]).unwrap();
        assert_eq!(again.merge, Some(MergeOutcome::AlreadyDone));

        let artifact = std::fs::read(engine.artifact_path("f.txt").unwrap()).unwrap();
        assert_eq!(artifact, b"abcd");
    }

    #[test]
    fn merge_requires_complete_session() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        engine.receive_chunk("f.txt", 0, 2, &b"a"[..]).unwrap();
        assert!(!engine.is_complete("f.txt", 2).unwrap());
        assert!(matches!(
            engine.merge("f.txt", 2).unwrap(),
            MergeOutcome::Failed { .. }
        ));
        assert!(!engine.artifact_exists("f.txt").unwrap());
    }

    #[test]
    fn digest_of_published_artifact() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        assert_eq!(engine.artifact_digest("f.txt").unwrap(), None);

        engine.receive_chunk("f.txt", 0, 2, &b"hello "[..]).unwrap();
        assert_eq!(engine.artifact_digest("f.txt").unwrap(), None);

        engine.receive_chunk("f.txt", 1, 2, &b"world"[..]).unwrap();
        assert_eq!(
            engine.artifact_digest("f.txt").unwrap(),
            Some(checksum_bytes(DigestAlgorithm::Md5, b"hello world"))
        );
    }

    #[test]
    fn digest_uses_configured_algorithm() {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::new(dir.path().join("s"), dir.path().join("u"));
        config.digest = DigestAlgorithm::Sha256;
        let engine = AssemblyEngine::new(config).unwrap();

        engine.receive_chunk("f.txt", 0, 1, &b"abc"[..]).unwrap();
        let digest = engine.artifact_digest("f.txt").unwrap().unwrap();
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, checksum_bytes(DigestAlgorithm::Sha256, b"abc"));
    }

    #[test]
    fn digest_rejects_invalid_name() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        assert!(matches!(
            engine.artifact_digest("../etc/passwd"),
            Err(AssemblyError::InvalidArgument(_))
        ));
    }

    #[test]
    fn receive_reaps_stale_entries_of_other_sessions() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        engine.receive_chunk("abandoned.txt", 0, 2, &b"a"[..]).unwrap();
        let stale = File::options()
            .write(true)
            .open(engine.staging().slot_path("abandoned.txt", 0))
            .unwrap();
        stale
            .set_modified(SystemTime::now() - 2 * DEFAULT_RETENTION)
            .unwrap();
        drop(stale);

        engine.receive_chunk("other.txt", 0, 2, &b"b"[..]).unwrap();

        assert!(!engine.staging().is_confirmed("abandoned.txt", 0).unwrap());
        assert!(engine.staging().is_confirmed("other.txt", 0).unwrap());
    }

    #[test]
    fn overlong_destination_is_invalid_argument() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        let long = format!("{}.txt", "a".repeat(226));
        assert!(matches!(
            engine.receive_chunk(&long, 0, 1, &b"x"[..]),
            Err(AssemblyError::InvalidArgument(_))
        ));
        assert!(!engine.staging().root().exists());

        let longest = format!("{}.txt", "b".repeat(crate::MAX_DESTINATION_LEN - 4));
        let accepted = engine.receive_chunk(&longest, 0, 2, &b"x"[..]).unwrap();
        assert_eq!(accepted.merge, None);
        let accepted = engine.receive_chunk(&longest, 1, 2, &b"y"[..]).unwrap();
        assert!(accepted.merged());
        assert_eq!(std::fs::read(engine.artifact_path(&longest).unwrap()).unwrap(), b"xy");
    }
}
