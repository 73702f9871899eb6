use std::io::Read;
use std::path::Path;

use md5::Md5;
use sha2::{Digest, Sha256};

use crate::types::DigestAlgorithm;
use crate::{AssemblyError, COPY_BUFFER_SIZE};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes the digest of `data` and returns it hex-encoded.
pub fn checksum_bytes(algorithm: DigestAlgorithm, data: &[u8]) -> String {
    match algorithm {
        DigestAlgorithm::Md5 => hex::encode(Md5::digest(data)),
        DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
    }
}

/// Computes the digest of an entire file and returns it hex-encoded.
pub fn calculate_file_checksum(
    algorithm: DigestAlgorithm,
    path: &Path,
) -> Result<String, AssemblyError> {
    let file = std::fs::File::open(path)?;
    match algorithm {
        DigestAlgorithm::Md5 => stream_digest::<Md5>(file),
        DigestAlgorithm::Sha256 => stream_digest::<Sha256>(file),
    }
}

fn stream_digest<D: Digest>(mut reader: impl Read) -> Result<String, AssemblyError> {
    let mut hasher = D::new();
    let mut buf = [0u8; COPY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
