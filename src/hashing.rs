//! Content fingerprinting used as the deduplication key.
//!
//! Every file is identified by the SHA-256 digest of its exact bytes. The digest is computed
//! by streaming the input in fixed-size chunks so large documents never need to be resident
//! twice, and the result is independent of how the underlying reader splits its reads.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of each read issued while hashing a stream.
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Lowercase hex SHA-256 digest of a file's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Wrap an existing hex digest, rejecting anything that is not 64 lowercase hex characters.
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        let valid = trimmed.len() == 64
            && trimmed
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        valid.then(|| Self(trimmed.to_string()))
    }

    /// Borrow the hex representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..16]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Fingerprint an async byte stream, reading at most [`HASH_CHUNK_SIZE`] bytes at a time.
///
/// Returns the digest together with the number of bytes consumed.
pub async fn fingerprint<R>(mut reader: R) -> std::io::Result<(ContentHash, u64)>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; HASH_CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    Ok((ContentHash(hex::encode(hasher.finalize())), total))
}

/// Fingerprint an in-memory buffer.
pub fn fingerprint_bytes(bytes: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    for chunk in bytes.chunks(HASH_CHUNK_SIZE) {
        hasher.update(chunk);
    }
    ContentHash(hex::encode(hasher.finalize()))
}
