//! Content hashing.
//!
//! Files at or below [`Hasher::whole_read_threshold`] are read in one call;
//! larger files are streamed through the digest in fixed-size blocks so
//! memory stays bounded. The cancellation token is polled after every block.
//!
//! Digests are returned as lower-case hex strings, which is also the form
//! stored in the hash cache.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::Digest;

use crate::signal::CancelToken;

/// Default streaming block size (1 MiB).
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Default size up to which a file is read in one call (4 MiB).
pub const DEFAULT_WHOLE_READ_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Content digest algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-1 (160 bits).
    #[default]
    Sha1,
    /// SHA-256.
    Sha256,
    /// BLAKE3 (256-bit output).
    Blake3,
}

impl HashAlgorithm {
    /// Name used in cache file names and config files.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }

    /// Length of the hex digest.
    #[must_use]
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha1 => 40,
            Self::Sha256 | Self::Blake3 => 64,
        }
    }

    fn digester(self) -> Digester {
        match self {
            Self::Sha1 => Digester::Sha1(sha1::Sha1::new()),
            Self::Sha256 => Digester::Sha256(sha2::Sha256::new()),
            Self::Blake3 => Digester::Blake3(Box::new(blake3::Hasher::new())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(format!("unknown hash algorithm '{other}'")),
        }
    }
}

enum Digester {
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Digester {
    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Sha1(h) => to_hex(&h.finalize()),
            Self::Sha256(h) => to_hex(&h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Errors that can occur during file hashing.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The file could not be opened or read.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// File being hashed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Cancellation was observed between blocks.
    #[error("Hashing cancelled: {0}")]
    Cancelled(PathBuf),
}

/// File hasher with a fixed algorithm and read strategy.
#[derive(Debug, Clone)]
pub struct Hasher {
    algorithm: HashAlgorithm,
    block_size: usize,
    whole_read_threshold: u64,
    cancel: CancelToken,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new(HashAlgorithm::default())
    }
}

impl Hasher {
    /// Create a hasher with default block size and threshold.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            block_size: DEFAULT_BLOCK_SIZE,
            whole_read_threshold: DEFAULT_WHOLE_READ_THRESHOLD,
            cancel: CancelToken::new(),
        }
    }

    /// Set the streaming block size (minimum 4 KiB).
    #[must_use]
    pub fn with_block_size(mut self, size: usize) -> Self {
        self.block_size = size.max(4096);
        self
    }

    /// Set the size up to which files are read in one call.
    #[must_use]
    pub fn with_whole_read_threshold(mut self, threshold: u64) -> Self {
        self.whole_read_threshold = threshold;
        self
    }

    /// Use `token` for cancellation.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Digest algorithm in use.
    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Size up to which files are read in one call.
    #[must_use]
    pub fn whole_read_threshold(&self) -> u64 {
        self.whole_read_threshold
    }

    /// Hash the file at `path`, whose size is expected to be `size`.
    ///
    /// `size` only selects the read strategy; the digest always covers the
    /// bytes actually read.
    ///
    /// # Errors
    ///
    /// - [`HashError::Io`] if the file cannot be opened or read
    /// - [`HashError::Cancelled`] if the token fires mid-file
    pub fn hash_file(&self, path: &Path, size: u64) -> Result<String, HashError> {
        let io_err = |source| HashError::Io {
            path: path.to_path_buf(),
            source,
        };

        if size <= self.whole_read_threshold {
            let data = std::fs::read(path).map_err(io_err)?;
            let mut digester = self.algorithm.digester();
            digester.update(&data);
            return Ok(digester.finalize_hex());
        }

        let mut file = File::open(path).map_err(io_err)?;
        let mut digester = self.algorithm.digester();
        let mut buffer = vec![0u8; self.block_size];
        loop {
            let n = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_err(e)),
            };
            digester.update(&buffer[..n]);
            if self.cancel.is_cancelled() {
                log::debug!("Hashing cancelled mid-file: {}", path.display());
                return Err(HashError::Cancelled(path.to_path_buf()));
            }
        }
        Ok(digester.finalize_hex())
    }

    /// Hash an in-memory buffer.
    #[must_use]
    pub fn hash_bytes(&self, data: &[u8]) -> String {
        let mut digester = self.algorithm.digester();
        digester.update(data);
        digester.finalize_hex()
    }
}
