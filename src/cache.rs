//! Content-addressed artifact cache.
//!
//! Artifacts are keyed by the SHA-256 of a source file's bytes plus the
//! embedding model identifier, so editing the file or switching models
//! naturally produces a different key. Old entries are never deleted; they
//! simply stop being looked up.
//!
//! Reads distinguish a clean miss from a corrupted artifact
//! ([`CacheLookup`]). Writes are best-effort: failures are logged and
//! swallowed so caching never blocks indexing.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Read block size when hashing file contents.
const HASH_BLOCK_SIZE: usize = 8192;

/// Extension of persisted artifacts.
const ARTIFACT_EXT: &str = "json";

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Hit(T),
    Miss,
    /// An artifact exists under the key but could not be read back.
    Corrupted(String),
}

impl<T> CacheLookup<T> {
    /// Collapse into an `Option`, treating corruption as a miss.
    pub fn into_option(self) -> Option<T> {
        match self {
            CacheLookup::Hit(v) => Some(v),
            CacheLookup::Miss | CacheLookup::Corrupted(_) => None,
        }
    }
}

pub struct DocumentCache {
    root: PathBuf,
}

impl DocumentCache {
    /// Open (and create if needed) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create cache directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Derive the artifact file name for `file` under `model`.
    pub fn key_for(&self, file: &Path, model: &str) -> Result<String> {
        let digest = hash_file(file)?;
        Ok(format!(
            "{}_{}.{}",
            digest,
            sanitize_model_id(model),
            ARTIFACT_EXT
        ))
    }

    /// Look up the artifact for `file` + `model`.
    ///
    /// Errors only when the source file itself cannot be hashed.
    pub fn lookup<T: DeserializeOwned>(&self, file: &Path, model: &str) -> Result<CacheLookup<T>> {
        let key = self.key_for(file, model)?;
        let artifact = self.root.join(&key);

        if !artifact.exists() {
            debug!(key = %key, "cache miss");
            return Ok(CacheLookup::Miss);
        }

        let bytes = match std::fs::read(&artifact) {
            Ok(bytes) => bytes,
            Err(e) => return Ok(CacheLookup::Corrupted(e.to_string())),
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                debug!(key = %key, "cache hit");
                Ok(CacheLookup::Hit(value))
            }
            Err(e) => Ok(CacheLookup::Corrupted(e.to_string())),
        }
    }

    /// Like [`lookup`](Self::lookup), but every failure is logged and
    /// reported as absent.
    pub fn get<T: DeserializeOwned>(&self, file: &Path, model: &str) -> Option<T> {
        match self.lookup(file, model) {
            Ok(CacheLookup::Corrupted(reason)) => {
                warn!(
                    file = %file.display(),
                    "could not read cache entry, it may be corrupted: {}",
                    reason
                );
                None
            }
            Ok(lookup) => lookup.into_option(),
            Err(e) => {
                warn!(file = %file.display(), "cache lookup failed: {:#}", e);
                None
            }
        }
    }

    /// Persist `payload` for `file` + `model`. Never fails the caller.
    pub fn set<T: Serialize>(&self, file: &Path, model: &str, payload: &T) {
        if let Err(e) = self.try_set(file, model, payload) {
            warn!(file = %file.display(), "could not write cache entry: {:#}", e);
        }
    }

    fn try_set<T: Serialize>(&self, file: &Path, model: &str, payload: &T) -> Result<()> {
        let key = self.key_for(file, model)?;
        let bytes = serde_json::to_vec(payload).context("Failed to serialize cache payload")?;

        // Write beside the target then rename so readers never see a torn file.
        let tmp = self.root.join(format!("{}.tmp", key));
        {
            let mut out = File::create(&tmp)
                .with_context(|| format!("Failed to create {}", tmp.display()))?;
            out.write_all(&bytes)?;
            out.sync_all()?;
        }
        std::fs::rename(&tmp, self.root.join(&key))
            .with_context(|| format!("Failed to move cache entry into place: {}", key))?;
        debug!(key = %key, bytes = bytes.len(), "cache entry written");
        Ok(())
    }
}

/// Stream the file through SHA-256 and return the lowercase hex digest.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_BLOCK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Replace characters that are not safe in file names (`:` in Ollama tags,
/// path separators, ...) with `_`.
pub fn sanitize_model_id(model: &str) -> String {
    model
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | '<' | '>' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
