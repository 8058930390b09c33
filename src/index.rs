//! Persisted flat vector index.
//!
//! An index directory holds three files:
//!
//! | File | Contents |
//! |------|----------|
//! | `manifest.json` | [`IndexManifest`]: embedding model, dimensions, documents, chunk settings |
//! | `chunks.json` | the indexed [`Chunk`]s in vector order |
//! | `vectors.bin` | `chunk_count × dims` little-endian `f32`s |
//!
//! The manifest is written last, so a directory without one is treated as
//! an incomplete build. Search is exhaustive cosine similarity, which is
//! plenty for the few thousand chunks a handful of local documents yields.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::chunk::{Chunk, TextSplitter};
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};

/// Suffix of every index directory name.
pub const INDEX_SUFFIX: &str = "_vector_index";

const MANIFEST_FILE: &str = "manifest.json";
const CHUNKS_FILE: &str = "chunks.json";
const VECTORS_FILE: &str = "vectors.bin";

/// Longest multi-document name kept readable before falling back to a hash.
const MAX_INDEX_NAME_BYTES: usize = 120;

/// A chunk together with its embedding. This is also the unit cached per
/// source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub embedding_model: String,
    pub dims: usize,
    pub documents: Vec<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk<'a> {
    pub chunk: &'a Chunk,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct FlatIndex {
    manifest: IndexManifest,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    /// Build an in-memory index. All vectors must share one dimensionality.
    pub fn build(
        embedding_model: &str,
        documents: Vec<String>,
        splitter: &TextSplitter,
        entries: Vec<EmbeddedChunk>,
    ) -> Result<Self> {
        let Some(first) = entries.first() else {
            bail!("cannot build an index with no chunks");
        };
        let dims = first.vector.len();
        if dims == 0 {
            bail!("embedding backend returned empty vectors");
        }
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != dims) {
            bail!(
                "inconsistent embedding dimensions: expected {}, got {} for {} chunk {}",
                dims,
                bad.vector.len(),
                bad.chunk.source,
                bad.chunk.index
            );
        }

        let (chunks, vectors): (Vec<_>, Vec<_>) =
            entries.into_iter().map(|e| (e.chunk, e.vector)).unzip();

        Ok(Self {
            manifest: IndexManifest {
                embedding_model: embedding_model.to_string(),
                dims,
                documents,
                chunk_size: splitter.chunk_size(),
                chunk_overlap: splitter.chunk_overlap(),
                chunk_count: chunks.len(),
                created_at: Utc::now(),
            },
            chunks,
            vectors,
        })
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The `k` chunks most similar to `query`, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk<'_>> {
        let mut scored: Vec<ScoredChunk<'_>> = self
            .chunks
            .iter()
            .zip(self.vectors.iter())
            .map(|(chunk, vector)| ScoredChunk {
                chunk,
                score: cosine_similarity(query, vector),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        scored
    }

    /// Write the index into `dir`, creating it if needed.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create index directory {}", dir.display()))?;

        // A stale manifest would make a half-written directory look complete.
        let manifest_path = dir.join(MANIFEST_FILE);
        if manifest_path.exists() {
            std::fs::remove_file(&manifest_path)?;
        }

        let chunks_json = serde_json::to_vec(&self.chunks)?;
        std::fs::write(dir.join(CHUNKS_FILE), chunks_json)
            .with_context(|| format!("Failed to write {}", CHUNKS_FILE))?;

        let mut blob = Vec::with_capacity(self.vectors.len() * self.manifest.dims * 4);
        for v in &self.vectors {
            blob.extend_from_slice(&vec_to_blob(v));
        }
        std::fs::write(dir.join(VECTORS_FILE), blob)
            .with_context(|| format!("Failed to write {}", VECTORS_FILE))?;

        std::fs::write(&manifest_path, serde_json::to_vec_pretty(&self.manifest)?)
            .with_context(|| format!("Failed to write {}", MANIFEST_FILE))?;
        Ok(())
    }

    /// Read only the manifest of a persisted index.
    pub fn read_manifest(dir: &Path) -> Result<IndexManifest> {
        let path = dir.join(MANIFEST_FILE);
        let bytes = std::fs::read(&path)
            .with_context(|| format!("Index at {} has no readable manifest", dir.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Corrupted index manifest: {}", path.display()))
    }

    /// Load a persisted index from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let manifest = Self::read_manifest(dir)?;

        let chunks: Vec<Chunk> = serde_json::from_slice(
            &std::fs::read(dir.join(CHUNKS_FILE))
                .with_context(|| format!("Failed to read {}", CHUNKS_FILE))?,
        )
        .with_context(|| format!("Corrupted {} in {}", CHUNKS_FILE, dir.display()))?;

        let blob = std::fs::read(dir.join(VECTORS_FILE))
            .with_context(|| format!("Failed to read {}", VECTORS_FILE))?;

        let Some(expected) = manifest
            .chunk_count
            .checked_mul(manifest.dims)
            .and_then(|n| n.checked_mul(4))
        else {
            bail!(
                "Index at {} is inconsistent (manifest size {} × {} overflows)",
                dir.display(),
                manifest.chunk_count,
                manifest.dims
            );
        };
        if chunks.len() != manifest.chunk_count || blob.len() != expected || manifest.dims == 0 {
            bail!(
                "Index at {} is inconsistent ({} chunks, {} vector bytes, manifest says {} × {})",
                dir.display(),
                chunks.len(),
                blob.len(),
                manifest.chunk_count,
                manifest.dims
            );
        }

        let vectors = blob
            .chunks_exact(manifest.dims * 4)
            .map(blob_to_vec)
            .collect();

        Ok(Self {
            manifest,
            chunks,
            vectors,
        })
    }
}

/// True when `dir` is missing or has no entries.
pub fn index_dir_is_empty(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

/// Directory name for the index over `inputs`.
///
/// One document gives `{stem}_vector_index`. Several give their sorted
/// basenames joined with `+`, or a hash of them when that gets too long.
/// The result does not depend on the order of `inputs`.
pub fn index_name_for(inputs: &[PathBuf]) -> String {
    let mut names: Vec<String> = inputs
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .collect();
    names.sort();
    names.dedup();

    let identifier = match names.as_slice() {
        [] => "documents".to_string(),
        [single] => {
            let stem = Path::new(single)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| single.clone());
            sanitize_name(&stem)
        }
        many => {
            let joined = many
                .iter()
                .map(|n| sanitize_name(n))
                .collect::<Vec<_>>()
                .join("+");
            if joined.len() > MAX_INDEX_NAME_BYTES {
                let digest = Sha256::digest(many.join("\n").as_bytes());
                format!("multi_{}", &hex::encode(digest)[..16])
            } else {
                joined
            }
        }
    };

    format!("{}{}", identifier, INDEX_SUFFIX)
}

/// `index_root/` + [`index_name_for`].
pub fn index_path_for(index_root: &Path, inputs: &[PathBuf]) -> PathBuf {
    index_root.join(index_name_for(inputs))
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(source: &str, index: usize, text: &str, vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk {
                source: source.to_string(),
                index,
                text: text.to_string(),
                hash: format!("h{}", index),
            },
            vector,
        }
    }

    fn sample() -> FlatIndex {
        FlatIndex::build(
            "embeddinggemma",
            vec!["a.txt".to_string()],
            &TextSplitter::new(100, 10),
            vec![
                entry("a.txt", 0, "north", vec![0.0, 1.0]),
                entry("a.txt", 1, "east", vec![1.0, 0.0]),
                entry("a.txt", 2, "north-east", vec![0.7, 0.7]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn search_ranks_by_similarity() {
        let index = sample();
        let hits = index.search(&[1.0, 0.1], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.text, "east");
        assert_eq!(hits[1].chunk.text, "north-east");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn save_and_load_preserve_contents() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("a_vector_index");
        let index = sample();
        index.save(&dir).unwrap();
        assert!(!index_dir_is_empty(&dir));

        let loaded = FlatIndex::load(&dir).unwrap();
        assert_eq!(loaded.manifest(), index.manifest());
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.search(&[0.0, 1.0], 1)[0].chunk.text, "north");
    }

    #[test]
    fn load_without_manifest_fails() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CHUNKS_FILE), b"[]").unwrap();
        assert!(FlatIndex::load(tmp.path()).is_err());
    }

    #[test]
    fn truncated_vectors_are_detected() {
        let tmp = TempDir::new().unwrap();
        sample().save(tmp.path()).unwrap();
        std::fs::write(tmp.path().join(VECTORS_FILE), [0u8; 5]).unwrap();
        let err = FlatIndex::load(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("inconsistent"));
    }

    #[test]
    fn oversized_manifest_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let index = sample();
        index.save(tmp.path()).unwrap();

        let mut manifest = index.manifest().clone();
        manifest.chunk_count = usize::MAX;
        manifest.dims = 2;
        std::fs::write(
            tmp.path().join(MANIFEST_FILE),
            serde_json::to_vec(&manifest).unwrap(),
        )
        .unwrap();

        let err = FlatIndex::load(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn mixed_dimensions_are_rejected() {
        let err = FlatIndex::build(
            "m",
            vec![],
            &TextSplitter::new(10, 0),
            vec![entry("a", 0, "x", vec![1.0]), entry("a", 1, "y", vec![1.0, 2.0])],
        )
        .unwrap_err();
        assert!(err.to_string().contains("inconsistent"));
    }

    #[test]
    fn missing_or_empty_dir_counts_as_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(index_dir_is_empty(&tmp.path().join("absent")));
        assert!(index_dir_is_empty(tmp.path()));
    }

    #[test]
    fn single_document_name_uses_stem() {
        let name = index_name_for(&[PathBuf::from("/docs/dummy.txt")]);
        assert_eq!(name, "dummy_vector_index");
    }

    #[test]
    fn multi_document_name_is_order_independent() {
        let a = index_name_for(&[PathBuf::from("/d/b.txt"), PathBuf::from("/d/a.txt")]);
        let b = index_name_for(&[PathBuf::from("/d/a.txt"), PathBuf::from("/d/b.txt")]);
        assert_eq!(a, b);
        assert_eq!(a, "a.txt+b.txt_vector_index");
    }

    #[test]
    fn same_stem_different_extensions_do_not_collide() {
        let a = index_name_for(&[PathBuf::from("notes.md"), PathBuf::from("notes.txt")]);
        let b = index_name_for(&[PathBuf::from("notes.pdf"), PathBuf::from("notes.txt")]);
        assert_ne!(a, b);
    }

    #[test]
    fn long_multi_document_name_is_hashed() {
        let inputs: Vec<PathBuf> = (0..20)
            .map(|i| PathBuf::from(format!("quarterly report {}.pdf", i)))
            .collect();
        let name = index_name_for(&inputs);
        assert!(name.starts_with("multi_"));
        assert_eq!(name, index_name_for(&inputs.iter().rev().cloned().collect::<Vec<_>>()));
    }

    #[test]
    fn unsafe_characters_are_replaced() {
        let name = index_name_for(&[PathBuf::from("my report: v2.txt")]);
        assert_eq!(name, "my_report__v2_vector_index");
    }
}
