//! Settings loading: defaults, then an optional TOML file, then `RAG_*`
//! environment overrides.
//!
//! The result is a single immutable [`Settings`] value that the entry point
//! wraps in an `Arc` and hands to every component.
//!
//! ```toml
//! # config.toml
//! llm_model_path = "llama3.2:3b"
//! embedding_model_path = "nomic-embed-text"
//! chunk_size = 800
//! supported_extensions = [".txt", ".md"]
//! ```
//!
//! Environment variables are named `RAG_` plus the upper-cased key
//! (`RAG_CHUNK_SIZE=512`) and are coerced to the type of the setting they
//! replace. Unknown `RAG_*` variables are ignored.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::RagError;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "RAG_";

/// Config file looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

const TRUTHY: &[&str] = &["true", "1", "t", "yes", "y", "on"];

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub llm_model_path: String,
    pub embedding_model_path: String,
    pub index_path: PathBuf,
    pub docs_path: PathBuf,
    pub cache_path: PathBuf,
    pub error_log_path: PathBuf,
    pub ollama_url: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub k_retriever: usize,
    pub supported_extensions: Vec<String>,
    pub replay_history: bool,
    pub max_replay_history: usize,
    pub temperature: f64,
    pub max_new_tokens: u32,
    pub n_ctx: u32,
    pub n_gpu_layers: u32,
    pub verbose: bool,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub embed_batch_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_model_path: "gemma3:270m".to_string(),
            embedding_model_path: "embeddinggemma".to_string(),
            index_path: PathBuf::from("./indexes"),
            docs_path: PathBuf::from("./docs"),
            cache_path: PathBuf::from("./cache"),
            error_log_path: PathBuf::from("error.log"),
            ollama_url: "http://localhost:11434".to_string(),
            chunk_size: 1024,
            chunk_overlap: 100,
            k_retriever: 4,
            supported_extensions: vec![
                ".txt".to_string(),
                ".pdf".to_string(),
                ".md".to_string(),
                ".docx".to_string(),
            ],
            replay_history: true,
            max_replay_history: 5,
            temperature: 0.7,
            max_new_tokens: 512,
            n_ctx: 4096,
            n_gpu_layers: 0,
            verbose: false,
            request_timeout_secs: 120,
            max_retries: 3,
            embed_batch_size: 32,
        }
    }
}

impl Settings {
    /// Every key that can be overridden from the environment.
    pub const KEYS: &'static [&'static str] = &[
        "llm_model_path",
        "embedding_model_path",
        "index_path",
        "docs_path",
        "cache_path",
        "error_log_path",
        "ollama_url",
        "chunk_size",
        "chunk_overlap",
        "k_retriever",
        "supported_extensions",
        "replay_history",
        "max_replay_history",
        "temperature",
        "max_new_tokens",
        "n_ctx",
        "n_gpu_layers",
        "verbose",
        "request_timeout_secs",
        "max_retries",
        "embed_batch_size",
    ];

    /// Overlay `RAG_<KEY>` values found through `lookup`.
    ///
    /// `lookup` receives the full variable name and returns its value if set;
    /// the entry point passes `std::env::var`, tests pass a map.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), RagError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in Self::KEYS {
            if let Some(raw) = lookup(&env_var_name(key)) {
                self.set(key, &raw)?;
            }
        }
        Ok(())
    }

    fn set(&mut self, key: &str, raw: &str) -> Result<(), RagError> {
        match key {
            "llm_model_path" => self.llm_model_path = raw.to_string(),
            "embedding_model_path" => self.embedding_model_path = raw.to_string(),
            "index_path" => self.index_path = PathBuf::from(raw),
            "docs_path" => self.docs_path = PathBuf::from(raw),
            "cache_path" => self.cache_path = PathBuf::from(raw),
            "error_log_path" => self.error_log_path = PathBuf::from(raw),
            "ollama_url" => self.ollama_url = raw.to_string(),
            "chunk_size" => self.chunk_size = parse_number(key, raw)?,
            "chunk_overlap" => self.chunk_overlap = parse_number(key, raw)?,
            "k_retriever" => self.k_retriever = parse_number(key, raw)?,
            "supported_extensions" => self.supported_extensions = parse_list(raw),
            "replay_history" => self.replay_history = parse_bool(raw),
            "max_replay_history" => self.max_replay_history = parse_number(key, raw)?,
            "temperature" => self.temperature = parse_number(key, raw)?,
            "max_new_tokens" => self.max_new_tokens = parse_number(key, raw)?,
            "n_ctx" => self.n_ctx = parse_number(key, raw)?,
            "n_gpu_layers" => self.n_gpu_layers = parse_number(key, raw)?,
            "verbose" => self.verbose = parse_bool(raw),
            "request_timeout_secs" => self.request_timeout_secs = parse_number(key, raw)?,
            "max_retries" => self.max_retries = parse_number(key, raw)?,
            "embed_batch_size" => self.embed_batch_size = parse_number(key, raw)?,
            _ => {}
        }
        Ok(())
    }

    /// Check cross-field constraints and normalize extensions to `.ext`.
    pub fn validate(&mut self) -> Result<(), RagError> {
        if self.chunk_size == 0 {
            return Err(RagError::InvalidConfig("chunk_size must be > 0".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.k_retriever == 0 {
            return Err(RagError::InvalidConfig("k_retriever must be >= 1".into()));
        }
        if self.embed_batch_size == 0 {
            return Err(RagError::InvalidConfig(
                "embed_batch_size must be >= 1".into(),
            ));
        }

        self.supported_extensions = self
            .supported_extensions
            .iter()
            .map(|ext| normalize_extension(ext))
            .filter(|ext| ext.len() > 1)
            .collect();
        if self.supported_extensions.is_empty() {
            return Err(RagError::InvalidConfig(
                "supported_extensions must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// `chunk_size` → `RAG_CHUNK_SIZE`.
pub fn env_var_name(key: &str) -> String {
    format!("{}{}", ENV_PREFIX, key.to_uppercase())
}

/// Load settings from `path` (if it exists) and the process environment.
pub fn load_settings(path: &Path) -> Result<Settings> {
    load_settings_with(path, |var| std::env::var(var).ok())
}

/// Same as [`load_settings`] with an injectable environment.
pub fn load_settings_with<F>(path: &Path, lookup: F) -> Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = read_config_file(path)?;
    settings.apply_overrides(lookup)?;
    settings.validate()?;
    Ok(settings)
}

/// Parse the TOML file at `path`. A missing file yields the defaults.
pub fn read_config_file(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let settings = toml::from_str(&content).map_err(|e| RagError::ConfigFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(settings)
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T, RagError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| RagError::ConfigParse {
        key: env_var_name(key),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(raw: &str) -> bool {
    let lowered = raw.trim().to_lowercase();
    TRUTHY.contains(&lowered.as_str())
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}
