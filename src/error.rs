//! Typed failure kinds.
//!
//! Most fallible functions in the crate return [`anyhow::Result`] and attach
//! context as they propagate. The kinds below are the ones callers need to
//! tell apart (startup aborts, shell messages, tests), so they are raised as
//! [`RagError`] and recovered with `err.downcast_ref::<RagError>()`.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// An environment override could not be coerced to the setting's type.
    #[error("invalid value for {key}: '{value}' ({reason})")]
    ConfigParse {
        key: String,
        value: String,
        reason: String,
    },

    #[error("failed to parse config file {path}: {reason}")]
    ConfigFile { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("file '{name}' not found (searched: {searched})")]
    FileNotFound { name: String, searched: String },

    #[error("unsupported file format '{extension}' for {path}")]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("no documents supplied")]
    NoInputs,

    #[error("no text could be extracted from the selected documents")]
    EmptyDocumentSet,

    #[error("document '{0}' not found")]
    UnknownDocument(String),

    #[error("input interrupted")]
    Interrupted,
}

impl RagError {
    /// Short kind name used as the heading of error-log blocks.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::ConfigParse { .. } => "ConfigParseError",
            RagError::ConfigFile { .. } => "ConfigFileError",
            RagError::InvalidConfig(_) => "InvalidConfig",
            RagError::FileNotFound { .. } => "FileNotFound",
            RagError::UnsupportedFormat { .. } => "UnsupportedFormat",
            RagError::NoInputs => "NoInputs",
            RagError::EmptyDocumentSet => "EmptyDocumentSet",
            RagError::UnknownDocument(_) => "UnknownDocument",
            RagError::Interrupted => "Interrupted",
        }
    }
}
