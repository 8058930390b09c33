//! Index lifecycle and question answering over the active documents.
//!
//! A [`RagSession`] binds one or more input documents to a deterministic
//! index directory (see [`index_path_for`]) and owns the loaded
//! [`FlatIndex`]. It is either uninitialized or indexed:
//!
//! ```text
//!   new ──► Uninitialized ──setup/rebuild──► Indexed
//!                ▲                              │
//!                └────────── clear_index ◄──────┘
//! ```
//!
//! # Setup
//!
//! An empty or missing index directory triggers a build; anything else is
//! loaded. A persisted index whose manifest names a different embedding
//! model, different chunk settings or a different set of documents is
//! stale and is rebuilt.
//!
//! # Build
//!
//! For every input with a registered loader: reuse the cached chunks and
//! vectors for its content hash when they were produced with the current
//! chunk settings, otherwise load → split → embed → cache. The index is
//! persisted only when at least one chunk was produced.
//!
//! # Answering
//!
//! With prior turns, the chat model first rewrites the question into a
//! standalone one. The standalone question is embedded, the top
//! `k_retriever` chunks are retrieved, and the chat model answers from that
//! context, the history and the original question.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::DocumentCache;
use crate::chat::{ChatMessage, ChatModel, GenerationOptions, OllamaChat};
use crate::chunk::{chunk_fragments, TextSplitter};
use crate::config::Settings;
use crate::embedding::{embed_in_batches, embed_query, Embedder, OllamaEmbedder};
use crate::error::RagError;
use crate::files::DocumentDirectory;
use crate::history::Turn;
use crate::index::{index_dir_is_empty, index_path_for, EmbeddedChunk, FlatIndex};
use crate::loaders::{extension_of, LoaderRegistry};
use crate::ollama::OllamaClient;

/// Answer returned while no index is loaded.
pub const NOT_INDEXED_MESSAGE: &str =
    "The index is not set up. Please run the `/reindex` command.";

/// Answer returned when the model produced no text.
pub const NO_ANSWER_MESSAGE: &str = "I couldn't find an answer.";

const CONTEXTUALIZE_PROMPT: &str = "Given a chat history and the latest user question \
which might reference context in the chat history, formulate a standalone question which \
can be understood without the chat history. Do NOT answer the question, just reformulate \
it if needed and otherwise return it as is.";

const ANSWER_PROMPT: &str = "You are an assistant for question-answering tasks. Use the \
following pieces of retrieved context to answer the question. If you don't know the answer, \
just say that you don't know. Use three sentences maximum and keep the answer concise.\n\n\
Context: {context}";

/// The remote models a session talks to.
pub struct Backends {
    pub embedder: Box<dyn Embedder>,
    pub chat: Box<dyn ChatModel>,
}

impl Backends {
    /// Embedding and chat models served by the configured Ollama instance.
    pub fn ollama(settings: &Settings) -> Result<Self> {
        let client = OllamaClient::from_settings(settings)?;
        Ok(Self {
            embedder: Box::new(OllamaEmbedder::new(
                client.clone(),
                &settings.embedding_model_path,
            )),
            chat: Box::new(OllamaChat::new(
                client,
                &settings.llm_model_path,
                GenerationOptions::from_settings(settings),
            )),
        })
    }
}

/// How [`RagSession::setup`] obtained its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrigin {
    Built,
    Loaded,
}

/// Cache payload for one source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDocument {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub chunks: Vec<EmbeddedChunk>,
}

pub struct RagSession {
    settings: Arc<Settings>,
    backends: Backends,
    loaders: LoaderRegistry,
    cache: DocumentCache,
    docs: DocumentDirectory,
    splitter: TextSplitter,
    inputs: Vec<PathBuf>,
    index_path: PathBuf,
    available: Vec<String>,
    index: Option<FlatIndex>,
}

impl RagSession {
    /// Validate `inputs` and prepare an uninitialized session.
    ///
    /// Missing files and unsupported extensions are appended to the error
    /// log and returned before any index work happens.
    pub fn new(settings: Arc<Settings>, inputs: Vec<PathBuf>, backends: Backends) -> Result<Self> {
        Self::with_loaders(settings, inputs, backends, LoaderRegistry::with_defaults())
    }

    pub fn with_loaders(
        settings: Arc<Settings>,
        mut inputs: Vec<PathBuf>,
        backends: Backends,
        loaders: LoaderRegistry,
    ) -> Result<Self> {
        let docs = DocumentDirectory::new(&settings.docs_path, &settings.supported_extensions)?;

        let mut seen = HashSet::new();
        inputs.retain(|p| seen.insert(p.clone()));

        if inputs.is_empty() {
            return Err(log_failure(&settings.error_log_path, RagError::NoInputs));
        }
        for path in &inputs {
            if !path.is_file() {
                return Err(log_failure(
                    &settings.error_log_path,
                    RagError::FileNotFound {
                        name: path.display().to_string(),
                        searched: "given path".to_string(),
                    },
                ));
            }
            if !docs.matcher().matches(path) {
                return Err(log_failure(
                    &settings.error_log_path,
                    RagError::UnsupportedFormat {
                        path: path.clone(),
                        extension: extension_of(path).unwrap_or_else(|| "(none)".to_string()),
                    },
                ));
            }
        }

        let cache = DocumentCache::open(&settings.cache_path)?;
        let available = docs.list_names()?;
        let index_path = index_path_for(&settings.index_path, &inputs);
        let splitter = TextSplitter::new(settings.chunk_size, settings.chunk_overlap);

        Ok(Self {
            settings,
            backends,
            loaders,
            cache,
            docs,
            splitter,
            inputs,
            index_path,
            available,
            index: None,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    /// Basenames of the active documents.
    pub fn active_documents(&self) -> Vec<String> {
        self.inputs.iter().map(|p| display_name(p)).collect()
    }

    /// Active document names joined for display.
    pub fn active_label(&self) -> String {
        self.active_documents().join(", ")
    }

    /// Supported documents found in the documents directory when the
    /// session was created.
    pub fn list_documents(&self) -> &[String] {
        &self.available
    }

    /// Build or load the index for the active documents and make it current.
    ///
    /// On failure the session keeps its previous state.
    pub fn setup(&mut self) -> Result<IndexOrigin> {
        match self.prepare_index() {
            Ok((index, origin)) => {
                self.index = Some(index);
                Ok(origin)
            }
            Err(e) => {
                let kind = e
                    .downcast_ref::<RagError>()
                    .map(RagError::kind)
                    .unwrap_or("SetupError");
                append_error_log(&self.settings.error_log_path, kind, &format!("{:#}", e));
                Err(e)
            }
        }
    }

    fn prepare_index(&self) -> Result<(FlatIndex, IndexOrigin)> {
        if index_dir_is_empty(&self.index_path) {
            info!(path = %self.index_path.display(), "no index found, building");
            return Ok((self.build()?, IndexOrigin::Built));
        }
        match self.load()? {
            Some(index) => Ok((index, IndexOrigin::Loaded)),
            None => Ok((self.build()?, IndexOrigin::Built)),
        }
    }

    /// Read the persisted index. `None` when it was built with another
    /// embedding model or other chunk settings.
    pub fn load(&self) -> Result<Option<FlatIndex>> {
        let index = FlatIndex::load(&self.index_path)?;
        let manifest = index.manifest();
        let model = self.backends.embedder.model_name();

        if manifest.embedding_model != model {
            warn!(
                path = %self.index_path.display(),
                "index was built with embedding model '{}', configured model is '{}'; rebuilding",
                manifest.embedding_model,
                model
            );
            return Ok(None);
        }
        if manifest.chunk_size != self.splitter.chunk_size()
            || manifest.chunk_overlap != self.splitter.chunk_overlap()
        {
            warn!(
                path = %self.index_path.display(),
                "index chunk settings ({}/{}) differ from configuration; rebuilding",
                manifest.chunk_size,
                manifest.chunk_overlap
            );
            return Ok(None);
        }

        // Index names drop the extension, so `notes.md` and `notes.txt`
        // share a directory.
        let mut indexed = manifest.documents.clone();
        indexed.sort();
        let expected = self.indexable_documents();
        if indexed != expected {
            warn!(
                path = %self.index_path.display(),
                "index covers {:?}, active documents are {:?}; rebuilding",
                indexed,
                expected
            );
            return Ok(None);
        }

        info!(
            path = %self.index_path.display(),
            chunks = index.len(),
            "loaded existing index"
        );
        Ok(Some(index))
    }

    /// Chunk, embed and persist the active documents.
    ///
    /// Files without a loader are skipped with a warning. Fails with
    /// [`RagError::EmptyDocumentSet`] when nothing was produced, in which
    /// case nothing is written.
    pub fn build(&self) -> Result<FlatIndex> {
        let model = self.backends.embedder.model_name().to_string();
        let mut documents = Vec::new();
        let mut entries = Vec::new();

        for path in &self.inputs {
            let ext = extension_of(path).unwrap_or_default();
            if !self.loaders.supports(&ext) {
                warn!(file = %path.display(), "no loader for '{}' files, skipping", ext);
                continue;
            }
            let chunks = self.embedded_chunks(path, &model)?;
            debug!(file = %path.display(), chunks = chunks.len(), "document ready");
            documents.push(display_name(path));
            entries.extend(chunks);
        }

        if entries.is_empty() {
            return Err(RagError::EmptyDocumentSet.into());
        }

        let index = FlatIndex::build(&model, documents, &self.splitter, entries)?;
        index.save(&self.index_path).with_context(|| {
            format!("Failed to persist index to {}", self.index_path.display())
        })?;
        info!(
            path = %self.index_path.display(),
            chunks = index.len(),
            "index built"
        );
        Ok(index)
    }

    /// Sorted basenames of the active documents that have a loader, i.e.
    /// what a build would record in the manifest.
    fn indexable_documents(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inputs
            .iter()
            .filter(|p| self.loaders.supports(&extension_of(p).unwrap_or_default()))
            .map(|p| display_name(p))
            .collect();
        names.sort();
        names
    }

    fn embedded_chunks(&self, path: &Path, model: &str) -> Result<Vec<EmbeddedChunk>> {
        if let Some(cached) = self.cache.get::<CachedDocument>(path, model) {
            if cached.chunk_size == self.splitter.chunk_size()
                && cached.chunk_overlap == self.splitter.chunk_overlap()
            {
                debug!(file = %path.display(), "using cached chunks");
                // The key is content-only; identical files share an entry.
                let source = display_name(path);
                return Ok(cached
                    .chunks
                    .into_iter()
                    .map(|mut e| {
                        e.chunk.source = source.clone();
                        e
                    })
                    .collect());
            }
            debug!(file = %path.display(), "cached chunks use other chunk settings");
        }

        let fragments = self
            .loaders
            .load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        let chunks = chunk_fragments(&display_name(path), &fragments, &self.splitter);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_in_batches(
            self.backends.embedder.as_ref(),
            &texts,
            self.settings.embed_batch_size,
        )
        .with_context(|| format!("Failed to embed {}", path.display()))?;

        let embedded: Vec<EmbeddedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddedChunk { chunk, vector })
            .collect();

        self.cache.set(
            path,
            model,
            &CachedDocument {
                chunk_size: self.splitter.chunk_size(),
                chunk_overlap: self.splitter.chunk_overlap(),
                chunks: embedded.clone(),
            },
        );
        Ok(embedded)
    }

    /// Answer `question` given prior turns (oldest first).
    ///
    /// Returns [`NOT_INDEXED_MESSAGE`] rather than an error when no index
    /// is loaded.
    pub fn ask(&self, question: &str, history: &[Turn]) -> Result<String> {
        let Some(index) = &self.index else {
            return Ok(NOT_INDEXED_MESSAGE.to_string());
        };

        let replay = history_messages(history);
        let standalone = self.contextualize(question, &replay)?;
        debug!(
            chat_model = self.backends.chat.model_name(),
            standalone = %standalone,
            "retrieval query"
        );

        let query = embed_query(self.backends.embedder.as_ref(), &standalone)?;
        let hits = index.search(&query, self.settings.k_retriever);
        let context = hits
            .iter()
            .map(|hit| hit.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut messages = Vec::with_capacity(replay.len() + 2);
        messages.push(ChatMessage::system(
            ANSWER_PROMPT.replace("{context}", &context),
        ));
        messages.extend(replay);
        messages.push(ChatMessage::user(question));

        let answer = self.backends.chat.complete(&messages)?;
        let answer = answer.trim();
        if answer.is_empty() {
            Ok(NO_ANSWER_MESSAGE.to_string())
        } else {
            Ok(answer.to_string())
        }
    }

    fn contextualize(&self, question: &str, replay: &[ChatMessage]) -> Result<String> {
        if replay.is_empty() {
            return Ok(question.to_string());
        }
        let mut messages = Vec::with_capacity(replay.len() + 2);
        messages.push(ChatMessage::system(CONTEXTUALIZE_PROMPT));
        messages.extend_from_slice(replay);
        messages.push(ChatMessage::user(question));

        let rewritten = self.backends.chat.complete(&messages)?;
        let rewritten = rewritten.trim();
        if rewritten.is_empty() {
            Ok(question.to_string())
        } else {
            Ok(rewritten.to_string())
        }
    }

    /// Make `name` from the documents directory the only active document
    /// and set it up.
    ///
    /// Unknown names fail without touching the session. If setup fails the
    /// previous documents and index are restored.
    pub fn switch_document(&mut self, name: &str) -> Result<IndexOrigin> {
        if !self.available.iter().any(|n| n == name) {
            return Err(RagError::UnknownDocument(name.to_string()).into());
        }
        let path = std::path::absolute(self.docs.root().join(name))?;

        let previous_inputs = std::mem::replace(&mut self.inputs, vec![path]);
        let previous_path = std::mem::replace(
            &mut self.index_path,
            index_path_for(&self.settings.index_path, &self.inputs),
        );
        let previous_index = self.index.take();

        match self.setup() {
            Ok(origin) => Ok(origin),
            Err(e) => {
                self.inputs = previous_inputs;
                self.index_path = previous_path;
                self.index = previous_index;
                Err(e)
            }
        }
    }

    /// Delete the persisted index and leave an empty directory in its
    /// place. Returns `false` when there was nothing to clear.
    pub fn clear_index(&mut self) -> Result<bool> {
        if !self.index_path.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&self.index_path)
            .with_context(|| format!("Failed to remove {}", self.index_path.display()))?;
        std::fs::create_dir_all(&self.index_path)
            .with_context(|| format!("Failed to recreate {}", self.index_path.display()))?;
        self.index = None;
        Ok(true)
    }

    /// Build from scratch, ignoring any persisted index.
    pub fn rebuild(&mut self) -> Result<()> {
        let index = self.build()?;
        self.index = Some(index);
        Ok(())
    }
}

fn history_messages(history: &[Turn]) -> Vec<ChatMessage> {
    history
        .iter()
        .flat_map(|turn| {
            [
                ChatMessage::user(turn.question.as_str()),
                ChatMessage::assistant(turn.answer.as_str()),
            ]
        })
        .collect()
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn log_failure(log_path: &Path, err: RagError) -> anyhow::Error {
    append_error_log(log_path, err.kind(), &err.to_string());
    err.into()
}

/// Append a failure block to the error log. Problems writing the log are
/// only warned about.
pub fn append_error_log(log_path: &Path, kind: &str, message: &str) {
    let block = format!(
        "\n--- {} ({}) ---\n{}\n",
        kind,
        chrono::Utc::now().to_rfc3339(),
        message
    );
    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .and_then(|mut file| file.write_all(block.as_bytes()));
    if let Err(e) = result {
        warn!(path = %log_path.display(), "could not write error log: {}", e);
    }
}
