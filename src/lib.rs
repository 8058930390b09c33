//! # ragchat
//!
//! Chat with local documents through retrieval-augmented generation.
//!
//! Documents are split into overlapping chunks, embedded by a local Ollama
//! model and stored in a small on-disk vector index. Questions retrieve the
//! most similar chunks, which a chat model uses as context for its answer.
//! Follow-up questions are rewritten into standalone ones using the recent
//! conversation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌─────────────┐
//! │  files   │──▶│ loaders  │──▶│   chunk    │──▶│  embedding  │
//! │ discover │   │ txt/md/  │   │  splitter  │   │  (Ollama)   │
//! └──────────┘   │ pdf/docx │   └────────────┘   └──────┬──────┘
//!                └──────────┘                           │
//!                       ┌──────────────┐                ▼
//!                       │    cache     │◀──────── ┌───────────┐
//!                       │ sha256+model │          │   index   │
//!                       └──────────────┘          │ flat/disk │
//!                                                 └─────┬─────┘
//!              ┌─────────┐    ┌───────────┐             │
//!              │  shell  │───▶│  session  │◀────────────┘
//!              │  REPL   │    │ ask/setup │───▶ chat (Ollama)
//!              └─────────┘    └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ollama pull gemma3:270m && ollama pull embeddinggemma
//! cp handbook.pdf docs/
//! ragchat                  # pick from ./docs interactively
//! ragchat handbook.pdf     # or name the documents
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Defaults, `config.toml` and `RAG_*` overrides |
//! | [`error`] | Typed failure kinds |
//! | [`cache`] | Content-addressed artifact cache |
//! | [`files`] | Document discovery, resolution and selection |
//! | [`loaders`] | Per-extension text extraction |
//! | [`chunk`] | Recursive character splitting |
//! | [`ollama`] | HTTP client with retries |
//! | [`embedding`] | Embedding backends and vector helpers |
//! | [`chat`] | Chat-completion backends |
//! | [`index`] | Persisted flat vector index |
//! | [`history`] | Bounded conversation history |
//! | [`session`] | Index lifecycle and question answering |
//! | [`shell`] | Interactive command loop |

pub mod cache;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod files;
pub mod history;
pub mod index;
pub mod loaders;
pub mod ollama;
pub mod session;
pub mod shell;
