//! # ragchat CLI
//!
//! ```bash
//! ragchat [--config PATH] [FILES...]
//! ```
//!
//! Named files are looked up in the working directory, then in the
//! documents directory. Without files, the documents directory is scanned
//! and, when it holds several documents, the user picks from a numbered
//! list. The chosen documents are indexed (or their index is loaded) and an
//! interactive chat starts on stdin/stdout.
//!
//! Settings come from `config.toml` and `RAG_*` environment variables; see
//! [`ragchat::config`]. Diagnostics go to stderr and follow `RUST_LOG`.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ragchat::config::{self, Settings, DEFAULT_CONFIG_FILE};
use ragchat::error::RagError;
use ragchat::files::{select_interactive, DocumentDirectory};
use ragchat::session::{append_error_log, Backends, IndexOrigin, RagSession};
use ragchat::shell::Shell;

/// Chat with local documents using retrieval-augmented generation.
#[derive(Parser)]
#[command(name = "ragchat", version, about)]
struct Cli {
    /// Path to the configuration file (TOML). A missing file means defaults.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Documents to chat with. Looked up in the current directory, then in
    /// the documents directory.
    files: Vec<String>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::load_settings(&cli.config)?;
    init_tracing(&settings);

    for dir in [
        &settings.index_path,
        &settings.docs_path,
        &settings.cache_path,
    ] {
        std::fs::create_dir_all(dir)?;
    }

    let docs = DocumentDirectory::new(&settings.docs_path, &settings.supported_extensions)?;
    let inputs = if cli.files.is_empty() {
        let candidates = docs.list_supported()?;
        if candidates.is_empty() {
            println!(
                "\nNo documents found in '{}' folder. Please add documents and restart.",
                settings.docs_path.display()
            );
            return Ok(());
        }
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        let mut output = std::io::stdout();
        match select_interactive(&candidates, &mut input, &mut output) {
            Ok(selected) => selected,
            Err(e) if matches!(e.downcast_ref::<RagError>(), Some(RagError::Interrupted)) => {
                println!("\nExiting.");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    } else {
        match docs.resolve_many(&cli.files) {
            Ok(paths) => paths,
            Err(e) => {
                append_error_log(&settings.error_log_path, e.kind(), &e.to_string());
                init_failed(e.into());
            }
        }
    };

    let settings = Arc::new(settings);
    let backends = Backends::ollama(&settings)?;
    let mut session = match RagSession::new(settings.clone(), inputs, backends) {
        Ok(session) => session,
        Err(e) => init_failed(e),
    };

    match session.setup() {
        Ok(IndexOrigin::Built) => {
            println!("Index created at {}.", session.index_path().display())
        }
        Ok(IndexOrigin::Loaded) => {
            println!("Loaded index from {}.", session.index_path().display())
        }
        Err(e) => println!(
            "Failed to set up the index: {:#}\nFix the documents and run `/reindex`.",
            e
        ),
    }

    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stdout();
    Shell::new(session).run(&mut input, &mut output)
}

fn init_failed(e: anyhow::Error) -> ! {
    eprintln!("Failed to initialize RAG session: {:#}", e);
    std::process::exit(1);
}

/// `RUST_LOG` wins; otherwise `debug` when `verbose` is set, else `warn`.
fn init_tracing(settings: &Settings) {
    let default_level = if settings.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}
