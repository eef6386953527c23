//! # docspot CLI
//!
//! ## Usage
//!
//! ```bash
//! docspot --config ./config/docspot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docspot upload <owner> <folder> <path>...` | Upload files (directories non-recursively) |
//! | `docspot list <owner> <folder>` | List the documents of a folder |
//! | `docspot query <owner> <folder> <keyword>` | Highlight the keyword and print artifact links |
//! | `docspot locate <owner> <folder> <keyword>` | Print the first page each document mentions the keyword |
//! | `docspot clear <owner> <folder> <keyword>` | Delete stored results for a keyword |
//! | `docspot completions <shell>` | Print a shell completion script |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `docspot=info`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docspot::clock::SystemClock;
use docspot::config::{self, Config};
use docspot::models::Scope;
use docspot::query::QueryOrchestrator;
use docspot::store_s3::S3ObjectStore;
use docspot::textract::TextractBackend;

/// Locate keywords in stored PDF documents and produce highlighted copies.
///
/// All commands except `completions` read a TOML configuration file. See
/// `config/docspot.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "docspot", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docspot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload documents into a folder.
    ///
    /// A directory argument uploads the files directly inside it; nested
    /// directories are ignored.
    Upload {
        owner: String,
        folder: String,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List the documents of a folder.
    List { owner: String, folder: String },

    /// Highlight a keyword in every document of a folder.
    ///
    /// Prints one diagnostic line per document, then `key: link` for each
    /// highlighted copy.
    Query {
        owner: String,
        folder: String,
        keyword: String,
    },

    /// Report the first page on which each document mentions a keyword.
    Locate {
        owner: String,
        folder: String,
        keyword: String,
    },

    /// Delete the stored highlighted copies for a keyword.
    Clear {
        owner: String,
        folder: String,
        keyword: String,
    },

    /// Print a shell completion script.
    Completions { shell: Shell },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docspot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "docspot", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    let orchestrator = build_orchestrator(&cfg)?;

    match cli.command {
        Commands::Upload {
            owner,
            folder,
            paths,
        } => {
            let scope = Scope::new(&owner, &folder)?;
            for file in collect_files(&paths)? {
                let bytes = tokio::fs::read(&file)
                    .await
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                let name = file.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                let document = orchestrator.upload_document(&scope, name, bytes).await?;
                println!("{}", document);
            }
        }
        Commands::List { owner, folder } => {
            let scope = Scope::new(&owner, &folder)?;
            for document in orchestrator.list_documents(&scope).await? {
                println!("{}", document);
            }
        }
        Commands::Query {
            owner,
            folder,
            keyword,
        } => {
            let scope = Scope::new(&owner, &folder)?;
            let outcome = orchestrator.query_scope(&scope, &keyword).await?;
            for line in &outcome.diagnostics {
                println!("{}", line);
            }
            if outcome.matches.is_empty() {
                println!("No documents contain '{}'.", keyword);
            }
            for found in &outcome.matches {
                println!("{}: {}", found.document, found.link);
            }
        }
        Commands::Locate {
            owner,
            folder,
            keyword,
        } => {
            let scope = Scope::new(&owner, &folder)?;
            let outcome = orchestrator.locate_scope(&scope, &keyword).await?;
            for line in &outcome.diagnostics {
                eprintln!("{}", line);
            }
            if outcome.hits.is_empty() {
                println!("No documents contain '{}'.", keyword);
            }
            for hit in &outcome.hits {
                println!("{}: found on page {}", hit.document, hit.page);
            }
        }
        Commands::Clear {
            owner,
            folder,
            keyword,
        } => {
            let scope = Scope::new(&owner, &folder)?;
            let removed = orchestrator.clear_results(&scope, &keyword).await?;
            println!("Removed {} result(s).", removed);
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

fn build_orchestrator(cfg: &Config) -> Result<QueryOrchestrator> {
    let store = S3ObjectStore::from_config(&cfg.store)?;
    let backend = TextractBackend::from_config(&cfg.store, &cfg.extraction)?;
    QueryOrchestrator::new(
        Arc::new(store),
        Arc::new(backend),
        Arc::new(SystemClock),
        cfg,
    )
}

/// Expand directory arguments to the regular files directly inside them.
fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries = Vec::new();
            for entry in std::fs::read_dir(path)
                .with_context(|| format!("Failed to read directory {}", path.display()))?
            {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    entries.push(entry.path());
                }
            }
            entries.sort();
            files.extend(entries);
        } else {
            ensure_file(path)?;
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn ensure_file(path: &Path) -> Result<()> {
    if !path.is_file() {
        anyhow::bail!("{} is not a file", path.display());
    }
    Ok(())
}
