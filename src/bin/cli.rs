//! Memory engine CLI
//!
//! Command-line interface for local memory management, backed by the
//! in-process in-memory `StorageClient` (no external backend required).

use clap::{Parser, Subcommand};
use memory_engine::embedding::{EmbeddingBuilder, NoopKeywordExtractor};
use memory_engine::storage::InMemoryStorage;
use memory_engine::types::{ContextType, CreateMemoryInput};
use memory_engine::{Config, MemoryStore, Result};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "memory-engine")]
#[command(about = "Conversational agent memory store CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new memory
    Create {
        /// Content to remember
        content: String,
        /// Context type
        #[arg(short = 't', long, default_value = "information")]
        r#type: String,
        /// Tags (comma-separated)
        #[arg(short = 'T', long)]
        tags: Option<String>,
        /// Importance (1-10)
        #[arg(short, long, default_value = "5")]
        importance: u8,
    },
    /// Get a memory by id
    Get {
        /// Memory id
        id: String,
    },
    /// List the most recent memories
    List {
        /// Maximum number to return
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Delete a memory by id
    Delete {
        /// Memory id
        id: String,
    },
    /// Show summary statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_level))
        .init();

    let store = MemoryStore::new(
        Arc::new(InMemoryStorage::new()),
        Arc::new(EmbeddingBuilder::new(Box::new(NoopKeywordExtractor))),
        memory_engine::workspace::workspace_id_for_path(&config.workspace_path),
        config.workspace_mode,
    );

    let cli = Cli::parse();
    match cli.command {
        Commands::Create {
            content,
            r#type,
            tags,
            importance,
        } => {
            let context_type: ContextType = r#type.parse().unwrap_or(ContextType::Information);
            let tags = tags
                .map(|t| t.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default();
            let entry = store
                .create(CreateMemoryInput {
                    content,
                    context_type,
                    summary: None,
                    tags,
                    importance,
                    session_id: None,
                    ttl_seconds: None,
                    category: None,
                })
                .await?;
            println!("created {}", entry.id);
        }
        Commands::Get { id } => match store.get(&id).await? {
            Some(entry) => println!("{}", serde_json::to_string_pretty(&entry).unwrap()),
            None => println!("not found"),
        },
        Commands::List { limit } => {
            for entry in store.recent(limit).await? {
                println!("{}\t{}\t{}", entry.id, entry.context_type, entry.content);
            }
        }
        Commands::Delete { id } => {
            let deleted = store.delete(&id).await?;
            println!("{}", if deleted { "deleted" } else { "not found" });
        }
        Commands::Stats => {
            let stats = store.summary_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats).unwrap());
        }
    }

    Ok(())
}
