use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rag_store::commands::{
    StoreTarget, clear, ingest_paths, list_files, rebuild, remove_file, search, show_status,
};
use rag_store::config::{get_base_dir, run_interactive_config, show_config};
use rag_store::store::{DEFAULT_TOP_K, Namespace};

#[derive(Parser)]
#[command(name = "rag-store")]
#[command(about = "A local vector retrieval store for chunked text with exact similarity search")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the per-namespace stores (default: ~/.rag-store)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
    /// Store to operate on
    #[arg(long, global = true, value_enum, default_value_t = Namespace::Documents)]
    namespace: Namespace,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the embedding provider and chunking
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Extract, chunk and embed text files into the store
    Ingest {
        /// Files to ingest
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Display name for the file (single path only)
        #[arg(long)]
        name: Option<String>,
    },
    /// Find the chunks most similar to a query
    Search {
        query: String,
        /// Number of results
        #[arg(short, default_value_t = DEFAULT_TOP_K)]
        k: usize,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show chunk, file and index counters
    Status {
        /// Print status as JSON
        #[arg(long)]
        json: bool,
    },
    /// List ingested files
    Files,
    /// Remove a file and re-embed what remains
    Remove {
        /// File id as printed by `ingest` or `files`
        file_id: String,
    },
    /// Discard the vector index, or everything with --all
    Clear {
        /// Also delete chunk and file metadata
        #[arg(long)]
        all: bool,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Re-embed every chunk into a fresh index
    Rebuild {
        /// Run in the foreground without progress polling
        #[arg(long)]
        sync: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base_dir = match cli.base_dir {
        Some(dir) => dir,
        None => get_base_dir()?,
    };
    let target = StoreTarget::new(&base_dir, cli.namespace);

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&base_dir)?;
            } else {
                run_interactive_config(&base_dir)?;
            }
        }
        Commands::Ingest { paths, name } => {
            ingest_paths(target, paths, name).await?;
        }
        Commands::Search { query, k, json } => {
            search(target, query, k, json).await?;
        }
        Commands::Status { json } => {
            show_status(target, json).await?;
        }
        Commands::Files => {
            list_files(target).await?;
        }
        Commands::Remove { file_id } => {
            remove_file(target, file_id).await?;
        }
        Commands::Clear { all, yes } => {
            clear(target, all, yes).await?;
        }
        Commands::Rebuild { sync } => {
            rebuild(target, sync).await?;
        }
    }

    Ok(())
}
