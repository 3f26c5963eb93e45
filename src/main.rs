use std::sync::Arc;

use clap::{Parser, Subcommand};

use chatforge::Result;
use chatforge::config::{Config, show_config};
use chatforge::crawler::CrawlClient;
use chatforge::database::lancedb::vector_store::VectorStore;
use chatforge::database::sqlite::Database;
use chatforge::embeddings::openai::{EmbeddingProvider, OpenAiEmbeddings};
use chatforge::ingest::Ingestor;
use chatforge::llm::ChatClient;
use chatforge::query::HybridQueryEngine;
use chatforge::server::{AppState, serve};

#[derive(Parser)]
#[command(name = "chatforge")]
#[command(about = "Tenant-scoped chatbot knowledge service: ingest, index, and answer")]
#[command(version)]
struct Cli {
    /// Data directory (defaults to the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Override the listen host
        #[arg(long)]
        host: Option<String>,
        /// Override the listen port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Configuration management
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let base_dir = match cli.data_dir {
        Some(dir) => dir,
        None => Config::default_base_dir()?,
    };
    let mut config = Config::load(&base_dir)?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            let state = build_state(&config).await?;
            serve(&config, state).await?;
        }
        Commands::Config { show } => {
            if show {
                show_config(&config);
            } else {
                config.save()?;
                println!("Wrote {}", config.base_dir.join("config.toml").display());
            }
        }
    }

    Ok(())
}

async fn build_state(config: &Config) -> Result<AppState> {
    let database = Database::initialize_from_base_dir(&config.base_dir).await?;
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OpenAiEmbeddings::new(config)?);
    let vectors = Arc::new(
        VectorStore::new(&config.vector_database_path(), embedder.dimension()).await?,
    );
    let crawler = CrawlClient::new(config)?;
    let chat = ChatClient::new(config)?;

    let ingestor = Arc::new(Ingestor::new(
        database.clone(),
        vectors.clone(),
        embedder.clone(),
        crawler,
        config.chunking.clone(),
    ));
    let engine = Arc::new(HybridQueryEngine::new(
        database.clone(),
        vectors,
        embedder,
        chat,
    ));

    Ok(AppState {
        ingestor,
        engine,
        database,
    })
}
