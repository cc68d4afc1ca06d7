//! FlowPilot Server
//!
//! Axum HTTP shell and CLI around the FlowPilot pipeline.

mod api;

use anyhow::Context;
use clap::{Parser, Subcommand};
use flowpilot_core::catalog::{embedding, import_actions, load_index, parse_export, CatalogStore, Platform};
use flowpilot_core::config::{EmbeddingConfig, FlowPilotConfig};
use flowpilot_core::generator::LlmGenerator;
use flowpilot_core::pipeline::{Controller, Query};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;

const EMBEDDING_KEY_VAR: &str = "OPENAI_API_KEY";

#[derive(Parser, Clone)]
#[command(author, version, about = "FlowPilot - automation workflow planner")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, global = true, default_value = ".flowpilot/config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the HTTP server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8000")]
        port: u16,
    },
    /// Process one query and print the result as JSON
    Run {
        query: String,
        /// Target platform slug
        #[arg(short, long)]
        platform: Option<String>,
    },
    /// Search the action catalog
    Search {
        text: String,
        #[arg(short, long)]
        platform: Option<String>,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Import a scraped action export into the catalog
    Import {
        /// JSON file produced by the documentation scraper
        file: PathBuf,
        #[arg(short, long)]
        platform: String,
    },
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_env() {
    let _ = dotenvy::dotenv();
    let _ = dotenvy::from_path(".flowpilot/.env");
}

/// Key variables from `required` that `lookup` cannot resolve
fn missing_keys<'a>(required: &[&'a str], lookup: impl Fn(&str) -> Option<String>) -> Vec<&'a str> {
    required
        .iter()
        .copied()
        .filter(|var| lookup(var).map_or(true, |value| value.trim().is_empty()))
        .collect()
}

fn env_value(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

fn parse_platform(hint: Option<&str>) -> anyhow::Result<Option<Platform>> {
    Platform::parse_hint(hint).map_err(anyhow::Error::msg)
}

fn build_embedder(config: &FlowPilotConfig) -> Box<dyn embedding::Embedder> {
    let api_key = match &config.embedding {
        EmbeddingConfig::OpenAi { .. } => {
            let key = env_value(EMBEDDING_KEY_VAR);
            if key.is_none() {
                tracing::warn!(var = EMBEDDING_KEY_VAR, "Embedding API key is not set");
            }
            key
        }
        EmbeddingConfig::Hashing { .. } => None,
    };
    embedding::from_config(&config.embedding, config.embedding_timeout(), api_key)
}

fn build_controller(config: FlowPilotConfig) -> anyhow::Result<Controller> {
    let embedder = build_embedder(&config);
    let index = load_index(&config.catalog_path, embedder).with_context(|| {
        format!(
            "Failed to load catalog at {} (run `flowpilot import` first)",
            config.catalog_path
        )
    })?;
    let generator = LlmGenerator::from_config(&config);
    for var in missing_keys(&generator.key_vars(), env_value) {
        tracing::warn!(var, "Provider API key is not set; model calls will fail");
    }
    Ok(Controller::new(config, Arc::new(generator), Arc::new(index)))
}

async fn run_import(config: &FlowPilotConfig, file: PathBuf, platform: &str) -> anyhow::Result<()> {
    let platform: Platform = platform.parse().map_err(anyhow::Error::msg)?;
    let raw = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let scraped = parse_export(&raw)?;

    let embedder = build_embedder(config);
    let descriptors = import_actions(scraped, platform, embedder.as_ref()).await?;

    if let Some(parent) = std::path::Path::new(&config.catalog_path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let store = CatalogStore::open_at(&config.catalog_path)?;
    let written = store.insert(&descriptors, &embedder.name())?;

    println!(
        "Imported {} {} actions into {} ({} total)",
        written,
        platform.display_name(),
        config.catalog_path,
        store.count()?
    );
    Ok(())
}

async fn run_server(controller: Controller, port: u16) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        controller: Arc::new(controller),
    });
    let app = api::router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    println!("FlowPilot Server running at http://{}", addr);
    println!("   Routes:   /, /health, /search, /process-query");
    println!("   API v1:   /api/v1/process, /api/v1/process/stream, /api/v1/openapi.json");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    let args = Args::parse();
    let config = FlowPilotConfig::load(&args.config)?;
    init_tracing(&config.log_level);

    match args.command {
        Some(CliCommand::Import { file, platform }) => run_import(&config, file, &platform).await,
        Some(CliCommand::Run { query, platform }) => {
            let platform = parse_platform(platform.as_deref())?;
            let controller = build_controller(config)?;
            let query = Query {
                text: query,
                platform,
            };
            match controller.process(&query).await {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    Ok(())
                }
                Err(err) => {
                    eprintln!("{}", serde_json::to_string_pretty(&err.report())?);
                    Err(err.into())
                }
            }
        }
        Some(CliCommand::Search { text, platform, k }) => {
            let platform = parse_platform(platform.as_deref())?;
            let controller = build_controller(config)?;
            let k = k.unwrap_or(controller.config().search_limit);
            let hits = controller.search_with_limit(&text, platform, k).await?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
            Ok(())
        }
        Some(CliCommand::Serve { port }) => run_server(build_controller(config)?, port).await,
        None => run_server(build_controller(config)?, 8000).await,
    }
}
