// src/main.rs
//! Binary entrypoint: loads configuration, constructs the real provider
//! and storage backends, starts the orchestrator, and serves both
//! transports (§6) concurrently until one of them exits.

use anyhow::{Context, Result};
use clap::Parser;
use memoryd::config::ServiceConfig;
use memoryd::gateway::providers::HttpModelProvider;
use memoryd::gateway::ModelProvider;
use memoryd::permission::InMemoryPermissionGate;
use memoryd::store::vector::{FakeVectorStore, QdrantVectorStore, VectorStore};
use memoryd::transport;
use memoryd::{OrchestratorDeps, ServiceOrchestrator};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "memoryd", about = "Cross-project conversational memory service")]
struct Cli {
    /// Path to a TOML config file. Environment variables always win over
    /// whatever this file sets (see `ServiceConfig::load`).
    #[arg(long, env = "MEMORYD_CONFIG")]
    config: Option<PathBuf>,

    /// Address the HTTP API (§6.2) binds to.
    #[arg(long, env = "MEMORYD_HTTP_BIND", default_value = "127.0.0.1:8080")]
    http_bind: SocketAddr,

    /// Skip Qdrant entirely and keep vectors in an in-process map. For
    /// local development only — nothing persists across restarts.
    #[arg(long, env = "MEMORYD_DEV_VECTOR_STORE", default_value_t = false)]
    dev_vector_store: bool,
}

/// Builds one `HttpModelProvider` per configured provider name from
/// `PROVIDER_<NAME>_BASE_URL` / `PROVIDER_<NAME>_API_KEY`. Fails fast
/// rather than starting with a provider the router will pick and then
/// find broken on the first real request.
fn build_providers(provider_names: &[String]) -> Result<Vec<Arc<dyn ModelProvider>>> {
    let mut providers: Vec<Arc<dyn ModelProvider>> = Vec::with_capacity(provider_names.len());
    for name in provider_names {
        let prefix = name.to_uppercase().replace('-', "_");
        let base_url_var = format!("PROVIDER_{prefix}_BASE_URL");
        let api_key_var = format!("PROVIDER_{prefix}_API_KEY");

        let base_url = std::env::var(&base_url_var)
            .with_context(|| format!("missing {base_url_var} for configured provider '{name}'"))?;
        let api_key = std::env::var(&api_key_var)
            .with_context(|| format!("missing {api_key_var} for configured provider '{name}'"))?;

        providers.push(Arc::new(HttpModelProvider::new(name.clone(), base_url, api_key)));
    }
    Ok(providers)
}

async fn build_vector_store(cli: &Cli, config: &ServiceConfig) -> Result<Arc<dyn VectorStore>> {
    if cli.dev_vector_store {
        warn!("running with an in-process vector store; nothing will persist across restarts");
        return Ok(Arc::new(FakeVectorStore::new()));
    }
    let store = QdrantVectorStore::connect(&config.vector_store)
        .await
        .context("connecting to Qdrant")?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ServiceConfig::load(cli.config.as_deref()).context("loading configuration")?;

    info!(http_bind = %cli.http_bind, "starting memoryd");

    let providers = build_providers(&config.models.provider_priority)?;
    let vector_store = build_vector_store(&cli, &config).await?;
    let permission_gate = Arc::new(InMemoryPermissionGate::new(&config.project));

    let orchestrator = Arc::new(
        ServiceOrchestrator::start(OrchestratorDeps {
            config,
            providers,
            vector_store,
            permission_gate,
        })
        .await
        .context("starting orchestrator")?,
    );
    info!("orchestrator started");

    let http_orchestrator = orchestrator.clone();
    let http_bind = cli.http_bind;
    let http_server = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(http_bind).await?;
        info!(addr = %http_bind, "HTTP API listening");
        axum::serve(listener, transport::http::router(http_orchestrator)).await
    });

    let stdio_orchestrator = orchestrator.clone();
    let stdio_server = tokio::spawn(async move { transport::stdio::serve(stdio_orchestrator).await });

    tokio::select! {
        result = http_server => {
            result.context("HTTP server task panicked")?.context("HTTP server exited")?;
        }
        result = stdio_server => {
            result.context("stdio server task panicked")?.context("stdio server exited")?;
        }
    }

    orchestrator.stop().await;
    Ok(())
}
