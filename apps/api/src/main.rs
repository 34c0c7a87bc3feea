mod config;
mod errors;
mod generation;
mod ingest;
mod llm_client;
mod proxy;
mod records;
mod routes;
mod settings;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::generation::{Generator, ProxyGenerator};
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::settings::{FormStateStore, MemoryFormStateStore, RedisFormStateStore};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Only malformed values fail here; every variable is optional
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting remarks API v{}", env!("CARGO_PKG_VERSION"));

    // Chat-completion client (also backs the /api/generate proxy)
    let llm = LlmClient::new(config.openai_api_key.clone());
    if !llm.has_api_key() {
        info!("OPENAI_API_KEY is not set; generation requests will fail until it is");
    }

    // Record generation goes through an external proxy when one is configured
    let generator: Arc<dyn Generator> = match &config.generate_proxy_url {
        Some(url) => {
            info!("Generating through proxy at {url}");
            Arc::new(ProxyGenerator::new(url.clone()))
        }
        None => {
            info!("Generating in-process (model: {})", llm_client::MODEL);
            Arc::new(llm.clone())
        }
    };

    // Saved form state
    let form_state: Arc<dyn FormStateStore> = match &config.redis_url {
        Some(url) => {
            info!("Form state stored in Redis");
            Arc::new(RedisFormStateStore::open(url)?)
        }
        None => {
            info!("Form state kept in memory");
            Arc::new(MemoryFormStateStore::default())
        }
    };

    let state = AppState::new(generator, llm, form_state);

    let app = build_router(state)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
