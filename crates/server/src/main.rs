//! doccache server entry point.
//!
//! Loads the configuration, opens every cache, starts the background fetch
//! and apply loops, and serves the cache tools over MCP on stdio.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use doccache_client::{HttpSource, SourceConfig, transform_registry};
use doccache_core::{Engine, EngineConfig, Workers};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = EngineConfig::load().context("loading configuration")?;
    let source = HttpSource::new(SourceConfig::from_engine_config(&config)?)?;
    let transforms = transform_registry(&config);

    tracing::info!(
        cache_root = %config.cache_root.display(),
        master = %config.master_name,
        derived = ?transforms.names(),
        source = %source.base(),
        "Starting doccache server on stdio transport"
    );

    let engine = Engine::open(&config, Arc::new(source), transforms).await?;
    let workers = Workers::spawn(Arc::clone(&engine));

    let handler = handler::DocCacheServer::new(engine);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    tokio::select! {
        quit = server.waiting() => {
            quit?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received");
        }
    }

    workers.shutdown().await;
    Ok(())
}
