//! bnserve HTTP server: serves every network in the configured directory.
//!
//! Routes (under the configured prefix, `/api` by default):
//! - `GET    {prefix}`                               list routes
//! - `GET    {prefix}/nets`                          list networks
//! - `GET    {prefix}/nets/{netid}`                  describe a network and its nodes
//! - `GET    {prefix}/nets/{netid}/nodes`            list nodes
//! - `GET    {prefix}/nets/{netid}/nodes/{nodeid}`   describe a node
//! - `POST   {prefix}/nets/{netid}/nodes/{nodeid}`   run a batch of cases

use std::sync::Arc;

use clap::Parser;
use miette::{IntoDiagnostic, Result};

use bnserve::api::QueryService;
use bnserve::config::{ConfigOverrides, ServeConfig};
use bnserve::error::ServeError;
use bnserve::registry::NetworkRegistry;

#[derive(Parser)]
#[command(name = "bnserve-server", version, about = "Serve Bayesian network inference over HTTP")]
struct Args {
    #[command(flatten)]
    overrides: ConfigOverrides,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ServeConfig::resolve(&args.overrides).map_err(ServeError::from)?;

    let registry = NetworkRegistry::from_config(&config)?;
    let engine = Arc::clone(registry.engine());
    if registry.is_empty() {
        tracing::warn!(dir = %config.dir.display(), "no networks loaded");
    }

    let service = QueryService::new(Arc::clone(&registry), config.api_prefix());
    let app = bnserve::server::router(service);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await.into_diagnostic()?;
    tracing::info!(
        %addr,
        prefix = %config.api_prefix(),
        engine = engine.banner(),
        "bnserve server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await
        .into_diagnostic()?;

    tracing::info!("shutting down");
    let failed = registry.close_all();
    if failed > 0 {
        tracing::warn!(failed, "some networks failed to close");
    }
    engine.shutdown().map_err(ServeError::from)?;
    Ok(())
}
