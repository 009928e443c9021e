//! Stagehand server: workspace lifecycle API plus the version-routed proxy.

mod error;
mod proxy;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use stagehand::architect::Architect;
use stagehand::io::config::load_settings;
use stagehand::io::generator::generator_from_config;
use stagehand::registry::VersionRegistry;
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "stagehand-server")]
#[command(about = "Versioned agent workspaces behind a routing gateway")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "8000")]
    port: u16,

    /// TOML settings file (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stagehand::logging::init("stagehand=info,stagehand_server=info,tower_http=info");

    let args = Args::parse();
    let settings = load_settings(args.config.as_deref())?;
    info!(
        workspace_root = %settings.workspace_root.display(),
        simulate = settings.generator.simulate,
        "starting stagehand-server"
    );

    let registry = Arc::new(VersionRegistry::open(settings.registry_path())?);
    let generator = generator_from_config(&settings.generator);
    let gateway = settings.gateway.clone();
    let architect = Arc::new(Architect::new(settings, registry, generator)?);
    let state = AppState::new(architect, &gateway)?;

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, routes::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(err = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
