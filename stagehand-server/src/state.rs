//! Shared application state for request handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use stagehand::architect::Architect;
use stagehand::io::config::GatewayConfig;
use stagehand::registry::VersionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub architect: Arc<Architect>,
    pub registry: Arc<VersionRegistry>,
    /// Client used for every proxied upstream call.
    pub http: reqwest::Client,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(architect: Arc<Architect>, gateway: &GatewayConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(gateway.proxy_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("build proxy HTTP client")?;
        Ok(Self {
            registry: Arc::clone(architect.registry()),
            architect,
            http,
            max_body_bytes: gateway.max_body_bytes,
        })
    }
}
