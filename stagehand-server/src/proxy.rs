//! Version-routed reverse proxy: `ANY /agent/{version}/{component}[/{path}]`.
//!
//! The request is buffered (up to the configured limit), forwarded to the
//! registered endpoint, and the upstream status, headers and body come back
//! verbatim. A client that disconnects drops the handler future and with it
//! the in-flight upstream call.

use axum::body::{Body, Bytes, to_bytes};
use axum::extract::{Path, Request, State};
use axum::http::HeaderMap;
use axum::response::Response;
use stagehand::Error;
use stagehand::gateway::{
    is_forwardable_header, is_returnable_header, resolve_endpoint, upstream_url,
};
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::state::AppState;

pub async fn forward_root(
    State(state): State<AppState>,
    Path((version, component)): Path<(String, String)>,
    request: Request,
) -> ApiResult<Response> {
    forward_to(&state, &version, &component, "", request).await
}

pub async fn forward(
    State(state): State<AppState>,
    Path((version, component, path)): Path<(String, String, String)>,
    request: Request,
) -> ApiResult<Response> {
    forward_to(&state, &version, &component, &path, request).await
}

/// Non-POST traffic to `/agent/{version}/architect/chat`, which shares its
/// path with the lifecycle chat route.
pub async fn forward_architect_chat(
    State(state): State<AppState>,
    Path(version): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    forward_to(&state, &version, "architect", "chat", request).await
}

async fn forward_to(
    state: &AppState,
    version: &str,
    component: &str,
    path: &str,
    request: Request,
) -> ApiResult<Response> {
    let endpoint = resolve_endpoint(&state.registry, version, component)?;
    let url = upstream_url(&endpoint.base_url, path, request.uri().query());

    let (parts, body) = request.into_parts();
    let body: Bytes = to_bytes(body, state.max_body_bytes).await.map_err(|err| {
        ApiError::new(
            ErrorCode::PayloadTooLarge,
            format!("request body rejected: {err}"),
        )
    })?;

    debug!(method = %parts.method, url = %url, "proxying request");
    let upstream = state
        .http
        .request(parts.method, &url)
        .headers(forwardable(&parts.headers))
        .body(body)
        .send()
        .await
        .map_err(|err| unavailable(&url, &err))?;

    let status = upstream.status();
    let headers = upstream.headers().clone();
    let bytes = upstream
        .bytes()
        .await
        .map_err(|err| unavailable(&url, &err))?;

    let mut response = Response::builder().status(status);
    for (name, value) in &headers {
        if is_returnable_header(name.as_str()) {
            response = response.header(name, value);
        }
    }
    response
        .body(Body::from(bytes))
        .map_err(|err| ApiError::internal(format!("build proxied response: {err}")))
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| is_forwardable_header(name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn unavailable(url: &str, err: &reqwest::Error) -> ApiError {
    warn!(url, err = %err, "upstream call failed");
    Error::UpstreamUnavailable(format!("{url}: {err}")).into()
}
