//! HTTP route handlers.

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{any, get, post};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagehand::Error;
use stagehand::architect::{FeedbackOutcome, StartOutcome};
use stagehand::core::types::{ComponentKind, ServiceEndpoint, VersionRecord};
use stagehand::core::version::VersionBump;
use stagehand::io::git::CommitSummary;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{ApiError, ApiResult};
use crate::proxy;
use crate::state::AppState;

const DEFAULT_COMMIT_LIMIT: usize = 20;
const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

/// Build the full application router.
///
/// `/agent/{version}/architect/chat` and `/agent/{version}/commits` are
/// matched ahead of the proxy routes. A POST to the chat path runs a feedback
/// round here; any other method on it is forwarded to the `architect`
/// endpoint like the rest of that component's paths.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/agent/start", post(start_agent))
        .route(
            "/agent/{version}/architect/chat",
            post(chat).fallback(proxy::forward_architect_chat),
        )
        .route("/agent/{version}/commits", get(commits))
        .route("/agent/{version}/{component}", any(proxy::forward_root))
        .route("/agent/{version}/{component}/{*path}", any(proxy::forward))
        .route("/agents/register", post(register))
        .route("/agents/heartbeat", post(heartbeat))
        .route("/versions", get(list_versions))
        .route("/versions/{version}", get(get_version))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Run blocking lifecycle or registry work off the async workers.
async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> stagehand::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ApiError::internal(format!("worker task failed: {err}")))?
        .map_err(ApiError::from)
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    agent_name: String,
    description: String,
}

/// POST /agent/start - bootstrap a new workspace.
async fn start_agent(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> ApiResult<(StatusCode, Json<StartOutcome>)> {
    let architect = state.architect.clone();
    let outcome =
        blocking(move || architect.start(&request.agent_name, &request.description)).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    bump: VersionBump,
}

/// POST /agent/{version}/architect/chat - apply one feedback round.
async fn chat(
    State(state): State<AppState>,
    Path(version): Path<String>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<FeedbackOutcome>> {
    if request.message.trim().is_empty() {
        return Err(ApiError::invalid_input("message must not be empty"));
    }
    let architect = state.architect.clone();
    let outcome =
        blocking(move || architect.apply_feedback(&version, &request.message, request.bump))
            .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct CommitsQuery {
    limit: Option<usize>,
}

/// GET /agent/{version}/commits - newest commits of the serving workspace.
async fn commits(
    State(state): State<AppState>,
    Path(version): Path<String>,
    Query(query): Query<CommitsQuery>,
) -> ApiResult<Json<Vec<CommitSummary>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_COMMIT_LIMIT)
        .clamp(1, MAX_PAGE_SIZE);
    let architect = state.architect.clone();
    let history = blocking(move || architect.history(&version, limit)).await?;
    Ok(Json(history))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegisterRequest {
    version: String,
    commit_hash: String,
    component: String,
    base_url: String,
}

/// POST /agents/register - attach a service endpoint to a version.
async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<Json<RegisterRequest>> {
    let url = reqwest::Url::parse(&request.base_url)
        .map_err(|err| ApiError::invalid_input(format!("base_url: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::invalid_input("base_url must be http or https"));
    }
    let registry = state.registry.clone();
    let echo = request.clone();
    blocking(move || {
        registry.register_service(
            &request.commit_hash,
            &request.version,
            &request.component,
            &request.base_url,
        )
    })
    .await?;
    Ok(Json(echo))
}

#[derive(Debug, Deserialize)]
struct HeartbeatRequest {
    commit_hash: String,
    component: String,
}

/// POST /agents/heartbeat - refresh an endpoint's liveness timestamp.
async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<Json<ServiceEndpoint>> {
    let registry = state.registry.clone();
    let endpoint =
        blocking(move || registry.heartbeat(&request.commit_hash, &request.component)).await?;
    Ok(Json(endpoint))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Serialize)]
struct VersionSummary {
    version: String,
    commit_hash: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    components: Vec<ComponentKind>,
}

impl From<VersionRecord> for VersionSummary {
    fn from(record: VersionRecord) -> Self {
        Self {
            components: record.endpoints.keys().copied().collect(),
            version: record.version,
            commit_hash: record.commit_hash,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct VersionList {
    total: usize,
    versions: Vec<VersionSummary>,
}

/// GET /versions?limit=&offset= - newest versions first.
async fn list_versions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<VersionList> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);
    let versions = state
        .registry
        .list(limit, offset)
        .into_iter()
        .map(VersionSummary::from)
        .collect();
    Json(VersionList {
        total: state.registry.count(),
        versions,
    })
}

/// GET /versions/{version} - full record, by version or commit hash.
async fn get_version(
    State(state): State<AppState>,
    Path(version): Path<String>,
) -> ApiResult<Json<VersionRecord>> {
    state
        .registry
        .get_by_version(&version)
        .or_else(|| state.registry.get_by_commit(&version))
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("version {version}")).into())
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use serde_json::{Value, json};
    use stagehand::io::config::GatewayConfig;
    use stagehand::test_support::{ScriptedGeneration, TestWorkspace};
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    use super::*;

    fn test_app(steps: Vec<ScriptedGeneration>) -> (TestWorkspace, Router) {
        let ws = TestWorkspace::new(steps).expect("workspace");
        let state =
            AppState::new(ws.architect.clone(), &GatewayConfig::default()).expect("state");
        (ws, app(state))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    /// Upstream service standing in for a runner.
    async fn spawn_upstream() -> SocketAddr {
        let upstream = Router::new()
            .route("/x", axum::routing::get(|| async { "upstream-x" }))
            .route("/chat", axum::routing::get(|| async { "upstream-chat" }))
            .route(
                "/echo",
                axum::routing::any(|request: axum::extract::Request| async move {
                    let method = request.method().to_string();
                    let query = request.uri().query().unwrap_or_default().to_string();
                    let token = request
                        .headers()
                        .get("x-token")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let body = to_bytes(request.into_body(), usize::MAX)
                        .await
                        .unwrap_or_default();
                    (
                        StatusCode::ACCEPTED,
                        [("x-upstream", "yes")],
                        Json(json!({
                            "method": method,
                            "query": query,
                            "token": token,
                            "body": String::from_utf8_lossy(&body),
                        })),
                    )
                }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, upstream).await.expect("serve upstream");
        });
        addr
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (_ws, app) = test_app(vec![]);
        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("ok".to_string()));
    }

    #[tokio::test]
    async fn start_then_chat_commits_and_rejects() {
        let (ws, app) = test_app(vec![
            ScriptedGeneration::write("runner.py", "v0\n"),
            ScriptedGeneration::write("runner.py", "v1\n"),
            ScriptedGeneration::Noop,
        ]);

        let (status, started) = send(
            &app,
            post_json(
                "/agent/start",
                json!({"agent_name": "root", "description": "echo"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{started}");
        assert_eq!(started["version"], "0.0.0");
        let hash1 = started["commit_hash"].as_str().expect("hash").to_string();

        let (status, chat) = send(
            &app,
            post_json("/agent/0.0.0/architect/chat", json!({"message": "add x"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{chat}");
        assert_eq!(chat["result"], "committed");
        assert_eq!(chat["new_version"], "0.0.1");
        assert_ne!(chat["commit_hash"], hash1.as_str());

        let (status, rejected) = send(
            &app,
            post_json("/agent/0.0.1/architect/chat", json!({"message": "noop"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rejected, json!({"result": "rejected"}));
        assert_eq!(ws.registry.count(), 2);

        let (status, commits) = send(&app, get("/agent/0.0.1/commits?limit=5")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(commits.as_array().expect("array").len(), 2);

        let (status, listed) = send(&app, get("/versions?limit=10")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["total"], 2);
        assert_eq!(listed["versions"].as_array().expect("array").len(), 2);

        let (status, record) = send(&app, get(&format!("/versions/{hash1}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["version"], "0.0.0");
    }

    #[tokio::test]
    async fn start_conflict_and_failures_map_to_statuses() {
        let (ws, app) = test_app(vec![ScriptedGeneration::Fail(3, "nope".to_string())]);
        std::fs::create_dir_all(ws.path("taken")).expect("mkdir");
        std::fs::write(ws.path("taken").join("f"), "x").expect("write");

        let (status, body) = send(
            &app,
            post_json(
                "/agent/start",
                json!({"agent_name": "taken", "description": "d"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "CONFLICT");

        let (status, body) = send(
            &app,
            post_json(
                "/agent/start",
                json!({"agent_name": "fresh", "description": "d"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "GENERATION_FAILED");
        assert_eq!(body["details"], "nope");
    }

    #[tokio::test]
    async fn chat_for_unknown_version_is_404() {
        let (_ws, app) = test_app(vec![]);
        let (status, body) = send(
            &app,
            post_json("/agent/4.4.4/architect/chat", json!({"message": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn register_rejects_unknown_component_and_bad_url() {
        let (ws, app) = test_app(vec![]);
        let (status, body) = send(
            &app,
            post_json(
                "/agents/register",
                json!({
                    "version": "0.0.1",
                    "commit_hash": "abc",
                    "component": "scheduler",
                    "base_url": "http://127.0.0.1:1"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "UNKNOWN_COMPONENT");

        let (status, _) = send(
            &app,
            post_json(
                "/agents/register",
                json!({
                    "version": "0.0.1",
                    "commit_hash": "abc",
                    "component": "runner",
                    "base_url": "not a url"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(ws.registry.count(), 0);
    }

    #[tokio::test]
    async fn proxy_without_endpoint_is_404() {
        let (ws, app) = test_app(vec![]);
        ws.registry.upsert("abc", "0.0.1").expect("upsert");

        let (status, body) = send(&app, get("/agent/0.0.1/runner/x")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NOT_FOUND");

        let (status, _) = send(&app, get("/agent/0.0.2/runner/x")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn proxy_forwards_to_registered_endpoint() {
        let (_ws, app) = test_app(vec![]);
        let addr = spawn_upstream().await;

        let (status, echoed) = send(
            &app,
            post_json(
                "/agents/register",
                json!({
                    "version": "0.0.1",
                    "commit_hash": "abc",
                    "component": "runner",
                    "base_url": format!("http://{addr}")
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(echoed["component"], "runner");

        let (status, body) = send(&app, get("/agent/0.0.1/runner/x")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("upstream-x".to_string()));

        let request = Request::builder()
            .method("PUT")
            .uri("/agent/0.0.1/runner/echo?a=1")
            .header("x-token", "t-1")
            .body(Body::from("payload"))
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()["x-upstream"], "yes");
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(
            body,
            json!({"method": "PUT", "query": "a=1", "token": "t-1", "body": "payload"})
        );

        let (status, endpoint) = send(
            &app,
            post_json(
                "/agents/heartbeat",
                json!({"commit_hash": "abc", "component": "runner"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(endpoint["kind"], "runner");
    }

    #[tokio::test]
    async fn non_post_chat_reaches_architect_endpoint() {
        let (ws, app) = test_app(vec![]);
        let addr = spawn_upstream().await;
        ws.registry
            .register_service("abc", "0.0.1", "architect", &format!("http://{addr}"))
            .expect("register");

        let (status, body) = send(&app, get("/agent/0.0.1/architect/chat")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("upstream-chat".to_string()));

        let (status, body) = send(&app, get("/agent/0.0.1/architect/x")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("upstream-x".to_string()));
    }

    #[tokio::test]
    async fn proxy_transport_failure_is_502() {
        let (ws, app) = test_app(vec![]);
        let closed = {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            listener.local_addr().expect("addr")
        };
        ws.registry
            .register_service("abc", "0.0.1", "tuner", &format!("http://{closed}"))
            .expect("register");

        let (status, body) = send(&app, get("/agent/0.0.1/tuner/anything")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "UPSTREAM_UNAVAILABLE");
    }
}
