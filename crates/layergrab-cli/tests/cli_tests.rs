//! Integration tests for the daemon client.
//!
//! These run a mock Docker-compatible API server on a Unix socket and
//! verify the client drives the inspect/tag/push/untag flow correctly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use tempfile::TempDir;
use tokio::net::UnixListener;
use tokio::sync::RwLock;

use layergrab_cli::client::DaemonClient;

// ============================================================================
// Mock daemon
// ============================================================================

/// Recorded daemon-side effects.
#[derive(Debug, Default)]
struct MockState {
    /// Known image references and their canonical ids.
    images: HashMap<String, String>,
    /// `(source, repo, tag)` triples from tag requests.
    tags: Vec<(String, String, String)>,
    /// Pushed `registry-host/repo` names.
    pushes: Vec<String>,
    /// Removed references.
    removed: Vec<String>,
    /// When set, the push progress stream carries an error line.
    push_error: Option<String>,
}

type SharedState = Arc<RwLock<MockState>>;

#[derive(Deserialize)]
struct TagQuery {
    repo: String,
    tag: String,
}

async fn mock_ping() -> &'static str {
    "OK"
}

async fn mock_inspect(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let state = state.read().await;
    match state.images.get(&name) {
        Some(id) => Json(serde_json::json!({ "Id": id })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "message": format!("No such image: {name}") })),
        )
            .into_response(),
    }
}

async fn mock_tag(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Query(query): Query<TagQuery>,
) -> StatusCode {
    state
        .write()
        .await
        .tags
        .push((name, query.repo, query.tag));
    StatusCode::CREATED
}

async fn mock_push(
    State(state): State<SharedState>,
    Path((host, name)): Path<(String, String)>,
) -> impl IntoResponse {
    // Route params split the `host:port/repo` name at the slash.
    let repo = format!("{host}/{name}");
    let mut state = state.write().await;
    state.pushes.push(repo.clone());

    let mut output = format!(
        "{}\n{}\n",
        serde_json::json!({"status": format!("The push refers to repository [{repo}]")}),
        serde_json::json!({"status": "Pushed"}),
    );
    if let Some(error) = &state.push_error {
        output.push_str(&format!("{}\n", serde_json::json!({ "error": error })));
    }

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        output,
    )
}

async fn mock_remove_scoped(
    State(state): State<SharedState>,
    Path((host, name)): Path<(String, String)>,
) -> Json<serde_json::Value> {
    let reference = format!("{host}/{name}");
    state.write().await.removed.push(reference.clone());
    Json(serde_json::json!([{ "Untagged": reference }]))
}

async fn mock_remove(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Json<serde_json::Value> {
    state.write().await.removed.push(name.clone());
    Json(serde_json::json!([{ "Untagged": name }]))
}

fn create_mock_router(state: SharedState) -> Router {
    // Pushed and removed names carry a `host:port/` prefix, so those
    // routes span two path segments. Parameter names are kept identical
    // across routes sharing a position, as the router requires.
    Router::new()
        .route("/_ping", get(mock_ping))
        .route("/images/{name}/json", get(mock_inspect))
        .route("/images/{name}/tag", post(mock_tag))
        .route("/images/{name}/{repo}/push", post(mock_push))
        .route("/images/{name}/{repo}", delete(mock_remove_scoped))
        .route("/images/{name}", delete(mock_remove))
        .with_state(state)
}

/// Starts a mock daemon on a Unix socket.
async fn start_mock_server(socket_path: PathBuf) -> SharedState {
    let state = Arc::new(RwLock::new(MockState::default()));
    let router = create_mock_router(Arc::clone(&state));

    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path).expect("Failed to bind Unix socket");

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let router = router.clone();
                    tokio::spawn(async move {
                        let io = hyper_util::rt::TokioIo::new(stream);
                        let service = hyper_util::service::TowerToHyperService::new(router);
                        if let Err(e) = hyper::server::conn::http1::Builder::new()
                            .serve_connection(io, service)
                            .await
                        {
                            eprintln!("Server connection error: {e}");
                        }
                    });
                }
                Err(e) => {
                    eprintln!("Accept error: {e}");
                    break;
                }
            }
        }
    });

    // Wait for server to be ready.
    tokio::time::sleep(Duration::from_millis(50)).await;

    state
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_ping() {
    let tmp = TempDir::new().unwrap();
    let socket = tmp.path().join("docker.sock");
    let _state = start_mock_server(socket.clone()).await;

    let client = DaemonClient::with_socket(&socket);
    client.ping().await.expect("ping failed");
}

#[tokio::test]
async fn test_inspect_resolves_canonical_id() {
    let tmp = TempDir::new().unwrap();
    let socket = tmp.path().join("docker.sock");
    let state = start_mock_server(socket.clone()).await;
    state.write().await.images.insert(
        "alpine:latest".to_string(),
        "sha256:abc123def456".to_string(),
    );

    let client = DaemonClient::with_socket(&socket);
    let inspect = client.inspect_image("alpine:latest").await.unwrap();
    assert_eq!(inspect.id, "sha256:abc123def456");
}

#[tokio::test]
async fn test_inspect_unknown_image_reports_daemon_message() {
    let tmp = TempDir::new().unwrap();
    let socket = tmp.path().join("docker.sock");
    let _state = start_mock_server(socket.clone()).await;

    let client = DaemonClient::with_socket(&socket);
    let err = client.inspect_image("nosuch:latest").await.unwrap_err();
    assert!(err.to_string().contains("No such image"));
}

#[tokio::test]
async fn test_tag_push_untag_flow() {
    let tmp = TempDir::new().unwrap();
    let socket = tmp.path().join("docker.sock");
    let state = start_mock_server(socket.clone()).await;

    let client = DaemonClient::with_socket(&socket);
    let staging = "127.0.0.1:4567/layergrab-push-staging-tmp";

    client
        .tag_image("abc123def456", staging, "latest")
        .await
        .unwrap();
    client
        .tag_image("abc123def456", "layergrab-tmp", "latest")
        .await
        .unwrap();
    client.push_image(staging, "latest").await.unwrap();
    client
        .remove_image(&format!("{staging}:latest"))
        .await
        .unwrap();

    let state = state.read().await;
    assert_eq!(
        state.tags,
        vec![
            (
                "abc123def456".to_string(),
                staging.to_string(),
                "latest".to_string()
            ),
            (
                "abc123def456".to_string(),
                "layergrab-tmp".to_string(),
                "latest".to_string()
            ),
        ]
    );
    assert_eq!(state.pushes, vec![staging.to_string()]);
    assert_eq!(state.removed, vec![format!("{staging}:latest")]);
}

#[tokio::test]
async fn test_push_error_in_progress_stream_fails_the_push() {
    let tmp = TempDir::new().unwrap();
    let socket = tmp.path().join("docker.sock");
    let state = start_mock_server(socket.clone()).await;
    state.write().await.push_error = Some("mystery registry failure".to_string());

    let client = DaemonClient::with_socket(&socket);
    let err = client
        .push_image("127.0.0.1:4567/layergrab-push-staging-tmp", "latest")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("mystery registry failure"));
}
