//! Request handlers for the shim registry.
//!
//! The daemon drives one layer push through these: announce the repository,
//! upload metadata, stream the blob, report a checksum, then bind tags and
//! finalize. Every handler is keyed by the layer identifier in the path and
//! safe under concurrent invocation; writes for one identifier are
//! serialized by its session lock.

use crate::api::AppState;
use crate::error::{Result, ShimError};
use crate::layout;
use crate::session::{PushEvent, PushState};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;

/// Registry version advertised on the ping endpoint.
const REGISTRY_VERSION: &str = "0.6.5";

/// Header carrying a layer checksum in either direction.
const CHECKSUM_HEADER: &str = "X-Docker-Checksum-Payload";

// ============================================================================
// Liveness
// ============================================================================

/// Ping handler; succeeds as soon as the listener is wired up.
pub async fn ping() -> impl IntoResponse {
    ([("X-Docker-Registry-Version", REGISTRY_VERSION)], "true")
}

// ============================================================================
// Image artifact handlers
// ============================================================================

/// Returns persisted layer metadata.
///
/// Answers 404 until the layer is `Persisted`, which is what tells the
/// pushing daemon the layer is missing and must be uploaded. After
/// persistence the stored bytes are returned so a replayed push can skip
/// the upload.
pub async fn get_image_json(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let session = state.session.session(&id);
    let session = session.lock().await;

    if session.state == PushState::Persisted {
        if let Some(bytes) = state.layout.read_metadata(&id)? {
            return Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                bytes,
            )
                .into_response());
        }
    }

    Err(ShimError::UnknownImage(id))
}

/// Stores layer metadata as sent by the daemon.
///
/// The bytes are persisted verbatim; the shim's contract is to accept
/// whatever is well-formed enough to proceed, not to validate registry
/// semantics.
pub async fn put_image_json(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<&'static str> {
    let session = state.session.session(&id);
    let mut session = session.lock().await;

    if session.state == PushState::Persisted {
        return match state.layout.read_metadata(&id)? {
            Some(existing) if existing == body => Ok("true"),
            _ => Err(ShimError::Conflict(format!("{id}/json"))),
        };
    }

    state.layout.ensure_prepared(&id)?;
    state.layout.write_metadata(&id, &body)?;
    session.advance(PushEvent::Metadata);
    session.finalize(state.layout.stores_checksum());

    tracing::debug!(layer = %id, bytes = body.len(), "metadata stored");
    Ok("true")
}

/// Streams the layer blob to disk, hashing as bytes arrive.
///
/// Pipelined daemons may send the blob before the metadata; the layer
/// directory is created lazily in that case rather than rejecting the
/// upload.
pub async fn put_image_layer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Body,
) -> Result<Response> {
    let session = state.session.session(&id);
    let mut session = session.lock().await;

    if session.state == PushState::Persisted {
        // Replay: verify against the recorded digest without rewriting.
        let digest = layout::digest_body(body).await?;
        if session.blob_digest.as_deref() == Some(digest.as_str()) {
            return Ok(checksum_ack(&digest));
        }
        return Err(ShimError::Conflict(format!("{id}/layer")));
    }

    state.layout.ensure_prepared(&id)?;
    let digest = state.layout.write_blob(&id, body).await?;

    session.blob_digest = Some(digest.clone());
    session.advance(PushEvent::Blob);
    session.finalize(state.layout.stores_checksum());

    tracing::debug!(layer = %id, digest = %digest, "blob persisted");
    Ok(checksum_ack(&digest))
}

/// Records the layer checksum.
///
/// The daemon sends its checksum in the payload header (or body). When
/// neither is present the shim reports the digest it computed during blob
/// receipt instead.
pub async fn put_image_checksum(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let supplied = headers
        .get(CHECKSUM_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .or_else(|| {
            let text = String::from_utf8_lossy(&body).trim().to_string();
            (!text.is_empty()).then_some(text)
        });

    let session = state.session.session(&id);
    let mut session = session.lock().await;

    if session.state == PushState::Persisted {
        let value = supplied
            .as_deref()
            .or_else(|| session.reported_checksum())
            .map(String::from)
            .ok_or_else(|| ShimError::UnknownImage(id.clone()))?;
        return Ok(checksum_ack(&value));
    }

    let value = match supplied {
        Some(value) => {
            session.client_checksum = Some(value.clone());
            value
        }
        None => session
            .reported_checksum()
            .map(String::from)
            .ok_or_else(|| {
                ShimError::InvalidRequest(format!(
                    "no checksum supplied and no blob received for {id}"
                ))
            })?,
    };

    state.layout.ensure_prepared(&id)?;
    state.layout.write_checksum(&id, &value)?;
    session.advance(PushEvent::Checksum);
    session.finalize(state.layout.stores_checksum());

    tracing::debug!(layer = %id, checksum = %value, "checksum recorded");
    Ok(checksum_ack(&value))
}

fn checksum_ack(checksum: &str) -> Response {
    (
        StatusCode::OK,
        [(CHECKSUM_HEADER, checksum.to_string())],
        "true",
    )
        .into_response()
}

// ============================================================================
// Repository handlers
// ============================================================================

/// Action encoded in a `/v1/repositories/...` path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RepoAction {
    /// `{repo}/` — push announcement.
    Root,
    /// `{repo}/images` — push finalization (PUT) or image list (GET).
    Images,
    /// `{repo}/tags` — tag listing.
    TagList,
    /// `{repo}/tags/{tag}` — one tag binding.
    Tag(String),
}

/// Splits a repository path into its repo name and trailing action.
///
/// Repo names carry at most one namespace segment (`ns/repo`), so the
/// subtree is matched with a wildcard and taken apart here.
fn parse_repository_path(rest: &str) -> Option<(String, RepoAction)> {
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    let (repo_len, action) = match segments.as_slice() {
        [] => return None,
        [.., "images"] => (segments.len() - 1, RepoAction::Images),
        [.., "tags"] => (segments.len() - 1, RepoAction::TagList),
        [.., "tags", tag] => (segments.len() - 2, RepoAction::Tag((*tag).to_string())),
        _ => (segments.len(), RepoAction::Root),
    };

    if repo_len == 0 {
        return None;
    }
    Some((segments[..repo_len].join("/"), action))
}

/// PUT dispatch for the repository subtree.
pub async fn repository_put(
    State(state): State<AppState>,
    Path(rest): Path<String>,
    body: Bytes,
) -> Result<Response> {
    let (repo, action) = parse_repository_path(&rest)
        .ok_or_else(|| ShimError::InvalidRequest(format!("bad repository path: {rest}")))?;

    match action {
        RepoAction::Root => {
            tracing::debug!(repo = %repo, "push announced");
            Ok((
                StatusCode::OK,
                [
                    (
                        "X-Docker-Token",
                        format!("signature=fake,repository={repo},access=write"),
                    ),
                    ("X-Docker-Endpoints", state.endpoint.clone()),
                ],
                "\"OK\"",
            )
                .into_response())
        }
        RepoAction::Images => {
            tracing::debug!(repo = %repo, "push finalized");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        RepoAction::Tag(tag) => {
            let id: String = serde_json::from_slice(&body).map_err(|e| {
                ShimError::InvalidRequest(format!("tag body is not a JSON string: {e}"))
            })?;
            let expected = state
                .session
                .layer_id()
                .ok_or_else(|| ShimError::UnknownImage(format!("{repo}:{tag}")))?;
            if id != expected {
                return Err(ShimError::IdentifierMismatch { expected, got: id });
            }
            tracing::debug!(repo = %repo, tag = %tag, "tag bound");
            Ok((StatusCode::OK, "true").into_response())
        }
        RepoAction::TagList => Err(ShimError::InvalidRequest(
            "cannot PUT a tag listing".to_string(),
        )),
    }
}

/// GET dispatch for the repository subtree.
///
/// The shim has no real namespace: any repository or tag name the
/// orchestrator assigned resolves to the single exported identifier.
pub async fn repository_get(
    State(state): State<AppState>,
    Path(rest): Path<String>,
) -> Result<Response> {
    let (repo, action) = parse_repository_path(&rest)
        .ok_or_else(|| ShimError::InvalidRequest(format!("bad repository path: {rest}")))?;

    let layer_id = state
        .session
        .layer_id()
        .ok_or_else(|| ShimError::UnknownImage(repo.clone()))?;

    match action {
        RepoAction::Tag(_) => Ok(Json(layer_id).into_response()),
        RepoAction::TagList => {
            Ok(Json(serde_json::json!({ "latest": layer_id })).into_response())
        }
        RepoAction::Root | RepoAction::Images => Err(ShimError::UnknownImage(repo)),
    }
}
