use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, ApiResult};
use crate::diagram::{parse_payload, Payload};
use crate::error::StoreError;
use crate::store::{DiagramStore, VersionSummary};

/// `GET /api/health`
pub(super) async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// =============================================================================
// Config
// =============================================================================

pub(super) async fn get_config(State(store): State<DiagramStore>) -> ApiResult<Json<Payload>> {
    let config = store.run(|store| store.get_config()).await?;
    Ok(Json(config))
}

pub(super) async fn put_config(
    State(store): State<DiagramStore>,
    body: Bytes,
) -> ApiResult<Json<Payload>> {
    let update = parse_payload(&body)?;
    let config = store.run(move |store| store.set_config(update)).await?;
    Ok(Json(config))
}

// =============================================================================
// Diagrams
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub(super) struct ListQuery {
    full: Option<String>,
}

impl ListQuery {
    fn wants_full(&self) -> bool {
        matches!(self.full.as_deref(), Some("1") | Some("true"))
    }
}

/// `GET /api/diagrams[?full=1]`
pub(super) async fn list_diagrams(
    State(store): State<DiagramStore>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    if query.wants_full() {
        let payloads = store.run(|store| store.list_full()).await?;
        return Ok(Json(payloads).into_response());
    }
    let metas = store.run(|store| store.list_metas()).await?;
    Ok(Json(metas).into_response())
}

pub(super) async fn create_diagram(
    State(store): State<DiagramStore>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Payload>)> {
    let payload = parse_payload(&body)?;
    let saved = store.run(move |store| store.create(payload)).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

pub(super) async fn get_diagram(
    State(store): State<DiagramStore>,
    Path(id): Path<String>,
) -> ApiResult<Json<Payload>> {
    let payload = store.run(move |store| store.get(&id)).await?;
    Ok(Json(payload))
}

pub(super) async fn replace_diagram(
    State(store): State<DiagramStore>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Payload>> {
    let payload = parse_payload(&body)?;
    let saved = store.run(move |store| store.replace(&id, payload)).await?;
    Ok(Json(saved))
}

pub(super) async fn patch_diagram(
    State(store): State<DiagramStore>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Payload>> {
    let partial = parse_payload(&body)?;
    let saved = store.run(move |store| store.patch(&id, partial)).await?;
    Ok(Json(saved))
}

/// Always 204, whether or not the diagram existed.
pub(super) async fn delete_diagram(
    State(store): State<DiagramStore>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    store.run(move |store| store.delete(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Filters
// =============================================================================

pub(super) async fn get_filter(
    State(store): State<DiagramStore>,
    Path(id): Path<String>,
) -> ApiResult<Json<Payload>> {
    let filter = store.run(move |store| store.get_filter(&id)).await?;
    Ok(Json(filter))
}

pub(super) async fn put_filter(
    State(store): State<DiagramStore>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Payload>> {
    let filter = parse_payload(&body)?;
    let saved = store.run(move |store| store.set_filter(&id, filter)).await?;
    Ok(Json(saved))
}

pub(super) async fn delete_filter(
    State(store): State<DiagramStore>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    store.run(move |store| store.delete_filter(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Versions
// =============================================================================

fn version_id(raw: &str) -> Result<i64, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::validation("invalid version id"))
}

/// Wrong verb on a version route. A malformed version id is reported
/// before the method.
pub(super) async fn version_method_not_allowed(
    Path((_, raw_version)): Path<(String, String)>,
) -> ApiError {
    match version_id(&raw_version) {
        Ok(_) => ApiError(StoreError::MethodNotAllowed),
        Err(err) => ApiError(err),
    }
}

pub(super) async fn list_versions(
    State(store): State<DiagramStore>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<VersionSummary>>> {
    let versions = store.run(move |store| store.list_versions(&id)).await?;
    Ok(Json(versions))
}

pub(super) async fn get_version(
    State(store): State<DiagramStore>,
    Path((id, raw_version)): Path<(String, String)>,
) -> ApiResult<Json<Payload>> {
    let version = version_id(&raw_version)?;
    let payload = store
        .run(move |store| store.get_version_payload(&id, version))
        .await?;
    Ok(Json(payload))
}

pub(super) async fn restore_version(
    State(store): State<DiagramStore>,
    Path((id, raw_version)): Path<(String, String)>,
) -> ApiResult<Json<Payload>> {
    let version = version_id(&raw_version)?;
    let restored = store.run(move |store| store.restore(&id, version)).await?;
    Ok(Json(restored))
}
