//! HTTP surface for the diagram store.
//!
//! Requires the `http` feature. Uses axum for routing.
//!
//! ## Routes
//!
//! - `GET /api/health` - `{ "status": "ok" }`.
//! - `GET|PUT /api/config` - global settings map; PUT merges keys.
//! - `GET /api/diagrams[?full=1]` - metas, or full payloads.
//! - `POST /api/diagrams` - create, 201 with the normalized diagram.
//! - `GET|PUT|PATCH|DELETE /api/diagrams/:id` - get, replace, patch, delete.
//! - `GET|PUT|DELETE /api/diagrams/:id/filter` - per-diagram filter.
//! - `GET /api/diagrams/:id/versions` - version summaries, newest first.
//! - `GET /api/diagrams/:id/versions/:versionId` - one version's payload.
//! - `POST /api/diagrams/:id/versions/:versionId/restore` - restore it.
//!
//! Errors come back as `{ "error": "<message>" }` with the status from
//! `StoreError::status_code()`. Every response carries permissive CORS
//! headers and `OPTIONS` on any path answers 204.
//!
//! ## Example
//!
//! ```ignore
//! use diagram_ledger::{http, DiagramStore};
//!
//! let store = DiagramStore::open("/data/chartdb.sqlite", 100)?;
//!
//! // Get the router to compose with other axum routes
//! let app = http::router(store.clone());
//!
//! // Or serve directly
//! http::serve(store, "0.0.0.0:8080").await?;
//! ```

mod handlers;

use axum::extract::{DefaultBodyLimit, Request};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::store::DiagramStore;

/// Largest request body accepted. Full diagrams can run well past axum's
/// 2 MiB default.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

const ALLOW_METHODS: &str = "GET,POST,PUT,PATCH,DELETE,OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type,Authorization";

/// Build an axum `Router` serving the given store.
pub fn router(store: DiagramStore) -> Router {
    Router::new()
        .route(
            "/api/health",
            get(handlers::health).fallback(method_not_allowed),
        )
        .route(
            "/api/config",
            get(handlers::get_config)
                .put(handlers::put_config)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/diagrams",
            get(handlers::list_diagrams)
                .post(handlers::create_diagram)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/diagrams/:id",
            get(handlers::get_diagram)
                .put(handlers::replace_diagram)
                .patch(handlers::patch_diagram)
                .delete(handlers::delete_diagram)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/diagrams/:id/filter",
            get(handlers::get_filter)
                .put(handlers::put_filter)
                .delete(handlers::delete_filter)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/diagrams/:id/versions",
            get(handlers::list_versions).fallback(method_not_allowed),
        )
        .route(
            "/api/diagrams/:id/versions/:version_id",
            get(handlers::get_version).fallback(handlers::version_method_not_allowed),
        )
        .route(
            "/api/diagrams/:id/versions/:version_id/restore",
            post(handlers::restore_version).fallback(handlers::version_method_not_allowed),
        )
        .fallback(route_not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn(cors))
        .with_state(store)
}

/// Serve the store over HTTP at the given address (e.g. `"0.0.0.0:8080"`).
pub async fn serve(store: DiagramStore, addr: &str) -> Result<(), std::io::Error> {
    let app = router(store);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "diagram store listening");
    axum::serve(listener, app).await
}

// =============================================================================
// Errors
// =============================================================================

/// A `StoreError` on its way out as an HTTP response.
pub struct ApiError(pub StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub(crate) type ApiResult<T> = Result<T, ApiError>;

async fn method_not_allowed() -> ApiError {
    ApiError(StoreError::MethodNotAllowed)
}

async fn route_not_found() -> ApiError {
    ApiError(StoreError::not_found("route not found"))
}

// =============================================================================
// CORS
// =============================================================================

async fn cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    response
}
