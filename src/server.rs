//! Axum router construction and route mapping.
//!
//! The [`app`] function wires every endpoint to its handler and returns a
//! ready-to-serve [`axum::Router`].  Route adapters here are the only code
//! that sees axum request types: each one packs path parameters, headers
//! and the body stream into an [`Incoming`] bearer for the handler.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::TryStreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::bearer::{BoxError, Incoming, Outgoing};
use crate::errors::{generate_request_id, AssetError};
use crate::handlers::{alias, import_map, package};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

// -- OpenAPI specification ----------------------------------------------------

/// OpenAPI documentation for the assetpipe HTTP API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "assetpipe",
        version = "0.1.0",
        description = "Versioned JS/CSS asset storage with aliases and import maps"
    ),
    paths(
        health_check,
        crate::handlers::alias::get_alias,
        crate::handlers::alias::put_alias,
        crate::handlers::alias::delete_alias,
        crate::handlers::import_map::get_import_map,
        crate::handlers::import_map::put_import_map_entry,
        crate::handlers::import_map::delete_import_map_entry,
        crate::handlers::package::publish_package,
        crate::handlers::package::get_package,
        crate::handlers::package::delete_package,
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Alias", description = "Named pointers to package versions"),
        (name = "ImportMap", description = "Per-organization import maps"),
        (name = "Package", description = "Versioned artifacts"),
    )
)]
struct ApiDoc;

/// Build the axum [`Router`] with all routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/openapi.json", get(openapi_json))
        .route(
            "/a/:org/:type/:name/:alias",
            get(route_get_alias)
                .put(route_put_alias)
                .delete(route_delete_alias),
        )
        .route(
            "/import-map/:org/:type",
            get(route_get_import_map).put(route_put_import_map_entry),
        )
        .route(
            "/import-map/:org/:type/*specifier",
            axum::routing::delete(route_delete_import_map_entry),
        )
        .route(
            "/pkg/:org/:type/:name/:version",
            get(route_get_package).post(route_publish_package),
        )
        .route(
            "/pkg/:org/:type/:name/:version/:subtype/:file",
            get(route_get_package)
                .post(route_publish_package)
                .delete(route_delete_package),
        );

    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .with_state(state)
        // Layer ordering: inner layers run first, outer layers wrap them.
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        // metrics_middleware is outermost (captures full request lifecycle).
        .layer(middleware::from_fn(metrics_middleware))
}

// -- Common headers middleware -----------------------------------------------

/// Middleware that adds common response headers to every response:
/// - `x-request-id`: 16-character uppercase hex string
/// - `Date`: RFC 7231 formatted timestamp
/// - `Server`: `assetpipe`
async fn common_headers_middleware(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key("x-request-id") {
        if let Ok(request_id) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-request-id", request_id);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(date) = HeaderValue::from_str(&date) {
        headers.insert("date", date);
    }
    headers.insert("server", HeaderValue::from_static("assetpipe"));

    response
}

// -- Health check and docs ---------------------------------------------------

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Health check OK")
    )
)]
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

/// `GET /openapi.json` -- the OpenAPI document.
async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

// -- Bearer construction -----------------------------------------------------

fn incoming(params: HashMap<String, String>, headers: HeaderMap) -> Incoming {
    Incoming::new(params, headers)
}

fn incoming_with_body(params: HashMap<String, String>, headers: HeaderMap, body: Body) -> Incoming {
    let stream = body
        .into_data_stream()
        .map_err(|e| -> BoxError { Box::new(e) });
    Incoming::new(params, headers).with_body(Box::pin(stream))
}

type Params = Path<HashMap<String, String>>;
type Outcome = Result<Outgoing, AssetError>;

// -- Alias routes ------------------------------------------------------------

async fn route_get_alias(
    State(state): State<Arc<AppState>>,
    Path(params): Params,
    headers: HeaderMap,
) -> Outcome {
    alias::get_alias(state, incoming(params, headers)).await
}

async fn route_put_alias(
    State(state): State<Arc<AppState>>,
    Path(params): Params,
    headers: HeaderMap,
    body: Body,
) -> Outcome {
    alias::put_alias(state, incoming_with_body(params, headers, body)).await
}

async fn route_delete_alias(
    State(state): State<Arc<AppState>>,
    Path(params): Params,
    headers: HeaderMap,
) -> Outcome {
    alias::delete_alias(state, incoming(params, headers)).await
}

// -- Import map routes -------------------------------------------------------

async fn route_get_import_map(
    State(state): State<Arc<AppState>>,
    Path(params): Params,
    headers: HeaderMap,
) -> Outcome {
    import_map::get_import_map(state, incoming(params, headers)).await
}

async fn route_put_import_map_entry(
    State(state): State<Arc<AppState>>,
    Path(params): Params,
    headers: HeaderMap,
    body: Body,
) -> Outcome {
    import_map::put_import_map_entry(state, incoming_with_body(params, headers, body)).await
}

async fn route_delete_import_map_entry(
    State(state): State<Arc<AppState>>,
    Path(params): Params,
    headers: HeaderMap,
) -> Outcome {
    import_map::delete_import_map_entry(state, incoming(params, headers)).await
}

// -- Package routes ----------------------------------------------------------

async fn route_publish_package(
    State(state): State<Arc<AppState>>,
    Path(params): Params,
    headers: HeaderMap,
    body: Body,
) -> Outcome {
    package::publish_package(state, incoming_with_body(params, headers, body)).await
}

async fn route_get_package(
    State(state): State<Arc<AppState>>,
    Path(params): Params,
    headers: HeaderMap,
) -> Outcome {
    package::get_package(state, incoming(params, headers)).await
}

async fn route_delete_package(
    State(state): State<Arc<AppState>>,
    Path(params): Params,
    headers: HeaderMap,
) -> Outcome {
    package::delete_package(state, incoming(params, headers)).await
}

// -- Tests --------------------------------------------------------------------
