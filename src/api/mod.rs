//! HTTP surface: admin CRUD for flags, rules, segments, and API keys;
//! client evaluation endpoints; and the SSE change stream.

pub mod apikeys;
pub mod auth;
pub mod error;
pub mod evaluate;
pub mod flags;
pub mod rules;
pub mod segments;
pub mod stream;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use log::{info, warn};

use crate::broadcast::Broadcaster;
use crate::store::Store;

pub use error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub broadcaster: Arc<Broadcaster>,
    /// Bearer token for admin routes; None disables auth (dev mode).
    pub master_key: Option<String>,
}

/// Build the full API router.
pub fn router(state: AppState, cors_enabled: bool) -> Router {
    let mut router = Router::new()
        // Flags
        .route("/api/v1/flags", post(flags::create).get(flags::list))
        .route(
            "/api/v1/flags/{key}",
            get(flags::get_one).put(flags::update).delete(flags::remove),
        )
        .route("/api/v1/flags/{key}/toggle", patch(flags::toggle))
        // Rules
        .route("/api/v1/flags/{key}/rules", post(rules::create))
        .route(
            "/api/v1/flags/{key}/rules/{rule_id}",
            put(rules::update).delete(rules::remove),
        )
        // Segments
        .route(
            "/api/v1/segments",
            post(segments::create).get(segments::list),
        )
        .route(
            "/api/v1/segments/{key}",
            get(segments::get_one)
                .put(segments::update)
                .delete(segments::remove),
        )
        // API keys
        .route(
            "/api/v1/api-keys",
            post(apikeys::create).get(apikeys::list),
        )
        .route("/api/v1/api-keys/{id}", delete(apikeys::revoke))
        // Evaluation + change stream
        .route("/api/v1/evaluate", post(evaluate::evaluate_one))
        .route("/api/v1/evaluate/batch", post(evaluate::evaluate_batch))
        .route("/api/v1/stream", get(stream::stream))
        .layer(middleware::from_fn(log_requests))
        .with_state(state);

    if cors_enabled {
        router = router.layer(middleware::from_fn(cors));
    }
    router
}

/// One log line per request. SSE connections are long-lived; they get a line
/// on connect instead of on completion.
async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let is_stream = req
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"));

    if is_stream {
        info!("{method} {path} stream connected");
        return next.run(req).await;
    }

    let start = Instant::now();
    let response = next.run(req).await;
    let status = response.status();
    let elapsed = start.elapsed();

    if status.is_server_error() {
        log::error!("{method} {path} {} {elapsed:?}", status.as_u16());
    } else if status.is_client_error() {
        warn!("{method} {path} {} {elapsed:?}", status.as_u16());
    } else {
        info!("{method} {path} {} {elapsed:?}", status.as_u16());
    }
    response
}

async fn cors(req: Request, next: Next) -> Response {
    let preflight = req.method() == Method::OPTIONS;

    let mut response = if preflight {
        Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(axum::body::Body::empty())
            .unwrap_or_default()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization, Accept"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("300"),
    );
    response
}
