use std::sync::Arc;

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod handlers;
pub mod telegram;

/// Build the full HTTP router.
///
/// `/send-request` and `/request-status/:id` are kept as aliases for
/// submitters that predate the `/api/v1` routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(handlers::metrics))
        .route("/api/v1/requests", post(handlers::submit_request))
        .route("/api/v1/requests/:id", get(handlers::get_request_status))
        .route(
            "/api/v1/requests/:id/decision",
            post(handlers::decide_request),
        )
        .route("/send-request", post(handlers::submit_request))
        .route("/request-status/:id", get(handlers::get_request_status))
        .route("/telegram-webhook", post(telegram::webhook))
        .fallback(fallback_404)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: injects a unique X-Request-Id into every response.
/// This allows clients to correlate errors with relay logs.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}
