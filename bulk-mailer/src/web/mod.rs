//! HTTP front end for the mailer.
//!
//! Endpoints:
//! - `GET /health`
//! - `GET /api/config/status`: validity and masked sender, never credentials
//! - `POST /api/emails/parse`: extraction preview
//! - `GET /api/cover-letter`: rendered subject and body
//! - `POST /api/emails/send`: multipart form with the recipient list, mode
//!   and an optional CV upload; sends and returns the report

pub mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    config_status, cover_letter, health, parse_emails, parse_recipients, send_batch, send_emails,
    AppState, ErrorResponse, HealthResponse, ParseRequest, ParseResponse, SendRequest,
    SendResponse,
};

/// Largest accepted request body, sized for a CV upload.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/config/status", get(config_status))
        .route("/api/emails/parse", post(parse_emails))
        .route("/api/cover-letter", get(cover_letter))
        .route(
            "/api/emails/send",
            post(send_emails).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
