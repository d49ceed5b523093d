pub mod auth;
pub mod blobs;
pub mod error;
pub mod lifecycle;
pub mod messages;
pub mod middleware;
pub mod pages;
pub mod reaper;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{StatusCode, header},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

use crate::auth::IdentityProvider;
use crate::lifecycle::{Lifecycle, MAX_IMAGE_SIZE};
use crate::middleware::{require_admin, require_admin_page};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub lifecycle: Lifecycle,
    pub identity: IdentityProvider,
    /// Take the reader's address from `X-Forwarded-For`. Only safe behind a
    /// reverse proxy that overwrites the header.
    pub trust_proxy: bool,
}

/// Room for multipart framing and the policy fields around the image.
const UPLOAD_OVERHEAD: usize = 64 * 1024;

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/messages/{id}/read", get(messages::read_message).head(head_without_read))
        .route("/message/{id}", get(pages::view_message).head(head_without_read))
        .route("/blobs/{*path}", get(blobs::serve_blob))
        .route("/auth/magic-link", post(auth::request_magic_link))
        .route("/auth/callback", get(auth::callback))
        .route("/auth/logout", post(auth::logout))
        .route("/login", get(pages::login_page).post(pages::login_submit))
        .route("/health", get(health));

    let admin_routes = Router::new()
        .route("/messages", post(messages::create_message).get(messages::list_messages))
        .route("/messages/{id}", delete(messages::delete_message))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_SIZE + UPLOAD_OVERHEAD))
        .route_layer(from_fn_with_state(state.clone(), require_admin));

    let admin_pages = Router::new()
        .route("/admin", get(pages::admin_page))
        .route_layer(from_fn_with_state(state.clone(), require_admin_page));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .merge(admin_pages)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HEAD on a read route. Link checkers and chat previewers send these before
/// the recipient opens the link, so they must not count as the read.
async fn head_without_read() -> impl IntoResponse {
    (StatusCode::OK, [(header::CACHE_CONTROL, "no-store")])
}

/// GET /health: liveness check (no auth).
async fn health() -> &'static str {
    "ok"
}
