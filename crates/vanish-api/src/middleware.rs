use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;

use vanish_types::api::AuthContext;

use crate::AppState;
use crate::auth::SESSION_COOKIE;
use crate::error::ApiError;

/// Verify the session once, at the edge. Bearer header wins over the cookie.
fn session_context(state: &AppState, headers: &HeaderMap, jar: &CookieJar) -> Result<AuthContext, ApiError> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    let token = match bearer {
        Some(token) => token.to_string(),
        None => jar
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .ok_or(ApiError::Unauthorized)?,
    };

    let ctx = state.identity.authenticate(&token)?;
    if !ctx.is_admin {
        return Err(ApiError::Forbidden);
    }
    Ok(ctx)
}

/// API routes: JSON 401/403 on failure, `AuthContext` extension on success.
pub async fn require_admin(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx = session_context(&state, req.headers(), &jar)?;
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Page routes: anyone without an admin session is sent to sign in.
pub async fn require_admin_page(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    match session_context(&state, req.headers(), &jar) {
        Ok(ctx) => {
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(_) => Redirect::to("/login").into_response(),
    }
}

/// Network origin of the reader: the socket peer, or the first
/// `X-Forwarded-For` hop when the server is configured to sit behind a proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub Option<String>);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(client_ip(parts, state.trust_proxy)))
    }
}

/// Without a trusted proxy in front, `X-Forwarded-For` is whatever the
/// client chose to send and is ignored.
fn client_ip(parts: &Parts, trust_proxy: bool) -> Option<String> {
    let forwarded = || {
        parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
    };

    let peer = || {
        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    };

    if trust_proxy {
        forwarded().or_else(peer)
    } else {
        peer()
    }
}
