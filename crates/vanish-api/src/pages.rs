// Bare-bones HTML. Layout and styling belong to whatever front end sits in front of this.

use axum::{
    Extension, Form,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
};
use serde::Deserialize;
use tracing::error;

use vanish_types::api::{AuthContext, MagicLinkRequest};

use crate::AppState;
use crate::auth::dispatch_magic_link;
use crate::error::LifecycleError;
use crate::lifecycle::{DEFAULT_PAGE_SIZE, ReadEvent};
use crate::messages::parse_cursor;
use crate::middleware::ClientIp;

/// GET /message/{id}: opening the page is the read.
pub async fn view_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ClientIp(client_ip): ClientIp,
) -> impl IntoResponse {
    let event = ReadEvent {
        client_ip,
        viewer_email: None,
    };

    match state.lifecycle.record_read(&id, event).await {
        Ok(outcome) => {
            let notice = if outcome.deleted {
                "<p>This message has now been deleted. It will not be shown again.</p>"
            } else {
                ""
            };
            let body = format!(
                "<img src=\"{}\" alt=\"Shared image\">{}",
                escape_html(&outcome.image_url),
                notice
            );
            (StatusCode::OK, page("Message", &body))
        }
        Err(e) => {
            if let LifecycleError::Upstream(e) = e {
                error!("Upstream failure while showing message: {:#}", e);
            }
            (StatusCode::NOT_FOUND, page("Not found", "<h1>Message not found</h1>"))
        }
    }
}

/// GET /login
pub async fn login_page() -> Html<String> {
    page(
        "Sign in",
        "<h1>Sign in</h1>\
         <form method=\"post\" action=\"/login\">\
         <input type=\"email\" name=\"email\" required autofocus>\
         <button type=\"submit\">Email me a link</button>\
         </form>",
    )
}

/// POST /login: form twin of `POST /auth/magic-link`.
pub async fn login_submit(
    State(state): State<AppState>,
    Form(req): Form<MagicLinkRequest>,
) -> Html<String> {
    dispatch_magic_link(&state, &req.email).await;
    page(
        "Check your inbox",
        "<p>If that address may sign in, a link is on its way.</p>",
    )
}

#[derive(Debug, Deserialize)]
pub struct AdminQuery {
    pub before: Option<String>,
}

/// GET /admin?before=: listing table, one page at a time.
pub async fn admin_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<AdminQuery>,
) -> impl IntoResponse {
    let before = match parse_cursor(query.before.as_deref()) {
        Ok(before) => before,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                page("Error", "<p class=\"alert\">Bad page cursor.</p>"),
            );
        }
    };

    let listing = match state.lifecycle.list_messages(DEFAULT_PAGE_SIZE, before).await {
        Ok(listing) => listing,
        Err(e) => {
            if let LifecycleError::Upstream(e) = e {
                error!("Failed to list messages: {:#}", e);
            }
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                page("Error", "<p class=\"alert\">Could not load messages.</p>"),
            );
        }
    };

    let mut rows = String::new();
    for item in &listing.messages {
        let m = &item.message;
        let link = state.lifecycle.share_link(m.id);
        let policy = match (m.auto_delete, m.expire_at) {
            (true, Some(at)) => format!("burn after reading, expires {}", at.format("%Y-%m-%d %H:%M")),
            (true, None) => "burn after reading".to_string(),
            (false, Some(at)) => format!("expires {}", at.format("%Y-%m-%d %H:%M")),
            (false, None) => "permanent".to_string(),
        };
        rows.push_str(&format!(
            "<tr><td><a href=\"{link}\">{id}</a></td><td>{views}</td><td>{read}</td>\
             <td>{last}</td><td>{ip}</td><td>{email}</td><td>{policy}</td><td>{status}</td></tr>",
            link = escape_html(&link),
            id = m.id,
            views = m.views,
            read = if m.is_read { "yes" } else { "no" },
            last = m
                .last_read_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default(),
            ip = escape_html(m.client_ip.as_deref().unwrap_or_default()),
            email = escape_html(m.viewer_email.as_deref().unwrap_or_default()),
            policy = escape_html(&policy),
            status = if item.expired { "expired" } else { "live" },
        ));
    }

    let older = match &listing.next {
        Some(next) => format!("<p><a href=\"/admin?before={}\">Older messages</a></p>", escape_html(next)),
        None => String::new(),
    };

    let body = format!(
        "<h1>Messages</h1><p>Signed in as {}</p>\
         <table><thead><tr><th>Link</th><th>Views</th><th>Read</th><th>Last read</th>\
         <th>IP</th><th>Viewer email</th><th>Policy</th><th>Status</th></tr></thead>\
         <tbody>{}</tbody></table>{}",
        escape_html(&ctx.identity),
        rows,
        older
    );
    (StatusCode::OK, page("Messages", &body))
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!doctype html><html><head><meta charset=\"utf-8\">\
         <meta name=\"referrer\" content=\"no-referrer\">\
         <title>{} · vanish</title></head><body>{}</body></html>",
        escape_html(title),
        body
    ))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
