use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use bytes::Bytes;
use serde::Deserialize;
use tracing::{info, warn};

use vanish_types::api::{
    AuthContext, CreateMessageResponse, DeleteMessageResponse, ListCursor, ReadMessageResponse,
};
use vanish_types::models::Policy;

use crate::AppState;
use crate::error::{ApiError, LifecycleError};
use crate::lifecycle::{DEFAULT_PAGE_SIZE, ReadEvent, Upload};
use crate::middleware::ClientIp;

#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination: pass `next` from the previous page to fetch
    /// older messages.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_SIZE
}

/// Parse an optional listing cursor from the query string.
pub(crate) fn parse_cursor(raw: Option<&str>) -> Result<Option<ListCursor>, ApiError> {
    raw.filter(|s| !s.is_empty())
        .map(|s| s.parse::<ListCursor>().map_err(|e| ApiError::BadRequest(e.to_string())))
        .transpose()
}

/// POST /messages: multipart form with a `file` part plus optional
/// `autoDelete` and `ttlDays` fields.
pub async fn create_message(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut file: Option<(Bytes, String, String)> = None;
    let mut auto_delete = false;
    let mut ttl_days: i64 = 0;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "image" => {
                let file_name = field.file_name().unwrap_or("image").to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(bad_multipart)?;
                file = Some((data, file_name, content_type));
            }
            "autoDelete" => {
                let raw = field.text().await.map_err(bad_multipart)?;
                auto_delete = parse_flag(&raw)
                    .ok_or_else(|| ApiError::BadRequest("autoDelete must be a boolean".into()))?;
            }
            "ttlDays" => {
                let raw = field.text().await.map_err(bad_multipart)?;
                let raw = raw.trim();
                ttl_days = if raw.is_empty() {
                    0
                } else {
                    raw.parse()
                        .map_err(|_| ApiError::BadRequest("ttlDays must be an integer".into()))?
                };
            }
            other => warn!("Ignoring unexpected upload field '{}'", other),
        }
    }

    let (data, file_name, content_type) =
        file.ok_or_else(|| ApiError::BadRequest("image file is required".into()))?;
    let policy = Policy::new(auto_delete, ttl_days).map_err(LifecycleError::from)?;

    let created = state
        .lifecycle
        .create_message(
            Upload {
                data,
                file_name,
                content_type,
            },
            policy,
        )
        .await?;

    info!("Message {} uploaded by {}", created.id, ctx.identity);

    Ok((
        StatusCode::CREATED,
        Json(CreateMessageResponse {
            id: created.id,
            link: created.link,
        }),
    ))
}

/// GET /messages?limit=&before=: admin listing, newest first.
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(_ctx): Extension<AuthContext>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let before = parse_cursor(query.before.as_deref())?;
    let page = state.lifecycle.list_messages(query.limit, before).await?;
    Ok(Json(page))
}

/// GET /messages/{id}/read: count a read (or consume a burn-after-reading
/// message) and hand back the image URL.
pub async fn read_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ReadQuery>,
    ClientIp(client_ip): ClientIp,
) -> Result<Json<ReadMessageResponse>, ApiError> {
    let outcome = state
        .lifecycle
        .record_read(
            &id,
            ReadEvent {
                client_ip,
                viewer_email: query.email,
            },
        )
        .await?;

    Ok(Json(ReadMessageResponse {
        image_url: outcome.image_url,
    }))
}

/// DELETE /messages/{id}
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<DeleteMessageResponse>, ApiError> {
    state.lifecycle.delete_message(&id).await?;
    info!("Message {} deleted by {}", id, ctx.identity);
    Ok(Json(DeleteMessageResponse { success: true }))
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> ApiError {
    warn!("Malformed upload: {}", e);
    ApiError::BadRequest("malformed upload".into())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Some(true),
        "false" | "0" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}
