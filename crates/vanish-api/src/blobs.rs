use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::IntoResponse,
};
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tracing::{error, warn};

use vanish_storage::SignatureError;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub exp: i64,
    pub sig: String,
}

/// GET /blobs/{*path}: serve a stored image to holders of a valid signed URL.
pub async fn serve_blob(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let blobs = state.lifecycle.blobs().clone();

    blobs
        .verify(&path, query.exp, &query.sig, Utc::now())
        .map_err(|e| {
            match e {
                SignatureError::Expired => warn!("Expired blob URL for {}", path),
                SignatureError::Invalid => warn!("Bad blob signature for {}", path),
            }
            StatusCode::FORBIDDEN
        })?;

    let blob = blobs
        .open(&path)
        .await
        .map_err(|e| {
            error!("Failed to open blob {}: {:#}", path, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let content_length = blob.len;
    let mut reader = blob.reader;

    let stream = async_stream::stream! {
        let mut remaining = content_length;
        let mut buf = vec![0u8; 64 * 1024]; // 64 KB read buffer
        while remaining > 0 {
            let to_read = (remaining as usize).min(buf.len());
            match reader.read(&mut buf[..to_read]).await {
                Ok(0) => break,
                Ok(n) => {
                    remaining -= n as u64;
                    yield Ok::<_, std::io::Error>(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(blob.content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(content_length));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("private, no-store"));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));

    Ok((StatusCode::OK, headers, Body::from_stream(stream)))
}
