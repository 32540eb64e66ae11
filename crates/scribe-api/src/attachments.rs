use anyhow::Context;
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderValue, header},
    response::IntoResponse,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

use scribe_types::api::AttachmentMeta;

use crate::error::ApiError;
use crate::state::AppState;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// GET /attachments/{id}: metadata only, the payload stays in the database.
pub async fn get_attachment(
    State(state): State<AppState>,
    Path(attachment_id): Path<String>,
) -> Result<Json<AttachmentMeta>, ApiError> {
    let db = state.db.clone();
    let aid = attachment_id.clone();
    let row = tokio::task::spawn_blocking(move || db.get_attachment_meta(&aid))
        .await??
        .ok_or_else(|| ApiError::NotFound(format!("attachment {}", attachment_id)))?;

    Ok(Json(AttachmentMeta {
        id: row.id,
        filename: row.filename,
        size: u64::try_from(row.size).unwrap_or(0),
        content_type: row.content_type,
    }))
}

/// GET /attachments/{id}/raw: decoded bytes under the stored content type.
pub async fn get_attachment_raw(
    State(state): State<AppState>,
    Path(attachment_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let aid = attachment_id.clone();
    let row = tokio::task::spawn_blocking(move || db.get_attachment(&aid))
        .await??
        .ok_or_else(|| ApiError::NotFound(format!("attachment {}", attachment_id)))?;

    let bytes = B64
        .decode(row.data.as_bytes())
        .with_context(|| format!("attachment {} has corrupt payload", row.id))?;

    let content_type = HeaderValue::from_str(&row.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_CONTENT_TYPE));

    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}
