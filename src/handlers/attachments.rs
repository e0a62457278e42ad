use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::extractors::Query;

#[derive(Debug, Deserialize)]
pub struct AttachmentQuery {
    /// SHA-256 of the attachment payload, handed out alongside the ID.
    /// Wrong or missing hash gets the same 404 as a nonexistent ID.
    pub h: Option<String>,
}

/// GET /api/ticket-attachments/{id} - serve an inbound email attachment.
pub async fn download_attachment(
    State(state): State<AppState>,
    Path(attachment_id): Path<String>,
    Query(query): Query<AttachmentQuery>,
) -> Result<Response> {
    let conn = state.db.get()?;
    let attachment = queries::get_attachment(&conn, &attachment_id)?
        .ok_or_else(|| AppError::NotFound("Attachment not found".into()))?;

    let supplied = query.h.unwrap_or_default();
    if supplied
        .as_bytes()
        .ct_eq(attachment.hash.as_bytes())
        .unwrap_u8()
        != 1
    {
        return Err(AppError::NotFound("Attachment not found".into()));
    }

    Ok((
        [
            (header::CONTENT_TYPE, attachment.content_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", attachment.filename),
            ),
            (
                header::CACHE_CONTROL,
                "private, max-age=31536000, immutable".to_string(),
            ),
        ],
        attachment.data,
    )
        .into_response())
}
