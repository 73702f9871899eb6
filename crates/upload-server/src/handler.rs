//! Request handlers.
//!
//! The engine does blocking filesystem I/O, so every call into it runs on
//! the blocking thread pool.

use axum::body::Bytes;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::UploadError;
use crate::server::AppState;
use crate::validation::{check_chunk_position, check_extension};

/// Fields of the upload form, as received.
#[derive(Default)]
struct UploadForm {
    file: Option<(String, Bytes)>,
    index: Option<i64>,
    total_count: Option<i64>,
}

impl UploadForm {
    async fn read(multipart: &mut Multipart) -> Result<Self, UploadError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    let file_name = field.file_name().unwrap_or_default().to_string();
                    let data = field.bytes().await?;
                    form.file = Some((file_name, data));
                }
                "index" => form.index = Some(parse_number("index", &field.text().await?)?),
                "totalCount" => {
                    form.total_count = Some(parse_number("totalCount", &field.text().await?)?);
                }
                _ => {}
            }
        }
        Ok(form)
    }
}

fn parse_number(field: &str, value: &str) -> Result<i64, UploadError> {
    value
        .trim()
        .parse()
        .map_err(|_| UploadError::BadRequest(format!("{field} must be an integer")))
}

/// `POST /api/upload`
pub(crate) async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<StatusCode, UploadError> {
    let form = UploadForm::read(&mut multipart).await?;

    let (index, total_count) =
        check_chunk_position(form.index.unwrap_or(0), form.total_count.unwrap_or(0))?;

    let Some((file_name, data)) = form.file else {
        return Err(UploadError::BadRequest("file is null".into()));
    };
    if file_name.is_empty() || data.is_empty() {
        return Err(UploadError::BadRequest("file is null".into()));
    }

    check_extension(&file_name, &state.allowed_extensions)?;

    let engine = state.engine.clone();
    let name = file_name.clone();
    let accepted = tokio::task::spawn_blocking(move || {
        engine.receive_chunk(&name, index, total_count, &data[..])
    })
    .await
    .map_err(|e| UploadError::Internal(format!("upload task failed: {e}")))??;

    tracing::info!(
        file = %file_name,
        index,
        total_count,
        bytes = accepted.bytes,
        merge = ?accepted.merge,
        "chunk accepted"
    );
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub(crate) struct HashQuery {
    #[serde(rename = "fileName")]
    file_name: String,
}

/// `GET /api/upload/hash?fileName=`
pub(crate) async fn artifact_hash(
    State(state): State<AppState>,
    Query(query): Query<HashQuery>,
) -> Result<String, UploadError> {
    let engine = state.engine.clone();
    let name = query.file_name.clone();
    let digest = tokio::task::spawn_blocking(move || engine.artifact_digest(&name))
        .await
        .map_err(|e| UploadError::Internal(format!("hash task failed: {e}")))??;

    digest.ok_or_else(|| UploadError::NotFound(format!("{} not found", query.file_name)))
}
