//! HTTP handlers for the song library.
//! Thin wrappers: parse the request, call `LibraryService`, shape the JSON.

use crate::{
    errors::AppError,
    models::{
        credential::AccessGrant,
        song::{Folder, Song},
    },
    services::{
        library_service::LibraryService,
        taxonomy::{FolderFilter, parse_folder_filter},
    },
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Multipart field carrying the audio file.
const FILE_FIELD: &str = "song";

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Lifetime of the signed URL in seconds.
    pub ttl: Option<u64>,
    /// Filename to suggest for download (sets Content-Disposition).
    pub download: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// GET `/genres` (alias `/folders`): folders derived from the bucket.
pub async fn list_folders(
    State(service): State<LibraryService>,
) -> Result<Json<Vec<Folder>>, AppError> {
    Ok(Json(service.folders().await?))
}

/// GET `/songs`: every song in the bucket.
pub async fn list_all_songs(
    State(service): State<LibraryService>,
) -> Result<Json<Vec<Song>>, AppError> {
    Ok(Json(service.songs(&FolderFilter::All).await?))
}

/// GET `/songs/{*folder}`: songs in one folder; `All Songs` selects the
/// root-level ones and `All Songs/` a real folder of that name.
pub async fn list_folder_songs(
    State(service): State<LibraryService>,
    Path(folder): Path<String>,
) -> Result<Json<Vec<Song>>, AppError> {
    let filter = parse_folder_filter(&folder)?;
    Ok(Json(service.songs(&filter).await?))
}

/// GET `/search?q=`: case-insensitive search over names and folders.
pub async fn search_songs(
    State(service): State<LibraryService>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<Song>>, AppError> {
    let query = q
        .q
        .ok_or_else(|| AppError::bad_request("query parameter `q` is required"))?;
    Ok(Json(service.search(&query).await?))
}

/// GET `/stream/{*key}`: mint a time-bounded playback URL.
pub async fn stream_song(
    State(service): State<LibraryService>,
    Path(key): Path<String>,
    Query(q): Query<StreamQuery>,
) -> Result<Json<AccessGrant>, AppError> {
    let disposition = q
        .download
        .as_deref()
        .map(|name| format!("attachment; filename=\"{}\"", name.replace('"', "")));
    let grant = service
        .stream(&key, q.ttl, disposition.as_deref())
        .await?;
    Ok(Json(grant))
}

/// POST `/upload`: multipart form with a `song` file and an optional
/// `folder` (or `genre`) text field.
pub async fn upload_song(
    State(service): State<LibraryService>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut file: Option<(String, Option<String>, Bytes)> = None;
    let mut folder: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request("malformed multipart body").with_details(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            FILE_FIELD => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|e| {
                    AppError::bad_request("could not read uploaded file").with_details(e.to_string())
                })?;
                file = Some((filename, content_type, data));
            }
            "folder" | "genre" => {
                let value = field.text().await.map_err(|e| {
                    AppError::bad_request("could not read form field").with_details(e.to_string())
                })?;
                folder = Some(value);
            }
            other => debug!(field = other, "ignoring unknown multipart field"),
        }
    }

    let (filename, content_type, data) =
        file.ok_or_else(|| AppError::bad_request("no file uploaded in field `song`"))?;
    let stored = service
        .upload(folder.as_deref(), &filename, content_type.as_deref(), data)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: format!("uploaded `{}` ({} bytes)", stored.key, stored.entry.size),
            url: Some(stored.url),
        }),
    ))
}

/// DELETE `/songs/{*name}`: remove a song.
pub async fn delete_song(
    State(service): State<LibraryService>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    service.delete(&name).await?;
    Ok(Json(MessageResponse {
        message: format!("deleted `{}`", name),
        url: None,
    }))
}
