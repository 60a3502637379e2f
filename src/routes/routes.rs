//! Defines routes for the song-library API.
//!
//! ## Structure
//! - **Probes**
//!   - `GET    /health`             liveness
//!   - `GET    /readyz`             backend credential check
//!
//! - **Library**
//!   - `GET    /genres`, `/folders`  folders derived from object keys
//!   - `GET    /songs`               every song
//!   - `GET    /songs/{*folder}`     songs in one folder
//!   - `DELETE /songs/{*name}`       delete a song
//!   - `GET    /search?q=`           search names and folders
//!   - `GET    /stream/{*key}`       signed playback URL
//!   - `POST   /upload`              multipart upload
//!
//! The wildcard segments allow nested keys like `jazz/live/track.mp3`.

use crate::{
    handlers::{
        health_handlers::{health, readyz},
        library_handlers::{
            delete_song, list_all_songs, list_folder_songs, list_folders, search_songs,
            stream_song, upload_song,
        },
    },
    services::library_service::LibraryService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router for the library API.
///
/// `GET` and `DELETE` on `/songs/{*path}` share one wildcard route: the
/// former reads the segment as a folder, the latter as an object key.
pub fn routes(max_upload_bytes: usize) -> Router<LibraryService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        // Taxonomy
        .route("/genres", get(list_folders))
        .route("/folders", get(list_folders))
        .route("/songs", get(list_all_songs))
        .route("/songs/{*path}", get(list_folder_songs).delete(delete_song))
        .route("/search", get(search_songs))
        // Access and writes
        .route("/stream/{*key}", get(stream_song))
        .route(
            "/upload",
            post(upload_song).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryBackend;
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "song-library-test-boundary";

    fn app(backend: Arc<MemoryBackend>) -> Router {
        routes(1024 * 1024).with_state(LibraryService::new(backend, 3600))
    }

    fn library() -> Arc<MemoryBackend> {
        Arc::new(MemoryBackend::new().with_objects(&[
            "jazz/a.mp3",
            "jazz/b.mp3",
            "rock/c.mp3",
            "root.mp3",
        ]))
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn multipart(parts: &[(&str, Option<&str>, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (name, filename, content) in parts {
            body.push_str(&format!("--{}\r\n", BOUNDARY));
            match filename {
                Some(filename) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                     Content-Type: audio/mpeg\r\n\r\n",
                    name, filename
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    name
                )),
            }
            body.push_str(content);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{}--\r\n", BOUNDARY));

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_healthy() {
        let (status, body) = send(app(library()), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn readyz_reports_auth_failure() {
        let backend = library();
        backend.fail_authorization(true);
        let (status, body) = send(app(backend), get("/readyz")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn genres_lists_root_first() {
        let (status, body) = send(app(library()), get("/genres")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!([
                {"name": "All Songs", "path": ""},
                {"name": "jazz", "path": "jazz/"},
                {"name": "rock", "path": "rock/"}
            ])
        );
    }

    #[tokio::test]
    async fn songs_in_folder_and_root() {
        let (status, body) = send(app(library()), get("/songs/jazz")).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<_> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.mp3", "b.mp3"]);
        assert_eq!(body[0]["folder"], "jazz");
        assert_eq!(body[0]["size"], 1024);

        let (status, body) = send(app(library()), get("/songs/All%20Songs")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["name"], "root.mp3");
        assert!(body[0].get("folder").is_none());
    }

    #[tokio::test]
    async fn folder_sharing_root_label_is_reachable_by_path() {
        let backend = Arc::new(
            MemoryBackend::new().with_objects(&["All Songs/live.mp3", "root.mp3"]),
        );

        let (_, body) = send(app(backend.clone()), get("/genres")).await;
        assert_eq!(
            body,
            serde_json::json!([
                {"name": "All Songs", "path": ""},
                {"name": "All Songs/", "path": "All Songs/"}
            ])
        );

        let (status, body) = send(app(backend.clone()), get("/songs/All%20Songs/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["key"], "All Songs/live.mp3");

        let (_, body) = send(app(backend), get("/songs/All%20Songs")).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["key"], "root.mp3");
    }

    #[tokio::test]
    async fn nested_folder_path_is_bad_request() {
        let (status, body) = send(app(library()), get("/songs/jazz/live")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn dotted_song_name_streams() {
        let backend = Arc::new(MemoryBackend::new().with_objects(&["rock/Wait... What.mp3"]));
        let (status, body) =
            send(app(backend), get("/stream/rock/Wait...%20What.mp3")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["url"].as_str().unwrap().contains("Wait...%20What.mp3"));
    }

    #[tokio::test]
    async fn listing_failure_maps_to_500() {
        let backend = library();
        backend.fail_listing(true);
        let (status, body) = send(app(backend), get("/songs")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
        assert!(body["details"].is_string());
    }

    #[tokio::test]
    async fn search_requires_query() {
        let (status, _) = send(app(library()), get("/search")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(app(library()), get("/search?q=")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(app(library()), get("/search?q=JAZZ")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stream_issues_url_with_expiry() {
        let before = chrono::Utc::now().timestamp_millis();
        let (status, body) = send(app(library()), get("/stream/jazz/a.mp3?ttl=120")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["url"].as_str().unwrap().contains("jazz/a.mp3"));
        let expires = body["expiresAt"].as_i64().unwrap();
        assert!(expires >= before + 120_000);
        assert!(expires <= chrono::Utc::now().timestamp_millis() + 120_000);
    }

    #[tokio::test]
    async fn stream_error_statuses() {
        let (status, _) = send(app(library()), get("/stream/jazz/missing.mp3")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(app(library()), get("/stream/jazz/a.mp3?ttl=0")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(app(library()), get("/stream/jazz/..%2Fsecret")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_then_conflict() {
        let backend = library();
        let req = multipart(&[("genre", None, "blues"), ("song", Some("new.mp3"), "ID3data")]);
        let (status, body) = send(app(backend.clone()), req).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["url"], "memory://download/blues/new.mp3");
        assert!(backend.contains("blues/new.mp3"));

        let req = multipart(&[("genre", None, "blues"), ("song", Some("new.mp3"), "ID3data")]);
        let (status, _) = send(app(backend), req).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn upload_without_file_is_bad_request() {
        let req = multipart(&[("folder", None, "jazz")]);
        let (status, body) = send(app(library()), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("song"));
    }

    #[tokio::test]
    async fn delete_song_and_missing() {
        let backend = library();
        let req = Request::builder()
            .method("DELETE")
            .uri("/songs/jazz/a.mp3")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app(backend.clone()), req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].as_str().unwrap().contains("jazz/a.mp3"));
        assert!(!backend.contains("jazz/a.mp3"));

        let req = Request::builder()
            .method("DELETE")
            .uri("/songs/jazz/a.mp3")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(app(backend), req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
