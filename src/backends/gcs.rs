//! Google Cloud Storage adapter.
//!
//! The access token comes from the GCE/Cloud Run metadata server and is
//! used as a bearer token against the JSON API. Playback URLs are V4
//! query-signed URLs (`GOOG4-RSA-SHA256`); the string-to-sign is signed by
//! the IAM Credentials `signBlob` call, so no private key is held locally.

use super::{
    BackendKind, StorageBackend, StorageError, StorageResult, encode_key_path, url_host,
};
use crate::models::{credential::Credential, song::ObjectEntry};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://storage.googleapis.com";
pub const DEFAULT_IAM_BASE: &str = "https://iamcredentials.googleapis.com";
pub const DEFAULT_METADATA_HOST: &str = "http://metadata.google.internal";

const SIGNING_ALGORITHM: &str = "GOOG4-RSA-SHA256";
const LIST_FIELDS: &str = "items(name,size,updated,contentType),nextPageToken";

#[derive(Clone, Debug)]
pub struct GcsConfig {
    pub bucket: String,
    /// Service account used for URL signing; asked from the metadata
    /// server when absent.
    pub service_account: Option<String>,
    pub metadata_host: String,
    pub api_base: String,
    pub iam_base: String,
}

pub struct GcsBackend {
    config: GcsConfig,
    client: Client,
}

impl GcsBackend {
    pub fn new(config: GcsConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn metadata_url(&self, path: &str) -> String {
        format!(
            "{}/computeMetadata/v1/instance/service-accounts/default/{}",
            self.config.metadata_host.trim_end_matches('/'),
            path
        )
    }

    fn object_url(&self, cred: &Credential, key: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            cred.api_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.bucket),
            urlencoding::encode(key)
        )
    }

    async fn metadata_get(&self, path: &str) -> StorageResult<Response> {
        let resp = self
            .client
            .get(self.metadata_url(path))
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|err| StorageError::Unavailable(format!("metadata server: {}", err)))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::AuthenticationFailed(format!(
                "metadata server returned {}: {}",
                status, body
            )));
        }
        Ok(resp)
    }

    async fn sign_blob(&self, cred: &Credential, email: &str, payload: &str) -> StorageResult<Vec<u8>> {
        let url = format!(
            "{}/v1/projects/-/serviceAccounts/{}:signBlob",
            self.config.iam_base.trim_end_matches('/'),
            urlencoding::encode(email)
        );
        let resp = self
            .client
            .post(url)
            .bearer_auth(&cred.token)
            .json(&SignBlobRequest {
                payload: general_purpose::STANDARD.encode(payload),
            })
            .send()
            .await
            .map_err(unavailable)?;
        let signed: SignBlobResponse = check_response(resp, None).await?.json().await?;
        general_purpose::STANDARD
            .decode(signed.signed_blob)
            .map_err(|err| StorageError::Unavailable(format!("malformed signBlob response: {}", err)))
    }
}

#[async_trait]
impl StorageBackend for GcsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gcs
    }

    async fn authorize(&self) -> StorageResult<Credential> {
        let token: MetadataToken = self.metadata_get("token").await?.json().await?;
        let account = match &self.config.service_account {
            Some(email) => email.clone(),
            None => self.metadata_get("email").await?.text().await?.trim().to_string(),
        };

        let now = Utc::now();
        Ok(Credential {
            token: token.access_token,
            api_url: self.config.api_base.clone(),
            download_url: self.config.api_base.clone(),
            account: Some(account),
            bucket_id: None,
            expires_at: now + Duration::seconds(token.expires_in),
        })
    }

    async fn list_objects(
        &self,
        cred: &Credential,
        prefix: Option<&str>,
    ) -> StorageResult<Vec<ObjectEntry>> {
        let base = format!(
            "{}/storage/v1/b/{}/o?fields={}",
            cred.api_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.bucket),
            urlencoding::encode(LIST_FIELDS)
        );
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = base.clone();
            if let Some(prefix) = prefix {
                url.push_str("&prefix=");
                url.push_str(&urlencoding::encode(prefix));
            }
            if let Some(token) = &page_token {
                url.push_str("&pageToken=");
                url.push_str(&urlencoding::encode(token));
            }

            let resp = self
                .client
                .get(url)
                .bearer_auth(&cred.token)
                .send()
                .await
                .map_err(unavailable)?;
            let page: ListObjectsResponse = check_response(resp, None).await?.json().await?;
            entries.extend(page.items.into_iter().map(GcsObject::into_entry));
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        debug!(count = entries.len(), "listed gcs objects");
        Ok(entries)
    }

    async fn put_object(
        &self,
        cred: &Credential,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> StorageResult<ObjectEntry> {
        let url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            cred.api_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.bucket),
            urlencoding::encode(key)
        );
        let resp = self
            .client
            .post(url)
            .bearer_auth(&cred.token)
            .header("Content-Type", content_type)
            .body(body)
            .send()
            .await
            .map_err(unavailable)?;
        let object: GcsObject = check_response(resp, Some(key)).await?.json().await?;
        debug!(key, "uploaded gcs object");
        Ok(object.into_entry())
    }

    async fn delete_object(&self, cred: &Credential, key: &str) -> StorageResult<()> {
        let resp = self
            .client
            .delete(self.object_url(cred, key))
            .bearer_auth(&cred.token)
            .send()
            .await
            .map_err(unavailable)?;
        check_response(resp, Some(key)).await?;
        debug!(key, "deleted gcs object");
        Ok(())
    }

    async fn object_exists(&self, cred: &Credential, key: &str) -> StorageResult<bool> {
        let resp = self
            .client
            .get(self.object_url(cred, key))
            .bearer_auth(&cred.token)
            .send()
            .await
            .map_err(unavailable)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_response(resp, Some(key)).await?;
        Ok(true)
    }

    fn public_url(&self, cred: &Credential, key: &str) -> String {
        format!(
            "{}/{}/{}",
            cred.download_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.bucket),
            encode_key_path(key)
        )
    }

    async fn sign_access(
        &self,
        cred: &Credential,
        key: &str,
        ttl_seconds: u64,
        content_disposition: Option<&str>,
    ) -> StorageResult<String> {
        if !self.object_exists(cred, key).await? {
            return Err(StorageError::ObjectNotFound {
                key: key.to_string(),
            });
        }
        let email = cred.account.as_deref().ok_or_else(|| {
            StorageError::AccessDenied("no service account available for signing".into())
        })?;

        let request = V4SignedUrl {
            scheme: if cred.download_url.starts_with("http://") {
                "http"
            } else {
                "https"
            },
            host: url_host(&cred.download_url),
            bucket: &self.config.bucket,
            key,
            email,
            ttl_seconds,
            content_disposition,
            now: Utc::now(),
        };
        let signature = self.sign_blob(cred, email, &request.string_to_sign()).await?;
        Ok(request.signed_url(&hex::encode(signature)))
    }
}

/// Inputs of a V4 query-string signed GET URL.
pub struct V4SignedUrl<'a> {
    pub scheme: &'a str,
    pub host: &'a str,
    pub bucket: &'a str,
    pub key: &'a str,
    pub email: &'a str,
    pub ttl_seconds: u64,
    pub content_disposition: Option<&'a str>,
    pub now: DateTime<Utc>,
}

impl V4SignedUrl<'_> {
    fn date(&self) -> String {
        self.now.format("%Y%m%d").to_string()
    }

    fn timestamp(&self) -> String {
        self.now.format("%Y%m%dT%H%M%SZ").to_string()
    }

    fn credential_scope(&self) -> String {
        format!("{}/auto/storage/goog4_request", self.date())
    }

    pub fn canonical_uri(&self) -> String {
        format!(
            "/{}/{}",
            urlencoding::encode(self.bucket),
            encode_key_path(self.key)
        )
    }

    /// Query parameters, encoded and sorted by name.
    pub fn canonical_query(&self) -> String {
        let mut params = BTreeMap::new();
        params.insert("X-Goog-Algorithm", SIGNING_ALGORITHM.to_string());
        params.insert(
            "X-Goog-Credential",
            format!("{}/{}", self.email, self.credential_scope()),
        );
        params.insert("X-Goog-Date", self.timestamp());
        params.insert("X-Goog-Expires", self.ttl_seconds.to_string());
        params.insert("X-Goog-SignedHeaders", "host".to_string());
        if let Some(disposition) = self.content_disposition {
            params.insert("response-content-disposition", disposition.to_string());
        }
        params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn canonical_request(&self) -> String {
        format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
            self.canonical_uri(),
            self.canonical_query(),
            self.host
        )
    }

    pub fn string_to_sign(&self) -> String {
        let hashed = hex::encode(Sha256::digest(self.canonical_request().as_bytes()));
        format!(
            "{}\n{}\n{}\n{}",
            SIGNING_ALGORITHM,
            self.timestamp(),
            self.credential_scope(),
            hashed
        )
    }

    pub fn signed_url(&self, signature_hex: &str) -> String {
        format!(
            "{}://{}{}?{}&X-Goog-Signature={}",
            self.scheme,
            self.host,
            self.canonical_uri(),
            self.canonical_query(),
            signature_hex
        )
    }
}

fn unavailable(err: reqwest::Error) -> StorageError {
    StorageError::Unavailable(err.to_string())
}

async fn check_response(resp: Response, key: Option<&str>) -> StorageResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<GcsErrorBody>(&text)
        .map(|body| body.error.message)
        .unwrap_or(text);
    debug!(%status, %message, "gcs call failed");
    Err(classify_status(status, message, key))
}

fn classify_status(status: StatusCode, message: String, key: Option<&str>) -> StorageError {
    match status {
        StatusCode::UNAUTHORIZED => StorageError::TokenRejected,
        StatusCode::FORBIDDEN => StorageError::AccessDenied(message),
        StatusCode::NOT_FOUND => match key {
            Some(key) => StorageError::ObjectNotFound {
                key: key.to_string(),
            },
            None => StorageError::Unavailable(message),
        },
        StatusCode::BAD_REQUEST => StorageError::InvalidRequest(message),
        _ => StorageError::Unavailable(format!("{}: {}", status, message)),
    }
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: i64,
}

#[derive(Serialize)]
struct SignBlobRequest {
    payload: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignBlobResponse {
    signed_blob: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListObjectsResponse {
    #[serde(default)]
    items: Vec<GcsObject>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsObject {
    name: String,
    // The JSON API sends uint64 values as strings.
    size: Option<String>,
    updated: Option<DateTime<Utc>>,
    content_type: Option<String>,
}

impl GcsObject {
    fn into_entry(self) -> ObjectEntry {
        ObjectEntry {
            key: self.name,
            size: self.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            last_modified: self.updated,
            content_type: self.content_type,
        }
    }
}

#[derive(Deserialize)]
struct GcsErrorBody {
    error: GcsErrorDetail,
}

#[derive(Deserialize)]
struct GcsErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request(disposition: Option<&'static str>) -> V4SignedUrl<'static> {
        V4SignedUrl {
            scheme: "https",
            host: "storage.googleapis.com",
            bucket: "song-bucket",
            key: "songs/jazz/track 1.mp3",
            email: "player@project.iam.gserviceaccount.com",
            ttl_seconds: 3600,
            content_disposition: disposition,
            now: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
        }
    }

    #[test]
    fn canonical_query_is_sorted_and_encoded() {
        assert_eq!(
            request(None).canonical_query(),
            "X-Goog-Algorithm=GOOG4-RSA-SHA256\
             &X-Goog-Credential=player%40project.iam.gserviceaccount.com%2F20240501%2Fauto%2Fstorage%2Fgoog4_request\
             &X-Goog-Date=20240501T123000Z\
             &X-Goog-Expires=3600\
             &X-Goog-SignedHeaders=host"
        );
        assert!(
            request(Some("attachment"))
                .canonical_query()
                .ends_with("&X-Goog-SignedHeaders=host&response-content-disposition=attachment")
        );
    }

    #[test]
    fn canonical_request_layout() {
        let req = request(None);
        let canonical = req.canonical_request();
        let lines: Vec<&str> = canonical.split('\n').collect();
        assert_eq!(lines[0], "GET");
        assert_eq!(lines[1], "/song-bucket/songs/jazz/track%201.mp3");
        assert_eq!(lines[3], "host:storage.googleapis.com");
        assert_eq!(lines[4], "");
        assert_eq!(lines[5], "host");
        assert_eq!(lines[6], "UNSIGNED-PAYLOAD");
    }

    #[test]
    fn string_to_sign_layout() {
        let sts = request(None).string_to_sign();
        let lines: Vec<&str> = sts.split('\n').collect();
        assert_eq!(lines[0], "GOOG4-RSA-SHA256");
        assert_eq!(lines[1], "20240501T123000Z");
        assert_eq!(lines[2], "20240501/auto/storage/goog4_request");
        assert_eq!(lines[3].len(), 64);
        assert!(lines[3].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signed_url_contains_key_and_signature() {
        let url = request(None).signed_url("abcdef");
        assert!(url.starts_with("https://storage.googleapis.com/song-bucket/songs/jazz/track%201.mp3?"));
        assert!(url.contains("X-Goog-Expires=3600"));
        assert!(url.ends_with("&X-Goog-Signature=abcdef"));
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, String::new(), None),
            StorageError::TokenRejected
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "no".into(), None),
            StorageError::AccessDenied(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, String::new(), Some("a.mp3")),
            StorageError::ObjectNotFound { .. }
        ));
    }

    #[test]
    fn object_resource_parses_string_size() {
        let obj: GcsObject = serde_json::from_str(
            r#"{"name":"rock/c.mp3","size":"52231","updated":"2024-05-01T10:00:00.123Z","contentType":"audio/mpeg"}"#,
        )
        .unwrap();
        let entry = obj.into_entry();
        assert_eq!(entry.size, 52231);
        assert_eq!(entry.key, "rock/c.mp3");
        assert!(entry.last_modified.is_some());
    }
}
