//! Backblaze B2 native API adapter.
//!
//! Uses the v2 REST API over reqwest: `b2_authorize_account` for the
//! account token, `b2_get_download_authorization` for per-file download
//! tokens. The account token is valid for 24 hours; the issuer refreshes it
//! after a configurable, shorter TTL.

use super::{BackendKind, StorageBackend, StorageError, StorageResult, encode_key_path};
use crate::models::{credential::Credential, song::ObjectEntry};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://api.backblazeb2.com";
const LIST_PAGE_SIZE: u32 = 1000;
// Skips client-side SHA1; B2 still verifies the length.
const UNVERIFIED_SHA1: &str = "do_not_verify";

#[derive(Clone, Debug)]
pub struct B2Config {
    pub key_id: String,
    pub application_key: String,
    pub bucket_name: String,
    /// Looked up from the bucket name when absent.
    pub bucket_id: Option<String>,
    pub api_base: String,
    pub token_ttl: Duration,
}

pub struct B2Backend {
    config: B2Config,
    client: Client,
}

impl B2Backend {
    pub fn new(config: B2Config, client: Client) -> Self {
        Self { config, client }
    }

    fn api(cred: &Credential, call: &str) -> String {
        format!("{}/b2api/v2/{}", cred.api_url.trim_end_matches('/'), call)
    }

    fn bucket_id<'a>(&'a self, cred: &'a Credential) -> StorageResult<&'a str> {
        cred.bucket_id
            .as_deref()
            .or(self.config.bucket_id.as_deref())
            .ok_or_else(|| {
                StorageError::Unavailable(format!(
                    "bucket id for `{}` is unknown",
                    self.config.bucket_name
                ))
            })
    }

    async fn call<Req, Res>(&self, cred: &Credential, call: &str, body: &Req) -> StorageResult<Res>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let resp = self
            .client
            .post(Self::api(cred, call))
            .header("Authorization", &cred.token)
            .json(body)
            .send()
            .await
            .map_err(unavailable)?;
        let resp = check_response(resp, None).await?;
        Ok(resp.json().await?)
    }

    async fn resolve_bucket_id(
        &self,
        cred: &Credential,
        allowed: Option<&AllowedBucket>,
    ) -> StorageResult<String> {
        if let Some(id) = &self.config.bucket_id {
            return Ok(id.clone());
        }
        if let Some(AllowedBucket {
            bucket_id: Some(id),
            bucket_name: Some(name),
        }) = allowed
        {
            if name == &self.config.bucket_name {
                return Ok(id.clone());
            }
        }

        let account_id = cred.account.clone().unwrap_or_default();
        let listed: ListBucketsResponse = self
            .call(
                cred,
                "b2_list_buckets",
                &ListBucketsRequest {
                    account_id: &account_id,
                    bucket_name: &self.config.bucket_name,
                },
            )
            .await?;
        listed
            .buckets
            .into_iter()
            .find(|b| b.bucket_name == self.config.bucket_name)
            .map(|b| b.bucket_id)
            .ok_or_else(|| {
                StorageError::AccessDenied(format!(
                    "bucket `{}` is not visible to this key",
                    self.config.bucket_name
                ))
            })
    }

    /// Find the current version of exactly `key`.
    async fn find_file(&self, cred: &Credential, key: &str) -> StorageResult<Option<B2File>> {
        let page: ListFileNamesResponse = self
            .call(
                cred,
                "b2_list_file_names",
                &ListFileNamesRequest {
                    bucket_id: self.bucket_id(cred)?,
                    start_file_name: Some(key),
                    prefix: Some(key),
                    max_file_count: 1,
                },
            )
            .await?;
        Ok(page
            .files
            .into_iter()
            .find(|f| f.file_name == key && f.action == "upload"))
    }
}

#[async_trait]
impl StorageBackend for B2Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::B2
    }

    async fn authorize(&self) -> StorageResult<Credential> {
        let url = format!(
            "{}/b2api/v2/b2_authorize_account",
            self.config.api_base.trim_end_matches('/')
        );
        let resp = self
            .client
            .get(url)
            .basic_auth(&self.config.key_id, Some(&self.config.application_key))
            .send()
            .await
            .map_err(unavailable)?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            let err = read_error(resp).await;
            return Err(StorageError::AuthenticationFailed(err.message));
        }
        let account: AuthorizeAccountResponse = check_response(resp, None).await?.json().await?;

        let now = Utc::now();
        let mut cred = Credential {
            token: account.authorization_token,
            api_url: account.api_url,
            download_url: account.download_url,
            account: Some(account.account_id),
            bucket_id: None,
            expires_at: now + self.config.token_ttl,
        };
        let bucket_id = self
            .resolve_bucket_id(&cred, account.allowed.as_ref())
            .await?;
        cred.bucket_id = Some(bucket_id);
        Ok(cred)
    }

    async fn list_objects(
        &self,
        cred: &Credential,
        prefix: Option<&str>,
    ) -> StorageResult<Vec<ObjectEntry>> {
        let bucket_id = self.bucket_id(cred)?;
        let mut entries = Vec::new();
        let mut start: Option<String> = None;
        loop {
            let page: ListFileNamesResponse = self
                .call(
                    cred,
                    "b2_list_file_names",
                    &ListFileNamesRequest {
                        bucket_id,
                        start_file_name: start.as_deref(),
                        prefix,
                        max_file_count: LIST_PAGE_SIZE,
                    },
                )
                .await?;
            entries.extend(
                page.files
                    .into_iter()
                    .filter(|f| f.action == "upload")
                    .map(B2File::into_entry),
            );
            match page.next_file_name {
                Some(next) => start = Some(next),
                None => break,
            }
        }
        debug!(count = entries.len(), "listed b2 files");
        Ok(entries)
    }

    async fn put_object(
        &self,
        cred: &Credential,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> StorageResult<ObjectEntry> {
        let target: UploadUrlResponse = self
            .call(
                cred,
                "b2_get_upload_url",
                &BucketRequest {
                    bucket_id: self.bucket_id(cred)?,
                },
            )
            .await?;

        let resp = self
            .client
            .post(&target.upload_url)
            .header("Authorization", &target.authorization_token)
            .header("X-Bz-File-Name", encode_key_path(key))
            .header("Content-Type", content_type)
            .header("X-Bz-Content-Sha1", UNVERIFIED_SHA1)
            .body(body)
            .send()
            .await
            .map_err(unavailable)?;
        let file: B2File = check_response(resp, Some(key)).await?.json().await?;
        debug!(key, file_id = ?file.file_id, "uploaded b2 file");
        Ok(file.into_entry())
    }

    async fn delete_object(&self, cred: &Credential, key: &str) -> StorageResult<()> {
        let file_id = self
            .find_file(cred, key)
            .await?
            .and_then(|file| file.file_id)
            .ok_or_else(|| StorageError::ObjectNotFound {
                key: key.to_string(),
            })?;
        let _: serde_json::Value = self
            .call(
                cred,
                "b2_delete_file_version",
                &DeleteFileVersionRequest {
                    file_name: key,
                    file_id: &file_id,
                },
            )
            .await?;
        debug!(key, file_id = %file_id, "deleted b2 file version");
        Ok(())
    }

    async fn object_exists(&self, cred: &Credential, key: &str) -> StorageResult<bool> {
        Ok(self.find_file(cred, key).await?.is_some())
    }

    fn public_url(&self, cred: &Credential, key: &str) -> String {
        download_url(&cred.download_url, &self.config.bucket_name, key)
    }

    async fn sign_access(
        &self,
        cred: &Credential,
        key: &str,
        ttl_seconds: u64,
        content_disposition: Option<&str>,
    ) -> StorageResult<String> {
        let auth: DownloadAuthorizationResponse = self
            .call(
                cred,
                "b2_get_download_authorization",
                &DownloadAuthorizationRequest {
                    bucket_id: self.bucket_id(cred)?,
                    // B2 only authorizes by prefix: the token for `a.mp3`
                    // also opens `a.mp3.bak`.
                    file_name_prefix: key,
                    valid_duration_in_seconds: ttl_seconds,
                    b2_content_disposition: content_disposition,
                },
            )
            .await?;
        Ok(authorized_download_url(
            &self.public_url(cred, key),
            &auth.authorization_token,
            content_disposition,
        ))
    }
}

/// `{download_url}/file/{bucket}/{key}` with the key percent-encoded.
pub fn download_url(base: &str, bucket_name: &str, key: &str) -> String {
    format!(
        "{}/file/{}/{}",
        base.trim_end_matches('/'),
        urlencoding::encode(bucket_name),
        encode_key_path(key)
    )
}

/// Attach a download authorization token to a file URL. When the token was
/// issued with a content disposition, the URL has to carry the same value.
pub fn authorized_download_url(
    file_url: &str,
    token: &str,
    content_disposition: Option<&str>,
) -> String {
    let mut url = format!("{}?Authorization={}", file_url, urlencoding::encode(token));
    if let Some(disposition) = content_disposition {
        url.push_str("&b2ContentDisposition=");
        url.push_str(&urlencoding::encode(disposition));
    }
    url
}

fn unavailable(err: reqwest::Error) -> StorageError {
    StorageError::Unavailable(err.to_string())
}

async fn read_error(resp: Response) -> B2Error {
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    serde_json::from_str(&text).unwrap_or(B2Error {
        status,
        code: String::new(),
        message: text,
    })
}

/// Map a non-success B2 response onto the storage error taxonomy.
async fn check_response(resp: Response, key: Option<&str>) -> StorageResult<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let err = read_error(resp).await;
    debug!(status = err.status, code = %err.code, "b2 call failed");
    Err(classify_error(err, key))
}

fn classify_error(err: B2Error, key: Option<&str>) -> StorageError {
    match (err.status, err.code.as_str()) {
        (401, "expired_auth_token" | "bad_auth_token") => StorageError::TokenRejected,
        (401, _) | (403, _) => StorageError::AccessDenied(err.message),
        (404, _) => match key {
            Some(key) => StorageError::ObjectNotFound {
                key: key.to_string(),
            },
            None => StorageError::Unavailable(err.message),
        },
        (400, _) => StorageError::InvalidRequest(err.message),
        _ => StorageError::Unavailable(format!("{} {}: {}", err.status, err.code, err.message)),
    }
}

#[derive(Debug, Deserialize)]
struct B2Error {
    status: u16,
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeAccountResponse {
    account_id: String,
    authorization_token: String,
    api_url: String,
    download_url: String,
    allowed: Option<AllowedBucket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllowedBucket {
    bucket_id: Option<String>,
    bucket_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListBucketsRequest<'a> {
    account_id: &'a str,
    bucket_name: &'a str,
}

#[derive(Deserialize)]
struct ListBucketsResponse {
    buckets: Vec<BucketInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketInfo {
    bucket_id: String,
    bucket_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BucketRequest<'a> {
    bucket_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListFileNamesRequest<'a> {
    bucket_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_file_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prefix: Option<&'a str>,
    max_file_count: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFileNamesResponse {
    files: Vec<B2File>,
    next_file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct B2File {
    file_id: Option<String>,
    file_name: String,
    #[serde(default)]
    content_length: u64,
    content_type: Option<String>,
    #[serde(default)]
    upload_timestamp: i64,
    #[serde(default = "default_action")]
    action: String,
}

fn default_action() -> String {
    "upload".into()
}

impl B2File {
    fn into_entry(self) -> ObjectEntry {
        ObjectEntry {
            key: self.file_name,
            size: self.content_length,
            last_modified: DateTime::from_timestamp_millis(self.upload_timestamp),
            content_type: self.content_type,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlResponse {
    upload_url: String,
    authorization_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteFileVersionRequest<'a> {
    file_name: &'a str,
    file_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadAuthorizationRequest<'a> {
    bucket_id: &'a str,
    file_name_prefix: &'a str,
    valid_duration_in_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    b2_content_disposition: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadAuthorizationResponse {
    authorization_token: String,
}
