//! Storage backends the song library can sit on top of.
//!
//! Each backend is a thin REST adapter over one provider. It knows how to
//! authorize, list, store, delete and sign; the taxonomy and credential
//! caching live in `services`.

pub mod b2;
pub mod gcs;
#[cfg(test)]
pub mod memory;

use crate::models::{credential::Credential, song::ObjectEntry};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend rejected the account credentials: {0}")]
    AuthenticationFailed(String),
    #[error("backend rejected the cached authorization token")]
    TokenRejected,
    #[error("object `{key}` not found")]
    ObjectNotFound { key: String },
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("object `{key}` already exists")]
    AlreadyExists { key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Decode(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Which provider a backend talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    B2,
    Gcs,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::B2 => write!(f, "b2"),
            BackendKind::Gcs => write!(f, "gcs"),
        }
    }
}

/// Operations the library needs from a bucket.
///
/// Every call except `authorize` takes the credential obtained from
/// `authorize`, so the caller owns caching and refresh. Implementations
/// report an expired or revoked token as [`StorageError::TokenRejected`].
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Exchange the configured account keys for a short-lived credential.
    async fn authorize(&self) -> StorageResult<Credential>;

    /// List every object under `prefix` (whole bucket when `None`).
    async fn list_objects(
        &self,
        cred: &Credential,
        prefix: Option<&str>,
    ) -> StorageResult<Vec<ObjectEntry>>;

    async fn put_object(
        &self,
        cred: &Credential,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> StorageResult<ObjectEntry>;

    async fn delete_object(&self, cred: &Credential, key: &str) -> StorageResult<()>;

    async fn object_exists(&self, cred: &Credential, key: &str) -> StorageResult<bool>;

    /// Plain (unsigned) URL of an object, as shown in listings.
    fn public_url(&self, cred: &Credential, key: &str) -> String;

    /// Build a URL granting read access to `key` for `ttl_seconds`.
    async fn sign_access(
        &self,
        cred: &Credential,
        key: &str,
        ttl_seconds: u64,
        content_disposition: Option<&str>,
    ) -> StorageResult<String>;
}

/// Percent-encode each path segment of `key`, keeping the `/` separators.
pub fn encode_key_path(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Extract the host part from a URL.
pub(crate) fn url_host(url: &str) -> &str {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    without_scheme.split('/').next().unwrap_or(without_scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_key_path_keeps_separators() {
        assert_eq!(encode_key_path("songs/jazz/track1.mp3"), "songs/jazz/track1.mp3");
        assert_eq!(encode_key_path("rock/My Song #1.mp3"), "rock/My%20Song%20%231.mp3");
    }

    #[test]
    fn url_host_strips_scheme_and_path() {
        assert_eq!(url_host("https://storage.googleapis.com/b/o"), "storage.googleapis.com");
        assert_eq!(url_host("http://localhost:9000"), "localhost:9000");
    }
}
