//! src/services/library_service.rs
//!
//! LibraryService: the song-library operations on top of one storage
//! backend. Listings go through the taxonomy resolver; every backend call
//! goes through the credential issuer so the cached token is reused and
//! refreshed in one place.

use crate::{
    backends::{BackendKind, StorageBackend, StorageError, StorageResult},
    models::{
        credential::{AccessGrant, Credential},
        song::{Folder, ObjectEntry, Song},
    },
    services::{
        credential_issuer::CredentialIssuer,
        taxonomy::{self, FolderFilter},
    },
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

const MAX_OBJECT_KEY_LEN: usize = 1024;
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// What a successful upload reports back.
#[derive(Debug, Clone)]
pub struct StoredSong {
    pub key: String,
    pub url: String,
    pub entry: ObjectEntry,
}

/// LibraryService provides the song-library operations:
/// - folders and songs derived from the bucket listing
/// - search over names
/// - signed playback URLs
/// - upload and delete
///
/// Cloning is cheap; all clones share the backend and the credential cache.
#[derive(Clone)]
pub struct LibraryService {
    backend: Arc<dyn StorageBackend>,
    issuer: CredentialIssuer,
    default_ttl_secs: u64,
}

impl LibraryService {
    pub fn new(backend: Arc<dyn StorageBackend>, default_ttl_secs: u64) -> Self {
        Self::with_issuer(CredentialIssuer::new(backend), default_ttl_secs)
    }

    pub fn with_issuer(issuer: CredentialIssuer, default_ttl_secs: u64) -> Self {
        Self {
            backend: issuer.backend().clone(),
            issuer,
            default_ttl_secs,
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects empty or overlong keys, `..` segments, backslashes and
    /// control characters. Dots inside a name (`Wait... What.mp3`) are fine.
    fn ensure_key_safe(key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.split('/').any(|segment| segment == "..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Fetch the whole listing, reusing the cached credential.
    async fn list_entries(&self) -> StorageResult<(Arc<Credential>, Vec<ObjectEntry>)> {
        let backend = self.backend.clone();
        self.issuer
            .with_credential(|cred| {
                let backend = backend.clone();
                async move {
                    let entries = backend.list_objects(&cred, None).await?;
                    Ok::<_, StorageError>((cred, entries))
                }
            })
            .await
    }

    pub async fn folders(&self) -> StorageResult<Vec<Folder>> {
        let (_, entries) = self.list_entries().await?;
        let folders = taxonomy::list_folders(&entries);
        debug!(objects = entries.len(), folders = folders.len(), "listed folders");
        Ok(folders)
    }

    pub async fn songs(&self, filter: &FolderFilter) -> StorageResult<Vec<Song>> {
        let (cred, entries) = self.list_entries().await?;
        Ok(taxonomy::list_songs(&entries, filter, |key| {
            self.backend.public_url(&cred, key)
        }))
    }

    pub async fn search(&self, query: &str) -> StorageResult<Vec<Song>> {
        // Reject a blank query before touching the backend.
        if query.trim().is_empty() {
            return Err(StorageError::InvalidRequest(
                "search query must not be empty".into(),
            ));
        }
        let (cred, entries) = self.list_entries().await?;
        taxonomy::search(&entries, query, |key| self.backend.public_url(&cred, key))
    }

    /// Mint a playback URL for `key`, using the default TTL when none is
    /// given.
    pub async fn stream(
        &self,
        key: &str,
        ttl_secs: Option<u64>,
        content_disposition: Option<&str>,
    ) -> StorageResult<AccessGrant> {
        Self::ensure_key_safe(key)?;
        let ttl = ttl_secs.unwrap_or(self.default_ttl_secs);
        self.issuer
            .issue_access_url(key, ttl, content_disposition)
            .await
    }

    /// Store a new song under `folder` (root when `None`).
    ///
    /// Existing keys are not overwritten.
    pub async fn upload(
        &self,
        folder: Option<&str>,
        filename: &str,
        content_type: Option<&str>,
        body: Bytes,
    ) -> StorageResult<StoredSong> {
        let key = song_key(folder, filename)?;
        if body.is_empty() {
            return Err(StorageError::InvalidRequest("uploaded file is empty".into()));
        }
        let content_type = content_type
            .filter(|ct| !ct.is_empty() && *ct != FALLBACK_CONTENT_TYPE)
            .map(str::to_string)
            .unwrap_or_else(|| {
                mime_guess::from_path(&key)
                    .first_raw()
                    .unwrap_or(FALLBACK_CONTENT_TYPE)
                    .to_string()
            });

        let backend = self.backend.clone();
        let (cred, entry) = self
            .issuer
            .with_credential(|cred| {
                let backend = backend.clone();
                let key = key.clone();
                let content_type = content_type.clone();
                let body = body.clone();
                async move {
                    if backend.object_exists(&cred, &key).await? {
                        return Err(StorageError::AlreadyExists { key });
                    }
                    let entry = backend.put_object(&cred, &key, body, &content_type).await?;
                    Ok::<_, StorageError>((cred, entry))
                }
            })
            .await?;

        info!(key = %key, size = entry.size, content_type = %content_type, "uploaded song");
        Ok(StoredSong {
            url: self.backend.public_url(&cred, &key),
            key,
            entry,
        })
    }

    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        Self::ensure_key_safe(key)?;
        let backend = self.backend.clone();
        self.issuer
            .with_credential(|cred| {
                let backend = backend.clone();
                async move { backend.delete_object(&cred, key).await }
            })
            .await?;
        info!(key, "deleted song");
        Ok(())
    }

    /// Readiness: the backend hands out (or has cached) a credential.
    pub async fn ready(&self) -> StorageResult<()> {
        self.issuer.ensure_credential().await.map(|_| ())
    }
}

/// Build the object key for an upload.
///
/// The folder is trimmed of slashes; only the final segment of the
/// client-supplied filename is kept.
pub fn song_key(folder: Option<&str>, filename: &str) -> StorageResult<String> {
    let filename = taxonomy::basename(filename.trim()).trim();
    if filename.is_empty() {
        return Err(StorageError::InvalidRequest("missing file name".into()));
    }
    let key = match folder.map(|f| f.trim().trim_matches('/')) {
        Some(folder) if !folder.is_empty() => format!("{}/{}", folder, filename),
        _ => filename.to_string(),
    };
    LibraryService::ensure_key_safe(&key)?;
    Ok(key)
}
