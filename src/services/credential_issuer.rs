//! Credential cache and signed-URL issuance.
//!
//! The backend credential is held in an `ArcSwapOption`: readers load the
//! current `Arc<Credential>` without locking, and a refresh builds a new
//! credential and swaps it in. Two requests that both see an expired
//! credential will both re-authorize; the last write wins.

use crate::{
    backends::{StorageBackend, StorageError, StorageResult},
    models::credential::{AccessGrant, Credential},
};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Duration, Utc};
use std::{future::Future, sync::Arc};
use tracing::{debug, info, warn};

/// Longest signed URL lifetime both providers accept (7 days).
pub const MAX_ACCESS_TTL_SECS: u64 = 604_800;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct CredentialIssuer {
    backend: Arc<dyn StorageBackend>,
    cached: Arc<ArcSwapOption<Credential>>,
    clock: Clock,
}

impl CredentialIssuer {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_clock(backend, Arc::new(Utc::now))
    }

    pub fn with_clock(backend: Arc<dyn StorageBackend>, clock: Clock) -> Self {
        Self {
            backend,
            cached: Arc::new(ArcSwapOption::empty()),
            clock,
        }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Return the cached credential, re-authorizing if it is missing or
    /// expired.
    pub async fn ensure_credential(&self) -> StorageResult<Arc<Credential>> {
        if let Some(cred) = self.cached.load_full() {
            if cred.is_valid_at(self.now()) {
                return Ok(cred);
            }
            debug!(expires_at = %cred.expires_at, "cached credential expired");
        }
        self.refresh().await
    }

    /// Drop the cached credential; the next caller re-authorizes.
    pub fn invalidate(&self) {
        self.cached.store(None);
    }

    async fn refresh(&self) -> StorageResult<Arc<Credential>> {
        let backend = self.backend.kind();
        let cred = match self.backend.authorize().await {
            Ok(cred) => Arc::new(cred),
            Err(err) => {
                warn!(%backend, error = %err, "backend authorization failed");
                return Err(err);
            }
        };
        info!(%backend, expires_at = %cred.expires_at, "obtained backend credential");
        self.cached.store(Some(cred.clone()));
        Ok(cred)
    }

    /// Run `op` with a valid credential.
    ///
    /// If the backend rejects the token (revoked before its declared
    /// expiry), the cache is dropped and `op` runs once more with a fresh
    /// credential.
    pub async fn with_credential<T, F, Fut>(&self, op: F) -> StorageResult<T>
    where
        F: Fn(Arc<Credential>) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let cred = self.ensure_credential().await?;
        match op(cred).await {
            Err(StorageError::TokenRejected) => {
                warn!("backend rejected cached token, re-authorizing");
                self.invalidate();
                let cred = self.ensure_credential().await?;
                op(cred).await
            }
            other => other,
        }
    }

    /// Mint a URL granting read access to `key` for `ttl_seconds`.
    pub async fn issue_access_url(
        &self,
        key: &str,
        ttl_seconds: u64,
        content_disposition: Option<&str>,
    ) -> StorageResult<AccessGrant> {
        if ttl_seconds == 0 || ttl_seconds > MAX_ACCESS_TTL_SECS {
            return Err(StorageError::InvalidRequest(format!(
                "ttl must be between 1 and {} seconds",
                MAX_ACCESS_TTL_SECS
            )));
        }

        let issued_at = self.now();
        let backend = self.backend.clone();
        let url = self
            .with_credential(|cred| {
                let backend = backend.clone();
                async move {
                    backend
                        .sign_access(&cred, key, ttl_seconds, content_disposition)
                        .await
                }
            })
            .await?;

        debug!(key, ttl_seconds, "issued access url");
        Ok(AccessGrant {
            url,
            expires_at: issued_at + Duration::seconds(ttl_seconds as i64),
        })
    }
}
