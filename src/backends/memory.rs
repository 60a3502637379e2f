//! In-memory backend used by the service and router tests.

use super::{BackendKind, StorageBackend, StorageError, StorageResult, encode_key_path};
use crate::{
    models::{credential::Credential, song::ObjectEntry},
    services::credential_issuer::Clock,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

pub struct MemoryBackend {
    objects: Mutex<BTreeMap<String, ObjectEntry>>,
    ttl: Duration,
    clock: Clock,
    authorize_calls: AtomicUsize,
    // Tokens with a generation below this are rejected.
    min_generation: AtomicUsize,
    fail_auth: AtomicBool,
    fail_list: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            ttl: Duration::hours(1),
            clock: Arc::new(Utc::now),
            authorize_calls: AtomicUsize::new(0),
            min_generation: AtomicUsize::new(0),
            fail_auth: AtomicBool::new(false),
            fail_list: AtomicBool::new(false),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_objects(self, keys: &[&str]) -> Self {
        {
            let mut objects = self.objects.lock().unwrap();
            for key in keys {
                objects.insert(key.to_string(), ObjectEntry::new(*key, 1024));
            }
        }
        self
    }

    pub fn authorize_calls(&self) -> usize {
        self.authorize_calls.load(Ordering::SeqCst)
    }

    pub fn fail_authorization(&self, fail: bool) {
        self.fail_auth.store(fail, Ordering::SeqCst);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Reject every token issued so far.
    pub fn revoke_tokens(&self) {
        let issued = self.authorize_calls.load(Ordering::SeqCst);
        self.min_generation.store(issued + 1, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    fn check_token(&self, cred: &Credential) -> StorageResult<()> {
        let generation: usize = cred
            .token
            .strip_prefix("token-")
            .and_then(|n| n.parse().ok())
            .ok_or(StorageError::TokenRejected)?;
        if generation < self.min_generation.load(Ordering::SeqCst) {
            return Err(StorageError::TokenRejected);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::B2
    }

    async fn authorize(&self) -> StorageResult<Credential> {
        if self.fail_auth.load(Ordering::SeqCst) {
            self.authorize_calls.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::AuthenticationFailed("bad key".into()));
        }
        let generation = self.authorize_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = (self.clock)();
        Ok(Credential {
            token: format!("token-{}", generation),
            api_url: "memory://api".into(),
            download_url: "memory://download".into(),
            account: Some("account".into()),
            bucket_id: Some("bucket".into()),
            expires_at: now + self.ttl,
        })
    }

    async fn list_objects(
        &self,
        cred: &Credential,
        prefix: Option<&str>,
    ) -> StorageResult<Vec<ObjectEntry>> {
        self.check_token(cred)?;
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("listing failed".into()));
        }
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .values()
            .filter(|o| prefix.map(|p| o.key.starts_with(p)).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn put_object(
        &self,
        cred: &Credential,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> StorageResult<ObjectEntry> {
        self.check_token(cred)?;
        let entry = ObjectEntry {
            key: key.to_string(),
            size: body.len() as u64,
            last_modified: Some(Utc::now()),
            content_type: Some(content_type.to_string()),
        };
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), entry.clone());
        Ok(entry)
    }

    async fn delete_object(&self, cred: &Credential, key: &str) -> StorageResult<()> {
        self.check_token(cred)?;
        match self.objects.lock().unwrap().remove(key) {
            Some(_) => Ok(()),
            None => Err(StorageError::ObjectNotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn object_exists(&self, cred: &Credential, key: &str) -> StorageResult<bool> {
        self.check_token(cred)?;
        Ok(self.contains(key))
    }

    fn public_url(&self, cred: &Credential, key: &str) -> String {
        format!("{}/{}", cred.download_url, encode_key_path(key))
    }

    async fn sign_access(
        &self,
        cred: &Credential,
        key: &str,
        ttl_seconds: u64,
        _content_disposition: Option<&str>,
    ) -> StorageResult<String> {
        self.check_token(cred)?;
        if !self.contains(key) {
            return Err(StorageError::ObjectNotFound {
                key: key.to_string(),
            });
        }
        Ok(format!(
            "{}?token={}&ttl={}",
            self.public_url(cred, key),
            cred.token,
            ttl_seconds
        ))
    }
}
