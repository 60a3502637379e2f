//! Backend credentials and the time-bounded access grants minted from them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Short-lived bearer credential for the storage backend.
///
/// Held by the credential issuer and shared by every request until
/// `expires_at`. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Opaque bearer token.
    pub token: String,

    /// Base URL for management calls (list, upload, delete).
    pub api_url: String,

    /// Base URL objects are downloaded from.
    pub download_url: String,

    /// B2 account id, or the GCS service account used for signing.
    pub account: Option<String>,

    /// Provider bucket id, when the provider addresses buckets by id.
    pub bucket_id: Option<String>,

    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

// The token stays out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("download_url", &self.download_url)
            .field("account", &self.account)
            .field("bucket_id", &self.bucket_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A signed URL and the instant it stops working.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub url: String,

    /// Serialized as Unix epoch milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}
