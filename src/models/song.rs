//! Objects as the backend reports them, and the folder/song views derived
//! from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single object in the bucket, as returned by a backend listing.
///
/// This is the raw material for the taxonomy: folders and songs are
/// recomputed from a slice of these on every request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Full object key, `/`-separated.
    pub key: String,

    /// Size in bytes.
    pub size: u64,

    /// Upload/update time reported by the provider.
    pub last_modified: Option<DateTime<Utc>>,

    /// Content type (MIME type), if the provider stores one.
    pub content_type: Option<String>,
}

impl ObjectEntry {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified: None,
            content_type: None,
        }
    }
}

/// A virtual grouping (genre) derived from the first path segment.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Folder {
    pub name: String,

    /// Key prefix of the folder, `"<name>/"`, or `""` for the root.
    pub path: String,
}

/// A playable object as exposed to clients.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    /// Key with its folder prefix removed.
    pub name: String,

    pub key: String,

    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}
