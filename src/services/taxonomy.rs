//! Folder/genre taxonomy derived from flat object keys.
//!
//! Keys are split on `/` and the **first** path segment is the folder.
//! Everything here is a pure function of the listing, so it is recomputed
//! on every request and never cached.

use crate::{
    backends::{StorageError, StorageResult},
    models::song::{Folder, ObjectEntry, Song},
};
use std::collections::BTreeSet;

/// Label of the synthetic folder holding root-level keys.
pub const ROOT_FOLDER_LABEL: &str = "All Songs";

/// Placeholder file the B2 web console drops into "empty" folders.
const B2_EMPTY_MARKER: &str = ".bzEmpty";

/// Which songs a listing should return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderFilter {
    All,
    Root,
    Named(String),
}

/// Map a folder path segment from a URL onto a filter.
///
/// The root label selects root-level keys. A trailing slash marks a folder
/// path (`All Songs/`), which always names a real folder even when it
/// shares the root label. Folders are single segments, so `jazz/live` is
/// rejected.
pub fn parse_folder_filter(segment: &str) -> StorageResult<FolderFilter> {
    let is_path = segment.ends_with('/');
    let trimmed = segment.trim_matches('/');
    if trimmed.contains('/') {
        return Err(StorageError::InvalidRequest(format!(
            "`{}` is not a folder; folders are a single path segment",
            trimmed
        )));
    }
    if trimmed.is_empty() || (!is_path && is_root_label(trimmed)) {
        Ok(FolderFilter::Root)
    } else {
        Ok(FolderFilter::Named(trimmed.to_string()))
    }
}

fn is_root_label(name: &str) -> bool {
    name.eq_ignore_ascii_case(ROOT_FOLDER_LABEL)
}

/// Folder (first path segment) of a key.
///
/// - leading slashes are ignored: `/jazz/a.mp3` is in `jazz`
/// - no remaining slash: root-level, `None`
/// - a folder marker `jazz/` belongs to `jazz`
pub fn derive_folder(key: &str) -> Option<&str> {
    let key = key.trim_start_matches('/');
    match key.split_once('/') {
        Some((folder, _)) if !folder.is_empty() => Some(folder),
        _ => None,
    }
}

/// Final path segment of a key (empty for folder markers).
pub fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Key with its folder prefix removed.
pub fn display_name(key: &str) -> &str {
    let trimmed = key.trim_start_matches('/');
    match derive_folder(trimmed) {
        Some(folder) => &trimmed[folder.len() + 1..],
        None => trimmed,
    }
}

/// True for objects that only exist to make a folder show up.
pub fn is_folder_marker(entry: &ObjectEntry) -> bool {
    entry.key.is_empty()
        || entry.key.ends_with('/')
        || basename(&entry.key) == B2_EMPTY_MARKER
        || entry.size == 0
}

/// Distinct folders of a listing.
///
/// The synthetic root comes first when any key is root-level; named
/// folders follow in lexicographic order. A real folder whose name clashes
/// with the root label is listed under its path (`All Songs/`) so names
/// stay unique.
pub fn list_folders(entries: &[ObjectEntry]) -> Vec<Folder> {
    let mut has_root = false;
    let mut names = BTreeSet::new();
    for entry in entries {
        match derive_folder(&entry.key) {
            Some(folder) => {
                names.insert(folder);
            }
            None => has_root = true,
        }
    }

    let mut folders = Vec::with_capacity(names.len() + 1);
    if has_root {
        folders.push(Folder {
            name: ROOT_FOLDER_LABEL.to_string(),
            path: String::new(),
        });
    }
    folders.extend(names.into_iter().map(|name| {
        let path = format!("{}/", name);
        Folder {
            name: if is_root_label(name) {
                path.clone()
            } else {
                name.to_string()
            },
            path,
        }
    }));
    folders
}

/// Songs of a listing, optionally restricted to one folder, sorted by key.
pub fn list_songs<F>(entries: &[ObjectEntry], filter: &FolderFilter, url_for: F) -> Vec<Song>
where
    F: Fn(&str) -> String,
{
    let mut songs: Vec<Song> = entries
        .iter()
        .filter(|entry| !is_folder_marker(entry))
        .filter(|entry| match filter {
            FolderFilter::All => true,
            FolderFilter::Root => derive_folder(&entry.key).is_none(),
            FolderFilter::Named(name) => derive_folder(&entry.key) == Some(name.as_str()),
        })
        .map(|entry| to_song(entry, &url_for))
        .collect();
    songs.sort_by(|a, b| a.key.cmp(&b.key));
    songs
}

/// Case-insensitive substring search over basenames and folder names.
///
/// A blank query is rejected rather than treated as "match everything".
pub fn search<F>(entries: &[ObjectEntry], query: &str, url_for: F) -> StorageResult<Vec<Song>>
where
    F: Fn(&str) -> String,
{
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Err(StorageError::InvalidRequest(
            "search query must not be empty".into(),
        ));
    }

    let mut songs: Vec<Song> = entries
        .iter()
        .filter(|entry| !is_folder_marker(entry))
        .filter(|entry| {
            basename(&entry.key).to_lowercase().contains(&needle)
                || derive_folder(&entry.key)
                    .map(|folder| folder.to_lowercase().contains(&needle))
                    .unwrap_or(false)
        })
        .map(|entry| to_song(entry, &url_for))
        .collect();
    songs.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(songs)
}

fn to_song<F>(entry: &ObjectEntry, url_for: &F) -> Song
where
    F: Fn(&str) -> String,
{
    Song {
        name: display_name(&entry.key).to_string(),
        key: entry.key.clone(),
        url: url_for(&entry.key),
        folder: derive_folder(&entry.key).map(str::to_string),
        size: Some(entry.size),
        last_modified: entry.last_modified,
    }
}
