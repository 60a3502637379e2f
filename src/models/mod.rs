//! Core data models for the song library.
//!
//! Nothing here is persisted: objects come from the backend listing,
//! folders and songs are derived per request, and credentials live in the
//! issuer's cache until they expire.

pub mod credential;
pub mod song;
