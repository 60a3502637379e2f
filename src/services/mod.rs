//! Song-library services: the key-space taxonomy, the credential issuer,
//! and the library operations built from them.

pub mod credential_issuer;
pub mod library_service;
pub mod taxonomy;
