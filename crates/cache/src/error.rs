//! Error types for the shared cache crate.

use crate::types::{CacheOffset, LoaderId};

/// Errors raised while populating the class table.
///
/// Lookups never fail with an error: a missing record is an ordinary
/// `None` that callers branch on.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("no class metadata at cache offset {0}")]
    NotAClass(CacheOffset),

    #[error("no method metadata at cache offset {0}")]
    NotAMethod(CacheOffset),

    #[error("class loader {0:?} is not registered")]
    UnknownLoader(LoaderId),

    #[error("class {class} declares {count} methods, more than a method table can index")]
    TooManyMethods { class: String, count: usize },
}

/// Errors raised while building a cache from a [`crate::manifest::CacheManifest`].
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("class {0} is declared twice")]
    DuplicateClass(String),

    #[error("class {class} names unknown supertype {supertype}")]
    UnknownSupertype { class: String, supertype: String },

    #[error("class {class} names undeclared loader {loader}")]
    UnknownLoader { class: String, loader: String },

    #[error(transparent)]
    Cache(#[from] CacheError),
}
