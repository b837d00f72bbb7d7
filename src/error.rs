//! Crate-wide error type and the closed [`ErrorKind`] classification.
//!
//! Every fallible operation in this crate returns [`Error`]. `Error` preserves
//! a [`ErrorKind`] through wrapping so callers can classify a failure without
//! matching on display strings.

use std::fmt;

use crate::auth::AuthError;
use crate::manifest::ManifestError;
use crate::reference::ReferenceError;
use crate::storage::{ArchiveError, StorageError};

/// A closed classification of failures, stable across wrapping.
///
/// The error kinds surfaced to callers, independent of which subsystem
/// produced the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    NotFound,
    InvalidParameter,
    Conflict,
    Unauthorized,
    Unavailable,
    Forbidden,
    System,
    NotImplemented,
    Unknown,
    Canceled,
    DeadlineExceeded,
    DataLoss,
    AlreadyExists,
    Unsupported,
    UnsupportedVersion,
    /// Reference-parsing failure.
    BadName,
    /// A reference string that otherwise parses but resolves to no valid
    /// repository/tag/digest combination.
    InvalidReference,
    /// A media-type unmarshal function was looked up before registration, or
    /// a manifest mixed fields from more than one schema.
    NotInitialized,
    InvalidField,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::InvalidParameter => "invalid parameter",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::System => "system error",
            ErrorKind::NotImplemented => "not implemented",
            ErrorKind::Unknown => "unknown error",
            ErrorKind::Canceled => "canceled",
            ErrorKind::DeadlineExceeded => "deadline exceeded",
            ErrorKind::DataLoss => "data loss",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::UnsupportedVersion => "unsupported version",
            ErrorKind::BadName => "bad name",
            ErrorKind::InvalidReference => "invalid reference",
            ErrorKind::NotInitialized => "not initialized",
            ErrorKind::InvalidField => "invalid field",
        };
        f.write_str(s)
    }
}

/// A request-scoped error: an HTTP method, a userinfo-redacted URL, and the
/// underlying cause. Produced by [`crate::transport::HttpEngine`] and
/// [`crate::distribution::DistributionClient`] whenever a request fails.
#[derive(Debug, thiserror::Error)]
#[error("{method} {url}: {source}")]
pub struct RequestError {
    pub method: String,
    /// Already redacted: no `Authorization` value, no URL userinfo.
    pub url: String,
    pub kind: ErrorKind,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl RequestError {
    pub fn new(
        method: impl Into<String>,
        url: &url::Url,
        kind: ErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        RequestError {
            method: method.into(),
            url: redact_url(url),
            kind,
            source: Box::new(source),
        }
    }
}

/// Strips userinfo (`user:pass@`) from a URL for safe display/logging.
pub fn redact_url(url: &url::Url) -> String {
    let mut redacted = url.clone();
    let _ = redacted.set_username("");
    let _ = redacted.set_password(None);
    redacted.to_string()
}

/// Top-level error type returned by every public API in this crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("verification failed: {0}")]
    Verify(#[from] crate::verify::VerifyError),

    #[error("credential store error: {0}")]
    CredStore(#[from] crate::credstore::CredStoreError),

    #[error("route builder error: {0}")]
    Route(#[from] crate::route::RouteError),

    #[error("operation canceled")]
    Canceled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Classify this error into the closed [`ErrorKind`] enum.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Reference(e) => e.kind(),
            Error::Manifest(e) => e.kind(),
            Error::Auth(e) => e.kind(),
            Error::Request(e) => e.kind,
            Error::Storage(e) => e.kind(),
            Error::Archive(_) => ErrorKind::System,
            Error::Verify(_) => ErrorKind::DataLoss,
            Error::CredStore(_) => ErrorKind::System,
            Error::Route(_) => ErrorKind::InvalidParameter,
            Error::Canceled => ErrorKind::Canceled,
            Error::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Error::Other(_) => ErrorKind::Unknown,
        }
    }
}
