use crate::error::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("no unmarshal function registered for media type {0:?}")]
    NotRegistered(String),

    #[error("media type {0:?} is already registered")]
    DuplicateRegistration(String),

    #[error("schema-1 manifests are not supported: {0}")]
    Unsupported(String),

    #[error("failed to decode {0} manifest: {1}")]
    Decode(String, String),

    #[error("{0} manifest does not match its declared shape: {1}")]
    AmbiguousFormat(String, String),

    #[error("invalid field: {0}")]
    InvalidField(String),

    #[error("no matcher selected a manifest from the index")]
    NoMatch,

    #[error("selector resolved to a non-image manifest")]
    NotAnImage,
}

impl ManifestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ManifestError::NotRegistered(_) => ErrorKind::NotInitialized,
            ManifestError::DuplicateRegistration(_) => ErrorKind::NotInitialized,
            ManifestError::Unsupported(_) => ErrorKind::Unsupported,
            ManifestError::Decode(_, _) => ErrorKind::InvalidField,
            ManifestError::AmbiguousFormat(_, _) => ErrorKind::InvalidField,
            ManifestError::InvalidField(_) => ErrorKind::InvalidField,
            ManifestError::NoMatch => ErrorKind::NotFound,
            ManifestError::NotAnImage => ErrorKind::Unsupported,
        }
    }
}
