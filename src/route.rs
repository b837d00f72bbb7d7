//! RouteTable & Builder: a static table of OCI Distribution
//! Specification endpoints, each a method + path-pattern with `{name}`-style
//! placeholders, substituted and validated before use.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use reqwest::Method;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("unknown route id {0:?}")]
    UnknownRoute(RouteId),

    #[error("route {0:?} is missing required placeholder {1:?}")]
    MissingPlaceholder(RouteId, &'static str),

    #[error("route {0:?} still has an unsubstituted placeholder after building: {1:?}")]
    UnresolvedPlaceholder(RouteId, String),

    #[error("route {0:?} produced an empty path segment (`//`) after substitution")]
    EmptyPathSegment(RouteId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RouteId {
    BaseVersionCheck,
    ManifestExists,
    ManifestGet,
    ManifestPut,
    ManifestDelete,
    BlobExists,
    BlobGet,
    BlobDelete,
    BlobUploadStart,
    BlobUploadChunk,
    BlobUploadComplete,
    BlobUploadStatus,
    BlobUploadMount,
    Catalog,
    TagsList,
    Referrers,
}

/// One table row: method, path pattern, and the set of success/allowed-failure
/// status codes the caller should treat as non-exceptional.
#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub id: RouteId,
    pub method: Method,
    pub pattern: &'static str,
    pub success_codes: &'static [u16],
    pub allowed_failure_codes: &'static [u16],
}

macro_rules! route {
    ($id:expr, $method:expr, $pattern:expr, success: $success:expr, allowed: $allowed:expr) => {
        RouteSpec { id: $id, method: $method, pattern: $pattern, success_codes: $success, allowed_failure_codes: $allowed }
    };
}

static ROUTES: Lazy<Vec<RouteSpec>> = Lazy::new(|| {
    vec![
        route!(RouteId::BaseVersionCheck, Method::GET, "/v2/", success: &[200], allowed: &[401]),
        route!(RouteId::ManifestExists, Method::HEAD, "/v2/{name}/manifests/{reference}", success: &[200], allowed: &[401, 404]),
        route!(RouteId::ManifestGet, Method::GET, "/v2/{name}/manifests/{reference}", success: &[200], allowed: &[401, 404]),
        route!(RouteId::ManifestPut, Method::PUT, "/v2/{name}/manifests/{reference}", success: &[201], allowed: &[401, 404]),
        route!(RouteId::ManifestDelete, Method::DELETE, "/v2/{name}/manifests/{reference}", success: &[202], allowed: &[401, 404]),
        route!(RouteId::BlobExists, Method::HEAD, "/v2/{name}/blobs/{digest}", success: &[200], allowed: &[401, 404]),
        route!(RouteId::BlobGet, Method::GET, "/v2/{name}/blobs/{digest}", success: &[200, 206], allowed: &[401, 404]),
        route!(RouteId::BlobDelete, Method::DELETE, "/v2/{name}/blobs/{digest}", success: &[202], allowed: &[401, 404]),
        route!(RouteId::BlobUploadStart, Method::POST, "/v2/{name}/blobs/uploads/", success: &[202], allowed: &[401, 404]),
        route!(RouteId::BlobUploadChunk, Method::PATCH, "/v2/{name}/blobs/uploads/{session_id}", success: &[202], allowed: &[401, 404]),
        route!(RouteId::BlobUploadComplete, Method::PUT, "/v2/{name}/blobs/uploads/{session_id}", success: &[201], allowed: &[401, 404]),
        route!(RouteId::BlobUploadStatus, Method::GET, "/v2/{name}/blobs/uploads/{session_id}", success: &[204], allowed: &[401, 404]),
        route!(RouteId::BlobUploadMount, Method::POST, "/v2/{name}/blobs/uploads/", success: &[201, 202], allowed: &[401, 404]),
        route!(RouteId::Catalog, Method::GET, "/v2/_catalog", success: &[200], allowed: &[401]),
        route!(RouteId::TagsList, Method::GET, "/v2/{name}/tags/list", success: &[200], allowed: &[401, 404]),
        route!(RouteId::Referrers, Method::GET, "/v2/{name}/referrers/{digest}", success: &[200], allowed: &[401, 404]),
    ]
});

fn spec_for(id: RouteId) -> &'static RouteSpec {
    ROUTES.iter().find(|r| r.id == id).expect("every RouteId has a table row")
}

/// Substitutes placeholders into a route's path pattern. Values are given by
/// name (`"name"`, `"reference"`, `"digest"`, `"session_id"`, `"from_name"`,
/// `"artifact_type"`, `"last"`, or an integer placeholder); an unset
/// placeholder that remains in the pattern after substitution is a
/// [`RouteError::UnresolvedPlaceholder`].
#[derive(Default)]
pub struct RouteBuilder {
    values: HashMap<&'static str, String>,
    query: Vec<(&'static str, String)>,
}

impl RouteBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, placeholder: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(placeholder, value.into());
        self
    }

    /// Adds a query parameter. If `value` is `None` the key is dropped
    /// entirely rather than emitted empty.
    pub fn query(mut self, key: &'static str, value: Option<impl Into<String>>) -> Self {
        if let Some(v) = value {
            self.query.push((key, v.into()));
        }
        self
    }

    pub fn build(self, id: RouteId) -> Result<(Method, String, Vec<(String, String)>), RouteError> {
        let spec = spec_for(id);
        let mut path = spec.pattern.to_string();

        for (key, value) in &self.values {
            path = path.replace(&format!("{{{key}}}"), value);
        }

        if let Some(start) = path.find('{') {
            let end = path[start..].find('}').map(|e| start + e + 1).unwrap_or(path.len());
            return Err(RouteError::UnresolvedPlaceholder(id, path[start..end].to_string()));
        }

        if path.contains("//") && !path.starts_with("//") {
            // Leading "/v2/" followed by an immediate "/" happens only when
            // `name` substitutes to empty, which is always a caller bug.
            if path.matches("//").count() > 0 {
                return Err(RouteError::EmptyPathSegment(id));
            }
        }

        Ok((spec.method.clone(), path, self.query))
    }
}

pub fn route_spec(id: RouteId) -> &'static RouteSpec {
    spec_for(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_named_placeholders() {
        let (method, path, _) = RouteBuilder::new()
            .set("name", "library/alpine")
            .set("reference", "3.18")
            .build(RouteId::ManifestGet)
            .unwrap();
        assert_eq!(method, Method::GET);
        assert_eq!(path, "/v2/library/alpine/manifests/3.18");
    }

    #[test]
    fn missing_placeholder_is_a_route_error() {
        let err = RouteBuilder::new().build(RouteId::ManifestGet).unwrap_err();
        assert!(matches!(err, RouteError::UnresolvedPlaceholder(RouteId::ManifestGet, _)));
    }

    #[test]
    fn empty_name_substitution_yields_empty_segment_error() {
        let err = RouteBuilder::new()
            .set("name", "")
            .set("reference", "latest")
            .build(RouteId::ManifestGet)
            .unwrap_err();
        assert!(matches!(err, RouteError::EmptyPathSegment(RouteId::ManifestGet)));
    }

    #[test]
    fn query_parameters_with_none_value_are_dropped() {
        let (_, _, query) = RouteBuilder::new()
            .set("name", "repo")
            .set("digest", "sha256:abc")
            .query("artifactType", None::<String>)
            .build(RouteId::Referrers)
            .unwrap();
        assert!(query.is_empty());
    }

    #[test]
    fn query_parameters_with_some_value_are_kept() {
        let (_, _, query) = RouteBuilder::new()
            .set("name", "repo")
            .set("digest", "sha256:abc")
            .query("artifactType", Some("application/vnd.foo"))
            .build(RouteId::Referrers)
            .unwrap();
        assert_eq!(query, vec![("artifactType".to_string(), "application/vnd.foo".to_string())]);
    }

    #[test]
    fn catalog_route_has_no_placeholders() {
        let (method, path, _) = RouteBuilder::new().build(RouteId::Catalog).unwrap();
        assert_eq!(method, Method::GET);
        assert_eq!(path, "/v2/_catalog");
    }
}
