//! Reference grammar & normalization.
//!
//! A reference names a repository plus an optional tag and/or digest. This
//! module lexes/parses reference strings with an anchored regex over the
//! grammar below and applies Docker-legacy rewrites (`docker.io` →
//! `registry-1.docker.io`, single-component names under the default
//! registry getting a `library/` prefix, and so on).

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::digest::Digest;
use crate::error::ErrorKind;

const MAX_NAME_LENGTH: usize = 255;

/// `ErrBadName` family: callers rely on the specific cause, not
/// just a generic failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("name is empty")]
    Empty,

    #[error("repository name {0:?} must be lowercase")]
    Uppercase(String),

    #[error("repository name {0:?} is too long ({1} > {max} characters)", max = MAX_NAME_LENGTH)]
    TooLong(String, usize),

    #[error("{0:?} is not a valid repository name")]
    InvalidName(String),

    #[error("{0:?} is not a valid tag")]
    InvalidTag(String),

    #[error("{0:?} is not a valid digest: {1}")]
    InvalidDigest(String, crate::digest::DigestError),

    #[error("{0:?} is not a valid scheme; only http and https are accepted")]
    InvalidScheme(String),

    #[error("reference has neither a tag nor a digest, and no default tag was configured")]
    NoTagOrDigest,

    #[error("{0:?} does not match the reference grammar")]
    Malformed(String),
}

impl ReferenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReferenceError::NoTagOrDigest => ErrorKind::InvalidReference,
            _ => ErrorKind::BadName,
        }
    }
}

// A single path component: lowercase alphanumeric runs joined by `.`, `_`,
// `__`, or one-or-more `-`.
const PATH_COMPONENT: &str = r"[a-z0-9]+(?:(?:[._]|__|[-]+)[a-z0-9]+)*";

static PATH_COMPONENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^{PATH_COMPONENT}$")).unwrap());

static PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^{PATH_COMPONENT}(?:/{PATH_COMPONENT})*$")).unwrap()
});

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").unwrap());

// Domain-component: DNS label, hyphens never at either end.
const DOMAIN_COMPONENT: &str = r"(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])";

static HOST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?:\[[0-9a-fA-F:]+\]|{DOMAIN_COMPONENT}(?:\.{DOMAIN_COMPONENT})*)(?::[0-9]+)?$"
    ))
    .unwrap()
});

/// A registry: an optional scheme (resolved later by probing if absent) and
/// a hostname, which may include a port and may be an IPv6 literal in
/// bracket form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Registry {
    scheme: Option<String>,
    host: String,
}

impl Registry {
    pub fn new(host: impl Into<String>) -> Self {
        Registry { scheme: None, host: host.into() }
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// `true` for hosts that never need a scheme probe:
    /// `localhost`, loopback, and RFC 1918 private addresses.
    pub fn is_local_or_private(&self) -> bool {
        let host = self.host.split(':').next().unwrap_or(&self.host);
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host == "localhost" || host == "127.0.0.1" || host == "::1" {
            return true;
        }
        is_rfc1918(host)
    }

    /// Default scheme: `http` for local/private
    /// hosts, unresolved (`None`, left to [`crate::probe`]) otherwise.
    pub fn default_scheme(&self) -> Option<&'static str> {
        if self.is_local_or_private() {
            Some("http")
        } else {
            None
        }
    }
}

fn is_rfc1918(host: &str) -> bool {
    let octets: Vec<&str> = host.split('.').collect();
    if octets.len() != 4 {
        return false;
    }
    let parsed: Option<Vec<u8>> = octets.iter().map(|o| o.parse::<u8>().ok()).collect();
    let Some(o) = parsed else { return false };
    match o[0] {
        10 => true,
        172 => (16..=31).contains(&o[1]),
        192 => o[1] == 168,
        _ => false,
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)
    }
}

/// `(Registry, path)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Repository {
    registry: Registry,
    path: String,
}

impl Repository {
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Pure functional constructor: replace the path and re-validate.
    pub fn with_path(&self, path: impl Into<String>) -> Result<Repository, ReferenceError> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Repository { registry: self.registry.clone(), path })
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.path)
    }
}

/// A reference: tagged, digested, or both.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Tagged { repository: Repository, tag: String },
    Digested { repository: Repository, digest: Digest },
    Both { repository: Repository, tag: String, digest: Digest },
}

impl Reference {
    pub fn repository(&self) -> &Repository {
        match self {
            Reference::Tagged { repository, .. }
            | Reference::Digested { repository, .. }
            | Reference::Both { repository, .. } => repository,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            Reference::Tagged { tag, .. } | Reference::Both { tag, .. } => Some(tag),
            Reference::Digested { .. } => None,
        }
    }

    pub fn digest(&self) -> Option<&Digest> {
        match self {
            Reference::Digested { digest, .. } | Reference::Both { digest, .. } => Some(digest),
            Reference::Tagged { .. } => None,
        }
    }

    /// The string used as the path segment in distribution API calls
    /// (the `{reference}` route placeholder): prefer the digest when
    /// present, since it is immutable and always addresses the same content.
    pub fn as_api_reference(&self) -> String {
        match self.digest() {
            Some(d) => d.to_string(),
            None => self.tag().unwrap_or_default().to_string(),
        }
    }

    /// Pure functional constructor: attach/replace the tag.
    pub fn with_tag(&self, tag: impl Into<String>) -> Result<Reference, ReferenceError> {
        let tag = tag.into();
        validate_tag(&tag)?;
        Ok(match self.digest() {
            Some(d) => Reference::Both { repository: self.repository().clone(), tag, digest: d.clone() },
            None => Reference::Tagged { repository: self.repository().clone(), tag },
        })
    }

    /// Pure functional constructor: attach/replace the digest.
    pub fn with_digest(&self, digest: Digest) -> Reference {
        match self.tag() {
            Some(t) => Reference::Both { repository: self.repository().clone(), tag: t.to_string(), digest },
            None => Reference::Digested { repository: self.repository().clone(), digest },
        }
    }

    /// Pure functional constructor: replace the repository path.
    pub fn with_path(&self, path: impl Into<String>) -> Result<Reference, ReferenceError> {
        let repository = self.repository().with_path(path)?;
        Ok(match self {
            Reference::Tagged { tag, .. } => Reference::Tagged { repository, tag: tag.clone() },
            Reference::Digested { digest, .. } => Reference::Digested { repository, digest: digest.clone() },
            Reference::Both { tag, digest, .. } => {
                Reference::Both { repository, tag: tag.clone(), digest: digest.clone() }
            }
        })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Tagged { repository, tag } => write!(f, "{repository}:{tag}"),
            Reference::Digested { repository, digest } => write!(f, "{repository}@{digest}"),
            Reference::Both { repository, tag, digest } => write!(f, "{repository}:{tag}@{digest}"),
        }
    }
}

/// Options threaded through every parse entry point.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub default_registry: String,
    /// `None` (cleared) means: a reference without tag or digest is an error.
    pub default_tag: Option<String>,
    pub strict: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            default_registry: "registry-1.docker.io".to_string(),
            default_tag: Some("latest".to_string()),
            strict: false,
        }
    }
}

fn strip_scheme(s: &str) -> Result<(Option<String>, &str), ReferenceError> {
    if let Some(idx) = s.find("://") {
        // Only strip when the prefix actually looks like a scheme, i.e. it
        // precedes the first '/' of the rest of the reference.
        let scheme = &s[..idx];
        if scheme.chars().all(|c| c.is_ascii_alphabetic()) {
            return match scheme.to_ascii_lowercase().as_str() {
                "http" | "https" => Ok((Some(scheme.to_ascii_lowercase()), &s[idx + 3..])),
                other => Err(ReferenceError::InvalidScheme(other.to_string())),
            };
        }
    }
    Ok((None, s))
}

fn validate_path(path: &str) -> Result<(), ReferenceError> {
    if path.is_empty() {
        return Err(ReferenceError::Empty);
    }
    if path.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ReferenceError::Uppercase(path.to_string()));
    }
    if !PATH_RE.is_match(path) {
        return Err(ReferenceError::InvalidName(path.to_string()));
    }
    Ok(())
}

fn validate_tag(tag: &str) -> Result<(), ReferenceError> {
    if !TAG_RE.is_match(tag) {
        return Err(ReferenceError::InvalidTag(tag.to_string()));
    }
    Ok(())
}

/// Parse the registry/host portion of a reference.
///
/// Applies Docker-legacy normalization: `docker.io` and `index.docker.io`
/// become `registry-1.docker.io`.
pub fn parse_registry(s: &str, opts: &ParseOptions) -> Result<Registry, ReferenceError> {
    let (scheme, rest) = strip_scheme(s)?;
    if rest.is_empty() {
        return Ok(Registry { scheme, host: opts.default_registry.clone() });
    }
    if !HOST_RE.is_match(rest) {
        return Err(ReferenceError::Malformed(s.to_string()));
    }
    let host = normalize_docker_legacy_host(rest);
    Ok(Registry { scheme, host })
}

fn normalize_docker_legacy_host(host: &str) -> String {
    match host {
        "docker.io" | "index.docker.io" => "registry-1.docker.io".to_string(),
        other => other.to_string(),
    }
}

/// `true` if the first path segment (before the first `/`) should be treated
/// as a domain rather than the first repository path component: it contains
/// `.` or `:`, or is exactly `localhost`.
fn looks_like_domain(segment: &str) -> bool {
    segment == "localhost" || segment.contains('.') || segment.contains(':')
}

/// Parse `domain/path` into a [`Repository`].
pub fn parse_repository(s: &str, opts: &ParseOptions) -> Result<Repository, ReferenceError> {
    let (scheme, rest) = strip_scheme(s)?;
    if rest.is_empty() {
        return Err(ReferenceError::Empty);
    }

    let total_len = rest.len();
    if total_len > MAX_NAME_LENGTH {
        return Err(ReferenceError::TooLong(rest.to_string(), total_len));
    }

    let (domain_part, mut path) = match rest.split_once('/') {
        Some((first, remainder)) if looks_like_domain(first) => (Some(first), remainder.to_string()),
        _ => (None, rest.to_string()),
    };

    let registry = match domain_part {
        Some(d) => {
            if !HOST_RE.is_match(d) {
                return Err(ReferenceError::Malformed(s.to_string()));
            }
            Registry { scheme, host: normalize_docker_legacy_host(d) }
        }
        None => Registry { scheme, host: opts.default_registry.clone() },
    };

    // Single-component paths under the default registry get a `library/`
    // prefix. Only applies when no
    // explicit domain was present and the registry resolved to the default.
    if domain_part.is_none() && registry.host == opts.default_registry && !path.contains('/') {
        path = format!("library/{path}");
    }

    validate_path(&path)?;

    Ok(Repository { registry, path })
}

/// Parse a full reference: `domain/path[:tag][@digest]`").
pub fn parse_reference(s: &str, opts: &ParseOptions) -> Result<Reference, ReferenceError> {
    // Split off the optional `@digest` first (digest hex never contains
    // `:` meaningfully ambiguous with tags since tags cannot contain `@`).
    let (before_digest, digest) = match s.split_once('@') {
        Some((before, digest_str)) => {
            let digest = parse_reference_digest(digest_str)?;
            (before, Some(digest))
        }
        None => (s, None),
    };

    // Now split the remainder into `domain/path` and an optional `:tag`.
    // The tag separator is the last `:` that occurs after the last `/`,
    // so that a domain's port (e.g. `registry.example.com:5000/x`) is not
    // mistaken for a tag separator.
    let last_slash = before_digest.rfind('/');
    let search_from = last_slash.map(|i| i + 1).unwrap_or(0);
    let tag_sep = before_digest[search_from..]
        .find(':')
        .map(|i| i + search_from);

    let (name_part, tag) = match tag_sep {
        Some(idx) => (&before_digest[..idx], Some(before_digest[idx + 1..].to_string())),
        None => (before_digest, None),
    };

    if let Some(t) = &tag {
        validate_tag(t)?;
    }

    let repository = parse_repository(name_part, opts)?;

    match (tag, digest) {
        (Some(tag), Some(digest)) => Ok(Reference::Both { repository, tag, digest }),
        (Some(tag), None) => Ok(Reference::Tagged { repository, tag }),
        (None, Some(digest)) => Ok(Reference::Digested { repository, digest }),
        (None, None) => match &opts.default_tag {
            Some(default_tag) => Ok(Reference::Tagged { repository, tag: default_tag.clone() }),
            None => Err(ReferenceError::NoTagOrDigest),
        },
    }
}

/// Parses and semantically validates a digest appearing in a reference.
///
/// The syntactic digest grammar only requires `algorithm:hex` with
/// hex length >= 32. Known algorithms carry a canonical length in the
/// registries actually deployed (sha256 -> 64 hex chars, sha512 -> 128);
/// a digest using a known algorithm name at the wrong length is rejected
/// here even though [`Digest::from_str`] alone would accept it (e.g. a
/// 32-hex `sha256` digest, which is syntactically valid but not a real
/// sha256 sum).
fn parse_reference_digest(s: &str) -> Result<Digest, ReferenceError> {
    let digest: Digest = s
        .parse()
        .map_err(|e| ReferenceError::InvalidDigest(s.to_string(), e))?;

    let expected_len = match digest.algorithm() {
        "sha256" => Some(64),
        "sha512" => Some(128),
        _ => None,
    };

    if let Some(expected) = expected_len {
        if digest.hex().len() != expected {
            return Err(ReferenceError::InvalidDigest(
                s.to_string(),
                crate::digest::DigestError::TooShort(s.to_string()),
            ));
        }
    }

    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> ParseOptions {
        ParseOptions::default()
    }

    #[test]
    fn hello_gets_default_registry_and_library_prefix() {
        let r = parse_reference("hello", &opts()).unwrap();
        assert_eq!(r.to_string(), "registry-1.docker.io/library/hello:latest");
    }

    #[test]
    fn docker_io_with_two_components_has_no_library_injection() {
        let r = parse_reference("docker.io/hello/world", &opts()).unwrap();
        assert_eq!(r.to_string(), "registry-1.docker.io/hello/world:latest");
    }

    #[test]
    fn localhost_port_is_recognized_as_domain() {
        let r = parse_reference("localhost:5000/x", &opts()).unwrap();
        assert_eq!(r.repository().registry().host(), "localhost:5000");
        assert_eq!(r.repository().path(), "x");
        assert!(r.repository().registry().is_local_or_private());
    }

    #[test]
    fn ipv6_host_with_port_preserves_brackets() {
        let r = parse_reference("[fd00:1:2::3]:75050/x", &opts()).unwrap();
        assert_eq!(r.repository().registry().host(), "[fd00:1:2::3]:75050");
    }

    #[test]
    fn full_form_with_registry_tag_and_digest() {
        let digest = "sha256:".to_string() + &"f".repeat(64);
        let s = format!("registry.example.com:5000/a/b:tag@{digest}");
        let r = parse_reference(&s, &opts()).unwrap();
        assert_eq!(r.repository().registry().host(), "registry.example.com:5000");
        assert_eq!(r.repository().path(), "a/b");
        assert_eq!(r.tag(), Some("tag"));
        assert_eq!(r.digest().unwrap().to_string(), digest);
    }

    #[test]
    fn docker_io_and_index_docker_io_normalize_identically() {
        assert_eq!(
            parse_registry("docker.io", &opts()).unwrap().host(),
            "registry-1.docker.io"
        );
        assert_eq!(
            parse_registry("index.docker.io", &opts()).unwrap().host(),
            "registry-1.docker.io"
        );
    }

    #[test]
    fn roundtrips_through_display_and_reparse() {
        let cases = [
            "alpine",
            "docker.io/library/alpine",
            "localhost:5000/x",
            "[fd00:1:2::3]:75050/x:latest",
        ];
        for case in cases {
            let parsed = parse_reference(case, &opts()).unwrap();
            let printed = parsed.to_string();
            let reparsed = parse_reference(&printed, &opts()).unwrap();
            assert_eq!(parsed, reparsed, "roundtrip mismatch for {case:?}");
        }
    }

    #[test]
    fn rejects_uppercase() {
        let err = parse_reference("Uppercase/x", &opts()).unwrap_err();
        assert!(matches!(err, ReferenceError::Uppercase(_)));
    }

    #[test]
    fn rejects_empty_path_component() {
        let err = parse_reference("a//b", &opts()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadName);
    }

    #[test]
    fn rejects_leading_hyphen() {
        let err = parse_reference("-x", &opts()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadName);
    }

    #[test]
    fn rejects_trailing_slash() {
        let err = parse_reference("hello/world/", &opts()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadName);
    }

    #[test]
    fn rejects_overlong_name() {
        let long = "a".repeat(257);
        let err = parse_reference(&long, &opts()).unwrap_err();
        assert!(matches!(err, ReferenceError::TooLong(_, _)));
    }

    #[test]
    fn rejects_sha256_digest_with_wrong_canonical_length() {
        let s = "registry.example.com:5000/hello@sha256:".to_string() + &"f".repeat(32);
        let err = parse_reference(&s, &opts()).unwrap_err();
        assert!(matches!(err, ReferenceError::InvalidDigest(_, _)));
    }

    #[test]
    fn missing_tag_and_digest_with_no_default_errors() {
        let mut o = opts();
        o.default_tag = None;
        let err = parse_reference("registry.example.com/a/b", &o).unwrap_err();
        assert!(matches!(err, ReferenceError::NoTagOrDigest));
    }

    #[test]
    fn with_tag_with_digest_with_path_revalidate() {
        let r = parse_reference("hello", &opts()).unwrap();
        let r2 = r.with_tag("3.18").unwrap();
        assert_eq!(r2.tag(), Some("3.18"));
        assert!(r.with_tag("../bad").is_err());

        let digest: Digest = ("sha256:".to_string() + &"a".repeat(64)).parse().unwrap();
        let r3 = r2.with_digest(digest.clone());
        assert_eq!(r3.digest(), Some(&digest));

        let r4 = r3.with_path("library/other").unwrap();
        assert_eq!(r4.repository().path(), "library/other");
    }
}
