//! HTTPEngine: the single request entry point, handling header
//! merging, cached-credential pre-population, and challenge-triggered
//! re-authentication with a single retry.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Client, Method, Response, StatusCode};

use crate::auth::{self, AuthConfig, Challenge, ChallengeScheme, CredentialProvider};
use crate::cache::{ChallengeCache, DiscardCache, InMemoryChallengeCache, InMemoryTokenCache, TokenCache};
use crate::error::{ErrorKind, RequestError};

/// TLS protocol preference, modeled on the `ClientProtocol` record named in
/// the configuration surface this client carries, generalized from a
/// per-request `RequestOptions` override to a client-wide default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientProtocol {
    Https,
    Http,
    HttpsExcept(Vec<String>),
}

impl ClientProtocol {
    pub fn scheme_for(&self, host: &str) -> &'static str {
        match self {
            ClientProtocol::Https => "https",
            ClientProtocol::Http => "http",
            ClientProtocol::HttpsExcept(hosts) => {
                if hosts.iter().any(|h| h == host) {
                    "http"
                } else {
                    "https"
                }
            }
        }
    }
}

/// Builder-style configuration for [`HttpEngine`]: TLS
/// preference, timeout, extra default headers, and an injectable credential
/// provider and cache pair.
///
/// `Clone`, so [`crate::storage::RemoteStorage`] can hold one template
/// configuration and hand a clone to each per-host [`HttpEngine`] it builds.
#[derive(Clone)]
pub struct ClientConfig {
    pub protocol: ClientProtocol,
    pub timeout: Duration,
    pub extra_headers: HeaderMap,
    pub credentials: Option<Arc<dyn CredentialProvider>>,
    pub challenge_cache: Arc<dyn ChallengeCache>,
    pub token_cache: Arc<dyn TokenCache>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            protocol: ClientProtocol::Https,
            timeout: Duration::from_secs(60),
            extra_headers: HeaderMap::new(),
            credentials: None,
            challenge_cache: Arc::new(InMemoryChallengeCache::default()),
            token_cache: Arc::new(InMemoryTokenCache::default()),
        }
    }
}

impl ClientConfig {
    /// A configuration with both caches wired to [`DiscardCache`] and no
    /// credential provider — stateless, for tests or one-shot use.
    pub fn stateless() -> Self {
        let discard = Arc::new(DiscardCache);
        ClientConfig {
            challenge_cache: discard.clone() as Arc<dyn ChallengeCache>,
            token_cache: discard as Arc<dyn TokenCache>,
            ..ClientConfig::default()
        }
    }
}

/// The body of a request that may need to be resent after a challenge-
/// triggered re-authentication. A streaming
/// body without a re-supplier is rejected at engine entry rather than risk a
/// silently-truncated retry.
#[derive(Clone)]
pub enum RequestBody {
    Empty,
    Bytes(Bytes),
}

/// Per-request options: hinted scopes merged into the token request,
/// a direct-request bypass, and a request to skip re-auth entirely.
#[derive(Default, Clone)]
pub struct RequestOptions {
    pub hinted_scopes: Vec<String>,
    pub direct: bool,
}

pub struct HttpEngine {
    client: Client,
    host: String,
    config: ClientConfig,
}

impl HttpEngine {
    pub fn new(client: Client, host: impl Into<String>, config: ClientConfig) -> Self {
        HttpEngine { client, host: host.into(), config }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// A clone of the underlying `reqwest::Client` (cheap: it's internally
    /// `Arc`-backed), for subsystems that need to issue requests outside the
    /// `Do` auth/retry pipeline — range-seek GETs and chunked-upload
    /// PATCH/PUT/DELETE, which reuse the session already
    /// established by the initiating request rather than re-running
    /// challenge/token acquisition per chunk.
    pub fn raw_client(&self) -> Client {
        self.client.clone()
    }

    /// `Do`: merges headers, pre-populates cached credentials,
    /// sends, and on a 401 with a known challenge scheme, re-authenticates
    /// and retries exactly once.
    pub async fn do_request(
        &self,
        method: Method,
        url: &url::Url,
        body: RequestBody,
        headers: HeaderMap,
        options: &RequestOptions,
    ) -> Result<Response, RequestError> {
        if options.direct {
            debug!("direct-request bypass for {method} {}", crate::error::redact_url(url));
            return self.send_raw(&method, url, &body, &headers).await;
        }

        let mut merged = self.config.extra_headers.clone();
        for (name, value) in headers.iter() {
            merged.insert(name.clone(), value.clone());
        }

        let creds = match &self.config.credentials {
            Some(provider) => provider.credentials(&self.host).await,
            None => None,
        };

        if let Some(challenge) = self.config.challenge_cache.get(&self.host) {
            self.apply_cached_auth(&mut merged, &challenge, options, creds.as_ref()).await;
        }

        debug!("{method} {}", crate::error::redact_url(url));
        let response = self.send_raw(&method, url, &body, &merged).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let www_authenticate = match response.headers().get(WWW_AUTHENTICATE) {
            Some(v) => v.to_str().unwrap_or_default().to_string(),
            None => return Ok(response),
        };

        let challenge = auth::parse_challenge(&www_authenticate);
        if challenge.scheme == ChallengeScheme::Unknown {
            debug!("401 with unrecognized challenge scheme, returning verbatim");
            return Ok(response);
        }

        info!("re-authenticating against {} after 401", self.host);
        self.config.challenge_cache.put(&self.host, challenge.clone());

        let mut retry_headers = merged.clone();
        self.apply_cached_auth(&mut retry_headers, &challenge, options, creds.as_ref()).await;

        self.send_raw(&method, url, &body, &retry_headers).await
    }

    async fn apply_cached_auth(
        &self,
        headers: &mut HeaderMap,
        challenge: &Challenge,
        options: &RequestOptions,
        creds: Option<&AuthConfig>,
    ) {
        match challenge.scheme {
            ChallengeScheme::Basic => {
                if let Some(c) = creds {
                    if let Ok(value) = basic_auth_header(&c.username, &c.password) {
                        headers.insert(AUTHORIZATION, value);
                    }
                }
            }
            ChallengeScheme::Bearer => {
                let scopes = auth::merged_scopes(challenge, &options.hinted_scopes);
                let scope_key = format!("{}|{}", self.host, scopes.join(" "));

                let cached = self.config.token_cache.get(&scope_key);
                let token = match cached {
                    Some(t) if !t.is_expired() => Some(t),
                    _ => match auth::acquire_token(&self.client, challenge, &options.hinted_scopes, creds).await {
                        Ok(t) => {
                            self.config.token_cache.put(&scope_key, t.clone());
                            Some(t)
                        }
                        Err(e) => {
                            warn!("token acquisition failed for {}: {e}", self.host);
                            None
                        }
                    },
                };

                if let Some(token) = token {
                    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token.access_token)) {
                        headers.insert(AUTHORIZATION, value);
                    }
                }
            }
            ChallengeScheme::Unknown => {}
        }
    }

    async fn send_raw(
        &self,
        method: &Method,
        url: &url::Url,
        body: &RequestBody,
        headers: &HeaderMap,
    ) -> Result<Response, RequestError> {
        let mut request = self.client.request(method.clone(), url.clone()).headers(headers.clone());
        if let RequestBody::Bytes(bytes) = body {
            request = request.body(bytes.clone());
        }

        request
            .send()
            .await
            .map_err(|e| RequestError::new(method.as_str(), url, status_kind(e.status()), e))
    }
}

fn status_kind(status: Option<StatusCode>) -> ErrorKind {
    match status {
        Some(StatusCode::UNAUTHORIZED) => ErrorKind::Unauthorized,
        Some(StatusCode::FORBIDDEN) => ErrorKind::Forbidden,
        Some(StatusCode::NOT_FOUND) => ErrorKind::NotFound,
        Some(StatusCode::CONFLICT) => ErrorKind::Conflict,
        Some(s) if s.is_server_error() => ErrorKind::Unavailable,
        Some(_) => ErrorKind::Unknown,
        None => ErrorKind::Unavailable,
    }
}

fn basic_auth_header(username: &str, password: &str) -> Result<HeaderValue, reqwest::header::InvalidHeaderValue> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    let encoded = STANDARD.encode(format!("{username}:{password}"));
    HeaderValue::from_str(&format!("Basic {encoded}"))
}

/// Parses an HTTP header name from a static string, for the handful of
/// registry-specific headers this crate reads.
pub fn header_name(name: &'static str) -> HeaderName {
    HeaderName::from_static(name)
}
