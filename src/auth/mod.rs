//! Bearer/Basic authentication: parses
//! `WWW-Authenticate` challenges, canonicalizes scopes, and exchanges them
//! for a token via OAuth2 (falling back to Basic token-exchange when the
//! realm doesn't support OAuth2).

mod challenge;
mod config;
mod scope;
mod token;

pub use challenge::{parse as parse_challenge, Challenge, ChallengeScheme};
pub use config::AuthConfig;
pub use scope::canonicalize;
pub use token::Token;

use std::str::FromStr;

use reqwest::{Client, StatusCode};

use crate::error::ErrorKind;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AuthError {
    #[error("auth request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token request to {0} failed with status {1}")]
    TokenRequestFailed(String, StatusCode),

    #[error("token response exceeds the {0} byte limit")]
    TokenResponseTooLarge(usize),

    #[error("failed to decode token response: {0}")]
    TokenDecode(serde_json::Error),

    #[error("token response contained neither `token` nor `access_token`")]
    TokenMissing,

    #[error("invalid challenge: {0}")]
    InvalidChallenge(String),

    #[error("invalid auth config: {0}")]
    InvalidAuthConfig(String),

    #[error("invalid base64: {0}")]
    Base64(base64::DecodeError),

    #[error("not valid utf-8: {0}")]
    NotUtf8(std::str::Utf8Error),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Http(_) => ErrorKind::Unavailable,
            AuthError::TokenRequestFailed(_, StatusCode::UNAUTHORIZED) => ErrorKind::Unauthorized,
            AuthError::TokenRequestFailed(_, StatusCode::FORBIDDEN) => ErrorKind::Forbidden,
            AuthError::TokenRequestFailed(..) => ErrorKind::Unavailable,
            AuthError::TokenResponseTooLarge(_) => ErrorKind::InvalidParameter,
            AuthError::TokenDecode(_) => ErrorKind::InvalidParameter,
            AuthError::TokenMissing => ErrorKind::InvalidParameter,
            AuthError::InvalidChallenge(_) => ErrorKind::InvalidParameter,
            AuthError::InvalidAuthConfig(_) => ErrorKind::InvalidParameter,
            AuthError::Base64(_) => ErrorKind::InvalidParameter,
            AuthError::NotUtf8(_) => ErrorKind::InvalidParameter,
        }
    }
}

/// Looks up credentials for a registry host. Implemented by
/// the credential store and by any caller-supplied override.
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self, host: &str) -> Option<AuthConfig>;
}

const CLIENT_ID: &str = "opencontainers-client";

/// Merges the *required* scopes carried on `challenge`'s `scope` parameter
/// (a space-delimited list of scope-values, RFC 6749 §3.3) with the
/// caller's *hinted* scopes, then canonicalizes the union. Used as both the
/// token-request scope and the token-cache key suffix, so a request that
/// didn't hint a scope the registry's 401 demands still ends up asking for
/// it.
pub fn merged_scopes(challenge: &Challenge, hinted: &[String]) -> Vec<String> {
    let mut scopes: Vec<String> = challenge
        .parameters
        .as_ref()
        .and_then(|p| p.get("scope"))
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    scopes.extend(hinted.iter().cloned());
    canonicalize(&scopes)
}

/// Acquires a bearer token for `challenge`'s realm/service, scoped to the
/// challenge's own required scopes merged with `hinted_scopes`. Tries
/// OAuth2 first; on a `404` from the realm, falls back to the legacy Basic
/// token-exchange.
pub async fn acquire_token(
    client: &Client,
    challenge: &Challenge,
    hinted_scopes: &[String],
    creds: Option<&AuthConfig>,
) -> Result<Token, AuthError> {
    let params = challenge.parameters.as_ref().ok_or_else(|| {
        AuthError::InvalidChallenge("challenge carries no parameters to locate a realm".to_string())
    })?;
    let realm = params
        .get("realm")
        .ok_or_else(|| AuthError::InvalidChallenge("challenge is missing `realm`".to_string()))?;
    let service = params.get("service").cloned().unwrap_or_default();
    let scopes = merged_scopes(challenge, hinted_scopes);

    match try_oauth2(client, realm, &service, &scopes, creds).await {
        Ok(token) => Ok(token),
        Err(AuthError::TokenRequestFailed(_, StatusCode::NOT_FOUND)) => {
            try_basic(client, realm, &service, &scopes, creds).await
        }
        Err(e) => Err(e),
    }
}

/// `POST realm` with an `application/x-www-form-urlencoded` body:
/// `grant_type=password`/`refresh_token` depending on whether an
/// identity token is on hand, plus `client_id`, `service`, `scope`, and
/// `access_type=offline`.
async fn try_oauth2(
    client: &Client,
    realm: &str,
    service: &str,
    scopes: &[String],
    creds: Option<&AuthConfig>,
) -> Result<Token, AuthError> {
    let mut form: Vec<(&str, String)> = vec![
        ("client_id", CLIENT_ID.to_string()),
        ("service", service.to_string()),
        ("scope", scopes.join(" ")),
        ("access_type", "offline".to_string()),
    ];

    match creds.and_then(|c| c.identity_token.clone()) {
        Some(identity_token) => {
            form.push(("grant_type", "refresh_token".to_string()));
            form.push(("refresh_token", identity_token));
        }
        None => {
            form.push(("grant_type", "password".to_string()));
            if let Some(c) = creds {
                form.push(("username", c.username.clone()));
                form.push(("password", c.password.clone()));
            }
        }
    }

    let response = client.post(realm).form(&form).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::TokenRequestFailed(realm.to_string(), status));
    }

    let bytes = response.bytes().await?;
    Token::decode(&bytes)
}

/// `GET realm?service=..&scope=..&scope=..&offline_token=true&client_id=..`
/// with HTTP Basic credentials; `scope` is repeated once per canonicalized
/// scope rather than joined into one value.
async fn try_basic(
    client: &Client,
    realm: &str,
    service: &str,
    scopes: &[String],
    creds: Option<&AuthConfig>,
) -> Result<Token, AuthError> {
    let mut query: Vec<(&str, String)> = vec![("service", service.to_string())];
    for scope in scopes {
        query.push(("scope", scope.clone()));
    }
    query.push(("offline_token", "true".to_string()));
    query.push(("client_id", CLIENT_ID.to_string()));

    let url = reqwest::Url::parse_with_params(realm, &query)
        .map_err(|e| AuthError::InvalidChallenge(e.to_string()))?;

    let mut request = client.get(url);
    if let Some(c) = creds {
        request = request.basic_auth(&c.username, Some(&c.password));
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::TokenRequestFailed(realm.to_string(), status));
    }

    let bytes = response.bytes().await?;
    Token::decode(&bytes)
}

impl FromStr for ChallengeScheme {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "bearer" => ChallengeScheme::Bearer,
            "basic" => ChallengeScheme::Basic,
            _ => ChallengeScheme::Unknown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn challenge_scheme_parses_case_insensitively() {
        assert_eq!("BEARER".parse::<ChallengeScheme>().unwrap(), ChallengeScheme::Bearer);
        assert_eq!("basic".parse::<ChallengeScheme>().unwrap(), ChallengeScheme::Basic);
        assert_eq!("digest".parse::<ChallengeScheme>().unwrap(), ChallengeScheme::Unknown);
    }

    #[tokio::test]
    async fn acquire_token_rejects_challenge_without_realm() {
        let client = Client::new();
        let challenge = Challenge { scheme: ChallengeScheme::Bearer, parameters: Some(Default::default()) };
        let err = acquire_token(&client, &challenge, &[], None).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidChallenge(_)));
    }

    fn challenge_with_scope(scope: &str) -> Challenge {
        let mut params = HashMap::new();
        params.insert("realm".to_string(), "https://auth.example.com/token".to_string());
        params.insert("service".to_string(), "registry.example.com".to_string());
        params.insert("scope".to_string(), scope.to_string());
        Challenge { scheme: ChallengeScheme::Bearer, parameters: Some(params) }
    }

    #[test]
    fn merged_scopes_combines_challenge_and_hinted_scopes() {
        let challenge = challenge_with_scope("repository:foo:pull");
        let hinted = vec!["repository:bar:push".to_string()];
        assert_eq!(
            merged_scopes(&challenge, &hinted),
            vec!["repository:bar:push".to_string(), "repository:foo:pull".to_string()]
        );
    }

    #[test]
    fn merged_scopes_merges_overlapping_resource_name() {
        let challenge = challenge_with_scope("repository:foo:pull");
        let hinted = vec!["repository:foo:push".to_string()];
        assert_eq!(merged_scopes(&challenge, &hinted), vec!["repository:foo:pull,push".to_string()]);
    }

    #[test]
    fn merged_scopes_splits_multiple_challenge_scope_values() {
        let challenge = challenge_with_scope("repository:foo:pull repository:bar:pull,push");
        assert_eq!(
            merged_scopes(&challenge, &[]),
            vec!["repository:bar:pull,push".to_string(), "repository:foo:pull".to_string()]
        );
    }

    #[test]
    fn merged_scopes_with_no_challenge_scope_is_just_hinted_canonicalized() {
        let challenge = Challenge {
            scheme: ChallengeScheme::Bearer,
            parameters: Some(HashMap::from([("realm".to_string(), "https://auth.example.com".to_string())])),
        };
        let hinted = vec!["repository:foo:pull".to_string()];
        assert_eq!(merged_scopes(&challenge, &hinted), vec!["repository:foo:pull".to_string()]);
    }
}
