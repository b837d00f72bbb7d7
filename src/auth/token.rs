//! Bearer token decoding.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::AuthError;

const MAX_TOKEN_RESPONSE_BYTES: usize = 128 * 1024;
const MIN_EXPIRES_IN_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub token: String,
    pub access_token: String,
    pub expires_in: u64,
    pub issued_at: DateTime<Utc>,
}

impl Token {
    /// `true` once `issued_at + expires_in` has passed.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.issued_at + chrono::Duration::seconds(self.expires_in as i64)
    }

    /// Decodes a token-endpoint JSON response, applying the backfill and
    /// floor invariants: `token`/`access_token` are backfilled
    /// from each other; missing both is an error; `expires_in < 60` is
    /// raised to 60; `issued_at` defaults to now if absent. Capped at 128
    /// KiB.
    pub fn decode(bytes: &[u8]) -> Result<Token, AuthError> {
        if bytes.len() > MAX_TOKEN_RESPONSE_BYTES {
            return Err(AuthError::TokenResponseTooLarge(bytes.len()));
        }

        let raw: RawToken = serde_json::from_slice(bytes).map_err(AuthError::TokenDecode)?;

        let (token, access_token) = match (raw.token, raw.access_token) {
            (Some(t), Some(a)) => (t, a),
            (Some(t), None) => (t.clone(), t),
            (None, Some(a)) => (a.clone(), a),
            (None, None) => return Err(AuthError::TokenMissing),
        };

        Ok(Token {
            token,
            access_token,
            expires_in: raw.expires_in.unwrap_or(MIN_EXPIRES_IN_SECS).max(MIN_EXPIRES_IN_SECS),
            issued_at: raw.issued_at.unwrap_or_else(Utc::now),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawToken {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "access_token")]
    access_token: Option<String>,
    #[serde(default, rename = "expires_in")]
    expires_in: Option<u64>,
    #[serde(default, rename = "issued_at")]
    issued_at: Option<DateTime<Utc>>,
}
