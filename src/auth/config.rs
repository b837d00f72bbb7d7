//! Docker-style `AuthConfig` codec: the `auth` field is a
//! base64-encoded `username:password` pair that Docker's config.json writes
//! in place of plaintext `username`/`password`, and reads preferentially
//! over them.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::AuthError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    pub identity_token: Option<String>,
    pub registry_token: Option<String>,
}

impl AuthConfig {
    /// Docker rejects usernames containing `:` since it would make the
    /// encoded `username:password` pair ambiguous to split back apart.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.username.contains(':') {
            return Err(AuthError::InvalidAuthConfig("username must not contain ':'".to_string()));
        }
        Ok(())
    }

    pub fn encode_auth(&self) -> String {
        STANDARD.encode(format!("{}:{}", self.username, self.password))
    }

    pub fn decode_auth(encoded: &str) -> Result<(String, String), AuthError> {
        let decoded = STANDARD.decode(encoded.trim_end_matches('\0')).map_err(AuthError::Base64)?;
        let decoded = String::from_utf8(decoded).map_err(|e| AuthError::NotUtf8(e.utf8_error()))?;
        match decoded.split_once(':') {
            Some((user, pass)) => Ok((user.to_string(), pass.to_string())),
            None => Ok((decoded, String::new())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RawAuthConfig {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    auth: String,
    #[serde(default, rename = "identitytoken", skip_serializing_if = "Option::is_none")]
    identity_token: Option<String>,
    #[serde(default, rename = "registrytoken", skip_serializing_if = "Option::is_none")]
    registry_token: Option<String>,
}

impl Serialize for AuthConfig {
    /// Always recomputes `auth` from `username`/`password` and clears the
    /// plaintext fields, matching Docker's own config.json writer.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = RawAuthConfig {
            username: String::new(),
            password: String::new(),
            auth: self.encode_auth(),
            identity_token: self.identity_token.clone(),
            registry_token: self.registry_token.clone(),
        };
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AuthConfig {
    /// Prefers the `auth` field over plaintext `username`/`password` when
    /// both are present, mirroring Docker's own reader.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawAuthConfig::deserialize(deserializer)?;

        let (username, password) = if !raw.auth.is_empty() {
            AuthConfig::decode_auth(&raw.auth).map_err(serde::de::Error::custom)?
        } else {
            (raw.username, raw.password)
        };

        Ok(AuthConfig {
            username,
            password,
            identity_token: raw.identity_token,
            registry_token: raw.registry_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_auth_from_username_and_password() {
        let cfg = AuthConfig { username: "alice".to_string(), password: "hunter2".to_string(), ..Default::default() };
        assert_eq!(cfg.encode_auth(), STANDARD.encode("alice:hunter2"));
    }

    #[test]
    fn decode_auth_splits_on_first_colon() {
        let encoded = STANDARD.encode("alice:hunter2:extra");
        let (user, pass) = AuthConfig::decode_auth(&encoded).unwrap();
        assert_eq!(user, "alice");
        assert_eq!(pass, "hunter2:extra");
    }

    #[test]
    fn decode_auth_trims_trailing_nul() {
        let mut encoded = STANDARD.encode("alice:hunter2");
        encoded.push('\0');
        let (user, pass) = AuthConfig::decode_auth(&encoded).unwrap();
        assert_eq!(user, "alice");
        assert_eq!(pass, "hunter2");
    }

    #[test]
    fn username_with_colon_fails_validation() {
        let cfg = AuthConfig { username: "al:ice".to_string(), password: "x".to_string(), ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn deserialize_prefers_auth_field_over_plaintext() {
        let encoded = STANDARD.encode("fromauth:pw");
        let json = format!(r#"{{"username":"fromplain","password":"ignored","auth":"{encoded}"}}"#);
        let cfg: AuthConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.username, "fromauth");
        assert_eq!(cfg.password, "pw");
    }

    #[test]
    fn serialize_clears_plaintext_fields() {
        let cfg = AuthConfig { username: "alice".to_string(), password: "hunter2".to_string(), ..Default::default() };
        let value = serde_json::to_value(&cfg).unwrap();
        assert_eq!(value["username"], "");
        assert_eq!(value["password"], "");
        assert_eq!(value["auth"], STANDARD.encode("alice:hunter2"));
    }

    #[test]
    fn round_trips_through_serialize_and_deserialize() {
        let cfg = AuthConfig {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
            identity_token: Some("idtok".to_string()),
            registry_token: None,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: AuthConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
