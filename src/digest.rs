//! Content-addressed digests (`algorithm:hex`).
//!
//! A real type instead of a bare `String`, so callers can't accidentally
//! compare a digest against a tag or forget to lowercase an algorithm name.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest as _, Sha256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestError {
    #[error("digest {0:?} is missing an algorithm separator")]
    MissingSeparator(String),

    #[error("digest algorithm {0:?} is empty")]
    EmptyAlgorithm(String),

    #[error("digest hex {0:?} is shorter than the minimum 32 characters")]
    TooShort(String),

    #[error("digest hex {0:?} contains non-hexadecimal characters")]
    NotHex(String),
}

/// An algorithm-prefixed hexadecimal content digest, e.g.
/// `sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855`.
///
/// Invariant: hex length is at least 32 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    /// Compute the `sha256` digest of `bytes`.
    pub fn sha256(bytes: &[u8]) -> Digest {
        let hex = format!("{:x}", Sha256::digest(bytes));
        Digest {
            algorithm: "sha256".to_string(),
            hex,
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// The form used as the last path segment of the registry's referrers
    /// tag-schema fallback: `{algorithm}-{hex}`.
    pub fn as_tag_schema(&self) -> String {
        format!("{}-{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| DigestError::MissingSeparator(s.to_string()))?;

        if algorithm.is_empty() {
            return Err(DigestError::EmptyAlgorithm(s.to_string()));
        }

        if hex.len() < 32 {
            return Err(DigestError::TooShort(s.to_string()));
        }

        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::NotHex(s.to_string()));
        }

        Ok(Digest {
            algorithm: algorithm.to_string(),
            hex: hex.to_lowercase(),
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl serde::Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
