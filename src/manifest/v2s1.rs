//! Docker Distribution manifest v1 (schema 1), signed and unsigned.
//!
//! Schema-1 is accepted only far enough to compute its canonical digest and
//! reject it with `Unsupported`.
//! The full layer/history model is still parsed so callers get a meaningful
//! error rather than a bare decode failure.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::mediatype::{DOCKER_MANIFEST_SCHEMA1, DOCKER_MANIFEST_SCHEMA1_SIGNED};

use super::error::ManifestError;
use super::Manifest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsLayer {
    #[serde(rename = "blobSum")]
    pub blob_sum: Digest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

#[derive(Debug, Clone, Deserialize)]
struct V1Compatibility {
    id: String,
    parent: Option<String>,
    #[serde(default)]
    throwaway: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawManifestV2S1 {
    pub name: String,
    pub tag: String,
    pub architecture: String,
    #[serde(rename = "fsLayers")]
    pub fs_layers: Vec<FsLayer>,
    pub history: Vec<HistoryEntry>,
    #[serde(rename = "schemaVersion")]
    pub schema_version: u64,
    #[serde(default)]
    pub signatures: Vec<JwsSignature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwsSignature {
    pub header: JwsHeader,
    pub signature: String,
    pub protected: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwsHeader {
    pub jwk: serde_json::Value,
    pub alg: String,
}

#[derive(Debug, Deserialize)]
struct ProtectedHeader {
    #[serde(rename = "formatLength")]
    format_length: usize,
    #[serde(rename = "formatTail")]
    format_tail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerId {
    pub blob_sum: Digest,
    pub id: String,
    pub parent: Option<String>,
    pub throwaway: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedV2S1Parsed {
    pub name: String,
    pub tag: String,
    pub layers: Vec<LayerId>,
    pub signed: bool,
}

/// Recovers the canonical (signature-stripped) payload of a signed v2s1
/// manifest: the protected header of the first signature encodes
/// `{formatLength, formatTail}`; the payload is `content[..formatLength]`
/// followed by the base64url-decoded tail.
fn canonical_payload(content: &[u8], signatures: &[JwsSignature]) -> Result<Vec<u8>, ManifestError> {
    let first = signatures
        .first()
        .ok_or_else(|| ManifestError::Decode(DOCKER_MANIFEST_SCHEMA1_SIGNED.to_string(), "no signatures".to_string()))?;

    let protected_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(first.protected.trim_end_matches('='))
        .map_err(|e| ManifestError::Decode(DOCKER_MANIFEST_SCHEMA1_SIGNED.to_string(), e.to_string()))?;

    let header: ProtectedHeader = serde_json::from_slice(&protected_bytes)
        .map_err(|e| ManifestError::Decode(DOCKER_MANIFEST_SCHEMA1_SIGNED.to_string(), e.to_string()))?;

    if header.format_length > content.len() {
        return Err(ManifestError::Decode(
            DOCKER_MANIFEST_SCHEMA1_SIGNED.to_string(),
            "formatLength exceeds manifest length".to_string(),
        ));
    }

    let tail = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(header.format_tail.trim_end_matches('='))
        .map_err(|e| ManifestError::Decode(DOCKER_MANIFEST_SCHEMA1_SIGNED.to_string(), e.to_string()))?;

    let mut payload = content[..header.format_length].to_vec();
    payload.extend_from_slice(&tail);
    Ok(payload)
}

/// Validates and collapses the `fsLayers`/`history` invariants:
/// `len(history) == len(fsLayers) > 0`; consecutive duplicate layer IDs are
/// collapsed; non-consecutive duplicates are an error; the base layer's
/// (last entry's) parent must be empty; each other layer's parent equals
/// the next entry's ID.
fn layers_from_history(fs_layers: &[FsLayer], history: &[HistoryEntry]) -> Result<Vec<LayerId>, ManifestError> {
    if history.is_empty() || fs_layers.len() != history.len() {
        return Err(ManifestError::InvalidField(
            "history/fsLayers length mismatch or empty".to_string(),
        ));
    }

    let compats: Vec<V1Compatibility> = history
        .iter()
        .map(|h| serde_json::from_str(&h.v1_compatibility))
        .collect::<Result<_, _>>()
        .map_err(|e: serde_json::Error| ManifestError::Decode("v1Compatibility".to_string(), e.to_string()))?;

    let mut layers = Vec::with_capacity(compats.len());
    let mut seen_ids = std::collections::HashSet::new();
    let mut prev_id: Option<&str> = None;

    for (i, compat) in compats.iter().enumerate() {
        if prev_id == Some(compat.id.as_str()) {
            // Consecutive duplicate: collapse by skipping this entry.
            continue;
        }
        if !seen_ids.insert(compat.id.clone()) {
            return Err(ManifestError::InvalidField(format!(
                "non-consecutive duplicate layer id {:?}",
                compat.id
            )));
        }
        prev_id = Some(&compat.id);

        let is_base = i == compats.len() - 1;
        if is_base {
            if compat.parent.as_deref().is_some_and(|p| !p.is_empty()) {
                return Err(ManifestError::InvalidField(
                    "base layer must not declare a parent".to_string(),
                ));
            }
        } else {
            let expected_parent = compats[i + 1].id.as_str();
            if compat.parent.as_deref() != Some(expected_parent) {
                return Err(ManifestError::InvalidField(format!(
                    "layer {:?} parent does not match next history entry {:?}",
                    compat.id, expected_parent
                )));
            }
        }

        layers.push(LayerId {
            blob_sum: fs_layers[i].blob_sum.clone(),
            id: compat.id.clone(),
            parent: compat.parent.clone(),
            throwaway: compat.throwaway,
        });
    }

    Ok(layers)
}

/// Unmarshal function registered for [`crate::mediatype::DOCKER_MANIFEST_SCHEMA1_SIGNED`]
/// and [`crate::mediatype::DOCKER_MANIFEST_SCHEMA1`] (the latter as the
/// default fallback, since schema-1 has no external media type field).
pub fn unmarshal(content: &[u8]) -> Result<(Manifest, super::types::Descriptor), ManifestError> {
    let raw: RawManifestV2S1 = serde_json::from_slice(content)
        .map_err(|e| ManifestError::Decode(DOCKER_MANIFEST_SCHEMA1.to_string(), e.to_string()))?;

    let layers = layers_from_history(&raw.fs_layers, &raw.history)?;
    let signed = !raw.signatures.is_empty();

    let payload = if signed {
        canonical_payload(content, &raw.signatures)?
    } else {
        content.to_vec()
    };
    let digest = Digest::sha256(&payload);

    let media_type = if signed {
        DOCKER_MANIFEST_SCHEMA1_SIGNED
    } else {
        DOCKER_MANIFEST_SCHEMA1
    };

    let descriptor = super::types::Descriptor {
        media_type: media_type.to_string(),
        digest,
        size: payload.len() as u64,
        platform: None,
        artifact_type: None,
        urls: None,
    };

    Ok((
        Manifest::ImageV2S1(SignedV2S1Parsed { name: raw.name, tag: raw.tag, layers, signed }),
        descriptor,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unsigned_fixture() -> String {
        r#"{
  "name": "library/hello-world",
  "tag": "latest",
  "architecture": "amd64",
  "fsLayers": [
    {"blobSum": "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"},
    {"blobSum": "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"}
  ],
  "history": [
    {"v1Compatibility": "{\"id\":\"layer2\",\"parent\":\"layer1\"}"},
    {"v1Compatibility": "{\"id\":\"layer1\"}"}
  ],
  "schemaVersion": 1
}"#
        .to_string()
    }

    #[test]
    fn parses_unsigned_and_orders_layers_base_last() {
        let content = unsigned_fixture();
        let (manifest, descriptor) = unmarshal(content.as_bytes()).unwrap();
        assert_eq!(descriptor.media_type, DOCKER_MANIFEST_SCHEMA1);
        match manifest {
            Manifest::ImageV2S1(m) => {
                assert!(!m.signed);
                assert_eq!(m.layers.len(), 2);
                assert_eq!(m.layers[0].id, "layer2");
                assert_eq!(m.layers[1].id, "layer1");
                assert!(m.layers[1].parent.is_none());
            }
            other => panic!("expected ImageV2S1, got {other:?}"),
        }
    }

    #[test]
    fn rejects_base_layer_with_parent() {
        let content = r#"{
  "name": "x", "tag": "t", "architecture": "amd64",
  "fsLayers": [{"blobSum": "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"}],
  "history": [{"v1Compatibility": "{\"id\":\"only\",\"parent\":\"ghost\"}"}],
  "schemaVersion": 1
}"#;
        let err = unmarshal(content.as_bytes()).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidField(_)));
    }

    #[test]
    fn rejects_non_consecutive_duplicate_ids() {
        let content = r#"{
  "name": "x", "tag": "t", "architecture": "amd64",
  "fsLayers": [
    {"blobSum": "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"},
    {"blobSum": "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"},
    {"blobSum": "sha256:cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc"}
  ],
  "history": [
    {"v1Compatibility": "{\"id\":\"a\",\"parent\":\"b\"}"},
    {"v1Compatibility": "{\"id\":\"b\",\"parent\":\"a\"}"},
    {"v1Compatibility": "{\"id\":\"a\"}"}
  ],
  "schemaVersion": 1
}"#;
        let err = unmarshal(content.as_bytes()).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidField(_)));
    }

    #[test]
    fn signed_digest_equals_sha256_of_recovered_payload() {
        let unsigned = unsigned_fixture();

        // Fabricate a signature the way Docker's libtrust does: splice a
        // `"signatures":[...]` block in just before the final `}`, and
        // record in the protected header how to strip it back out again
        // (formatLength = bytes before the splice, formatTail = the
        // base64url-encoded bytes after it).
        let split_at = unsigned.len() - 1;
        let prefix = &unsigned[..split_at];
        let tail = &unsigned[split_at..]; // just the closing brace

        let format_tail = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(tail.as_bytes());
        let protected_json = format!(r#"{{"formatLength":{split_at},"formatTail":"{format_tail}"}}"#);
        let protected = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(protected_json.as_bytes());

        let signed = format!(
            r#"{prefix},"signatures":[{{"header":{{"jwk":{{}},"alg":"ES256"}},"signature":"deadbeef","protected":"{protected}"}}]{tail}"#
        );

        let (manifest, descriptor) = unmarshal(signed.as_bytes()).unwrap();
        assert!(matches!(manifest, Manifest::ImageV2S1(m) if m.signed));
        assert_eq!(descriptor.digest, Digest::sha256(unsigned.as_bytes()));
    }
}
