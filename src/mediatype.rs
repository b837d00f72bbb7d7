//! Media-type constants, compression-family lookup, and sniffing.

use serde::Deserialize;

pub const DOCKER_MANIFEST_SCHEMA1_SIGNED: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const DOCKER_MANIFEST_SCHEMA1: &str = "application/vnd.docker.distribution.manifest.v1+json";
pub const DOCKER_MANIFEST_SCHEMA2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_CONTAINER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
pub const DOCKER_LAYER_TAR_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
pub const DOCKER_LAYER_FOREIGN_TAR_GZIP: &str = "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";
pub const DOCKER_PLUGIN_CONFIG: &str = "application/vnd.docker.plugin.v1+json";

pub const OCI_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const OCI_LAYER_TAR: &str = "application/vnd.oci.image.layer.v1.tar";
pub const OCI_LAYER_TAR_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const OCI_LAYER_TAR_ZSTD: &str = "application/vnd.oci.image.layer.v1.tar+zstd";
pub const OCI_EMPTY_DESCRIPTOR: &str = "application/vnd.oci.empty.v1+json";

/// All manifest media types a client should send in the `Accept` header when
/// asking for "any manifest this library understands".
pub const MANIFEST_ACCEPT_TYPES: &[&str] = &[
    OCI_IMAGE_MANIFEST,
    OCI_IMAGE_INDEX,
    DOCKER_MANIFEST_SCHEMA2,
    DOCKER_MANIFEST_LIST,
    DOCKER_MANIFEST_SCHEMA1_SIGNED,
    DOCKER_MANIFEST_SCHEMA1,
];

pub fn accept_header() -> String {
    MANIFEST_ACCEPT_TYPES.join(", ")
}

/// The compression family of a layer media type, independent of the vendor
/// (`docker` vs `oci`) prefix. This only classifies; it does not decode —
/// no compression codec is implemented by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

pub fn compression_of(media_type: &str) -> Option<Compression> {
    let base = strip_parameters(media_type);
    match base {
        OCI_LAYER_TAR => Some(Compression::None),
        OCI_LAYER_TAR_GZIP => Some(Compression::Gzip),
        OCI_LAYER_TAR_ZSTD => Some(Compression::Zstd),
        DOCKER_LAYER_TAR_GZIP | DOCKER_LAYER_FOREIGN_TAR_GZIP => Some(Compression::Gzip),
        _ => None,
    }
}

/// Strips RFC 2045 parameters (everything after `;`) and surrounding
/// whitespace from a `Content-Type`-style media type string.
pub fn strip_parameters(media_type: &str) -> &str {
    media_type.split(';').next().unwrap_or(media_type).trim()
}

/// The minimal envelope probed by the detection algorithm below. Permissive:
/// extra fields are ignored, all fields are optional.
#[derive(Debug, Deserialize, Default)]
struct Envelope {
    #[serde(rename = "mediaType")]
    media_type: Option<String>,
    #[serde(rename = "schemaVersion")]
    schema_version: Option<u64>,
    signatures: Option<Vec<serde_json::Value>>,
    config: Option<EnvelopeConfig>,
    manifests: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize, Default)]
struct EnvelopeConfig {
    #[serde(rename = "mediaType")]
    media_type: Option<String>,
}

/// Detects the media type of raw manifest bytes that were not delivered with
/// an external `Content-Type`. Returns `""` for non-JSON input.
pub fn detect(content: &[u8]) -> String {
    let envelope: Envelope = match serde_json::from_slice(content) {
        Ok(e) => e,
        Err(_) => return String::new(),
    };

    if let Some(mt) = envelope.media_type.as_deref() {
        if !mt.is_empty() {
            return mt.to_string();
        }
    }

    match envelope.schema_version {
        Some(1) => {
            return if envelope.signatures.is_some() {
                DOCKER_MANIFEST_SCHEMA1_SIGNED.to_string()
            } else {
                DOCKER_MANIFEST_SCHEMA1.to_string()
            };
        }
        Some(2) => {
            let config_media_type = envelope
                .config
                .as_ref()
                .and_then(|c| c.media_type.as_deref());

            match config_media_type {
                Some(OCI_IMAGE_CONFIG) => return OCI_IMAGE_MANIFEST.to_string(),
                Some(DOCKER_CONTAINER_CONFIG) => return DOCKER_MANIFEST_SCHEMA2.to_string(),
                _ => {}
            }

            if envelope.manifests.as_ref().is_some_and(|m| !m.is_empty()) {
                return OCI_IMAGE_INDEX.to_string();
            }

            return OCI_IMAGE_MANIFEST.to_string();
        }
        _ => {}
    }

    if envelope.manifests.as_ref().is_some_and(|m| !m.is_empty()) {
        return OCI_IMAGE_INDEX.to_string();
    }

    OCI_IMAGE_MANIFEST.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_v2s2_manifest() {
        let content = br#"{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json","config":{"mediaType":"application/vnd.docker.container.image.v1+json"}}"#;
        assert_eq!(detect(content), DOCKER_MANIFEST_SCHEMA2);
    }

    #[test]
    fn detects_v2s1_signed() {
        let content = br#"{"schemaVersion":1,"signatures":[{"header":{}}]}"#;
        assert_eq!(detect(content), DOCKER_MANIFEST_SCHEMA1_SIGNED);
    }

    #[test]
    fn detects_v2s1_unsigned() {
        let content = br#"{"schemaVersion":1}"#;
        assert_eq!(detect(content), DOCKER_MANIFEST_SCHEMA1);
    }

    #[test]
    fn detects_oci_image_manifest_from_config_media_type() {
        let content = br#"{"schemaVersion":2,"config":{"mediaType":"application/vnd.oci.image.config.v1+json"}}"#;
        assert_eq!(detect(content), OCI_IMAGE_MANIFEST);
    }

    #[test]
    fn detects_oci_index_from_populated_manifests() {
        let content = br#"{"schemaVersion":2,"manifests":[{"mediaType":"x"}]}"#;
        assert_eq!(detect(content), OCI_IMAGE_INDEX);
    }

    #[test]
    fn non_json_detects_as_empty() {
        assert_eq!(detect(b"not json at all"), "");
    }

    #[test]
    fn strips_parameters() {
        assert_eq!(strip_parameters("application/json; charset=utf-8"), "application/json");
    }

    #[test]
    fn compression_family_lookup() {
        assert_eq!(compression_of(OCI_LAYER_TAR_GZIP), Some(Compression::Gzip));
        assert_eq!(compression_of(OCI_LAYER_TAR), Some(Compression::None));
        assert_eq!(compression_of(DOCKER_LAYER_TAR_GZIP), Some(Compression::Gzip));
        assert_eq!(compression_of(OCI_IMAGE_MANIFEST), None);
    }
}
