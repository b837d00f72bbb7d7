//! OCI image-spec manifest and index.

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::mediatype::{OCI_IMAGE_CONFIG, OCI_IMAGE_INDEX, OCI_IMAGE_MANIFEST};

use super::error::ManifestError;
use super::types::{Descriptor, ImageManifestView, IndexView, LayerDescriptor, Platform};
use super::Manifest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageOci {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u64,
    #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: RawDescriptor,
    pub layers: Vec<RawDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDescriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(rename = "artifactType", skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
}

impl From<RawDescriptor> for Descriptor {
    fn from(r: RawDescriptor) -> Descriptor {
        Descriptor {
            media_type: r.media_type,
            digest: r.digest,
            size: r.size,
            platform: r.platform,
            artifact_type: r.artifact_type,
            urls: r.urls,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOciParsed {
    pub config: Descriptor,
    pub layers: Vec<LayerDescriptor>,
}

impl ImageManifestView for ImageOciParsed {
    fn config(&self) -> &Descriptor {
        &self.config
    }

    fn layers(&self) -> &[LayerDescriptor] {
        &self.layers
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexOci {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u64,
    #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub manifests: Vec<RawDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOciParsed {
    pub manifests: Vec<Descriptor>,
}

impl IndexView for IndexOciParsed {
    fn manifests(&self) -> &[Descriptor] {
        &self.manifests
    }
}

/// Unmarshal function registered for [`crate::mediatype::OCI_IMAGE_MANIFEST`].
pub fn unmarshal_image(content: &[u8]) -> Result<(Manifest, Descriptor), ManifestError> {
    let parsed: ImageOci = serde_json::from_slice(content)
        .map_err(|e| ManifestError::Decode(OCI_IMAGE_MANIFEST.to_string(), e.to_string()))?;

    validate_only_image_fields(content)?;

    let config: Descriptor = parsed.config.into();
    let layers: Vec<LayerDescriptor> = parsed
        .layers
        .into_iter()
        .map(|d| LayerDescriptor { descriptor: d.into(), empty: false })
        .collect();

    let digest = Digest::sha256(content);
    let descriptor = Descriptor {
        media_type: OCI_IMAGE_MANIFEST.to_string(),
        digest,
        size: content.len() as u64,
        platform: None,
        artifact_type: None,
        urls: None,
    };

    Ok((Manifest::ImageOci(ImageOciParsed { config, layers }), descriptor))
}

/// Unmarshal function registered for [`crate::mediatype::OCI_IMAGE_INDEX`].
pub fn unmarshal_index(content: &[u8]) -> Result<(Manifest, Descriptor), ManifestError> {
    let parsed: IndexOci = serde_json::from_slice(content)
        .map_err(|e| ManifestError::Decode(OCI_IMAGE_INDEX.to_string(), e.to_string()))?;

    validate_only_index_fields(content)?;

    let manifests: Vec<Descriptor> = parsed.manifests.into_iter().map(Descriptor::from).collect();

    let digest = Digest::sha256(content);
    let descriptor = Descriptor {
        media_type: OCI_IMAGE_INDEX.to_string(),
        digest,
        size: content.len() as u64,
        platform: None,
        artifact_type: None,
        urls: None,
    };

    Ok((Manifest::IndexOci(IndexOciParsed { manifests }), descriptor))
}

#[derive(Debug, Deserialize, Default)]
struct PermissiveShape {
    config: Option<serde_json::Value>,
    layers: Option<serde_json::Value>,
    manifests: Option<serde_json::Value>,
}

fn validate_only_image_fields(content: &[u8]) -> Result<(), ManifestError> {
    let shape: PermissiveShape = serde_json::from_slice(content).unwrap_or_default();
    if shape.manifests.is_some() {
        return Err(ManifestError::AmbiguousFormat(
            OCI_IMAGE_MANIFEST.to_string(),
            "manifest carries unexpected field `manifests`".to_string(),
        ));
    }
    Ok(())
}

fn validate_only_index_fields(content: &[u8]) -> Result<(), ManifestError> {
    let shape: PermissiveShape = serde_json::from_slice(content).unwrap_or_default();
    if shape.config.is_some() || shape.layers.is_some() {
        return Err(ManifestError::AmbiguousFormat(
            OCI_IMAGE_INDEX.to_string(),
            "index carries unexpected field `config`/`layers`".to_string(),
        ));
    }
    Ok(())
}

/// Media type used for config blobs referenced by an OCI image manifest.
pub const CONFIG_MEDIA_TYPE: &str = OCI_IMAGE_CONFIG;

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST_FIXTURE: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "size": 1469,
            "digest": "sha256:e7d92cdc71feacf90708cb59182d0df1b911f8ae022d29e4e944e05d79259c6"
        },
        "layers": [
            {
                "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                "size": 2789669,
                "digest": "sha256:c9b1b535fdd91a9855fb7f82348177e5f477a333ae1f16210f3903b26e4e1fc"
            }
        ]
    }"#;

    #[test]
    fn parses_oci_manifest() {
        let (manifest, descriptor) = unmarshal_image(MANIFEST_FIXTURE.as_bytes()).unwrap();
        assert_eq!(descriptor.media_type, OCI_IMAGE_MANIFEST);
        match manifest {
            Manifest::ImageOci(m) => assert_eq!(m.layers().len(), 1),
            other => panic!("expected ImageOci, got {other:?}"),
        }
    }

    const INDEX_FIXTURE: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [
            {
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "size": 527,
                "digest": "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                "platform": {"architecture": "arm64", "os": "linux", "variant": "v8"}
            }
        ]
    }"#;

    #[test]
    fn parses_oci_index() {
        let (manifest, _) = unmarshal_index(INDEX_FIXTURE.as_bytes()).unwrap();
        match manifest {
            Manifest::IndexOci(idx) => {
                assert_eq!(idx.manifests().len(), 1);
                assert_eq!(idx.manifests()[0].platform.as_ref().unwrap().variant.as_deref(), Some("v8"));
            }
            other => panic!("expected IndexOci, got {other:?}"),
        }
    }

    #[test]
    fn rejects_index_with_config_field() {
        let bogus = r#"{"schemaVersion":2,"manifests":[],"config":{"mediaType":"x","size":1,"digest":"sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"}}"#;
        let err = unmarshal_index(bogus.as_bytes()).unwrap_err();
        assert!(matches!(err, ManifestError::AmbiguousFormat(_, _)));
    }
}
