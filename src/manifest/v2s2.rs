//! Docker Distribution manifest v2, schema 2: the single-image manifest and
//! the manifest list.

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::mediatype::{DOCKER_CONTAINER_CONFIG, DOCKER_MANIFEST_LIST, DOCKER_MANIFEST_SCHEMA2};

use super::error::ManifestError;
use super::types::{Descriptor, ImageManifestView, IndexView, LayerDescriptor, Platform};
use super::Manifest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageV2S2 {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u64,
    #[serde(rename = "mediaType")]
    pub media_type: String,
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

impl ImageManifestView for ImageV2S2Parsed {
    fn config(&self) -> &Descriptor {
        &self.config
    }

    fn layers(&self) -> &[LayerDescriptor] {
        &self.layers
    }
}

/// The post-parse, already-validated form carried in [`Manifest::ImageV2S2`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageV2S2Parsed {
    pub config: Descriptor,
    pub layers: Vec<LayerDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestListV2S2 {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u64,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub manifests: Vec<RawDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexV2S2Parsed {
    pub manifests: Vec<Descriptor>,
}

impl IndexView for IndexV2S2Parsed {
    fn manifests(&self) -> &[Descriptor] {
        &self.manifests
    }
}

/// Unmarshal function registered for [`crate::mediatype::DOCKER_MANIFEST_SCHEMA2`].
pub fn unmarshal_image(content: &[u8]) -> Result<(Manifest, Descriptor), ManifestError> {
    let parsed: ImageV2S2 = serde_json::from_slice(content)
        .map_err(|e| ManifestError::Decode(DOCKER_MANIFEST_SCHEMA2.to_string(), e.to_string()))?;

    validate_only_image_fields(content)?;

    let config: Descriptor = parsed.config.into();
    let layers: Vec<LayerDescriptor> = parsed
        .layers
        .into_iter()
        .map(|d| LayerDescriptor { descriptor: d.into(), empty: false })
        .collect();

    let digest = Digest::sha256(content);
    let descriptor = Descriptor {
        media_type: DOCKER_MANIFEST_SCHEMA2.to_string(),
        digest,
        size: content.len() as u64,
        platform: None,
        artifact_type: None,
        urls: None,
    };

    Ok((
        Manifest::ImageV2S2(ImageV2S2Parsed { config, layers }),
        descriptor,
    ))
}

/// Unmarshal function registered for [`crate::mediatype::DOCKER_MANIFEST_LIST`].
pub fn unmarshal_list(content: &[u8]) -> Result<(Manifest, Descriptor), ManifestError> {
    let parsed: ManifestListV2S2 = serde_json::from_slice(content)
        .map_err(|e| ManifestError::Decode(DOCKER_MANIFEST_LIST.to_string(), e.to_string()))?;

    validate_only_index_fields(content)?;

    let manifests: Vec<Descriptor> = parsed.manifests.into_iter().map(Descriptor::from).collect();

    let digest = Digest::sha256(content);
    let descriptor = Descriptor {
        media_type: DOCKER_MANIFEST_LIST.to_string(),
        digest,
        size: content.len() as u64,
        platform: None,
        artifact_type: None,
        urls: None,
    };

    Ok((Manifest::IndexV2S2(IndexV2S2Parsed { manifests }), descriptor))
}

/// Permissive shape used by [`validate_only_image_fields`]/
/// [`validate_only_index_fields`].
#[derive(Debug, Deserialize, Default)]
struct PermissiveShape {
    config: Option<serde_json::Value>,
    layers: Option<serde_json::Value>,
    manifests: Option<serde_json::Value>,
    #[serde(rename = "fsLayers")]
    fs_layers: Option<serde_json::Value>,
    history: Option<serde_json::Value>,
}

fn validate_only_image_fields(content: &[u8]) -> Result<(), ManifestError> {
    let shape: PermissiveShape = serde_json::from_slice(content).unwrap_or_default();
    if shape.manifests.is_some() {
        return Err(ManifestError::AmbiguousFormat(
            DOCKER_MANIFEST_SCHEMA2.to_string(),
            "manifest carries unexpected field `manifests`".to_string(),
        ));
    }
    if shape.fs_layers.is_some() || shape.history.is_some() {
        return Err(ManifestError::AmbiguousFormat(
            DOCKER_MANIFEST_SCHEMA2.to_string(),
            "manifest carries schema-1 fields `fsLayers`/`history`".to_string(),
        ));
    }
    Ok(())
}

fn validate_only_index_fields(content: &[u8]) -> Result<(), ManifestError> {
    let shape: PermissiveShape = serde_json::from_slice(content).unwrap_or_default();
    if shape.config.is_some() || shape.layers.is_some() {
        return Err(ManifestError::AmbiguousFormat(
            DOCKER_MANIFEST_LIST.to_string(),
            "manifest list carries unexpected field `config`/`layers`".to_string(),
        ));
    }
    Ok(())
}

/// Media type used for config blobs referenced by a v2s2 image manifest.
pub const CONFIG_MEDIA_TYPE: &str = DOCKER_CONTAINER_CONFIG;

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE_FIXTURE: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": 1469,
            "digest": "sha256:e7d92cdc71feacf90708cb59182d0df1b911f8ae022d29e4e944e05d79259c6"
        },
        "layers": [
            {
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "size": 2789669,
                "digest": "sha256:c9b1b535fdd91a9855fb7f82348177e5f477a333ae1f16210f3903b26e4e1fc"
            }
        ]
    }"#;

    #[test]
    fn parses_image_manifest_and_computes_config_layers() {
        let (manifest, descriptor) = unmarshal_image(IMAGE_FIXTURE.as_bytes()).unwrap();
        assert_eq!(descriptor.media_type, DOCKER_MANIFEST_SCHEMA2);
        match manifest {
            Manifest::ImageV2S2(m) => {
                assert_eq!(m.config().digest.algorithm(), "sha256");
                assert_eq!(m.layers().len(), 1);
                assert!(!m.layers()[0].empty);
            }
            other => panic!("expected ImageV2S2, got {other:?}"),
        }
    }

    #[test]
    fn rejects_image_manifest_with_manifests_field() {
        let bogus = r#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
            "config": {"mediaType": "x", "size": 1, "digest": "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"},
            "layers": [],
            "manifests": []
        }"#;
        let err = unmarshal_image(bogus.as_bytes()).unwrap_err();
        assert!(matches!(err, ManifestError::AmbiguousFormat(_, _)));
    }

    const LIST_FIXTURE: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.list.v2+json",
        "manifests": [
            {
                "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
                "size": 527,
                "digest": "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                "platform": {"architecture": "amd64", "os": "linux"}
            }
        ]
    }"#;

    #[test]
    fn parses_manifest_list() {
        let (manifest, _) = unmarshal_list(LIST_FIXTURE.as_bytes()).unwrap();
        match manifest {
            Manifest::IndexV2S2(idx) => {
                assert_eq!(idx.manifests().len(), 1);
                assert_eq!(idx.manifests()[0].platform.as_ref().unwrap().architecture, "amd64");
            }
            other => panic!("expected IndexV2S2, got {other:?}"),
        }
    }
}
