//! ManifestRegistry & Parser: a process-wide registry mapping
//! media type to an `unmarshal` function, an empty-media-type fallback (used
//! for schema-1, which carries no external media type), and the
//! unambiguous-format validation each unmarshaller performs on the way in.

pub mod error;
pub mod oci;
pub mod select;
pub mod types;
pub mod v2s1;
pub mod v2s2;

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::mediatype::{
    self, DOCKER_MANIFEST_LIST, DOCKER_MANIFEST_SCHEMA1, DOCKER_MANIFEST_SCHEMA1_SIGNED,
    DOCKER_MANIFEST_SCHEMA2, OCI_IMAGE_INDEX, OCI_IMAGE_MANIFEST,
};

pub use error::ManifestError;
pub use select::{ManifestFetcher, ManifestSelector, Matcher};
pub use types::{Descriptor, ImageManifestView, IndexView, LayerDescriptor, Platform};

/// A parsed manifest, tagged by the schema that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Manifest {
    ImageV2S1(v2s1::SignedV2S1Parsed),
    ImageV2S2(v2s2::ImageV2S2Parsed),
    IndexV2S2(v2s2::IndexV2S2Parsed),
    ImageOci(oci::ImageOciParsed),
    IndexOci(oci::IndexOciParsed),
}

impl Manifest {
    /// `true` for the two index/manifest-list variants.
    pub fn is_index(&self) -> bool {
        matches!(self, Manifest::IndexV2S2(_) | Manifest::IndexOci(_))
    }

    /// Borrow this manifest as an [`IndexView`], if it is one.
    pub fn as_index(&self) -> Option<&dyn IndexView> {
        match self {
            Manifest::IndexV2S2(m) => Some(m),
            Manifest::IndexOci(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow this manifest as an [`ImageManifestView`], if it is one. Schema-1
    /// is deliberately excluded: it is parsed only far enough to compute its
    /// canonical digest and must be rejected with [`ManifestError::Unsupported`]
    /// by callers.
    pub fn as_image(&self) -> Option<&dyn ImageManifestView> {
        match self {
            Manifest::ImageV2S2(m) => Some(m),
            Manifest::ImageOci(m) => Some(m),
            _ => None,
        }
    }

    /// Rejects schema-1 manifests, signed or unsigned, with a fixed
    /// `Unsupported` error. Every consumer that accepts a
    /// top-level manifest (distribution client callers, [`crate::storage`])
    /// must call this before doing anything else with the result.
    pub fn reject_schema1(&self) -> Result<(), ManifestError> {
        match self {
            Manifest::ImageV2S1(m) => Err(ManifestError::Unsupported(format!(
                "schema-1 manifest for {}:{} is not supported",
                m.name, m.tag
            ))),
            _ => Ok(()),
        }
    }
}

type UnmarshalFn = fn(&[u8]) -> Result<(Manifest, Descriptor), ManifestError>;

struct Registry {
    handlers: HashMap<&'static str, UnmarshalFn>,
    /// Used when the caller has no external media type (schema-1 has none).
    default: UnmarshalFn,
}

impl Registry {
    fn register(&mut self, media_type: &'static str, f: UnmarshalFn) {
        if self.handlers.insert(media_type, f).is_some() {
            // Duplicate registration at init time is a program-invariant
            // violation.
            panic!("manifest media type {media_type:?} is already registered");
        }
    }
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut r = Registry {
        handlers: HashMap::new(),
        default: v2s1::unmarshal,
    };
    r.register(OCI_IMAGE_MANIFEST, oci::unmarshal_image);
    r.register(OCI_IMAGE_INDEX, oci::unmarshal_index);
    r.register(DOCKER_MANIFEST_SCHEMA2, v2s2::unmarshal_image);
    r.register(DOCKER_MANIFEST_LIST, v2s2::unmarshal_list);
    r.register(DOCKER_MANIFEST_SCHEMA1_SIGNED, v2s1::unmarshal);
    r.register(DOCKER_MANIFEST_SCHEMA1, v2s1::unmarshal);
    r
});

/// Looks up and runs the unmarshal function registered for `media_type`
///: RFC 2045 parameters are stripped first; an empty media type
/// (schema-1 carries none) falls back to the default handler.
pub fn unmarshal(media_type: &str, content: &[u8]) -> Result<(Manifest, Descriptor), ManifestError> {
    let stripped = mediatype::strip_parameters(media_type);

    let f = if stripped.is_empty() {
        REGISTRY.default
    } else {
        *REGISTRY
            .handlers
            .get(stripped)
            .ok_or_else(|| ManifestError::NotRegistered(stripped.to_string()))?
    };

    f(content)
}

/// Unmarshals manifest bytes that arrived without a usable external media
/// type by sniffing first, then
/// dispatching through the registry.
pub fn unmarshal_sniffed(content: &[u8]) -> Result<(Manifest, Descriptor), ManifestError> {
    let detected = mediatype::detect(content);
    unmarshal(&detected, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_by_media_type() {
        let content = br#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "size": 1, "digest": "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"},
            "layers": []
        }"#;
        let (manifest, descriptor) = unmarshal(OCI_IMAGE_MANIFEST, content).unwrap();
        assert_eq!(descriptor.media_type, OCI_IMAGE_MANIFEST);
        assert!(manifest.as_image().is_some());
    }

    #[test]
    fn strips_parameters_before_lookup() {
        let content = br#"{"schemaVersion":2,"mediaType":"application/vnd.oci.image.index.v1+json","manifests":[]}"#;
        let with_params = format!("{OCI_IMAGE_INDEX}; charset=utf-8");
        let (manifest, _) = unmarshal(&with_params, content).unwrap();
        assert!(manifest.as_index().is_some());
    }

    #[test]
    fn empty_media_type_falls_back_to_schema1() {
        let content = br#"{
            "name": "x", "tag": "t", "architecture": "amd64",
            "fsLayers": [{"blobSum": "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"}],
            "history": [{"v1Compatibility": "{\"id\":\"only\"}"}],
            "schemaVersion": 1
        }"#;
        let (manifest, _) = unmarshal("", content).unwrap();
        assert!(manifest.reject_schema1().is_err());
    }

    #[test]
    fn unregistered_media_type_errors() {
        let err = unmarshal("application/x-unknown", b"{}").unwrap_err();
        assert!(matches!(err, ManifestError::NotRegistered(_)));
    }

    #[test]
    fn sniffs_when_no_external_media_type() {
        let content = br#"{"schemaVersion":2,"manifests":[{"mediaType":"x","size":1,"digest":"sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"}]}"#;
        let (manifest, _) = unmarshal_sniffed(content).unwrap();
        assert!(manifest.as_index().is_some());
    }
}
