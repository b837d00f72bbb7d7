//! Shared manifest types: descriptors, platforms, and the views downstream
//! consumers should accept instead of matching on [`super::Manifest`]
//! directly.

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// `(OS, architecture, variant?, OS-version?)`; platform matching uses
/// exact equality on all four fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(rename = "os.version", skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
}

impl Platform {
    /// The platform of the process running this code, in the same
    /// `GOOS`/`GOARCH`-style vocabulary registries expect.
    pub fn host() -> Platform {
        Platform {
            os: host_os().to_string(),
            architecture: host_architecture().to_string(),
            variant: host_variant().map(str::to_string),
            os_version: None,
        }
    }
}

fn host_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

fn host_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "arm" => "arm",
        other => other,
    }
}

fn host_variant() -> Option<&'static str> {
    if std::env::consts::ARCH == "arm" {
        Some("v7")
    } else {
        None
    }
}

/// `(mediaType, digest, size, platform?, artifactType?, urls?)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
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

/// A [`Descriptor`] plus the `empty` flag distinguishing throwaway v2s1
/// layers from real content layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDescriptor {
    pub descriptor: Descriptor,
    pub empty: bool,
}

/// Accepted by consumers that only need config+layers, regardless of which
/// concrete schema produced them.
pub trait ImageManifestView {
    fn config(&self) -> &Descriptor;
    fn layers(&self) -> &[LayerDescriptor];
}

/// Accepted by consumers that only need the child-manifest list, regardless
/// of whether it came from a Docker manifest list or an OCI index.
pub trait IndexView {
    fn manifests(&self) -> &[Descriptor];
}
