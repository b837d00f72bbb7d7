//! ArchiveReader: the local `docker-archive` `Storage`
//! backend. Parses a `docker save` tarball — `manifest.json` plus either the
//! legacy `<id>/layer.tar` layout or the OCI-layout `blobs/sha256/<hex>`
//! layout Docker has used for archive contents since 25.0 — and resolves a
//! reference against it the same way the Go CLI does: exact `RepoTag` match,
//! parseable digest, or digest-prefix lookup.
//!
//! The legacy `repositories` file (pre-`manifest.json`, Docker < 1.10) is read
//! only to backfill `RepoTags` when an entry's own list is empty; full
//! per-layer-directory parsing of that oldest format is not implemented here.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::digest::{Digest, DigestError};
use crate::error::ErrorKind;
use crate::manifest::{Descriptor, LayerDescriptor};
use crate::mediatype;

use super::{layer_sizes, ConfigSource, GetImageOptions, Image, ImageMetadata, Storage, StorageError};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ArchiveError {
    #[error("reading archive {0:?}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("archive {0:?} has no manifest.json")]
    NoManifest(PathBuf),

    #[error("manifest.json in {0:?} is empty")]
    EmptyManifest(PathBuf),

    #[error("decoding manifest.json in {0:?}: {1}")]
    Decode(PathBuf, serde_json::Error),

    #[error("entry {0:?} referenced by manifest.json is missing from archive {1:?}")]
    MissingEntry(String, PathBuf),

    #[error("config path {0:?} does not yield a valid digest: {1}")]
    BadConfigId(String, DigestError),

    #[error("{0:?} does not match any image in archive {1:?}")]
    NotFound(String, PathBuf),

    #[error("{0:?} matches more than one image in archive {1:?} by digest prefix")]
    AmbiguousPrefix(String, PathBuf),
}

impl ArchiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::Io(_, _) => ErrorKind::System,
            ArchiveError::NoManifest(_) => ErrorKind::InvalidParameter,
            ArchiveError::EmptyManifest(_) => ErrorKind::InvalidParameter,
            ArchiveError::Decode(_, _) => ErrorKind::InvalidField,
            ArchiveError::MissingEntry(_, _) => ErrorKind::InvalidParameter,
            ArchiveError::BadConfigId(_, _) => ErrorKind::InvalidField,
            ArchiveError::NotFound(_, _) => ErrorKind::NotFound,
            ArchiveError::AmbiguousPrefix(_, _) => ErrorKind::Conflict,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ManifestJsonEntry {
    #[serde(rename = "Config")]
    config: String,
    #[serde(rename = "RepoTags", default)]
    repo_tags: Vec<String>,
    #[serde(rename = "Layers")]
    layers: Vec<String>,
}

/// One resolved image out of `manifest.json`; immutable once the archive has
/// been opened.
#[derive(Debug, Clone)]
struct ArchiveImage {
    id: Digest,
    repo_tags: Vec<String>,
    config_descriptor: Descriptor,
    manifest_layers: Vec<LayerDescriptor>,
    manifest_digest: Digest,
    config_bytes: Vec<u8>,
}

/// The `docker-archive` `Storage` backend.
/// The whole tarball is read into memory once at [`DockerArchive::open`];
/// archives of the size `docker save` produces (single-digit GB at the
/// extreme) are well within what a pull of the same image would buffer
/// anyway for its layers.
pub struct DockerArchive {
    path: PathBuf,
    images: Vec<ArchiveImage>,
}

impl DockerArchive {
    /// Opens and fully parses a `docker save` tarball. Reads the whole file into memory, then makes two
    /// passes over the in-memory tar stream: the first locates
    /// `manifest.json` (and the legacy `repositories` file, if present); the
    /// second pulls out exactly the config and layer blobs `manifest.json`
    /// names.
    pub async fn open(path: impl AsRef<Path>) -> Result<DockerArchive, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let bytes = tokio::fs::read(&path).await.map_err(|e| ArchiveError::Io(path.clone(), e))?;

        let (manifest_bytes, repositories_bytes) = scan_top_level(&bytes, &path)?;
        let manifest_bytes = manifest_bytes.ok_or_else(|| ArchiveError::NoManifest(path.clone()))?;

        let entries: Vec<ManifestJsonEntry> =
            serde_json::from_slice(&manifest_bytes).map_err(|e| ArchiveError::Decode(path.clone(), e))?;
        if entries.is_empty() {
            return Err(ArchiveError::EmptyManifest(path));
        }

        let repositories: Option<RepositoriesFile> =
            repositories_bytes.and_then(|b| serde_json::from_slice(&b).ok());

        let mut needed_configs: Vec<&str> = entries.iter().map(|e| e.config.as_str()).collect();
        needed_configs.sort_unstable();
        needed_configs.dedup();

        let mut needed_layers: Vec<&str> = entries.iter().flat_map(|e| e.layers.iter().map(String::as_str)).collect();
        needed_layers.sort_unstable();
        needed_layers.dedup();

        let (configs, layers) = collect_entries(&bytes, &path, &needed_configs, &needed_layers)?;

        let mut images = Vec::with_capacity(entries.len());
        for entry in entries {
            let config_bytes = configs
                .get(entry.config.as_str())
                .ok_or_else(|| ArchiveError::MissingEntry(entry.config.clone(), path.clone()))?
                .clone();

            let id = config_id(&entry.config)?;

            let mut manifest_layers = Vec::with_capacity(entry.layers.len());
            for layer_path in &entry.layers {
                let layer_bytes = layers
                    .get(layer_path.as_str())
                    .ok_or_else(|| ArchiveError::MissingEntry(layer_path.clone(), path.clone()))?;
                manifest_layers.push(LayerDescriptor {
                    descriptor: Descriptor {
                        media_type: media_type_for_layer(layer_bytes).to_string(),
                        digest: digest_for_layer(layer_path, layer_bytes),
                        size: layer_bytes.len() as u64,
                        platform: None,
                        artifact_type: None,
                        urls: None,
                    },
                    empty: false,
                });
            }

            let config_descriptor = Descriptor {
                media_type: mediatype::OCI_IMAGE_CONFIG.to_string(),
                digest: id.clone(),
                size: config_bytes.len() as u64,
                platform: None,
                artifact_type: None,
                urls: None,
            };

            let mut repo_tags = entry.repo_tags;
            if repo_tags.is_empty() {
                if let Some(top_layer) = entry.layers.last() {
                    if let Some(repos) = &repositories {
                        repo_tags.extend(repos.tags_for_top_layer(top_layer));
                    }
                }
            }

            let manifest_digest = Digest::sha256(
                &serde_json::to_vec(&ManifestJsonEntrySummary { config: &entry.config, layers: &entry.layers })
                    .expect("summary always serializes"),
            );

            images.push(ArchiveImage {
                id,
                repo_tags,
                config_descriptor,
                manifest_layers,
                manifest_digest,
                config_bytes,
            });
        }

        Ok(DockerArchive { path, images })
    }

    /// Resolves a reference against the images this archive carries: exact
    /// `RepoTag` match, a digest that parses and
    /// matches an image id exactly, or an unambiguous hex prefix of one.
    fn resolve(&self, reference: &str) -> Result<&ArchiveImage, ArchiveError> {
        let reference = reference.strip_prefix("docker-archive://").unwrap_or(reference);

        if let Some(image) = self.images.iter().find(|img| img.repo_tags.iter().any(|t| t == reference)) {
            return Ok(image);
        }

        if let Ok(digest) = reference.parse::<Digest>() {
            if let Some(image) = self.images.iter().find(|img| img.id == digest) {
                return Ok(image);
            }
        }

        let needle = reference.to_ascii_lowercase();
        let matches: Vec<&ArchiveImage> = self
            .images
            .iter()
            .filter(|img| img.id.hex().starts_with(&needle) || img.id.to_string().starts_with(&needle))
            .collect();

        match matches.as_slice() {
            [] => Err(ArchiveError::NotFound(reference.to_string(), self.path.clone())),
            [one] => Ok(one),
            _ => Err(ArchiveError::AmbiguousPrefix(reference.to_string(), self.path.clone())),
        }
    }
}

#[derive(serde::Serialize)]
struct ManifestJsonEntrySummary<'a> {
    #[serde(rename = "Config")]
    config: &'a str,
    #[serde(rename = "Layers")]
    layers: &'a [String],
}

struct ArchiveConfigSource(Vec<u8>);

#[async_trait]
impl ConfigSource for ArchiveConfigSource {
    async fn read(&self) -> Result<Vec<u8>, StorageError> {
        Ok(self.0.clone())
    }
}

#[async_trait]
impl Storage for DockerArchive {
    /// `GetImageOptions` is accepted for trait-object uniformity with
    /// [`super::RemoteStorage`] but unused: `manifest.json` entries name a
    /// single concrete image apiece, never an index, so there is nothing for
    /// a platform/digest matcher to descend into.
    async fn get_image(&self, reference: &str, _options: &GetImageOptions) -> Result<Image, StorageError> {
        let found = self.resolve(reference)?;

        let repo_digests =
            vec![format!("sha256:{}@{}", found.id.hex(), found.manifest_digest)];
        let (compressed_size, uncompressed_size, is_compressed) = layer_sizes(&found.manifest_layers);

        let metadata = ImageMetadata {
            id: found.id.clone(),
            name: found.repo_tags.first().cloned().unwrap_or_default(),
            repo_tags: found.repo_tags.clone(),
            repo_digests,
            digest: found.manifest_digest.clone(),
            index_digest: None,
            platform: None,
            compressed_size,
            uncompressed_size,
            is_compressed,
        };

        let config_source: Box<dyn ConfigSource> = Box::new(ArchiveConfigSource(found.config_bytes.clone()));

        Ok(Image {
            metadata,
            manifest_layers: found.manifest_layers.clone(),
            config_source,
            layers: OnceCell::new(),
        })
    }
}

/// `repositories`: `{repoName: {tag: topLayerId}}`. Only consulted
/// to backfill `RepoTags` on a `manifest.json` entry whose own list is empty;
/// matched by comparing `topLayerId` against the basename of that entry's
/// last (topmost) layer path.
#[derive(Debug, Deserialize)]
struct RepositoriesFile(HashMap<String, HashMap<String, String>>);

impl RepositoriesFile {
    fn tags_for_top_layer(&self, top_layer_path: &str) -> Vec<String> {
        let mut out = Vec::new();
        for (repo, tags) in &self.0 {
            for (tag, layer_id) in tags {
                if top_layer_path.starts_with(layer_id.as_str()) {
                    out.push(format!("{repo}:{tag}"));
                }
            }
        }
        out
    }
}

/// First pass over the tar stream: locate `manifest.json` and the
/// legacy `repositories` file, if present. Archives are small enough in
/// practice that reading the whole tar twice from an in-memory buffer is
/// simpler and cheap enough than a single-pass state machine.
fn scan_top_level(bytes: &[u8], path: &Path) -> Result<(Option<Vec<u8>>, Option<Vec<u8>>), ArchiveError> {
    let mut manifest = None;
    let mut repositories = None;

    let mut archive = tar::Archive::new(Cursor::new(bytes));
    let entries = archive.entries().map_err(|e| ArchiveError::Io(path.to_path_buf(), e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| ArchiveError::Io(path.to_path_buf(), e))?;
        let entry_path = entry.path().map_err(|e| ArchiveError::Io(path.to_path_buf(), e))?.to_string_lossy().into_owned();

        if entry_path == "manifest.json" {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).map_err(|e| ArchiveError::Io(path.to_path_buf(), e))?;
            manifest = Some(buf);
        } else if entry_path == "repositories" {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).map_err(|e| ArchiveError::Io(path.to_path_buf(), e))?;
            repositories = Some(buf);
        }
    }

    Ok((manifest, repositories))
}

/// Second pass: pulls the exact config and layer blobs `manifest.json`
/// named, by path, out of the tar stream.
fn collect_entries(
    bytes: &[u8],
    path: &Path,
    needed_configs: &[&str],
    needed_layers: &[&str],
) -> Result<(HashMap<String, Vec<u8>>, HashMap<String, Vec<u8>>), ArchiveError> {
    let mut configs = HashMap::new();
    let mut layers = HashMap::new();

    let mut archive = tar::Archive::new(Cursor::new(bytes));
    let entries = archive.entries().map_err(|e| ArchiveError::Io(path.to_path_buf(), e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| ArchiveError::Io(path.to_path_buf(), e))?;
        let entry_path =
            entry.path().map_err(|e| ArchiveError::Io(path.to_path_buf(), e))?.to_string_lossy().into_owned();

        if needed_configs.contains(&entry_path.as_str()) {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).map_err(|e| ArchiveError::Io(path.to_path_buf(), e))?;
            configs.insert(entry_path, buf);
        } else if needed_layers.contains(&entry_path.as_str()) {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).map_err(|e| ArchiveError::Io(path.to_path_buf(), e))?;
            layers.insert(entry_path, buf);
        }
    }

    Ok((configs, layers))
}

/// The image id is `sha256:` plus the
/// base name of `Config` with any `.json` suffix removed. Works unchanged for
/// both the legacy `<id>.json` path and the OCI-layout `blobs/sha256/<hex>`
/// path, since the latter has no `.json` suffix to strip.
fn config_id(config_path: &str) -> Result<Digest, ArchiveError> {
    let base = config_path.rsplit('/').next().unwrap_or(config_path);
    let stripped = base.strip_suffix(".json").unwrap_or(base);
    format!("sha256:{stripped}")
        .parse()
        .map_err(|e| ArchiveError::BadConfigId(config_path.to_string(), e))
}

/// A `blobs/sha256/<hex>` path already names its own digest; anything else
/// (a legacy `<id>/layer.tar` path) is hashed directly, which happens to
/// match Docker's own `DiffID` definition since legacy `layer.tar` entries
/// are themselves uncompressed.
fn digest_for_layer(path: &str, bytes: &[u8]) -> Digest {
    if let Some(hex) = path.strip_prefix("blobs/sha256/") {
        if let Ok(digest) = format!("sha256:{hex}").parse::<Digest>() {
            return digest;
        }
    }
    Digest::sha256(bytes)
}

fn media_type_for_layer(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x1f, 0x8b]) {
        mediatype::OCI_LAYER_TAR_GZIP
    } else {
        mediatype::OCI_LAYER_TAR
    }
}
