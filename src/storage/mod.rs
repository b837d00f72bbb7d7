//! StorageFacade: a uniform `Storage` interface over a remote
//! registry or a local [`archive`] backend, assembling [`ImageMetadata`] and
//! lazily deriving the `ChainID`/`DiffID` layer graph from the image config
//! blob on first access.

pub mod archive;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, OnceCell};

pub use archive::{ArchiveError, DockerArchive};

use crate::digest::Digest;
use crate::distribution::{DistributionClient, ManifestRepoFetcher};
use crate::error::{ErrorKind, RequestError};
use crate::manifest::select::{ManifestSelector, SelectError};
use crate::manifest::{Descriptor, LayerDescriptor, ManifestError, Platform};
use crate::mediatype::{self, Compression};
use crate::probe::ProbeError;
use crate::reference::{self, ParseOptions, ReferenceError, Registry};
use crate::transport::{ClientConfig, HttpEngine};

/// Errors from either `Storage` backend. Archive-backend failures
/// are carried through verbatim via [`ArchiveError`]'s own variant rather
/// than being collapsed into [`StorageError::Other`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("no scheme configured for {0:?} and the scheme probe failed: {1}")]
    SchemeProbe(String, ProbeError),

    #[error("distribution request failed: {0}")]
    Distribution(Box<crate::error::Error>),

    #[error("{0}")]
    Other(String),
}

impl From<crate::error::Error> for StorageError {
    fn from(e: crate::error::Error) -> Self {
        StorageError::Distribution(Box::new(e))
    }
}

impl<E> From<SelectError<E>> for StorageError
where
    StorageError: From<E>,
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(e: SelectError<E>) -> Self {
        match e {
            SelectError::Manifest(m) => StorageError::Manifest(m),
            SelectError::Fetch(inner) => StorageError::from(inner),
        }
    }
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Reference(e) => e.kind(),
            StorageError::Manifest(e) => e.kind(),
            StorageError::Request(e) => e.kind,
            StorageError::Archive(e) => e.kind(),
            StorageError::SchemeProbe(_, _) => ErrorKind::Unavailable,
            StorageError::Distribution(e) => e.kind(),
            StorageError::Other(_) => ErrorKind::Unknown,
        }
    }
}

/// Caller-supplied selection criteria for an index-rooted reference,
/// threaded straight into [`ManifestSelector::select_and_fetch`].
#[derive(Debug, Clone, Default)]
pub struct GetImageOptions {
    pub platform: Option<Platform>,
    pub digest: Option<Digest>,
}

/// `(id, name, repoTags, repoDigests, digest, indexDigest?, platform?,
/// compressedSize, uncompressedSize, isCompressed)`. `id` is the
/// config-blob digest; `digest` is the selected manifest's digest.
#[derive(Debug, Clone)]
pub struct ImageMetadata {
    pub id: Digest,
    pub name: String,
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
    pub digest: Digest,
    pub index_digest: Option<Digest>,
    pub platform: Option<Platform>,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub is_compressed: bool,
}

/// One node of the lazy layer graph: `parent` is
/// an arena index into the enclosing `Vec<Layer>` rather than a reference,
/// so the graph needs neither reference counting nor a lifetime.
#[derive(Debug, Clone)]
pub struct Layer {
    pub descriptor: Descriptor,
    pub diff_id: Digest,
    pub chain_id: Digest,
    pub created_by: Option<String>,
    pub parent: Option<usize>,
}

/// The minimal shape of an OCI/Docker image config blob this crate parses:
/// just enough to derive `DiffID`s and per-layer history. Full
/// config parsing (env, entrypoint, exposed ports, ...) is a consumer
/// concern, so this stays narrowly typed rather than carrying an untyped
/// JSON blob.
#[derive(Debug, serde::Deserialize)]
struct ImageConfig {
    rootfs: Rootfs,
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

#[derive(Debug, serde::Deserialize)]
struct Rootfs {
    #[serde(rename = "diff_ids")]
    diff_ids: Vec<Digest>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct HistoryEntry {
    #[serde(default)]
    created_by: Option<String>,
    #[serde(default)]
    empty_layer: bool,
}

/// Fetches the raw bytes of an image's config blob. Implemented once per
/// backend ([`RemoteStorage`] over the network, [`archive::DockerArchive`]
/// off disk) so [`Image::layers`] can stay backend-agnostic.
#[async_trait]
trait ConfigSource: Send + Sync {
    async fn read(&self) -> Result<Vec<u8>, StorageError>;
}

struct RemoteConfigSource {
    client: Arc<DistributionClient>,
    name: String,
    digest: Digest,
}

#[async_trait]
impl ConfigSource for RemoteConfigSource {
    async fn read(&self) -> Result<Vec<u8>, StorageError> {
        let (_, mut reader) = self.client.get_blob(&self.name, &self.digest).await?;
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| StorageError::Other(format!("reading image config blob: {e}")))?;
        Ok(bytes)
    }
}

/// A resolved image: eagerly-assembled [`ImageMetadata`] plus a lazily
/// computed layer graph. Cheap to hold
/// around; [`Image::layers`] only touches the network or disk once, on its
/// first call, and caches the result for the lifetime of this handle.
pub struct Image {
    metadata: ImageMetadata,
    manifest_layers: Vec<LayerDescriptor>,
    config_source: Box<dyn ConfigSource>,
    layers: OnceCell<Vec<Layer>>,
}

impl Image {
    pub fn metadata(&self) -> &ImageMetadata {
        &self.metadata
    }

    /// `Layers()`: fetches the config blob on first call,
    /// derives each layer's `DiffID` and `ChainID`, and aligns non-empty
    /// layer descriptors with non-empty config-history entries to recover
    /// `created_by`. A length mismatch between the two is logged and simply
    /// leaves `created_by` unset for every layer, rather than failing the
    /// call outright.
    pub async fn layers(&self) -> Result<&[Layer], StorageError> {
        self.layers.get_or_try_init(|| self.compute_layers()).await.map(Vec::as_slice)
    }

    async fn compute_layers(&self) -> Result<Vec<Layer>, StorageError> {
        let bytes = self.config_source.read().await?;
        let config: ImageConfig =
            serde_json::from_slice(&bytes).map_err(|e| StorageError::Other(format!("decoding image config: {e}")))?;

        let non_empty_history: Vec<&HistoryEntry> = config.history.iter().filter(|h| !h.empty_layer).collect();
        let histories_align = non_empty_history.len() == config.rootfs.diff_ids.len();
        if !histories_align {
            warn!(
                "image config has {} non-empty history entries but {} diff_ids; omitting per-layer history",
                non_empty_history.len(),
                config.rootfs.diff_ids.len()
            );
        }

        let real_layers: Vec<&LayerDescriptor> = self.manifest_layers.iter().filter(|l| !l.empty).collect();
        if real_layers.len() != config.rootfs.diff_ids.len() {
            warn!(
                "manifest declares {} real layers but config declares {} diff_ids; truncating to the shorter",
                real_layers.len(),
                config.rootfs.diff_ids.len()
            );
        }

        let mut layers = Vec::new();
        let mut prev_chain_id: Option<Digest> = None;

        for (i, diff_id) in config.rootfs.diff_ids.into_iter().enumerate() {
            let Some(descriptor) = real_layers.get(i) else { break };

            let chain_id = match &prev_chain_id {
                None => diff_id.clone(),
                Some(prev) => Digest::sha256(format!("{prev} {diff_id}").as_bytes()),
            };

            let created_by = if histories_align {
                non_empty_history.get(i).and_then(|h| h.created_by.clone())
            } else {
                None
            };

            layers.push(Layer {
                descriptor: descriptor.descriptor.clone(),
                diff_id,
                chain_id: chain_id.clone(),
                created_by,
                parent: if i == 0 { None } else { Some(i - 1) },
            });

            prev_chain_id = Some(chain_id);
        }

        Ok(layers)
    }
}

/// `Storage.GetImage`.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_image(&self, reference: &str, options: &GetImageOptions) -> Result<Image, StorageError>;
}

fn layer_sizes(layers: &[LayerDescriptor]) -> (u64, u64, bool) {
    let mut compressed = 0u64;
    let mut uncompressed = 0u64;

    for layer in layers {
        if layer.empty {
            continue;
        }
        match mediatype::compression_of(&layer.descriptor.media_type) {
            Some(Compression::Gzip) | Some(Compression::Zstd) => compressed += layer.descriptor.size,
            Some(Compression::None) | None => uncompressed += layer.descriptor.size,
        }
    }

    (compressed, uncompressed, compressed > 0)
}

/// The remote `Storage` backend: parses a reference, reuses a
/// per-host [`DistributionClient`] (scheme resolved once per host via
/// [`Registry::scheme`] → [`Registry::default_scheme`] →
/// [`crate::probe::probe_scheme`]), fetches the manifest, descends an index
/// via [`ManifestSelector`] if necessary, and assembles [`ImageMetadata`].
pub struct RemoteStorage {
    raw_client: Client,
    config: ClientConfig,
    parse_options: ParseOptions,
    clients: Mutex<HashMap<String, Arc<DistributionClient>>>,
}

impl RemoteStorage {
    pub fn new(config: ClientConfig) -> Self {
        RemoteStorage {
            raw_client: Client::new(),
            config,
            parse_options: ParseOptions::default(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_parse_options(mut self, parse_options: ParseOptions) -> Self {
        self.parse_options = parse_options;
        self
    }

    /// Resolves and caches a [`DistributionClient`] per registry host,
    /// acquiring or reusing one client per host.
    async fn client_for(&self, registry: &Registry) -> Result<Arc<DistributionClient>, StorageError> {
        let host = registry.host().to_string();

        {
            let clients = self.clients.lock().await;
            if let Some(client) = clients.get(&host) {
                return Ok(client.clone());
            }
        }

        let scheme = match registry.scheme() {
            Some(scheme) => scheme.to_string(),
            None => match registry.default_scheme() {
                Some(scheme) => scheme.to_string(),
                None => crate::probe::probe_scheme(&self.raw_client, &host)
                    .await
                    .map_err(|e| StorageError::SchemeProbe(host.clone(), e))?
                    .to_string(),
            },
        };

        let base_url = url::Url::parse(&format!("{scheme}://{host}"))
            .map_err(|e| StorageError::Other(format!("building base url for {host:?}: {e}")))?;
        let engine = HttpEngine::new(self.raw_client.clone(), host.clone(), self.config.clone());
        let client = Arc::new(DistributionClient::new(engine, base_url));

        let mut clients = self.clients.lock().await;
        let client = clients.entry(host).or_insert(client).clone();
        Ok(client)
    }
}

#[async_trait]
impl Storage for RemoteStorage {
    async fn get_image(&self, reference: &str, options: &GetImageOptions) -> Result<Image, StorageError> {
        let parsed = reference::parse_reference(reference, &self.parse_options)?;
        let repository = parsed.repository();
        let client = self.client_for(repository.registry()).await?;

        let (top_manifest, top_descriptor) =
            client.get_manifest(repository.path(), &parsed.as_api_reference()).await?;

        let (image_manifest, selected_descriptor, index_digest, platform) = if top_manifest.is_index() {
            let index = top_manifest.as_index().expect("is_index implies as_index");
            let fetcher = ManifestRepoFetcher::new(&client, repository.path());
            let (selected, fetched_descriptor) =
                ManifestSelector::select_and_fetch(&fetcher, index, options.digest.clone(), options.platform.clone())
                    .await?;

            let platform = index
                .manifests()
                .iter()
                .find(|d| d.digest == fetched_descriptor.digest)
                .and_then(|d| d.platform.clone());

            (selected, fetched_descriptor, Some(top_descriptor.digest.clone()), platform)
        } else {
            top_manifest.reject_schema1()?;
            (top_manifest, top_descriptor, None, None)
        };

        let image_view = image_manifest.as_image().ok_or(ManifestError::NotAnImage)?;
        let config_descriptor = image_view.config().clone();
        let manifest_layers = image_view.layers().to_vec();
        let (compressed_size, uncompressed_size, is_compressed) = layer_sizes(&manifest_layers);

        let repo_tags: Vec<String> = parsed.tag().map(str::to_string).into_iter().collect();
        let repo_digests = vec![format!("{repository}@{}", selected_descriptor.digest)];

        let metadata = ImageMetadata {
            id: config_descriptor.digest.clone(),
            name: repository.to_string(),
            repo_tags,
            repo_digests,
            digest: selected_descriptor.digest.clone(),
            index_digest,
            platform,
            compressed_size,
            uncompressed_size,
            is_compressed,
        };

        let config_source: Box<dyn ConfigSource> = Box::new(RemoteConfigSource {
            client: client.clone(),
            name: repository.path().to_string(),
            digest: config_descriptor.digest,
        });

        Ok(Image { metadata, manifest_layers, config_source, layers: OnceCell::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_sizes_splits_by_compression_family() {
        let layers = vec![
            LayerDescriptor {
                descriptor: Descriptor {
                    media_type: mediatype::OCI_LAYER_TAR_GZIP.to_string(),
                    digest: Digest::sha256(b"a"),
                    size: 100,
                    platform: None,
                    artifact_type: None,
                    urls: None,
                },
                empty: false,
            },
            LayerDescriptor {
                descriptor: Descriptor {
                    media_type: mediatype::OCI_LAYER_TAR.to_string(),
                    digest: Digest::sha256(b"b"),
                    size: 50,
                    platform: None,
                    artifact_type: None,
                    urls: None,
                },
                empty: false,
            },
        ];

        let (compressed, uncompressed, is_compressed) = layer_sizes(&layers);
        assert_eq!(compressed, 100);
        assert_eq!(uncompressed, 50);
        assert!(is_compressed);
    }

    #[test]
    fn layer_sizes_skips_empty_layers() {
        let layers = vec![LayerDescriptor {
            descriptor: Descriptor {
                media_type: mediatype::OCI_LAYER_TAR_GZIP.to_string(),
                digest: Digest::sha256(b"a"),
                size: 100,
                platform: None,
                artifact_type: None,
                urls: None,
            },
            empty: true,
        }];

        let (compressed, uncompressed, is_compressed) = layer_sizes(&layers);
        assert_eq!((compressed, uncompressed, is_compressed), (0, 0, false));
    }
}
