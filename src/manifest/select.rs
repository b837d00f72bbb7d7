//! ManifestSelector: picks one image-manifest descriptor out of
//! an index via an ordered list of matchers, then fetches and re-parses it.

use crate::digest::Digest;

use super::error::ManifestError;
use super::types::{Descriptor, IndexView, Platform};
use super::Manifest;

/// A single selection strategy tried in order by [`select`]. Two ship here
/// (`ByDigest`, `ByPlatform`); this is a trait rather than a
/// closed enum so a caller with a third matching need (e.g. artifact type)
/// can compose one in without touching this module, mirroring the pluggable
/// design of [`super`]'s media-type registry.
pub trait Matcher: Send + Sync {
    fn find<'a>(&self, manifests: &'a [Descriptor]) -> Option<&'a Descriptor>;
}

/// Matches on an exact digest. Never matches if the caller supplied none.
pub struct ByDigest(pub Option<Digest>);

impl Matcher for ByDigest {
    fn find<'a>(&self, manifests: &'a [Descriptor]) -> Option<&'a Descriptor> {
        let wanted = self.0.as_ref()?;
        manifests.iter().find(|m| &m.digest == wanted)
    }
}

/// Matches on exact platform equality. Falls back to [`Platform::host`] when
/// the caller supplied none; a manifest entry with no `platform` is never
/// matched.
pub struct ByPlatform(pub Option<Platform>);

impl Matcher for ByPlatform {
    fn find<'a>(&self, manifests: &'a [Descriptor]) -> Option<&'a Descriptor> {
        let wanted = self.0.clone().unwrap_or_else(Platform::host);
        manifests.iter().find(|m| m.platform.as_ref() == Some(&wanted))
    }
}

/// Tries each matcher in order against the index's child descriptors;
/// returns the first descriptor any matcher selects. `NoMatch` if none do.
pub fn select(index: &dyn IndexView, matchers: &[&dyn Matcher]) -> Result<Descriptor, ManifestError> {
    for matcher in matchers {
        if let Some(descriptor) = matcher.find(index.manifests()) {
            return Ok(descriptor.clone());
        }
    }
    Err(ManifestError::NoMatch)
}

/// The two default matchers in the order they should be tried: digest first
/// (exact content match, if requested), platform second.
pub fn default_matchers(digest: Option<Digest>, platform: Option<Platform>) -> (ByDigest, ByPlatform) {
    (ByDigest(digest), ByPlatform(platform))
}

/// Fetches the bytes backing a descriptor so the selector can re-parse it.
/// Implemented by [`crate::distribution::DistributionClient`] and by test
/// doubles.
#[async_trait::async_trait]
pub trait ManifestFetcher: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn fetch(&self, descriptor: &Descriptor) -> Result<(Manifest, Descriptor), Self::Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum SelectError<E: std::error::Error + Send + Sync + 'static> {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Fetch(E),
}

/// Selects a descriptor, fetches and re-parses it, and insists the result is
/// an image manifest (not a further nested index, not schema-1).
pub struct ManifestSelector;

impl ManifestSelector {
    pub async fn select_and_fetch<F>(
        fetcher: &F,
        index: &dyn IndexView,
        digest: Option<Digest>,
        platform: Option<Platform>,
    ) -> Result<(Manifest, Descriptor), SelectError<F::Error>>
    where
        F: ManifestFetcher,
    {
        let (by_digest, by_platform) = default_matchers(digest, platform);
        let matchers: [&dyn Matcher; 2] = [&by_digest, &by_platform];
        let descriptor = select(index, &matchers)?;

        let (manifest, fetched_descriptor) =
            fetcher.fetch(&descriptor).await.map_err(SelectError::Fetch)?;

        manifest.reject_schema1()?;
        if manifest.as_image().is_none() {
            return Err(ManifestError::NotAnImage.into());
        }

        Ok((manifest, fetched_descriptor))
    }
}
