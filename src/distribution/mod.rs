//! DistributionClient: the full OCI Distribution Specification
//! surface — manifests, blobs (monolithic and chunked push, range-seekable
//! pull), mount, delete, and the paginated catalog/tags/referrers listings —
//! built on top of [`crate::transport::HttpEngine`] and [`crate::route`].

pub mod blob;
pub mod range;
pub mod upload;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::digest::Digest;
use crate::error::{Error, ErrorKind, RequestError};
use crate::manifest::{self, Descriptor, Manifest, ManifestFetcher};
use crate::mediatype;
use crate::route::{RouteBuilder, RouteId};
use crate::transport::{header_name, HttpEngine, RequestBody, RequestOptions};

pub use blob::{BodyStream, RangeSeekableReader};
pub use upload::ChunkedUpload;

fn repo_scope(name: &str, actions: &str) -> String {
    format!("repository:{name}:{actions}")
}

fn catalog_scope(actions: &str) -> String {
    format!("registry:catalog:{actions}")
}

fn scoped(scopes: Vec<String>) -> RequestOptions {
    RequestOptions { hinted_scopes: scopes, direct: false }
}

fn status_error(method: &'static str, url: &url::Url, status: StatusCode) -> Error {
    let kind = match status {
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        StatusCode::UNAUTHORIZED => ErrorKind::Unauthorized,
        StatusCode::FORBIDDEN => ErrorKind::Forbidden,
        StatusCode::CONFLICT => ErrorKind::Conflict,
        s if s.is_server_error() => ErrorKind::Unavailable,
        _ => ErrorKind::Unknown,
    };
    Error::Request(RequestError::new(
        method,
        url,
        kind,
        io::Error::new(io::ErrorKind::Other, format!("unexpected status {status}")),
    ))
}

fn location_header(response: &Response, base: &url::Url) -> Result<String, Error> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| Error::Other(format!("{base}: response is missing a Location header")))
}

fn resolve_location(base: &url::Url, location: &str) -> Result<url::Url, Error> {
    let fixed = blob::fixup_location_port(base, location);
    url::Url::parse(&fixed)
        .or_else(|_| base.join(&fixed))
        .map_err(|e| Error::Other(format!("invalid Location header {fixed:?}: {e}")))
}

fn descriptor_from_headers(headers: &HeaderMap, url: &url::Url, digest_hint: Option<&Digest>) -> Result<Descriptor, Error> {
    let media_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(mediatype::strip_parameters)
        .unwrap_or("application/octet-stream")
        .to_string();

    let digest = match headers.get(header_name("docker-content-digest")).and_then(|v| v.to_str().ok()) {
        Some(raw) => raw.parse().map_err(|e: crate::digest::DigestError| Error::Other(e.to_string()))?,
        None => digest_hint
            .cloned()
            .ok_or_else(|| Error::Other(format!("{url}: missing Docker-Content-Digest header")))?,
    };

    let size = headers.get(CONTENT_LENGTH).and_then(|v| v.to_str().ok()).and_then(|s| s.parse().ok()).unwrap_or(0);

    Ok(Descriptor { media_type, digest, size, platform: None, artifact_type: None, urls: None })
}

/// Outcome of [`DistributionClient::mount_blob`]. This
/// type keeps both facts visible instead of collapsing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountOutcome {
    pub mounted: bool,
    pub via_fallback: bool,
}

/// A non-seekable blob body: used whenever the server didn't
/// advertise `Accept-Ranges: bytes` on the initial `GET`.
pub enum BlobReader {
    Seekable(RangeSeekableReader),
    Plain(Pin<Box<dyn AsyncRead + Send>>),
}

impl AsyncRead for BlobReader {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BlobReader::Seekable(r) => Pin::new(r).poll_read(cx, buf),
            BlobReader::Plain(r) => r.as_mut().poll_read(cx, buf),
        }
    }
}

pub struct DistributionClient {
    engine: HttpEngine,
    base_url: url::Url,
}

impl DistributionClient {
    /// `base_url` carries the scheme and host this client was probed/
    /// configured for; it must have an empty
    /// path, since every operation builds its own from [`crate::route`].
    pub fn new(engine: HttpEngine, base_url: url::Url) -> Self {
        DistributionClient { engine, base_url }
    }

    pub fn host(&self) -> &str {
        self.engine.host()
    }

    fn build_url(&self, path: &str, query: &[(String, String)]) -> url::Url {
        let mut url = self.base_url.clone();
        url.set_path(path);
        if query.is_empty() {
            url.set_query(None);
        } else {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        url
    }

    async fn do_route(
        &self,
        route: RouteId,
        builder: RouteBuilder,
        headers: HeaderMap,
        body: RequestBody,
        options: &RequestOptions,
    ) -> Result<(Response, url::Url, &'static str), Error> {
        let (method, path, query) = builder.build(route)?;
        let url = self.build_url(&path, &query);
        let method_name = method_name(&method);
        let response = self.engine.do_request(method, &url, body, headers, options).await?;
        Ok((response, url, method_name))
    }

    /// `GetVersion`: `GET /v2/`, returning the
    /// `Docker-Distribution-API-Version` header if the registry sent one.
    pub async fn get_version(&self) -> Result<Option<String>, Error> {
        let (response, url, method) = self
            .do_route(RouteId::BaseVersionCheck, RouteBuilder::new(), HeaderMap::new(), RequestBody::Empty, &RequestOptions::default())
            .await?;

        if response.status() != StatusCode::OK {
            return Err(status_error(method, &url, response.status()));
        }

        Ok(response
            .headers()
            .get(header_name("docker-distribution-api-version"))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }

    /// `StatManifest`: `HEAD`, deriving a [`Descriptor`] from
    /// response headers alone.
    pub async fn stat_manifest(&self, name: &str, reference: &str) -> Result<Descriptor, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, accept_header_value());

        let builder = RouteBuilder::new().set("name", name).set("reference", reference);
        let (response, url, method) = self
            .do_route(RouteId::ManifestExists, builder, headers, RequestBody::Empty, &scoped(vec![repo_scope(name, "pull")]))
            .await?;

        if response.status() != StatusCode::OK {
            return Err(status_error(method, &url, response.status()));
        }

        descriptor_from_headers(response.headers(), &url, None)
    }

    /// `GetManifest`: `GET`, unmarshals by `Content-Type` (or
    /// sniffs when absent), and verifies the response against any
    /// `Docker-Content-Digest` the server sent.
    pub async fn get_manifest(&self, name: &str, reference: &str) -> Result<(Manifest, Descriptor), Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, accept_header_value());

        let builder = RouteBuilder::new().set("name", name).set("reference", reference);
        let (response, url, method) = self
            .do_route(RouteId::ManifestGet, builder, headers, RequestBody::Empty, &scoped(vec![repo_scope(name, "pull")]))
            .await?;

        if response.status() != StatusCode::OK {
            return Err(status_error(method, &url, response.status()));
        }

        let content_type = response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(str::to_string);
        let known_digest: Option<Digest> = response
            .headers()
            .get(header_name("docker-content-digest"))
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());

        let bytes = response.bytes().await.map_err(|e| Error::Other(format!("reading manifest body: {e}")))?;

        let descriptor_digest = known_digest.unwrap_or_else(|| Digest::sha256(&bytes));
        let expected = Descriptor {
            media_type: content_type.clone().unwrap_or_default(),
            digest: descriptor_digest,
            size: bytes.len() as u64,
            platform: None,
            artifact_type: None,
            urls: None,
        };

        let mut verifying = crate::verify::VerifyReader::new(io::Cursor::new(bytes.clone()), expected);
        let mut discard = Vec::new();
        verifying
            .read_to_end(&mut discard)
            .await
            .map_err(|e| Error::Other(format!("{}: {e}", crate::error::redact_url(&url))))?;

        let (manifest, descriptor) = match content_type.as_deref().map(mediatype::strip_parameters) {
            Some(mt) if !mt.is_empty() => manifest::unmarshal(mt, &bytes)?,
            _ => manifest::unmarshal_sniffed(&bytes)?,
        };

        Ok((manifest, descriptor))
    }

    /// `PushManifest`: `PUT`s `content` once per reference in
    /// `tags`, plus once more by `digest` (the typed [`Digest`] can never be
    /// empty, so the source API's "both digest and tags empty is a silent
    /// no-op" case cannot arise here).
    pub async fn push_manifest(
        &self,
        name: &str,
        content: &[u8],
        media_type: &str,
        digest: &Digest,
        tags: &[String],
    ) -> Result<(), Error> {
        let mut references: Vec<String> = vec![digest.to_string()];
        references.extend(tags.iter().cloned());

        let mut seen = std::collections::HashSet::new();
        references.retain(|r| seen.insert(r.clone()));

        let content_type = HeaderValue::from_str(media_type).map_err(|e| Error::Other(e.to_string()))?;

        for reference in references {
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, content_type.clone());

            let builder = RouteBuilder::new().set("name", name).set("reference", &reference);
            let (response, url, method) = self
                .do_route(
                    RouteId::ManifestPut,
                    builder,
                    headers,
                    RequestBody::Bytes(Bytes::copy_from_slice(content)),
                    &scoped(vec![repo_scope(name, "pull,push")]),
                )
                .await?;

            if response.status() != StatusCode::CREATED {
                return Err(status_error(method, &url, response.status()));
            }
        }

        Ok(())
    }

    pub async fn delete_manifest(&self, name: &str, reference: &str) -> Result<(), Error> {
        let builder = RouteBuilder::new().set("name", name).set("reference", reference);
        let (response, url, method) = self
            .do_route(RouteId::ManifestDelete, builder, HeaderMap::new(), RequestBody::Empty, &scoped(vec![repo_scope(name, "pull,push")]))
            .await?;

        if response.status() != StatusCode::ACCEPTED {
            return Err(status_error(method, &url, response.status()));
        }
        Ok(())
    }

    pub async fn stat_blob(&self, name: &str, digest: &Digest) -> Result<Descriptor, Error> {
        let builder = RouteBuilder::new().set("name", name).set("digest", digest.to_string());
        let (response, url, method) = self
            .do_route(RouteId::BlobExists, builder, HeaderMap::new(), RequestBody::Empty, &scoped(vec![repo_scope(name, "pull")]))
            .await?;

        if response.status() != StatusCode::OK {
            return Err(status_error(method, &url, response.status()));
        }

        descriptor_from_headers(response.headers(), &url, Some(digest))
    }

    /// `GetBlob`: `GET`, returning a seekable reader when the
    /// server advertises `Accept-Ranges: bytes`, a plain streamed reader
    /// otherwise.
    pub async fn get_blob(&self, name: &str, digest: &Digest) -> Result<(Descriptor, BlobReader), Error> {
        let builder = RouteBuilder::new().set("name", name).set("digest", digest.to_string());
        let (response, url, method) = self
            .do_route(RouteId::BlobGet, builder, HeaderMap::new(), RequestBody::Empty, &scoped(vec![repo_scope(name, "pull")]))
            .await?;

        if !matches!(response.status(), StatusCode::OK | StatusCode::PARTIAL_CONTENT) {
            return Err(status_error(method, &url, response.status()));
        }

        let descriptor = descriptor_from_headers(response.headers(), &url, Some(digest))?;

        let reader = if RangeSeekableReader::supports_range(&response) {
            BlobReader::Seekable(RangeSeekableReader::new(self.engine.raw_client(), url, descriptor.size, response))
        } else {
            BlobReader::Plain(Box::pin(blob::body_stream(response)))
        };

        Ok((descriptor, reader))
    }

    pub async fn delete_blob(&self, name: &str, digest: &Digest) -> Result<(), Error> {
        let builder = RouteBuilder::new().set("name", name).set("digest", digest.to_string());
        let (response, url, method) = self
            .do_route(RouteId::BlobDelete, builder, HeaderMap::new(), RequestBody::Empty, &scoped(vec![repo_scope(name, "pull,push")]))
            .await?;

        if response.status() != StatusCode::ACCEPTED {
            return Err(status_error(method, &url, response.status()));
        }
        Ok(())
    }

    /// `PushBlob`: monolithic upload — `POST` to open a session,
    /// then a single `PUT ...?digest=` with the whole body.
    pub async fn push_blob(&self, name: &str, digest: &Digest, data: Bytes) -> Result<Descriptor, Error> {
        let size = data.len() as u64;
        let builder = RouteBuilder::new().set("name", name);
        let options = scoped(vec![repo_scope(name, "pull,push")]);
        let (response, start_url, method) = self
            .do_route(RouteId::BlobUploadStart, builder, HeaderMap::new(), RequestBody::Empty, &options)
            .await?;

        if response.status() != StatusCode::ACCEPTED {
            return Err(status_error(method, &start_url, response.status()));
        }

        let location = location_header(&response, &start_url)?;
        let mut put_url = resolve_location(&start_url, &location)?;
        put_url.query_pairs_mut().append_pair("digest", &digest.to_string());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));

        let response = self
            .engine
            .do_request(Method::PUT, &put_url, RequestBody::Bytes(data), headers, &options)
            .await?;

        if response.status() != StatusCode::CREATED {
            return Err(status_error("PUT", &put_url, response.status()));
        }

        Ok(Descriptor {
            media_type: "application/octet-stream".to_string(),
            digest: digest.clone(),
            size,
            platform: None,
            artifact_type: None,
            urls: None,
        })
    }

    /// `PushBlobChunked`: opens a new upload session and resolves
    /// the effective chunk size against the server's `OCI-Chunk-Min-Length`.
    pub async fn push_blob_chunked(&self, name: &str, chunk_size_hint: usize) -> Result<ChunkedUpload, Error> {
        let builder = RouteBuilder::new().set("name", name);
        let (response, url, method) = self
            .do_route(
                RouteId::BlobUploadStart,
                builder,
                HeaderMap::new(),
                RequestBody::Empty,
                &scoped(vec![repo_scope(name, "pull,push")]),
            )
            .await?;

        if response.status() != StatusCode::ACCEPTED {
            return Err(status_error(method, &url, response.status()));
        }

        let chunk_size = chunk_size_hint.max(server_chunk_min(&response)).max(1);
        let location = location_header(&response, &url)?;
        let location_url = resolve_location(&url, &location)?;

        Ok(ChunkedUpload::new(self.engine.raw_client(), location_url, chunk_size))
    }

    /// `PushBlobChunkedResume`: reattaches to an existing session.
    /// When `offset` is `None`, discovers the committed range via
    /// `GET uploads/{id}` before resuming.
    pub async fn push_blob_chunked_resume(
        &self,
        name: &str,
        chunk_size_hint: usize,
        session_id: &str,
        offset: Option<u64>,
    ) -> Result<ChunkedUpload, Error> {
        let committed = match offset {
            Some(o) => o,
            None => {
                let builder = RouteBuilder::new().set("name", name).set("session_id", session_id);
                let (response, url, method) = self
                    .do_route(
                        RouteId::BlobUploadStatus,
                        builder,
                        HeaderMap::new(),
                        RequestBody::Empty,
                        &scoped(vec![repo_scope(name, "pull,push")]),
                    )
                    .await?;

                if response.status() != StatusCode::NO_CONTENT {
                    return Err(status_error(method, &url, response.status()));
                }

                let committed = response
                    .headers()
                    .get(reqwest::header::RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(range::parse_range)
                    .map(|(_, end, _)| end)
                    .unwrap_or(0);

                let chunk_size = chunk_size_hint.max(server_chunk_min(&response)).max(1);
                let location = location_header(&response, &url).unwrap_or_else(|_| url.to_string());
                let location_url = resolve_location(&url, &location)?;
                return Ok(ChunkedUpload::resume(self.engine.raw_client(), location_url, chunk_size, committed));
            }
        };

        let builder = RouteBuilder::new().set("name", name).set("session_id", session_id);
        let (_, path, query) = builder.build(RouteId::BlobUploadChunk)?;
        let url = self.build_url(&path, &query);
        Ok(ChunkedUpload::resume(self.engine.raw_client(), url, chunk_size_hint.max(1), committed))
    }

    /// `MountBlob`: `POST ...?mount=<digest>&from=<from_repo>`.
    /// A `201` is a real cross-repository mount; a `202` means the registry
    /// declined and started a fresh upload session instead, so this method
    /// falls back to pulling the blob from `from_repo` and pushing it to
    /// `name` directly.
    pub async fn mount_blob(&self, name: &str, from_repo: &str, digest: &Digest) -> Result<MountOutcome, Error> {
        let builder = RouteBuilder::new()
            .set("name", name)
            .query("mount", Some(digest.to_string()))
            .query("from", Some(from_repo.to_string()));

        let options = scoped(vec![repo_scope(name, "pull,push"), repo_scope(from_repo, "pull")]);
        let (response, url, method) = self.do_route(RouteId::BlobUploadMount, builder, HeaderMap::new(), RequestBody::Empty, &options).await?;

        match response.status() {
            StatusCode::CREATED => Ok(MountOutcome { mounted: true, via_fallback: false }),
            StatusCode::ACCEPTED => {
                info!("mount of {digest} from {from_repo} into {name} was declined; falling back to pull-then-push");
                // The response already opened an upload session we don't need;
                // cancel semantics are the registry's problem if it's left idle.
                let stat = self.stat_blob(from_repo, digest).await?;
                let (_, reader) = self.get_blob(from_repo, digest).await?;
                let mut reader = reader;
                let mut data = Vec::with_capacity(stat.size as usize);
                reader
                    .read_to_end(&mut data)
                    .await
                    .map_err(|e| Error::Other(format!("reading blob during mount fallback: {e}")))?;
                self.push_blob(name, digest, Bytes::from(data)).await?;
                Ok(MountOutcome { mounted: true, via_fallback: true })
            }
            other => Err(status_error(method, &url, other)),
        }
    }

    /// `ListRepositories`: paginates `/v2/_catalog` following
    /// `Link: <url>; rel="next"` until the header is absent.
    pub fn list_repositories(&self) -> Result<Pagination<'_>, Error> {
        let (_, path, query) = RouteBuilder::new().build(RouteId::Catalog)?;
        let url = self.build_url(&path, &query);
        Ok(self.paginate(url, scoped(vec![catalog_scope("*")]), decode_catalog_page))
    }

    /// `ListTags`: paginates `/v2/{name}/tags/list`.
    pub fn list_tags(&self, name: &str) -> Result<Pagination<'_>, Error> {
        let (_, path, query) = RouteBuilder::new().set("name", name).build(RouteId::TagsList)?;
        let url = self.build_url(&path, &query);
        Ok(self.paginate(url, scoped(vec![repo_scope(name, "pull")]), decode_tags_page))
    }

    fn paginate<'a>(&'a self, first_url: url::Url, options: RequestOptions, decode: fn(&[u8]) -> Result<Vec<String>, Error>) -> Pagination<'a> {
        struct State {
            next: Option<url::Url>,
            queue: std::collections::VecDeque<String>,
        }

        let initial = State { next: Some(first_url), queue: std::collections::VecDeque::new() };

        Box::pin(stream::unfold(initial, move |mut state| {
            let options = options.clone();
            async move {
                loop {
                    if let Some(item) = state.queue.pop_front() {
                        return Some((Ok(item), state));
                    }

                    let url = state.next.take()?;
                    let response = match self.engine.do_request(Method::GET, &url, RequestBody::Empty, HeaderMap::new(), &options).await {
                        Ok(r) => r,
                        Err(e) => return Some((Err(e.into()), State { next: None, queue: Default::default() })),
                    };

                    if response.status() != StatusCode::OK {
                        return Some((Err(status_error("GET", &url, response.status())), State { next: None, queue: Default::default() }));
                    }

                    let next = parse_link_header(response.headers(), &url);

                    let bytes = match response.bytes().await {
                        Ok(b) => b,
                        Err(e) => return Some((Err(Error::Other(format!("reading page: {e}"))), State { next: None, queue: Default::default() })),
                    };

                    match decode(&bytes) {
                        Ok(items) => {
                            state.next = next;
                            state.queue = items.into();
                        }
                        Err(e) => return Some((Err(e), State { next: None, queue: Default::default() })),
                    }
                }
            }
        }))
    }

    /// `ListReferrers`: `GET /v2/{name}/referrers/{digest}`. On a
    /// `404` (the endpoint is optional), falls back to the tag-schema form
    /// `GET` of `{algorithm}-{hex}`. Client-side filters by `artifact_type`
    /// only when the server didn't already apply them (no
    /// `OCI-Filters-Applied` response header).
    pub async fn list_referrers(&self, name: &str, digest: &Digest, artifact_type: Option<&str>) -> Result<Vec<Descriptor>, Error> {
        let builder = RouteBuilder::new()
            .set("name", name)
            .set("digest", digest.to_string())
            .query("artifactType", artifact_type.map(str::to_string));

        let (response, url, method) = self
            .do_route(RouteId::Referrers, builder, HeaderMap::new(), RequestBody::Empty, &scoped(vec![repo_scope(name, "pull")]))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            info!("referrers endpoint 404 for {name}@{digest}; falling back to tag-schema lookup");
            return self.list_referrers_tag_schema(name, digest, artifact_type).await;
        }

        if response.status() != StatusCode::OK {
            return Err(status_error(method, &url, response.status()));
        }

        let filters_applied = response.headers().contains_key(header_name("oci-filters-applied"));
        let bytes = response.bytes().await.map_err(|e| Error::Other(format!("reading referrers response: {e}")))?;
        let (manifest, _) = manifest::unmarshal_sniffed(&bytes)?;

        let mut referrers = manifest.as_index().map(|i| i.manifests().to_vec()).unwrap_or_default();
        if let (Some(artifact_type), false) = (artifact_type, filters_applied) {
            referrers.retain(|d| d.artifact_type.as_deref() == Some(artifact_type));
        }
        Ok(referrers)
    }

    async fn list_referrers_tag_schema(&self, name: &str, digest: &Digest, artifact_type: Option<&str>) -> Result<Vec<Descriptor>, Error> {
        let tag = digest.as_tag_schema();
        let (manifest, _) = self.get_manifest(name, &tag).await?;
        let mut referrers = manifest.as_index().map(|i| i.manifests().to_vec()).unwrap_or_default();
        if let Some(artifact_type) = artifact_type {
            referrers.retain(|d| d.artifact_type.as_deref() == Some(artifact_type));
        }
        Ok(referrers)
    }
}

pub type Pagination<'a> = Pin<Box<dyn Stream<Item = Result<String, Error>> + Send + 'a>>;

fn method_name(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::HEAD => "HEAD",
        Method::PUT => "PUT",
        Method::POST => "POST",
        Method::PATCH => "PATCH",
        Method::DELETE => "DELETE",
        _ => "?",
    }
}

fn accept_header_value() -> HeaderValue {
    HeaderValue::from_str(&mediatype::accept_header()).expect("accept header is built from static ASCII media types")
}

fn server_chunk_min(response: &Response) -> usize {
    response
        .headers()
        .get(header_name("oci-chunk-min-length"))
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn parse_link_header(headers: &HeaderMap, base: &url::Url) -> Option<url::Url> {
    let raw = headers.get(header_name("link"))?.to_str().ok()?;
    let mut parts = raw.split(';');
    let url_part = parts.next()?.trim();
    let url_str = url_part.strip_prefix('<')?.strip_suffix('>')?;

    let is_next = parts.any(|p| {
        let p = p.trim();
        p.eq_ignore_ascii_case(r#"rel="next""#) || p.eq_ignore_ascii_case("rel=next")
    });
    if !is_next {
        return None;
    }

    base.join(url_str).ok()
}

#[derive(Deserialize)]
struct CatalogPage {
    repositories: Vec<String>,
}

fn decode_catalog_page(bytes: &[u8]) -> Result<Vec<String>, Error> {
    let page: CatalogPage = serde_json::from_slice(bytes).map_err(|e| Error::Other(format!("decoding catalog page: {e}")))?;
    Ok(page.repositories)
}

#[derive(Deserialize)]
struct TagsPage {
    tags: Vec<String>,
}

fn decode_tags_page(bytes: &[u8]) -> Result<Vec<String>, Error> {
    let page: TagsPage = serde_json::from_slice(bytes).map_err(|e| Error::Other(format!("decoding tags page: {e}")))?;
    Ok(page.tags)
}

/// Binds a [`DistributionClient`] to one repository name so it can serve as
/// the [`ManifestFetcher`] a [`crate::manifest::select::ManifestSelector`]
/// descends an index with.
pub struct ManifestRepoFetcher<'a> {
    client: &'a DistributionClient,
    name: String,
}

impl<'a> ManifestRepoFetcher<'a> {
    pub fn new(client: &'a DistributionClient, name: impl Into<String>) -> Self {
        ManifestRepoFetcher { client, name: name.into() }
    }
}

#[async_trait::async_trait]
impl<'a> ManifestFetcher for ManifestRepoFetcher<'a> {
    type Error = Error;

    async fn fetch(&self, descriptor: &Descriptor) -> Result<(Manifest, Descriptor), Error> {
        self.client.get_manifest(&self.name, &descriptor.digest.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ClientConfig;
    use reqwest::Client;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> DistributionClient {
        let engine = HttpEngine::new(Client::new(), server.address().to_string(), ClientConfig::stateless());
        let base_url = url::Url::parse(&server.uri()).unwrap();
        DistributionClient::new(engine, base_url)
    }

    #[tokio::test]
    async fn get_version_reads_the_api_version_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(200).insert_header("docker-distribution-api-version", "registry/2.0"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let version = client.get_version().await.unwrap();
        assert_eq!(version.as_deref(), Some("registry/2.0"));
    }

    #[tokio::test]
    async fn stat_manifest_returns_not_found_error_kind() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD")).and(path("/v2/repo/manifests/missing")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let client = client_for(&server);
        let err = client.stat_manifest("repo", "missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn get_manifest_parses_oci_manifest_body() {
        let server = MockServer::start().await;
        let body = br#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "size": 2, "digest": "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"},
            "layers": []
        }"#;

        Mock::given(method("GET"))
            .and(path("/v2/repo/manifests/latest"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/vnd.oci.image.manifest.v1+json")
                    .set_body_bytes(body.to_vec()),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let (manifest, descriptor) = client.get_manifest("repo", "latest").await.unwrap();
        assert!(manifest.as_image().is_some());
        assert_eq!(descriptor.media_type, "application/vnd.oci.image.manifest.v1+json");
    }

    #[tokio::test]
    async fn list_repositories_follows_link_header_pagination() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/_catalog"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("link", format!("<{}/v2/_catalog?n=1&last=a>; rel=\"next\"", server.uri()))
                    .insert_header("content-type", "application/json")
                    .set_body_bytes(br#"{"repositories":["a"]}"#.to_vec()),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v2/_catalog"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_bytes(br#"{"repositories":["b"]}"#.to_vec()),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let names: Vec<String> = {
            use futures_util::TryStreamExt;
            client.list_repositories().unwrap().try_collect().await.unwrap()
        };
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn list_referrers_falls_back_to_tag_schema_on_404() {
        let server = MockServer::start().await;
        let digest: Digest = "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".parse().unwrap();

        Mock::given(method("GET")).and(path(format!("/v2/repo/referrers/{digest}"))).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let index_body = br#"{"schemaVersion":2,"mediaType":"application/vnd.oci.image.index.v1+json","manifests":[]}"#;
        Mock::given(method("GET"))
            .and(path(format!("/v2/repo/manifests/{}", digest.as_tag_schema())))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/vnd.oci.image.index.v1+json")
                    .set_body_bytes(index_body.to_vec()),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let referrers = client.list_referrers("repo", &digest, None).await.unwrap();
        assert!(referrers.is_empty());
    }
}
