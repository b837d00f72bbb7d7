//! Chunked-upload state machine:
//! `Open -> Flushed* -> {Committed, Canceled}`.

use bytes::{Bytes, BytesMut};
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, LOCATION};
use reqwest::{Client, Method};

use crate::digest::Digest;
use crate::error::{Error, ErrorKind, RequestError};
use crate::manifest::Descriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Committed,
    Canceled,
}

/// A single chunked-upload session against one `location` URL. Not `Clone`:
/// only one writer may use a session at a time; Rust's ownership gives that
/// for free instead of a mutex.
pub struct ChunkedUpload {
    client: Client,
    location: url::Url,
    chunk_size: usize,
    buf: BytesMut,
    flushed: u64,
    state: State,
}

impl ChunkedUpload {
    /// `chunk_size` is `max(hint, server_min)`, already resolved
    /// by the caller from the `POST uploads/` response's
    /// `OCI-Chunk-Min-Length` header.
    pub fn new(client: Client, location: url::Url, chunk_size: usize) -> Self {
        ChunkedUpload { client, location, chunk_size, buf: BytesMut::new(), flushed: 0, state: State::Open }
    }

    /// Resumes an upload session already known to have `flushed` bytes
    /// committed — either trusted directly from the caller, or discovered via
    /// a `GET uploads/{id}` status check.
    pub fn resume(client: Client, location: url::Url, chunk_size: usize, flushed: u64) -> Self {
        ChunkedUpload { client, location, chunk_size, buf: BytesMut::new(), flushed, state: State::Open }
    }

    pub fn id(&self) -> &str {
        self.location.path_segments().and_then(|s| s.last()).unwrap_or("")
    }

    /// Bytes accounted for so far: `flushed + len(buf)`.
    pub fn size(&self) -> u64 {
        self.flushed + self.buf.len() as u64
    }

    /// Buffers `data`; flushes a `PATCH` each time the buffer would exceed
    /// the configured chunk size.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.state != State::Open {
            return Err(Error::Other("write on a closed chunked upload".to_string()));
        }

        self.buf.extend_from_slice(data);
        while self.buf.len() >= self.chunk_size {
            let chunk = self.buf.split_to(self.chunk_size);
            self.flush_chunk(chunk.freeze()).await?;
        }
        Ok(())
    }

    /// Flushes any pending buffer as a final `PATCH` without committing.
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.state != State::Open {
            return Ok(());
        }
        if !self.buf.is_empty() {
            let chunk = self.buf.split().freeze();
            self.flush_chunk(chunk).await?;
        }
        Ok(())
    }

    async fn flush_chunk(&mut self, chunk: Bytes) -> Result<(), Error> {
        let start = self.flushed;
        let end = start + chunk.len() as u64 - 1;

        let response = self
            .client
            .patch(self.location.clone())
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_RANGE, format!("{start}-{end}"))
            .body(chunk.clone())
            .send()
            .await
            .map_err(|e| RequestError::new("PATCH", &self.location, ErrorKind::Unavailable, e))?;

        if response.status() != 202 {
            return Err(Error::Other(format!("chunk upload PATCH failed with status {}", response.status())));
        }

        if let Some(location) = response.headers().get(LOCATION).and_then(|v| v.to_str().ok()) {
            if let Ok(new_location) = self.location.join(location) {
                self.location = new_location;
            }
        }

        self.flushed += chunk.len() as u64;
        Ok(())
    }

    /// `PUT location?digest=...` with any remaining buffered data
    ///` issues a `PUT`... success = 201").
    pub async fn commit(&mut self, digest: &Digest) -> Result<Descriptor, Error> {
        if self.state != State::Open {
            return Err(Error::Other("commit on a non-open chunked upload".to_string()));
        }

        let final_chunk = self.buf.split().freeze();
        let size = self.flushed + final_chunk.len() as u64;

        let mut url = self.location.clone();
        url.query_pairs_mut().append_pair("digest", &digest.to_string());

        let response = self
            .client
            .put(url.clone())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(final_chunk)
            .send()
            .await
            .map_err(|e| RequestError::new("PUT", &url, ErrorKind::Unavailable, e))?;

        if response.status() != 201 {
            return Err(Error::Other(format!("chunk upload commit failed with status {}", response.status())));
        }

        self.state = State::Committed;
        Ok(Descriptor {
            media_type: "application/octet-stream".to_string(),
            digest: digest.clone(),
            size,
            platform: None,
            artifact_type: None,
            urls: None,
        })
    }

    /// Best-effort `DELETE location`: errors are logged, never returned.
    /// A no-op once already `Committed` or `Canceled`.
    pub async fn cancel(&mut self) {
        if self.state != State::Open {
            return;
        }
        self.state = State::Canceled;

        if let Err(e) = self.client.delete(self.location.clone()).send().await {
            warn!("best-effort cancel DELETE for chunked upload failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(location: &str, chunk_size: usize) -> ChunkedUpload {
        ChunkedUpload::new(Client::new(), url::Url::parse(location).unwrap(), chunk_size)
    }

    #[test]
    fn id_is_the_last_path_segment() {
        let u = upload("https://registry.example.com/v2/repo/blobs/uploads/abc123", 1024);
        assert_eq!(u.id(), "abc123");
    }

    #[test]
    fn size_starts_at_zero() {
        let u = upload("https://registry.example.com/v2/repo/blobs/uploads/abc123", 1024);
        assert_eq!(u.size(), 0);
    }

    #[tokio::test]
    async fn write_buffers_below_chunk_size_without_flushing() {
        let mut u = upload("https://registry.example.com/v2/repo/blobs/uploads/abc123", 1024);
        u.buf.extend_from_slice(&[0u8; 10]);
        assert_eq!(u.size(), 10);
        assert_eq!(u.flushed, 0);
    }

    #[tokio::test]
    async fn second_write_on_closed_upload_fails() {
        let mut u = upload("https://registry.example.com/v2/repo/blobs/uploads/abc123", 1024);
        u.state = State::Committed;
        let err = u.write(b"more").await.unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }

    #[tokio::test]
    async fn cancel_after_commit_is_a_noop() {
        let mut u = upload("https://registry.example.com/v2/repo/blobs/uploads/abc123", 1024);
        u.state = State::Committed;
        u.cancel().await;
        assert_eq!(u.state, State::Committed);
    }
}
