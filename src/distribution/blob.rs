//! Range-seekable blob reader and
//! the `Location`-port workaround used when opening an upload session.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use reqwest::header::{ACCEPT_RANGES, RANGE};
use reqwest::{Client, Response};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::StreamReader;

use crate::error::{Error, ErrorKind, RequestError};

pub enum SeekFrom {
    Start(u64),
}

/// A boxed, type-erased byte stream adapted to `io::Result` so it can back a
/// [`tokio_util::io::StreamReader`] regardless of whether it came from the
/// initial response or a later ranged re-GET.
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Wraps a blob response's byte stream as an [`AsyncRead`]: the
/// non-seekable counterpart of [`RangeSeekableReader`], used whenever the
/// server didn't advertise `Accept-Ranges: bytes`.
pub fn body_stream(response: Response) -> StreamReader<BodyStream, Bytes> {
    let stream = response.bytes_stream().map_err(|e| io::Error::new(io::ErrorKind::Other, e));
    StreamReader::new(Box::pin(stream))
}

/// Wraps a blob response body with an offset counter; re-opens the
/// connection with a `Range` header when seeking backward or when the
/// current body has already been exhausted.
pub struct RangeSeekableReader {
    client: Client,
    url: url::Url,
    size: u64,
    offset: u64,
    body: Option<StreamReader<BodyStream, Bytes>>,
}

impl RangeSeekableReader {
    /// `initial` must already be the response to a `200 OK` with a known
    /// `Content-Length`; `Accept-Ranges: bytes` is the caller's signal that
    /// seeking is safe to offer at all.
    pub fn new(client: Client, url: url::Url, size: u64, initial: Response) -> Self {
        RangeSeekableReader { client, url, size, offset: 0, body: Some(body_stream(initial)) }
    }

    pub fn supports_range(response: &Response) -> bool {
        response.headers().get(ACCEPT_RANGES).and_then(|v| v.to_str().ok()) == Some("bytes")
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// `Seek(offset, whence)`: seeking to or past `size` closes
    /// the body and leaves an empty reader positioned at `offset`; seeking to
    /// the current offset is a no-op; otherwise issues a new ranged `GET`.
    pub async fn seek(&mut self, to: SeekFrom) -> Result<(), Error> {
        let SeekFrom::Start(target) = to;

        if target == self.offset {
            return Ok(());
        }

        if target >= self.size {
            self.body = None;
            self.offset = target;
            return Ok(());
        }

        let response = self
            .client
            .get(self.url.clone())
            .header(RANGE, format!("bytes={}-{}", target, self.size - 1))
            .send()
            .await
            .map_err(|e| RequestError::new("GET", &self.url, ErrorKind::Unavailable, e))?;

        if response.status() != 206 {
            return Err(Error::Other(format!("range seek expected 206, got {}", response.status())));
        }

        self.body = Some(body_stream(response));
        self.offset = target;
        Ok(())
    }
}

impl AsyncRead for RangeSeekableReader {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        let Some(body) = this.body.as_mut() else {
            return Poll::Ready(Ok(()));
        };

        let before = buf.filled().len();
        match Pin::new(body).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                this.offset += (buf.filled().len() - before) as u64;
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// Reattaches `:443` to a `Location` header that omitted the port the
/// original request used, so a subsequent `PATCH`/`PUT` reaches the same
/// origin.
pub fn fixup_location_port(original: &url::Url, location: &str) -> String {
    if original.port_or_known_default() != Some(443) {
        return location.to_string();
    }

    match url::Url::parse(location).or_else(|_| original.join(location)) {
        Ok(mut parsed) if parsed.port().is_none() && parsed.scheme() == "https" => {
            let _ = parsed.set_port(Some(443));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => location.to_string(),
    }
}
