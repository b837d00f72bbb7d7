//! VerifyReader: a streaming reader that hashes bytes as they're
//! read and checks them against a [`Descriptor`]'s `(size, digest)` on EOF.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncRead, ReadBuf};

use crate::digest::Digest;
use crate::manifest::Descriptor;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("read {actual} bytes, which exceeds the descriptor's declared size {expected}")]
    SizeExceeded { expected: u64, actual: u64 },

    #[error("stream ended after {actual} bytes, expected exactly {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("digest mismatch: descriptor says {expected}, stream hashed to {actual}")]
    DigestMismatch { expected: Digest, actual: Digest },
}

/// Wraps an [`AsyncRead`] stream, verifying it against `descriptor` as it is
/// consumed. In `skip_verify` mode the size-exceeds check still
/// runs (it "fails immediately ... even in skip-verify mode"), but the final
/// size/digest equality checks at EOF are skipped.
pub struct VerifyReader<R> {
    inner: R,
    descriptor: Descriptor,
    hasher: Sha256,
    read: u64,
    skip_verify: bool,
    done: bool,
}

impl<R> VerifyReader<R> {
    pub fn new(inner: R, descriptor: Descriptor) -> Self {
        VerifyReader { inner, descriptor, hasher: Sha256::new(), read: 0, skip_verify: false, done: false }
    }

    pub fn skip_verify(inner: R, descriptor: Descriptor) -> Self {
        VerifyReader { inner, descriptor, hasher: Sha256::new(), read: 0, skip_verify: true, done: false }
    }

    /// Bytes consumed from the stream so far.
    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

fn to_io_error(e: VerifyError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

impl<R: AsyncRead + Unpin> AsyncRead for VerifyReader<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let n = buf.filled().len() - before;

                if n == 0 {
                    this.done = true;
                    if this.skip_verify {
                        return Poll::Ready(Ok(()));
                    }

                    if this.read != this.descriptor.size {
                        return Poll::Ready(Err(to_io_error(VerifyError::SizeMismatch {
                            expected: this.descriptor.size,
                            actual: this.read,
                        })));
                    }

                    let hex = format!("{:x}", this.hasher.clone().finalize());
                    let actual: Digest = format!("{}:{}", this.descriptor.digest.algorithm(), hex)
                        .parse()
                        .expect("sha256 hex digest is always well-formed");

                    if actual != this.descriptor.digest {
                        return Poll::Ready(Err(to_io_error(VerifyError::DigestMismatch {
                            expected: this.descriptor.digest.clone(),
                            actual,
                        })));
                    }

                    return Poll::Ready(Ok(()));
                }

                this.hasher.update(&buf.filled()[before..before + n]);
                this.read += n as u64;

                if this.read > this.descriptor.size {
                    return Poll::Ready(Err(to_io_error(VerifyError::SizeExceeded {
                        expected: this.descriptor.size,
                        actual: this.read,
                    })));
                }

                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn descriptor_for(bytes: &[u8]) -> Descriptor {
        Descriptor {
            media_type: "application/octet-stream".to_string(),
            digest: Digest::sha256(bytes),
            size: bytes.len() as u64,
            platform: None,
            artifact_type: None,
            urls: None,
        }
    }

    #[tokio::test]
    async fn reads_exact_bytes_through_successfully() {
        let body = b"hello registry".to_vec();
        let descriptor = descriptor_for(&body);
        let mut reader = VerifyReader::new(std::io::Cursor::new(body.clone()), descriptor);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, body);
    }

    #[tokio::test]
    async fn truncated_stream_fails_with_size_mismatch() {
        let body = b"hello registry".to_vec();
        let mut descriptor = descriptor_for(&body);
        let truncated = body[..body.len() - 1].to_vec();
        descriptor.size = body.len() as u64; // still expects the full size

        let mut reader = VerifyReader::new(std::io::Cursor::new(truncated), descriptor);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn corrupted_byte_fails_with_digest_mismatch() {
        let body = b"hello registry".to_vec();
        let descriptor = descriptor_for(&body);
        let mut corrupted = body.clone();
        *corrupted.last_mut().unwrap() ^= 0xFF;

        let mut reader = VerifyReader::new(std::io::Cursor::new(corrupted), descriptor);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn reading_past_declared_size_fails_immediately() {
        let body = b"hello registry".to_vec();
        let mut descriptor = descriptor_for(&body);
        descriptor.size = (body.len() - 1) as u64;

        let mut reader = VerifyReader::new(std::io::Cursor::new(body), descriptor);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn skip_verify_still_enforces_size_exceeded_but_not_final_checks() {
        let body = b"hello registry".to_vec();
        let mut descriptor = descriptor_for(&body);
        descriptor.digest = Digest::sha256(b"not the real content");

        let mut reader = VerifyReader::skip_verify(std::io::Cursor::new(body.clone()), descriptor);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, body);
    }
}
