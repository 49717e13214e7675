//! Blob: a finite, possibly-lazy byte source with one operation,
//! `stream_to`, producing a `BlobDescriptor` (C1).
//!
//! Mirrors the variant set the spec enumerates: empty, from-bytes,
//! from-file, from-async-read, from-writer. Retryable variants may be
//! streamed more than once; `FromAsyncRead` is consumed exactly once and
//! any second attempt fails with `NonRetryableRequest`.

use crate::digest::BlobDescriptor;
use crate::error::{PusherError, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub enum Blob {
    Empty,
    Bytes(bytes::Bytes),
    File(PathBuf),
    /// Wraps a one-shot async reader. `consumed` latches true on first use.
    AsyncRead {
        reader: Arc<tokio::sync::Mutex<Option<Box<dyn AsyncRead + Send + Unpin>>>>,
        consumed: Arc<AtomicBool>,
    },
}

impl Blob {
    pub fn empty() -> Self {
        Blob::Empty
    }

    pub fn from_bytes(data: impl Into<bytes::Bytes>) -> Self {
        Blob::Bytes(data.into())
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Blob::File(path.into())
    }

    pub fn from_async_read(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Blob::AsyncRead {
            reader: Arc::new(tokio::sync::Mutex::new(Some(Box::new(reader)))),
            consumed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether this blob may be streamed more than once.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Blob::AsyncRead { .. })
    }

    /// Streams this blob's bytes to `sink`, returning its digest and size.
    /// Digesting happens inline via `crate::digest::DigestingWriter`-style
    /// counting, expressed here through a running hasher since the sink is
    /// an async writer rather than `std::io::Write`.
    pub async fn stream_to<W: AsyncWrite + Unpin>(&self, mut sink: W) -> Result<BlobDescriptor> {
        use sha2::Digest as _;
        let mut hasher = sha2::Sha256::new();
        let mut count: u64 = 0;

        match self {
            Blob::Empty => {}
            Blob::Bytes(data) => {
                hasher.update(data.as_ref());
                count = data.len() as u64;
                sink.write_all(data).await?;
            }
            Blob::File(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                let mut buf = [0u8; 65536];
                loop {
                    let n = file.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                    count += n as u64;
                    sink.write_all(&buf[..n]).await?;
                }
            }
            Blob::AsyncRead { reader, consumed } => {
                if consumed.swap(true, Ordering::SeqCst) {
                    return Err(PusherError::NonRetryableRequest);
                }
                let mut guard = reader.lock().await;
                let reader = guard
                    .as_mut()
                    .ok_or(PusherError::NonRetryableRequest)?;
                let mut buf = [0u8; 65536];
                loop {
                    let n = reader.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                    count += n as u64;
                    sink.write_all(&buf[..n]).await?;
                }
            }
        }

        sink.flush().await?;
        let digest = crate::digest::Digest::from_hex(format!("{:x}", hasher.finalize()))?;
        Ok(BlobDescriptor { digest, size: count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_blob_digests_as_empty_layer() {
        let blob = Blob::empty();
        let mut out = Vec::new();
        let descriptor = blob.stream_to(&mut out).await.unwrap();
        assert_eq!(descriptor.size, 0);
        assert!(descriptor.digest.is_empty_layer());
    }

    #[tokio::test]
    async fn bytes_blob_is_retryable_and_deterministic() {
        let blob = Blob::from_bytes(&b"hi"[..]);
        assert!(blob.is_retryable());
        let mut out1 = Vec::new();
        let d1 = blob.stream_to(&mut out1).await.unwrap();
        let mut out2 = Vec::new();
        let d2 = blob.stream_to(&mut out2).await.unwrap();
        assert_eq!(d1, d2);
        assert_eq!(out1, out2);
    }

    #[tokio::test]
    async fn async_read_blob_fails_on_second_stream() {
        let blob = Blob::from_async_read(std::io::Cursor::new(b"once".to_vec()));
        assert!(!blob.is_retryable());
        let mut out = Vec::new();
        blob.stream_to(&mut out).await.unwrap();
        let mut out2 = Vec::new();
        let err = blob.stream_to(&mut out2).await.unwrap_err();
        assert!(matches!(err, PusherError::NonRetryableRequest));
    }
}
