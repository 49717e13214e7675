//! SHA256 digest utilities and streaming digest/gzip sinks (C1).
//!
//! A `Digest` is the canonical `sha256:<64 hex>` form used on the wire and
//! in the cache layout. `DigestingWriter` and `GzipDigestingWriter` compose
//! as explicit streaming sinks so that a single pass over a layer's
//! uncompressed tar bytes yields both the diffId (uncompressed digest) and
//! the blobDigest (compressed digest) without buffering the whole layer
//! twice.

use crate::error::{PusherError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest as _, Sha256};
use std::io::Write;

/// Standard SHA256 digest for empty files/layers.
pub const EMPTY_LAYER_DIGEST_HEX: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
pub const EMPTY_LAYER_DIGEST: &str =
    "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// An algorithm-qualified content digest, canonical string form
/// `sha256:<64 lowercase hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    hex: String,
}

impl Digest {
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let hex = hex.into();
        if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
            Ok(Digest { hex })
        } else {
            Err(PusherError::Parse(format!(
                "invalid sha256 hex digest: '{hex}'"
            )))
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let hex = s
            .strip_prefix("sha256:")
            .ok_or_else(|| PusherError::Parse(format!("digest missing sha256: prefix: {s}")))?;
        Self::from_hex(hex)
    }

    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Digest {
            hex: format!("{:x}", hasher.finalize()),
        }
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    pub fn as_str(&self) -> String {
        format!("sha256:{}", self.hex)
    }

    pub fn is_empty_layer(&self) -> bool {
        self.hex == EMPTY_LAYER_DIGEST_HEX
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sha256:{}", self.hex)
    }
}

impl TryFrom<String> for Digest {
    type Error = PusherError;
    fn try_from(s: String) -> Result<Self> {
        Digest::parse(&s)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> String {
        d.as_str()
    }
}

/// Descriptor produced by finishing a digesting sink: the digest plus the
/// byte count that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDescriptor {
    pub digest: Digest,
    pub size: u64,
}

/// A byte sink that maintains a running SHA-256 and byte counter.
/// `finish()` consumes it and returns the `BlobDescriptor`.
pub struct DigestingWriter<W> {
    inner: W,
    hasher: Sha256,
    count: u64,
}

impl<W: Write> DigestingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            count: 0,
        }
    }

    pub fn finish(self) -> (W, BlobDescriptor) {
        let digest = Digest {
            hex: format!("{:x}", self.hasher.finalize()),
        };
        (
            self.inner,
            BlobDescriptor {
                digest,
                size: self.count,
            },
        )
    }
}

impl<W: Write> Write for DigestingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Composes a digesting sink for the uncompressed side with a gzip encoder
/// feeding a second digesting sink for the compressed side, so that
/// writing the tar stream once yields both `diffId` and `blobDigest`.
pub struct GzipDigestingWriter<W: Write> {
    gzip: GzEncoder<DigestingWriter<W>>,
    diff_hasher: Sha256,
    diff_count: u64,
}

impl<W: Write> GzipDigestingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            gzip: GzEncoder::new(DigestingWriter::new(inner), Compression::default()),
            diff_hasher: Sha256::new(),
            diff_count: 0,
        }
    }

    /// Finishes both streams, returning the underlying writer, the diffId
    /// descriptor (uncompressed), and the blobDigest descriptor
    /// (compressed).
    pub fn finish(self) -> Result<(W, BlobDescriptor, BlobDescriptor)> {
        let digesting = self
            .gzip
            .finish()
            .map_err(|e| PusherError::Io(format!("gzip finish failed: {e}")))?;
        let (inner, blob_descriptor) = digesting.finish();
        let diff_digest = Digest {
            hex: format!("{:x}", self.diff_hasher.finalize()),
        };
        let diff_descriptor = BlobDescriptor {
            digest: diff_digest,
            size: self.diff_count,
        };
        Ok((inner, diff_descriptor, blob_descriptor))
    }
}

impl<W: Write> Write for GzipDigestingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.gzip.write(buf)?;
        self.diff_hasher.update(&buf[..n]);
        self.diff_count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.gzip.flush()
    }
}

/// Misc digest helpers retained from the legacy digest utilities, used by
/// the registry client and the Docker-daemon tarball importer.
pub struct DigestUtils;

impl DigestUtils {
    pub fn compute_sha256(data: &[u8]) -> String {
        Digest::of_bytes(data).hex().to_string()
    }

    pub fn compute_docker_digest(data: &[u8]) -> String {
        Digest::of_bytes(data).as_str()
    }

    pub fn is_valid_sha256_hex(digest: &str) -> bool {
        digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
    }

    pub fn verify_data_integrity(data: &[u8], expected_digest: &str) -> Result<()> {
        let expected = Digest::parse(expected_digest)?;
        let computed = Digest::of_bytes(data);
        if computed != expected {
            return Err(PusherError::ChecksumMismatch {
                expected: expected.as_str(),
                actual: computed.as_str(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_sha256_matches_known_vector() {
        let digest = DigestUtils::compute_sha256(b"hello world");
        assert_eq!(
            digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn empty_layer_digest_matches_constant() {
        let digest = Digest::of_bytes(b"");
        assert_eq!(digest.hex(), EMPTY_LAYER_DIGEST_HEX);
        assert!(digest.is_empty_layer());
    }

    #[test]
    fn parse_rejects_wrong_length_and_uppercase() {
        assert!(Digest::parse("sha256:abcd").is_err());
        assert!(Digest::from_hex("B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9")
            .is_err());
    }

    #[test]
    fn gzip_digesting_writer_diff_id_and_blob_digest_differ() {
        let tar_data = b"dummy tar layer content for test";
        let mut writer = GzipDigestingWriter::new(Vec::new());
        writer.write_all(tar_data).unwrap();
        let (compressed, diff_descriptor, blob_descriptor) = writer.finish().unwrap();

        assert_eq!(diff_descriptor.digest, Digest::of_bytes(tar_data));
        assert_eq!(blob_descriptor.digest, Digest::of_bytes(&compressed));
        assert_ne!(diff_descriptor.digest, blob_descriptor.digest);
        assert_eq!(diff_descriptor.size, tar_data.len() as u64);
    }

    #[test]
    fn verify_data_integrity_detects_mismatch() {
        let data = b"hello world";
        let wrong_digest = Digest::from_hex("0".repeat(64)).unwrap().as_str();
        assert!(DigestUtils::verify_data_integrity(data, &wrong_digest).is_err());
    }
}
