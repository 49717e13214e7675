//! Two-tier, content-addressed build cache (C3).
//!
//! Two independent [`Cache`] instances back the pipeline: one rooted at
//! `base-image-layers/` for pulled base-image blobs (shareable across
//! projects) and one at `application-layers/` for locally built layers
//! (project-specific). Both share the same on-disk layout and the same
//! atomic-rename commit protocol.
//!
//! On-disk layout, per spec §6:
//! ```text
//! root/layers/<blobDigest-hex>/<diffId-hex>   # the compressed layer
//! root/layers/<blobDigest-hex>/metadata       # optional
//! root/selectors/<selector-hex>               # contains blobDigest hex
//! root/temp/                                  # in-progress writes
//! ```

mod selector;

pub use selector::{selector_for_entries, Selector};

use crate::digest::Digest;
use crate::error::{PusherError, Result};
use crate::tarball::{self, FileEntry};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A committed cache entry: a built or pulled layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub blob_digest: Digest,
    pub diff_id: Digest,
    pub size: u64,
}

pub struct Cache {
    root: PathBuf,
    /// Per-fingerprint locks so at most one build runs per selector within
    /// this process; other waiters observe the committed result instead
    /// of racing the tar build.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Cache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Cache {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn layers_dir(&self) -> PathBuf {
        self.root.join("layers")
    }

    fn selectors_dir(&self) -> PathBuf {
        self.root.join("selectors")
    }

    fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    async fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.layers_dir(), self.selectors_dir(), self.temp_dir()] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Looks up a previously built entry for `selector`, if any.
    pub async fn lookup_selector(&self, selector: &Selector) -> Result<Option<CacheEntry>> {
        let path = self.selectors_dir().join(selector.hex());
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let blob_digest = Digest::from_hex(contents.trim())?;
                self.read(&blob_digest).await.map(Some)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a layer is already committed under `blob_digest`. Used to
    /// distinguish "not cached yet" from a real I/O or corruption error
    /// when deciding whether a base layer needs pulling.
    pub async fn contains(&self, blob_digest: &Digest) -> Result<bool> {
        match tokio::fs::metadata(self.layers_dir().join(blob_digest.hex())).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads the committed entry for `blob_digest`, failing
    /// `CacheCorrupted` if the digest directory exists but is ambiguous or
    /// empty.
    pub async fn read(&self, blob_digest: &Digest) -> Result<CacheEntry> {
        let dir = self.layers_dir().join(blob_digest.hex());
        let mut layer_files = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name != "metadata" {
                layer_files.push(entry.path());
            }
        }
        match layer_files.as_slice() {
            [only] => {
                let diff_hex = only
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| PusherError::CacheCorrupted {
                        path: dir.clone(),
                        message: "layer file name is not valid UTF-8".into(),
                    })?;
                let diff_id = Digest::from_hex(diff_hex)?;
                let size = tokio::fs::metadata(only).await?.len();
                Ok(CacheEntry {
                    blob_digest: blob_digest.clone(),
                    diff_id,
                    size,
                })
            }
            [] => Err(PusherError::CacheCorrupted {
                path: dir,
                message: "digest directory exists with no layer file".into(),
            }),
            _ => Err(PusherError::CacheCorrupted {
                path: dir,
                message: "digest directory contains more than one layer file".into(),
            }),
        }
    }

    /// Returns the on-disk path of the committed layer blob, if present.
    pub async fn blob_path(&self, blob_digest: &Digest) -> Result<PathBuf> {
        let entry = self.read(blob_digest).await?;
        Ok(self
            .layers_dir()
            .join(blob_digest.hex())
            .join(entry.diff_id.hex()))
    }

    /// Builds (or reuses) a reproducible gzip+tar layer from `entries`,
    /// deduplicated by the selector fingerprint of the logical source set
    /// (§4.1 write path, local build).
    pub async fn build_layer(&self, entries: &[FileEntry]) -> Result<CacheEntry> {
        self.ensure_dirs().await?;
        let selector = selector_for_entries(entries)?;
        let lock = self.lock_for(selector.hex()).await;
        let _guard = lock.lock().await;

        if let Some(existing) = self.lookup_selector(&selector).await? {
            return Ok(existing);
        }

        let temp_path = self.temp_dir().join(Uuid::new_v4().to_string());
        let entries = entries.to_vec();
        let temp_path_for_blocking = temp_path.clone();
        let (diff_descriptor, blob_descriptor) = tokio::task::spawn_blocking(move || {
            let file = std::fs::File::create(&temp_path_for_blocking)?;
            let mut digesting = crate::digest::GzipDigestingWriter::new(file);
            tarball::write_reproducible_tar(&entries, &mut digesting)?;
            let (_file, diff_descriptor, blob_descriptor) = digesting.finish()?;
            Result::Ok((diff_descriptor, blob_descriptor))
        })
        .await
        .map_err(|e| PusherError::Io(format!("tar build task panicked: {e}")))??;

        let commit = self
            .commit_temp(&temp_path, &blob_descriptor.digest, &diff_descriptor.digest)
            .await;
        if commit.is_err() {
            let _ = tokio::fs::remove_file(&temp_path).await;
        }
        commit?;
        self.write_selector(&selector, &blob_descriptor.digest).await?;

        Ok(CacheEntry {
            blob_digest: blob_descriptor.digest,
            diff_id: diff_descriptor.digest,
            size: blob_descriptor.size,
        })
    }

    /// Streams `reader`'s bytes into the cache while verifying them
    /// against `expected_digest` (§4.1 write path, registry pull). The
    /// `diff_id` of a pulled blob is the blob digest itself pre-decompress
    /// tracking is not meaningful here; callers that need the diffId of a
    /// pulled layer decompress separately and pass it as `diff_id_hint`.
    pub async fn write_verified<R>(
        &self,
        mut reader: R,
        expected_digest: &Digest,
        diff_id_hint: Option<Digest>,
    ) -> Result<CacheEntry>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        use sha2::Digest as _;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        self.ensure_dirs().await?;
        let temp_path = self.temp_dir().join(Uuid::new_v4().to_string());
        let mut file = tokio::fs::File::create(&temp_path).await?;
        let mut hasher = sha2::Sha256::new();
        let mut buf = [0u8; 65536];
        let mut size: u64 = 0;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
            file.write_all(&buf[..n]).await?;
        }
        file.flush().await?;
        drop(file);

        let actual = Digest::from_hex(format!("{:x}", hasher.finalize()))?;
        if &actual != expected_digest {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(PusherError::ChecksumMismatch {
                expected: expected_digest.as_str(),
                actual: actual.as_str(),
            });
        }

        let diff_id = diff_id_hint.unwrap_or_else(|| actual.clone());
        let commit = self.commit_temp(&temp_path, &actual, &diff_id).await;
        if commit.is_err() {
            let _ = tokio::fs::remove_file(&temp_path).await;
        }
        commit?;

        Ok(CacheEntry {
            blob_digest: actual,
            diff_id,
            size,
        })
    }

    async fn commit_temp(&self, temp_path: &Path, blob_digest: &Digest, diff_id: &Digest) -> Result<()> {
        let dir = self.layers_dir().join(blob_digest.hex());
        tokio::fs::create_dir_all(&dir).await?;
        let dest = dir.join(diff_id.hex());
        tokio::fs::rename(temp_path, &dest).await?;
        Ok(())
    }

    async fn write_selector(&self, selector: &Selector, blob_digest: &Digest) -> Result<()> {
        let path = self.selectors_dir().join(selector.hex());
        tokio::fs::write(&path, blob_digest.hex()).await?;
        Ok(())
    }

    /// Removes orphaned temp files left behind by a process that died
    /// before committing. Not on the hot path; the CLI exposes it as a
    /// maintenance operation (SPEC_FULL A6).
    pub async fn scrub_temp(&self) -> Result<usize> {
        let dir = self.temp_dir();
        if !dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if tokio::fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tarball::FileEntry;

    #[tokio::test]
    async fn build_layer_is_idempotent_and_produces_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let entries = vec![FileEntry::from_bytes("/hi", b"hi".to_vec())];

        let first = cache.build_layer(&entries).await.unwrap();
        let second = cache.build_layer(&entries).await.unwrap();
        assert_eq!(first, second);

        let layers_dir = dir.path().join("layers");
        let mut count = 0;
        let mut rd = tokio::fs::read_dir(&layers_dir).await.unwrap();
        while rd.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn read_after_build_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let entries = vec![FileEntry::from_bytes("/a", b"content".to_vec())];
        let built = cache.build_layer(&entries).await.unwrap();
        let read_back = cache.read(&built.blob_digest).await.unwrap();
        assert_eq!(built, read_back);
    }

    #[tokio::test]
    async fn write_verified_rejects_digest_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let wrong = Digest::from_hex("0".repeat(64)).unwrap();
        let result = cache
            .write_verified(std::io::Cursor::new(b"abc".to_vec()), &wrong, None)
            .await;
        assert!(matches!(result, Err(PusherError::ChecksumMismatch { .. })));
    }

    #[tokio::test]
    async fn corrupted_empty_digest_dir_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let digest = Digest::from_hex("a".repeat(64)).unwrap();
        tokio::fs::create_dir_all(dir.path().join("layers").join(digest.hex()))
            .await
            .unwrap();
        let result = cache.read(&digest).await;
        assert!(matches!(result, Err(PusherError::CacheCorrupted { .. })));
    }
}
