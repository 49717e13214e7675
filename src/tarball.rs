//! Reproducible TAR construction (C2).
//!
//! Produces a USTAR tar whose bytes depend only on the logical set of
//! file entries: sorted extraction-path order, declared (not filesystem)
//! mtimes, and synthesized parent directories for any path whose parents
//! were not declared explicitly. A later entry for the same extraction
//! path overrides an earlier one, including an implicit parent directory.

use crate::error::Result;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Default declared mtime when a `FileEntry` doesn't specify one:
/// Epoch + 1 second. Docker/OCI tooling treats epoch-exactly mtimes as a
/// signal of an unset value in some tools, so the pack convention is to
/// nudge by one second.
pub const DEFAULT_MTIME: Duration = Duration::from_secs(1);

pub const DEFAULT_FILE_MODE: u32 = 0o644;
pub const DEFAULT_DIR_MODE: u32 = 0o755;

#[derive(Debug, Clone)]
pub enum EntryContents {
    /// Read from a local path at archive-build time.
    SourceFile(PathBuf),
    /// Inline bytes, for synthesized or in-memory content.
    Bytes(Vec<u8>),
    /// A directory with no content.
    Directory,
}

/// `{sourcePath, extractionPath, permissions, modificationTime, ownership}`.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub extraction_path: String,
    pub contents: EntryContents,
    pub mode: u32,
    pub mtime: Duration,
    /// `uid:gid`; `(0, 0)` when unset.
    pub ownership: (u64, u64),
}

impl FileEntry {
    pub fn file(extraction_path: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        FileEntry {
            extraction_path: normalize_path(&extraction_path.into()),
            contents: EntryContents::SourceFile(source.into()),
            mode: DEFAULT_FILE_MODE,
            mtime: DEFAULT_MTIME,
            ownership: (0, 0),
        }
    }

    pub fn from_bytes(extraction_path: impl Into<String>, data: Vec<u8>) -> Self {
        FileEntry {
            extraction_path: normalize_path(&extraction_path.into()),
            contents: EntryContents::Bytes(data),
            mode: DEFAULT_FILE_MODE,
            mtime: DEFAULT_MTIME,
            ownership: (0, 0),
        }
    }

    pub fn directory(extraction_path: impl Into<String>) -> Self {
        FileEntry {
            extraction_path: normalize_path(&extraction_path.into()),
            contents: EntryContents::Directory,
            mode: DEFAULT_DIR_MODE,
            mtime: DEFAULT_MTIME,
            ownership: (0, 0),
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_mtime(mut self, mtime: Duration) -> Self {
        self.mtime = mtime;
        self
    }

    pub fn with_ownership(mut self, uid: u64, gid: u64) -> Self {
        self.ownership = (uid, gid);
        self
    }

    fn is_dir(&self) -> bool {
        matches!(self.contents, EntryContents::Directory)
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Returns the list of ancestor directory paths of `path`, root-first,
/// excluding `path` itself and the root `/`.
fn ancestors_of(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut acc = String::new();
    let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    for part in &parts[..parts.len().saturating_sub(1)] {
        acc.push('/');
        acc.push_str(part);
        out.push(acc.clone());
    }
    out
}

fn implicit_dir(path: String) -> FileEntry {
    FileEntry {
        extraction_path: path,
        contents: EntryContents::Directory,
        mode: DEFAULT_DIR_MODE,
        mtime: DEFAULT_MTIME,
        ownership: (0, 0),
    }
}

/// Builds a deterministic tar from `entries` and writes it to `sink`.
/// Entries are deduplicated by extraction path (later entry wins, per the
/// input order) and any path whose parent directories were not declared
/// gets them synthesized with default directory permissions.
pub fn write_reproducible_tar<W: Write>(entries: &[FileEntry], sink: W) -> Result<()> {
    let mut by_path: BTreeMap<String, FileEntry> = BTreeMap::new();

    for entry in entries {
        for ancestor in ancestors_of(&entry.extraction_path) {
            by_path
                .entry(ancestor.clone())
                .or_insert_with(|| implicit_dir(ancestor));
        }
        by_path.insert(entry.extraction_path.clone(), entry.clone());
    }

    let mut builder = tar::Builder::new(sink);
    builder.mode(tar::HeaderMode::Deterministic);

    for (path, entry) in by_path {
        let mut header = tar::Header::new_ustar();
        header.set_mode(entry.mode);
        header.set_mtime(entry.mtime.as_secs());
        header.set_uid(entry.ownership.0);
        header.set_gid(entry.ownership.1);

        if entry.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            let dir_path = if path.ends_with('/') {
                path.clone()
            } else {
                format!("{path}/")
            };
            header.set_path(dir_path.trim_start_matches('/'))?;
            header.set_cksum();
            builder.append(&header, std::io::empty())?;
        } else {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_path(path.trim_start_matches('/'))?;
            match &entry.contents {
                EntryContents::SourceFile(source) => {
                    let data = std::fs::read(source)?;
                    header.set_size(data.len() as u64);
                    header.set_cksum();
                    builder.append(&header, data.as_slice())?;
                }
                EntryContents::Bytes(data) => {
                    header.set_size(data.len() as u64);
                    header.set_cksum();
                    builder.append(&header, data.as_slice())?;
                }
                EntryContents::Directory => unreachable!(),
            }
        }
    }

    builder.into_inner()?.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tar_entries(bytes: &[u8]) -> Vec<(String, bool, u32, u64)> {
        let mut archive = tar::Archive::new(bytes);
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                let header = e.header();
                (
                    format!("/{}", e.path().unwrap().to_string_lossy()),
                    header.entry_type().is_dir(),
                    header.mode().unwrap(),
                    header.mtime().unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn hello_layer_single_entry() {
        let entry = FileEntry::from_bytes("/hi", b"hi".to_vec());
        let mut buf = Vec::new();
        write_reproducible_tar(&[entry], &mut buf).unwrap();
        let entries = tar_entries(&buf);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "/hi");
        assert!(!entries[0].1);
    }

    #[test]
    fn parent_synthesis_orders_parents_before_child() {
        let entry = FileEntry::from_bytes("/a/b/c", b"x".to_vec()).with_mode(0o644);
        let mut buf = Vec::new();
        write_reproducible_tar(&[entry], &mut buf).unwrap();
        let entries = tar_entries(&buf);
        let paths: Vec<&str> = entries.iter().map(|e| e.0.as_str()).collect();
        assert_eq!(paths, vec!["/a", "/a/b", "/a/b/c"]);
        assert!(entries[0].1 && entries[1].1 && !entries[2].1);
        assert_eq!(entries[0].2, 0o755);
        assert_eq!(entries[2].2, 0o644);
        for e in &entries {
            assert_eq!(e.3, 1);
        }
    }

    /// Within a single tar, a later entry for the same path replaces the
    /// earlier one outright — this is intra-tar dedup, not the §8
    /// scenario of two independently-shipped layers both declaring the
    /// same path (see `executor::tests::independently_built_layers_for_the_same_path_stay_unmerged`
    /// for that case, which stays unmerged rather than overriding).
    #[test]
    fn single_tar_later_entry_overrides_earlier_for_same_path() {
        let first = FileEntry::from_bytes("/x", b"a".to_vec()).with_mode(0o600);
        let second = FileEntry::from_bytes("/x", b"ab".to_vec()).with_mode(0o644);
        let mut buf = Vec::new();
        write_reproducible_tar(&[first, second], &mut buf).unwrap();
        let entries = tar_entries(&buf);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].2, 0o644);
    }

    #[test]
    fn byte_identical_for_permuted_insertion_order() {
        let a = FileEntry::from_bytes("/a", b"1".to_vec());
        let b = FileEntry::from_bytes("/b", b"2".to_vec());
        let mut buf1 = Vec::new();
        write_reproducible_tar(&[a.clone(), b.clone()], &mut buf1).unwrap();
        let mut buf2 = Vec::new();
        write_reproducible_tar(&[b, a], &mut buf2).unwrap();
        assert_eq!(buf1, buf2);
    }
}
