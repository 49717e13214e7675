//! Selector (source fingerprint): a content-independent digest over a set
//! of source file entries, used to answer "is there already a built layer
//! for exactly these sources?" without re-tarring (spec §3, §9 Open
//! Questions).
//!
//! Per the Design Notes' resolution: the selector is computed from the
//! last-modified timestamps observed *at build start*; filesystem changes
//! after that point do not invalidate the cached entry until the next
//! build.

use crate::error::Result;
use crate::tarball::{EntryContents, FileEntry};
use sha2::{Digest as _, Sha256};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    hex: String,
}

impl Selector {
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

/// Computes the selector for a logical set of file entries. Entries are
/// hashed in a canonical (sorted-by-path) order so that the selector is
/// independent of caller-supplied insertion order, matching the
/// determinism requirement the tar builder itself provides.
pub fn selector_for_entries(entries: &[FileEntry]) -> Result<Selector> {
    let mut sorted: Vec<&FileEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.extraction_path.cmp(&b.extraction_path));

    let mut hasher = Sha256::new();
    for entry in sorted {
        hasher.update(entry.extraction_path.as_bytes());
        hasher.update([0u8]);
        hasher.update(entry.mode.to_le_bytes());
        hasher.update(entry.mtime.as_secs().to_le_bytes());
        hasher.update(entry.ownership.0.to_le_bytes());
        hasher.update(entry.ownership.1.to_le_bytes());

        match &entry.contents {
            EntryContents::SourceFile(path) => {
                hasher.update([b'F']);
                hasher.update(path.to_string_lossy().as_bytes());
                let modified = std::fs::metadata(path)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                let secs = modified
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                hasher.update(secs.to_le_bytes());
            }
            EntryContents::Bytes(data) => {
                hasher.update([b'B']);
                hasher.update((data.len() as u64).to_le_bytes());
                hasher.update(Sha256::digest(data));
            }
            EntryContents::Directory => {
                hasher.update([b'D']);
            }
        }
        hasher.update([0xffu8]);
    }

    Ok(Selector {
        hex: format!("{:x}", hasher.finalize()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_is_order_independent() {
        let a = FileEntry::from_bytes("/a", b"1".to_vec());
        let b = FileEntry::from_bytes("/b", b"2".to_vec());
        let s1 = selector_for_entries(&[a.clone(), b.clone()]).unwrap();
        let s2 = selector_for_entries(&[b, a]).unwrap();
        assert_eq!(s1, s2);
    }

    #[test]
    fn selector_changes_with_content() {
        let a = FileEntry::from_bytes("/a", b"1".to_vec());
        let a2 = FileEntry::from_bytes("/a", b"2".to_vec());
        let s1 = selector_for_entries(&[a]).unwrap();
        let s2 = selector_for_entries(&[a2]).unwrap();
        assert_ne!(s1, s2);
    }

    #[test]
    fn selector_changes_with_mode() {
        let a = FileEntry::from_bytes("/a", b"1".to_vec());
        let a_exec = FileEntry::from_bytes("/a", b"1".to_vec()).with_mode(0o755);
        let s1 = selector_for_entries(&[a]).unwrap();
        let s2 = selector_for_entries(&[a_exec]).unwrap();
        assert_ne!(s1, s2);
    }
}
