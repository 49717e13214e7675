//! Progress-allocation tree (§4.7 "Progress accounting"): a root with
//! total weight, children for long-running phases, leaves for individual
//! blobs weighted by byte count. Observers get cumulative
//! `(completed, leaves-in-progress)` updates.

use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct LeafStatus {
    pub label: String,
    pub total: u64,
    pub completed: u64,
}

#[derive(Default)]
pub struct ProgressTracker {
    leaves: Mutex<BTreeMap<String, LeafStatus>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        ProgressTracker::default()
    }

    pub fn register_leaf(&self, key: impl Into<String>, label: impl Into<String>, total: u64) {
        let key = key.into();
        self.leaves.lock().unwrap().insert(
            key,
            LeafStatus {
                label: label.into(),
                total,
                completed: 0,
            },
        );
    }

    pub fn advance(&self, key: &str, delta: u64) {
        if let Some(leaf) = self.leaves.lock().unwrap().get_mut(key) {
            leaf.completed = (leaf.completed + delta).min(leaf.total);
        }
    }

    pub fn complete(&self, key: &str) {
        if let Some(leaf) = self.leaves.lock().unwrap().get_mut(key) {
            leaf.completed = leaf.total;
        }
    }

    /// Returns `(completed_bytes, total_bytes, in_progress_labels)`.
    pub fn snapshot(&self) -> (u64, u64, Vec<String>) {
        let leaves = self.leaves.lock().unwrap();
        let completed: u64 = leaves.values().map(|l| l.completed).sum();
        let total: u64 = leaves.values().map(|l| l.total).sum();
        let in_progress = leaves
            .values()
            .filter(|l| l.completed < l.total)
            .map(|l| l.label.clone())
            .collect();
        (completed, total, in_progress)
    }

    pub fn render(&self, output: &crate::output::OutputManager, operation: &str) {
        let (completed, total, _) = self.snapshot();
        output.progress_bar(completed, total.max(1), operation, 30);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_sums_leaves_and_lists_unfinished() {
        let tracker = ProgressTracker::new();
        tracker.register_leaf("a", "layer a", 100);
        tracker.register_leaf("b", "layer b", 50);
        tracker.advance("a", 100);
        tracker.advance("b", 10);

        let (completed, total, in_progress) = tracker.snapshot();
        assert_eq!(completed, 110);
        assert_eq!(total, 150);
        assert_eq!(in_progress, vec!["layer b".to_string()]);
    }
}
