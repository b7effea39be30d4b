/// Build Orchestration
///
/// Turns file-system activity into builds. Change events are debounced,
/// folded into a `ChangeSet`, and consumed by at most one build at a
/// time; whatever arrives mid-build collapses into a single follow-up.

pub mod orchestrator;
pub mod queue;
pub mod watcher;

use std::path::{Path, PathBuf};

pub use orchestrator::{BuildOrchestrator, BuildOutcome, PendingSwap, ProjectLayout};
pub use queue::{BuildMode, BuildPhase, BuildQueue, BuildRequest};
pub use watcher::{Debouncer, FileWatcher, WatchEvent};

/// Pending change state of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Changed,
    Deleted,
}

/// Changes accumulated between builds, in order of first arrival
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    entries: Vec<(PathBuf, ChangeKind)>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an event into the set.
    ///
    /// created + anything but delete stays created, created + deleted
    /// cancels out, every other sequence collapses to changed.
    pub fn record(&mut self, path: PathBuf, kind: ChangeKind) {
        let Some(index) = self.entries.iter().position(|(p, _)| *p == path) else {
            self.entries.push((path, kind));
            return;
        };

        match (self.entries[index].1, kind) {
            (ChangeKind::Created, ChangeKind::Deleted) => {
                self.entries.remove(index);
            }
            (ChangeKind::Created, _) => {}
            _ => self.entries[index].1 = ChangeKind::Changed,
        }
    }

    /// Fold every entry of `other`, in its order
    pub fn merge(&mut self, other: ChangeSet) {
        for (path, kind) in other.entries {
            self.record(path, kind);
        }
    }

    pub fn get(&self, path: &Path) -> Option<ChangeKind> {
        self.entries.iter().find(|(p, _)| p == path).map(|(_, kind)| *kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, ChangeKind)> {
        self.entries.iter().map(|(p, kind)| (p.as_path(), *kind))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Check if a path is a Rust source file
pub fn is_rust_file(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("rs"))
}

/// All Rust sources below `root`, sorted
pub fn scan_sources(root: &Path) -> Vec<PathBuf> {
    let mut sources = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            log::warn!("Cannot read source directory {}", dir.display());
            continue;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if is_rust_file(&path) {
                sources.push(path);
            }
        }
    }

    sources.sort();
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn path(name: &str) -> PathBuf {
        PathBuf::from(name)
    }

    #[test]
    fn test_created_then_changed_stays_created() {
        let mut changes = ChangeSet::new();
        changes.record(path("a.rs"), ChangeKind::Created);
        changes.record(path("a.rs"), ChangeKind::Changed);
        changes.record(path("a.rs"), ChangeKind::Created);

        assert_eq!(changes.get(Path::new("a.rs")), Some(ChangeKind::Created));
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn test_created_then_deleted_cancels() {
        let mut changes = ChangeSet::new();
        changes.record(path("a.rs"), ChangeKind::Created);
        changes.record(path("a.rs"), ChangeKind::Deleted);

        assert!(changes.is_empty());
    }

    #[test]
    fn test_other_sequences_collapse_to_changed() {
        let mut changes = ChangeSet::new();
        changes.record(path("a.rs"), ChangeKind::Deleted);
        changes.record(path("a.rs"), ChangeKind::Created);
        changes.record(path("b.rs"), ChangeKind::Changed);
        changes.record(path("b.rs"), ChangeKind::Deleted);

        assert_eq!(changes.get(Path::new("a.rs")), Some(ChangeKind::Changed));
        assert_eq!(changes.get(Path::new("b.rs")), Some(ChangeKind::Changed));
    }

    #[test]
    fn test_fresh_delete_is_recorded() {
        let mut changes = ChangeSet::new();
        changes.record(path("gone.rs"), ChangeKind::Deleted);

        assert_eq!(changes.get(Path::new("gone.rs")), Some(ChangeKind::Deleted));
    }

    #[test]
    fn test_arrival_order_is_kept() {
        let mut changes = ChangeSet::new();
        changes.record(path("b.rs"), ChangeKind::Changed);
        changes.record(path("a.rs"), ChangeKind::Changed);
        changes.record(path("b.rs"), ChangeKind::Changed);

        let order: Vec<_> = changes.iter().map(|(p, _)| p.to_path_buf()).collect();
        assert_eq!(order, vec![path("b.rs"), path("a.rs")]);
    }

    #[test]
    fn test_scan_sources_recurses() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory for scan test");
        let nested = temp_dir.path().join("systems");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp_dir.path().join("lib.rs"), "").unwrap();
        fs::write(nested.join("combat.rs"), "").unwrap();
        fs::write(nested.join("notes.txt"), "").unwrap();

        let sources = scan_sources(temp_dir.path());
        assert_eq!(sources.len(), 2);
        assert!(sources.iter().all(|p| is_rust_file(p)));
    }
}
