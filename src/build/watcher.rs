use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::HotloadResult;

use super::ChangeKind;

/// Debounced file change
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub timestamp: Instant,
}

/// Per-path quiet period. An event is dropped while the previous
/// accepted event for the same path is younger than the period.
#[derive(Debug)]
pub struct Debouncer {
    quiet: Duration,
    last_accepted: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            last_accepted: HashMap::new(),
        }
    }

    pub fn accept(&mut self, path: &Path, now: Instant) -> bool {
        // Entries past their quiet period no longer suppress anything
        let quiet = self.quiet;
        self.last_accepted
            .retain(|_, last| now.saturating_duration_since(*last) < quiet);

        if self.last_accepted.contains_key(path) {
            return false;
        }

        self.last_accepted.insert(path.to_path_buf(), now);
        true
    }
}

/// Map a notify event to per-path changes. Renames become a delete of
/// the old path and a create of the new one.
pub fn translate(event: Event) -> Vec<(PathBuf, ChangeKind)> {
    match event.kind {
        EventKind::Create(_) => tag(event.paths, ChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => tag(event.paths, ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => tag(event.paths, ChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            let mut changes = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                changes.push((from, ChangeKind::Deleted));
            }
            if let Some(to) = paths.next() {
                changes.push((to, ChangeKind::Created));
            }
            changes
        }
        EventKind::Modify(_) => tag(event.paths, ChangeKind::Changed),
        EventKind::Remove(_) => tag(event.paths, ChangeKind::Deleted),
        _ => Vec::new(),
    }
}

fn tag(paths: Vec<PathBuf>, kind: ChangeKind) -> Vec<(PathBuf, ChangeKind)> {
    paths.into_iter().map(|path| (path, kind)).collect()
}

/// File watcher with debouncing
pub struct FileWatcher {
    watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Create a watcher delivering debounced events to `on_event`.
    /// Paths without an extension are treated as directories and ignored.
    pub fn new<F>(debounce: Duration, on_event: F) -> HotloadResult<Self>
    where
        F: Fn(WatchEvent) + Send + 'static,
    {
        let mut debouncer = Debouncer::new(debounce);

        let watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("File watch error: {}", e);
                    return;
                }
            };

            let now = Instant::now();
            for (path, kind) in translate(event) {
                if path.extension().is_none() {
                    continue;
                }
                if !debouncer.accept(&path, now) {
                    log::trace!("Debounced {:?} on {}", kind, path.display());
                    continue;
                }
                on_event(WatchEvent {
                    path,
                    kind,
                    timestamp: now,
                });
            }
        })?;

        Ok(Self { watcher })
    }

    /// Watch a directory recursively
    pub fn watch_dir(&mut self, path: impl AsRef<Path>) -> HotloadResult<()> {
        let path = path.as_ref();
        self.watcher.watch(path, RecursiveMode::Recursive)?;
        log::debug!("Watching directory {}", path.display());
        Ok(())
    }

    /// Watch a specific file
    pub fn watch_file(&mut self, path: impl AsRef<Path>) -> HotloadResult<()> {
        let path = path.as_ref();
        self.watcher.watch(path, RecursiveMode::NonRecursive)?;
        log::debug!("Watching file {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    #[test]
    fn test_debouncer_drops_events_inside_quiet_period() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let start = Instant::now();
        let path = Path::new("src/lib.rs");

        assert!(debouncer.accept(path, start));
        assert!(!debouncer.accept(path, start + Duration::from_millis(50)));
        // Other paths are independent
        assert!(debouncer.accept(Path::new("src/game.rs"), start + Duration::from_millis(50)));
        assert!(debouncer.accept(path, start + Duration::from_millis(150)));
    }

    #[test]
    fn test_dropped_event_does_not_extend_quiet_period() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let start = Instant::now();
        let path = Path::new("src/lib.rs");

        assert!(debouncer.accept(path, start));
        assert!(!debouncer.accept(path, start + Duration::from_millis(90)));
        assert!(debouncer.accept(path, start + Duration::from_millis(110)));
    }

    #[test]
    fn test_expired_paths_are_forgotten() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let start = Instant::now();

        for i in 0..50 {
            assert!(debouncer.accept(&PathBuf::from(format!("src/gen_{}.rs", i)), start));
        }
        assert_eq!(debouncer.last_accepted.len(), 50);

        assert!(debouncer.accept(Path::new("src/lib.rs"), start + Duration::from_millis(200)));
        assert_eq!(debouncer.last_accepted.len(), 1);
    }

    #[test]
    fn test_translate_basic_kinds() {
        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("a.rs"));
        assert_eq!(translate(created), vec![(PathBuf::from("a.rs"), ChangeKind::Created)]);

        let modified = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("a.rs"));
        assert_eq!(translate(modified), vec![(PathBuf::from("a.rs"), ChangeKind::Changed)]);

        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path(PathBuf::from("a.rs"));
        assert_eq!(translate(removed), vec![(PathBuf::from("a.rs"), ChangeKind::Deleted)]);
    }

    #[test]
    fn test_translate_rename_is_delete_plus_create() {
        let renamed = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("old.rs"))
            .add_path(PathBuf::from("new.rs"));

        assert_eq!(
            translate(renamed),
            vec![
                (PathBuf::from("old.rs"), ChangeKind::Deleted),
                (PathBuf::from("new.rs"), ChangeKind::Created),
            ]
        );
    }
}
