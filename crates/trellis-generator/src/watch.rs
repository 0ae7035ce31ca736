//! Filesystem watcher adapter.
//!
//! One [`SourceWatcher`] per content type. On construction it validates that
//! the base directory of every include pattern exists, then translates raw
//! `notify` events into `add` / `changed` / `delete` source events on the
//! event bus. It never reads files or touches the cache.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use notify::{
    EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::{ModifyKind, RenameMode},
};
use thiserror::Error;
use tracing::{debug, info, warn};
use trellis_core::paths;

use crate::{
    events::{Action, EventBus, SourceEvent},
    source::{PatternSet, SourceError},
};

/// Watcher errors.
#[derive(Debug, Error)]
pub enum WatchError {
    /// A declared root does not exist.
    #[error("watched root for '{kind}' does not exist: {path}")]
    MissingRoot { kind: String, path: PathBuf },

    /// Invalid patterns.
    #[error(transparent)]
    Pattern(#[from] SourceError),

    /// Underlying watcher failure.
    #[error("watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Result type for watch operations.
pub type Result<T> = std::result::Result<T, WatchError>;

/// Lifecycle of a [`SourceWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Initializing,
    ValidatingRoots,
    Watching,
    Closed,
}

/// Watches the roots of one content type.
pub struct SourceWatcher {
    kind: String,
    roots: Vec<PathBuf>,
    state: WatcherState,
    watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for SourceWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceWatcher")
            .field("kind", &self.kind)
            .field("roots", &self.roots)
            .field("state", &self.state)
            .finish()
    }
}

impl SourceWatcher {
    /// Validate the roots of `patterns` and start watching them.
    pub fn new(kind: &str, patterns: &[String], bus: Arc<EventBus>) -> Result<Self> {
        let mut this = Self {
            kind: kind.to_string(),
            roots: Vec::new(),
            state: WatcherState::Initializing,
            watcher: None,
        };

        let set = PatternSet::new(patterns)?;
        this.state = WatcherState::ValidatingRoots;
        this.roots = validate_roots(kind, set.bases())?;

        let base_dir = std::env::current_dir().ok();
        let handler_kind = this.kind.clone();
        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for (action, path) in classify(&event) {
                        let path = relativize(&path, base_dir.as_deref(), &set);
                        if action != Action::Delete && path.is_dir() {
                            continue;
                        }
                        if !set.matches(&path) {
                            continue;
                        }
                        info!(
                            kind = %handler_kind,
                            action = %action,
                            path = %path.display(),
                            "source event"
                        );
                        bus.emit_source(SourceEvent {
                            kind: handler_kind.clone(),
                            action,
                            path,
                        });
                    }
                }
                Err(e) => warn!(kind = %handler_kind, error = %e, "watch error"),
            },
        )?;

        for root in &this.roots {
            watcher.watch(root, RecursiveMode::Recursive)?;
            debug!(kind = %kind, root = %root.display(), "watching");
        }

        this.watcher = Some(watcher);
        this.state = WatcherState::Watching;
        Ok(this)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Directories being watched.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Stop watching. Further filesystem changes are not reported.
    pub fn close(&mut self) {
        if self.watcher.take().is_some() {
            debug!(kind = %self.kind, "watcher closed");
        }
        self.state = WatcherState::Closed;
    }
}

impl Drop for SourceWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

/// Resolve pattern bases to directories, failing on the first missing one.
fn validate_roots(kind: &str, bases: &[String]) -> Result<Vec<PathBuf>> {
    bases
        .iter()
        .map(|base| {
            let root = PathBuf::from(if base.is_empty() { "." } else { base.as_str() });
            if root.is_dir() {
                Ok(root)
            } else {
                Err(WatchError::MissingRoot {
                    kind: kind.to_string(),
                    path: root,
                })
            }
        })
        .collect()
}

/// Map a raw notification to source actions, one per affected path.
///
/// Renames report the old path as deleted and the new one as added; when the
/// backend cannot tell which side a path is on, its existence decides.
/// Access and metadata-only notifications map to nothing.
pub fn classify(event: &notify::Event) -> Vec<(Action, PathBuf)> {
    let all = |action: Action| -> Vec<(Action, PathBuf)> {
        event.paths.iter().map(|p| (action, p.clone())).collect()
    };

    match event.kind {
        EventKind::Create(_) => all(Action::Add),
        EventKind::Remove(_) => all(Action::Delete),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(Action::Delete),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(Action::Add),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut actions = Vec::with_capacity(2);
            if let Some(from) = event.paths.first() {
                actions.push((Action::Delete, from.clone()));
            }
            if let Some(to) = event.paths.get(1) {
                actions.push((Action::Add, to.clone()));
            }
            actions
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                let action = if p.exists() { Action::Add } else { Action::Delete };
                (action, p.clone())
            })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => all(Action::Changed),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Normalise a reported path, stripping the working directory when the
/// patterns are relative and the backend reports absolute paths.
fn relativize(path: &Path, base_dir: Option<&Path>, set: &PatternSet) -> PathBuf {
    let relative_patterns = set.bases().iter().all(|b| !b.starts_with('/'));
    let path = match base_dir {
        Some(base) if relative_patterns && path.is_absolute() => {
            path.strip_prefix(base).unwrap_or(path)
        }
        _ => path,
    };
    PathBuf::from(paths::normalize(&path.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};
    use tempfile::tempdir;

    use super::*;

    fn event(kind: EventKind, paths: &[&str]) -> notify::Event {
        paths
            .iter()
            .fold(notify::Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    #[test]
    fn test_classify_basic_kinds() {
        let add = classify(&event(EventKind::Create(CreateKind::File), &["a.hbs"]));
        assert_eq!(add, [(Action::Add, PathBuf::from("a.hbs"))]);

        let changed = classify(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["a.hbs"],
        ));
        assert_eq!(changed, [(Action::Changed, PathBuf::from("a.hbs"))]);

        let deleted = classify(&event(EventKind::Remove(RemoveKind::File), &["a.hbs"]));
        assert_eq!(deleted, [(Action::Delete, PathBuf::from("a.hbs"))]);
    }

    #[test]
    fn test_classify_renames() {
        let both = classify(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["old.hbs", "new.hbs"],
        ));
        assert_eq!(
            both,
            [
                (Action::Delete, PathBuf::from("old.hbs")),
                (Action::Add, PathBuf::from("new.hbs")),
            ]
        );

        let from = classify(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["old.hbs"],
        ));
        assert_eq!(from, [(Action::Delete, PathBuf::from("old.hbs"))]);
    }

    #[test]
    fn test_classify_ignores_noise() {
        assert!(classify(&event(EventKind::Access(AccessKind::Any), &["a"])).is_empty());
        assert!(
            classify(&event(
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)),
                &["a"]
            ))
            .is_empty()
        );
    }

    #[test]
    fn test_missing_root_fails_fast() {
        let dir = tempdir().expect("create temp dir");
        let missing = paths::normalize(&dir.path().join("nope").to_string_lossy());
        let bus = Arc::new(EventBus::isolated());

        let result = SourceWatcher::new("pages", &[format!("{missing}/**/*.hbs")], bus);
        assert!(matches!(result, Err(WatchError::MissingRoot { kind, .. }) if kind == "pages"));
    }

    #[test]
    fn test_watcher_lifecycle() {
        let dir = tempdir().expect("create temp dir");
        let root = paths::normalize(&dir.path().to_string_lossy());
        let bus = Arc::new(EventBus::isolated());

        let mut watcher =
            SourceWatcher::new("pages", &[format!("{root}/**/*.hbs")], bus).expect("watch");
        assert_eq!(watcher.state(), WatcherState::Watching);
        assert_eq!(watcher.roots(), [PathBuf::from(&root)]);

        watcher.close();
        assert_eq!(watcher.state(), WatcherState::Closed);
    }

    #[test]
    fn test_relativize_strips_working_dir() {
        let set = PatternSet::new(&["site/pages/**/*.hbs".to_string()]).expect("patterns");
        let base = Path::new("/work");

        assert_eq!(
            relativize(Path::new("/work/site/pages/a.hbs"), Some(base), &set),
            PathBuf::from("site/pages/a.hbs")
        );
        assert_eq!(
            relativize(Path::new("site\\pages\\a.hbs"), None, &set),
            PathBuf::from("site/pages/a.hbs")
        );
    }
}
