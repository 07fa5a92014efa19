//! File-system change delivery (spec §4.6, "watch mode"): notifies the
//! repository which directories changed so it can re-check the units whose
//! dependencies live there, grounded on `FilePathWatcher` in
//! `examples/original_source/lib/Support/FilePathWatcher.cpp` (a receiver
//! callback fed batches of changed parent paths) and adapted onto the
//! `notify` crate's cross-platform watcher the way `other_examples/`'s
//! watch-mode tooling wires it up.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::warn;

/// Anything that can report changed directories to a receiver. Implemented
/// by the real `notify`-backed watcher; tests substitute a channel-fed fake.
pub trait UnitEventSource: Send {
    /// Blocks until the next batch of changed parent directories is
    /// available, or returns `None` once the source is exhausted (the
    /// watched directory was removed, or the channel was closed).
    fn next_batch(&mut self) -> Option<Vec<PathBuf>>;
}

/// Watches a set of directories with the platform's native file-change
/// notification mechanism and delivers batches of the parent directories
/// that changed.
pub struct FsEventWatcher {
    _watcher: RecommendedWatcher,
    events: Receiver<Vec<PathBuf>>,
}

impl FsEventWatcher {
    pub fn watch(paths: &[PathBuf]) -> notify::Result<Self> {
        let (tx, rx): (Sender<Vec<PathBuf>>, Receiver<Vec<PathBuf>>) = std::sync::mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let parents = parent_paths(&event);
                if !parents.is_empty() {
                    // The receiving end only goes away once the watcher itself is
                    // dropped, at which point further sends are simply dropped.
                    let _ = tx.send(parents);
                }
            }
            Err(err) => warn!(error = %err, "file watcher error"),
        })?;

        for path in paths {
            watcher.watch(path, RecursiveMode::NonRecursive)?;
        }

        Ok(Self {
            _watcher: watcher,
            events: rx,
        })
    }
}

impl UnitEventSource for FsEventWatcher {
    fn next_batch(&mut self) -> Option<Vec<PathBuf>> {
        self.events.recv().ok()
    }
}

fn parent_paths(event: &Event) -> Vec<PathBuf> {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter_map(|p| parent_of(p))
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn parent_of(path: &Path) -> Option<PathBuf> {
    path.parent().map(|p| p.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSource {
        batches: std::collections::VecDeque<Vec<PathBuf>>,
    }

    impl UnitEventSource for FakeSource {
        fn next_batch(&mut self) -> Option<Vec<PathBuf>> {
            self.batches.pop_front()
        }
    }

    #[test]
    fn fake_source_yields_batches_then_ends() {
        let mut source = FakeSource {
            batches: vec![vec![PathBuf::from("/a")]].into(),
        };
        assert_eq!(source.next_batch(), Some(vec![PathBuf::from("/a")]));
        assert_eq!(source.next_batch(), None);
    }

    #[test]
    fn parent_paths_deduplicates_and_ignores_access_events() {
        let event = Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Any),
            paths: vec![PathBuf::from("/dir/a.c"), PathBuf::from("/dir/b.c")],
            attrs: Default::default(),
        };
        let parents = parent_paths(&event);
        assert_eq!(parents, vec![PathBuf::from("/dir")]);

        let access = Event {
            kind: EventKind::Access(notify::event::AccessKind::Read),
            paths: vec![PathBuf::from("/dir/a.c")],
            attrs: Default::default(),
        };
        assert!(parent_paths(&access).is_empty());
    }
}
