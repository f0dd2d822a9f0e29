//! Directory watcher feeding additions and removals into the cache.
//!
//! notify::RecommendedWatcher runs callbacks on an internal thread.
//! DirWatcher bridges them to the browsing thread via mpsc::channel.

use anyhow::Result;
use imgview_cache::is_supported_image;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirChange {
    Added(PathBuf),
    Removed(PathBuf),
}

pub struct DirWatcher {
    rx: mpsc::Receiver<DirChange>,
    _watcher: RecommendedWatcher, // Drop stops watching
}

impl DirWatcher {
    /// Watch `dir` (non-recursively) for supported images coming and going.
    pub fn new(dir: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                let Ok(event) = res else { return };
                let added = match event.kind {
                    EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                        true
                    }
                    EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                        false
                    }
                    _ => return,
                };
                for path in event.paths.into_iter().filter(|p| is_supported_image(p)) {
                    let change = if added {
                        DirChange::Added(path)
                    } else {
                        DirChange::Removed(path)
                    };
                    let _ = tx.send(change);
                }
            },
            notify::Config::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            rx,
            _watcher: watcher,
        })
    }

    /// Changes seen since the last call (non-blocking).
    pub fn changes(&self) -> Vec<DirChange> {
        self.rx.try_iter().collect()
    }
}
