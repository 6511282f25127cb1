//! Reload bundle scripts when they change on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, channel};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::app::engine::ScriptEngine;
use crate::app::loader::BundleLoader;

/// What happened to a script between two polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptChange {
    Created,
    Modified,
    Removed,
}

impl ScriptChange {
    /// Collapse two consecutive changes to the same path into one.
    fn then(self, next: ScriptChange) -> ScriptChange {
        match (self, next) {
            (_, ScriptChange::Removed) => ScriptChange::Removed,
            (ScriptChange::Created, _) => ScriptChange::Created,
            (ScriptChange::Removed, ScriptChange::Created) => ScriptChange::Modified,
            (_, next) => next,
        }
    }
}

/// Map a raw filesystem event onto script changes.
pub fn classify(event: &Event) -> Vec<(PathBuf, ScriptChange)> {
    let change = match event.kind {
        EventKind::Create(_) => Some(ScriptChange::Created),
        EventKind::Remove(_) => Some(ScriptChange::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ScriptChange::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ScriptChange::Created),
        EventKind::Modify(ModifyKind::Name(_)) => None,
        EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
        EventKind::Modify(_) => Some(ScriptChange::Modified),
        _ => return Vec::new(),
    };

    event
        .paths
        .iter()
        .map(|path| {
            let change = change.unwrap_or(if path.exists() {
                ScriptChange::Created
            } else {
                ScriptChange::Removed
            });
            (path.clone(), change)
        })
        .collect()
}

/// Watches bundle roots and feeds script changes into a [`BundleLoader`].
pub struct BundleWatcher<E> {
    loader: Arc<BundleLoader<E>>,
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
    debounce: Duration,
}

impl<E: ScriptEngine> BundleWatcher<E> {
    /// Start watching every existing directory in `roots` recursively.
    pub fn start(loader: Arc<BundleLoader<E>>, roots: &[PathBuf], debounce: Duration) -> Result<Self> {
        let (tx, events) = channel();
        let mut watcher = notify::recommended_watcher(tx).context("failed to create watcher")?;
        for root in roots.iter().filter(|root| root.is_dir()) {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .with_context(|| format!("failed to watch {}", root.display()))?;
            tracing::info!(root = %root.display(), "watching bundles");
        }

        Ok(Self {
            loader,
            _watcher: watcher,
            events,
            debounce,
        })
    }

    /// Wait up to `timeout` for changes, then apply everything that arrived within the debounce
    /// window. Returns the number of scripts touched.
    pub fn poll(&self, timeout: Duration) -> Result<usize> {
        let first = match self.events.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => return Ok(0),
            Err(RecvTimeoutError::Disconnected) => anyhow::bail!("watcher channel closed"),
        };

        let mut pending = BTreeMap::new();
        self.collect(first, &mut pending);
        let deadline = Instant::now() + self.debounce;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match self.events.recv_timeout(remaining) {
                Ok(event) => self.collect(event, &mut pending),
                Err(_) => break,
            }
        }

        let mut applied = 0;
        for (path, change) in pending {
            if apply_change(&self.loader, &path, change) {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Poll until `should_stop` returns true.
    pub fn run<F>(&self, should_stop: F) -> Result<()>
    where
        F: Fn() -> bool,
    {
        while !should_stop() {
            self.poll(Duration::from_millis(500))?;
        }
        Ok(())
    }

    fn collect(&self, event: notify::Result<Event>, pending: &mut BTreeMap<PathBuf, ScriptChange>) {
        match event {
            Ok(event) => {
                for (path, change) in classify(&event) {
                    pending
                        .entry(path)
                        .and_modify(|current| *current = current.then(change))
                        .or_insert(change);
                }
            }
            Err(err) => tracing::warn!(error = %err, "watch error"),
        }
    }
}

/// Apply one change through the loader. Non-script paths are ignored; failures are logged.
pub fn apply_change<E: ScriptEngine>(
    loader: &BundleLoader<E>,
    path: &Path,
    change: ScriptChange,
) -> bool {
    if loader.layout().role_of(path).is_none() {
        return false;
    }

    tracing::info!(script = %path.display(), ?change, "script changed");
    let result = match change {
        ScriptChange::Created => loader.load_script(path),
        ScriptChange::Modified => loader.reload_script(path),
        ScriptChange::Removed => loader.unload_script(path).map(|_| ()),
    };
    if let Err(err) = result {
        tracing::warn!(script = %path.display(), error = %err, "failed to apply script change");
    }
    true
}
