//! Bundle registry: the by-path and by-name indices plus element lookup.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::app::entry::BundleEntry;
use crate::app::events::{ChangeNotifier, ElementChangeListener, ElementEvent};
use crate::app::scope::{ScopeResolver, absolute};
use crate::domain::model::{
    Bundle, BundleId, BundleRef, BundleScope, Element, ElementFilter, ElementKind,
};

#[derive(Default)]
struct Indices {
    by_path: HashMap<String, Vec<BundleRef>>,
    by_name: HashMap<String, BundleEntry>,
}

/// An element taken out of a bundle, remembered with the bundle it came from.
#[derive(Debug, Clone)]
pub struct Detached {
    bundle: BundleRef,
    index: usize,
    element: Element,
}

impl Detached {
    pub fn bundle(&self) -> &BundleRef {
        &self.bundle
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    /// Position the element held in its bundle's list of that kind.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Registry of loaded bundles.
///
/// Index mutation happens under a single lock. Listener dispatch always runs after the lock is
/// released, inside the call that caused the change.
pub struct BundleRegistry {
    resolver: ScopeResolver,
    indices: RwLock<Indices>,
    notifier: ChangeNotifier,
    next_id: AtomicU64,
}

impl BundleRegistry {
    pub fn new(resolver: ScopeResolver) -> Self {
        Self {
            resolver,
            indices: RwLock::new(Indices::default()),
            notifier: ChangeNotifier::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_roots(application_root: impl Into<PathBuf>, user_root: impl Into<PathBuf>) -> Self {
        Self::new(ScopeResolver::new(application_root, user_root))
    }

    pub fn resolver(&self) -> &ScopeResolver {
        &self.resolver
    }

    pub fn application_bundles_path(&self) -> &Path {
        self.resolver.application_root()
    }

    pub fn user_bundles_path(&self) -> &Path {
        self.resolver.user_root()
    }

    pub fn resolve_scope(&self, path: &Path) -> BundleScope {
        self.resolver.resolve(path)
    }

    pub fn add_listener(&self, listener: Arc<dyn ElementChangeListener>) {
        self.notifier.add_listener(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ElementChangeListener>) -> bool {
        self.notifier.remove_listener(listener)
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Register `bundle` under its path and display name. Repeated registrations accumulate.
    pub fn add_bundle(&self, mut bundle: Bundle) -> BundleRef {
        let id = BundleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        bundle.assign_id(id);

        let key = canonical_key(bundle.path());
        let name = bundle.display_name().to_owned();
        let added: Vec<Element> = ElementKind::all()
            .iter()
            .flat_map(|kind| bundle.elements(*kind).to_vec())
            .collect();

        tracing::debug!(bundle = %name, %id, path = %key, "registering bundle");
        let handle: BundleRef = Arc::new(RwLock::new(bundle));
        {
            let mut indices = self.indices.write();
            indices
                .by_path
                .entry(key)
                .or_default()
                .push(Arc::clone(&handle));
            indices
                .by_name
                .entry(name.clone())
                .or_insert_with(|| BundleEntry::new(name))
                .add_bundle(Arc::clone(&handle));
        }

        for element in &added {
            self.notifier.notify_added(element);
        }
        handle
    }

    /// Most recently registered bundle at `path`.
    pub fn bundle_at_path(&self, path: &Path) -> Option<BundleRef> {
        let indices = self.indices.read();
        indices
            .by_path
            .get(&canonical_key(path))
            .and_then(|bundles| bundles.last().cloned())
    }

    /// Every bundle registered at `path`; `None` only when nothing was ever registered there.
    pub fn bundles_at_path(&self, path: &Path) -> Option<Vec<BundleRef>> {
        self.indices.read().by_path.get(&canonical_key(path)).cloned()
    }

    pub fn entry_by_name(&self, name: &str) -> Option<BundleEntry> {
        self.indices.read().by_name.get(name).cloned()
    }

    pub fn elements_of(&self, kind: ElementKind, name: &str) -> Vec<Element> {
        self.entry_by_name(name)
            .map(|entry| entry.elements(kind))
            .unwrap_or_default()
    }

    pub fn commands_of(&self, name: &str) -> Vec<Element> {
        self.elements_of(ElementKind::Command, name)
    }

    pub fn menus_of(&self, name: &str) -> Vec<Element> {
        self.elements_of(ElementKind::Menu, name)
    }

    pub fn snippets_of(&self, name: &str) -> Vec<Element> {
        self.elements_of(ElementKind::Snippet, name)
    }

    pub fn all_bundle_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indices.read().by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every command of every bundle name, in name order then entry order.
    pub fn all_commands(&self) -> Vec<Element> {
        self.all_bundle_names()
            .iter()
            .flat_map(|name| self.commands_of(name))
            .collect()
    }

    pub fn bundle_count(&self) -> usize {
        self.indices.read().by_path.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.read().by_path.is_empty()
    }

    /// Elements of `kind` whose selector matches `scopes` and that pass `filter`.
    ///
    /// Names are visited in sorted order and each name's elements in entry order, for every kind.
    pub fn matching_elements<S: AsRef<str>>(
        &self,
        kind: ElementKind,
        scopes: &[S],
        filter: Option<&dyn ElementFilter>,
    ) -> Vec<Element> {
        if scopes.is_empty() {
            return Vec::new();
        }
        self.all_bundle_names()
            .iter()
            .flat_map(|name| self.elements_of(kind, name))
            .filter(|element| element.matches(scopes))
            .filter(|element| filter.is_none_or(|f| f.include(element)))
            .collect()
    }

    pub fn commands_from_scope(&self, scope: &str, filter: Option<&dyn ElementFilter>) -> Vec<Element> {
        self.matching_elements(ElementKind::Command, &[scope], filter)
    }

    pub fn menus_from_scope(&self, scope: &str, filter: Option<&dyn ElementFilter>) -> Vec<Element> {
        self.matching_elements(ElementKind::Menu, &[scope], filter)
    }

    pub fn snippets_from_scope(&self, scope: &str, filter: Option<&dyn ElementFilter>) -> Vec<Element> {
        self.matching_elements(ElementKind::Snippet, &[scope], filter)
    }

    /// Attach `element` to the current bundle at `bundle_dir`, registering an implicit bundle
    /// named after the directory when none exists yet.
    pub fn add_element(&self, bundle_dir: &Path, mut element: Element) -> Element {
        let bundle = match self.bundle_at_path(bundle_dir) {
            Some(bundle) => bundle,
            None => {
                let dir = absolute(bundle_dir);
                let name = dir
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| dir.display().to_string());
                tracing::debug!(bundle = %name, "creating implicit bundle for element");
                let scope = self.resolve_scope(&dir);
                self.add_bundle(Bundle::new(dir, name, scope))
            }
        };

        element.path = canonical_path(&element.path);
        let stored = bundle.write().attach(element);
        self.notifier.notify_added(&stored);
        stored
    }

    /// Mutate the named element of the current bundle at `bundle_dir` and announce the change.
    pub fn modify_element<F>(
        &self,
        bundle_dir: &Path,
        kind: ElementKind,
        name: &str,
        update: F,
    ) -> Option<Element>
    where
        F: FnOnce(&mut Element),
    {
        let bundle = self.bundle_at_path(bundle_dir)?;
        let modified = {
            let mut guard = bundle.write();
            let element = guard.element_mut(kind, name)?;
            update(element);
            element.clone()
        };
        self.notifier.notify_modified(&modified);
        Some(modified)
    }

    /// Detach every element of every bundle at `bundle_dir`. Bundles stay indexed.
    pub fn detach_bundle(&self, bundle_dir: &Path) -> Vec<Detached> {
        self.detach_matching(bundle_dir, |_| true)
    }

    /// Detach only the elements defined by `script` from the bundles at `bundle_dir`.
    pub fn detach_script(&self, bundle_dir: &Path, script: &Path) -> Vec<Detached> {
        let script = canonical_path(script);
        self.detach_matching(bundle_dir, |element| canonical_path(&element.path) == script)
    }

    fn detach_matching<P>(&self, bundle_dir: &Path, predicate: P) -> Vec<Detached>
    where
        P: Fn(&Element) -> bool,
    {
        let bundles = self.bundles_at_path(bundle_dir).unwrap_or_default();
        let mut detached = Vec::new();
        for bundle in bundles {
            let removed = bundle.write().detach_indexed(&predicate);
            detached.extend(removed.into_iter().map(|(index, element)| Detached {
                bundle: Arc::clone(&bundle),
                index,
                element,
            }));
        }

        for item in &detached {
            self.notifier.notify_removed(&item.element);
        }
        detached
    }

    /// Put previously detached elements back into the bundles they came from, each at the
    /// position it was detached from.
    pub fn reattach(&self, mut detached: Vec<Detached>) {
        detached.sort_by_key(|item| item.index);
        for Detached {
            bundle,
            index,
            element,
        } in detached
        {
            let stored = bundle.write().restore(index, element);
            self.notifier.notify_added(&stored);
        }
    }

    /// Unregister every bundle at `bundle_dir` beyond the first `keep`, announcing the removal of
    /// their live elements. Name entries and path lists left empty are dropped too. Returns how
    /// many bundles were unregistered.
    pub fn truncate_bundles(&self, bundle_dir: &Path, keep: usize) -> usize {
        let key = canonical_key(bundle_dir);
        let dropped = {
            let mut guard = self.indices.write();
            let indices = &mut *guard;
            let Some(list) = indices.by_path.get_mut(&key) else {
                return 0;
            };
            if list.len() <= keep {
                return 0;
            }
            let dropped = list.split_off(keep);
            if list.is_empty() {
                indices.by_path.remove(&key);
            }
            for bundle in &dropped {
                let name = bundle.read().display_name().to_owned();
                if let Some(entry) = indices.by_name.get_mut(&name) {
                    entry.remove_bundle(bundle);
                    if entry.is_empty() {
                        indices.by_name.remove(&name);
                    }
                }
            }
            dropped
        };

        let mut removed = Vec::new();
        for bundle in &dropped {
            removed.extend(bundle.write().detach_all());
        }
        tracing::debug!(
            path = %key,
            bundles = dropped.len(),
            elements = removed.len(),
            "discarded bundles"
        );
        for element in &removed {
            self.notifier.notify_removed(element);
        }
        dropped.len()
    }

    /// Drop every bundle from both indices, announcing the removal of each live element.
    pub fn reset(&self) {
        let dropped = {
            let mut indices = self.indices.write();
            indices.by_name.clear();
            std::mem::take(&mut indices.by_path)
        };

        let mut removed = Vec::new();
        for bundle in dropped.into_values().flatten() {
            removed.extend(bundle.write().detach_all());
        }

        tracing::debug!(elements = removed.len(), "registry reset");
        for element in &removed {
            self.notifier.notify_removed(element);
        }
    }
}

/// Index key for a bundle path. See [`canonical_path`].
pub fn canonical_key(path: &Path) -> String {
    canonical_path(path).display().to_string()
}

/// Canonical form of `path`. When `path` no longer exists, its deepest existing ancestor is
/// canonicalized and the missing components are appended, so a deleted directory under a
/// symlinked root keeps the key it was registered with.
pub fn canonical_path(path: &Path) -> PathBuf {
    let path = absolute(path);
    let mut missing = Vec::new();
    let mut current = path.as_path();
    loop {
        if let Ok(resolved) = fs::canonicalize(current) {
            return missing
                .iter()
                .rev()
                .fold(resolved, |resolved, component| resolved.join(component));
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                current = parent;
            }
            _ => break,
        }
    }
    path
}
