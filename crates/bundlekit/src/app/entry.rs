//! Name-keyed aggregation of bundles across scopes.

use std::path::Path;
use std::sync::Arc;

use crate::domain::model::{BundleRef, BundleScope, Element, ElementKind};

/// All bundles sharing one display name, in load order.
///
/// Same-named bundles from different scopes augment each other: the aggregated element lists
/// concatenate every member bundle, so an application bundle's commands come before those of a
/// project bundle loaded later.
#[derive(Debug, Clone)]
pub struct BundleEntry {
    name: String,
    bundles: Vec<BundleRef>,
}

impl BundleEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bundles: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_bundle(&mut self, bundle: BundleRef) {
        self.bundles.push(bundle);
    }

    /// Drop `bundle` from the entry. Returns whether it was a member.
    pub fn remove_bundle(&mut self, bundle: &BundleRef) -> bool {
        let before = self.bundles.len();
        self.bundles.retain(|member| !Arc::ptr_eq(member, bundle));
        self.bundles.len() != before
    }

    pub fn bundles(&self) -> &[BundleRef] {
        &self.bundles
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn elements(&self, kind: ElementKind) -> Vec<Element> {
        self.bundles
            .iter()
            .flat_map(|bundle| bundle.read().elements(kind).to_vec())
            .collect()
    }

    pub fn commands(&self) -> Vec<Element> {
        self.elements(ElementKind::Command)
    }

    pub fn menus(&self) -> Vec<Element> {
        self.elements(ElementKind::Menu)
    }

    pub fn snippets(&self) -> Vec<Element> {
        self.elements(ElementKind::Snippet)
    }

    /// Scopes contributing to this entry, in load order, without repeats.
    pub fn scopes(&self) -> Vec<BundleScope> {
        let mut scopes = Vec::new();
        for bundle in &self.bundles {
            let scope = bundle.read().scope();
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }
        scopes
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.bundles.iter().any(|bundle| bundle.read().path() == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Bundle, BundleId};
    use parking_lot::RwLock;

    fn bundle(path: &str, scope: BundleScope, commands: &[&str]) -> BundleRef {
        let mut bundle = Bundle::new(path, "Ruby", scope);
        bundle.assign_id(BundleId(path.len() as u64));
        for name in commands {
            bundle.attach(Element::command(*name, "true"));
        }
        Arc::new(RwLock::new(bundle))
    }

    #[test]
    fn aggregates_in_insertion_order() {
        let mut entry = BundleEntry::new("Ruby");
        entry.add_bundle(bundle("/app/ruby", BundleScope::Application, &["run", "test"]));
        entry.add_bundle(bundle("/work/ruby", BundleScope::Project, &["deploy"]));

        let names: Vec<_> = entry.commands().into_iter().map(|c| c.name).collect();
        assert_eq!(names, ["run", "test", "deploy"]);
        assert!(entry.menus().is_empty());
        assert_eq!(
            entry.scopes(),
            [BundleScope::Application, BundleScope::Project]
        );
        assert!(entry.contains_path(Path::new("/work/ruby")));
    }

    #[test]
    fn removes_members_by_identity() {
        let mut entry = BundleEntry::new("Ruby");
        let app = bundle("/app/ruby", BundleScope::Application, &["run"]);
        let twin = bundle("/app/ruby", BundleScope::Application, &["run"]);
        entry.add_bundle(Arc::clone(&app));
        entry.add_bundle(Arc::clone(&twin));

        assert!(entry.remove_bundle(&twin));
        assert!(!entry.remove_bundle(&twin));
        assert_eq!(entry.len(), 1);
        assert!(Arc::ptr_eq(&entry.bundles()[0], &app));
    }
}
