//! Classifies filesystem paths into bundle scopes.

use std::path::{Path, PathBuf};

use crate::domain::model::BundleScope;

/// Resolves a path to [`BundleScope`] by prefix match against the configured roots.
///
/// The comparison is a plain string prefix on the absolute form of each path: the application
/// root is checked first, then the user root, and anything else is a project bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeResolver {
    application_root: PathBuf,
    user_root: PathBuf,
}

impl ScopeResolver {
    pub fn new(application_root: impl Into<PathBuf>, user_root: impl Into<PathBuf>) -> Self {
        Self {
            application_root: absolute(&application_root.into()),
            user_root: absolute(&user_root.into()),
        }
    }

    pub fn application_root(&self) -> &Path {
        &self.application_root
    }

    pub fn user_root(&self) -> &Path {
        &self.user_root
    }

    pub fn resolve(&self, path: &Path) -> BundleScope {
        let path = absolute(path);
        let path = path.to_string_lossy();

        if has_prefix(&path, &self.application_root) {
            BundleScope::Application
        } else if has_prefix(&path, &self.user_root) {
            BundleScope::User
        } else {
            BundleScope::Project
        }
    }
}

fn has_prefix(path: &str, root: &Path) -> bool {
    let root = root.to_string_lossy();
    !root.is_empty() && path.starts_with(root.as_ref())
}

/// Absolute form of `path` without resolving symlinks.
pub(crate) fn absolute(path: &Path) -> PathBuf {
    if path.as_os_str().is_empty() {
        return PathBuf::new();
    }
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ScopeResolver {
        ScopeResolver::new("/opt/app/bundles", "/home/dev/Bundles")
    }

    #[test]
    fn application_root_wins() {
        let resolver = resolver();
        assert_eq!(
            resolver.resolve(Path::new("/opt/app/bundles/ruby/bundle.toml")),
            BundleScope::Application
        );
        assert_eq!(
            resolver.resolve(Path::new("/home/dev/Bundles/ruby")),
            BundleScope::User
        );
        assert_eq!(
            resolver.resolve(Path::new("/work/site/ruby")),
            BundleScope::Project
        );
    }

    #[test]
    fn nested_user_root_inside_application_root_still_resolves_application_first() {
        let resolver = ScopeResolver::new("/data", "/data/user");
        assert_eq!(
            resolver.resolve(Path::new("/data/user/x")),
            BundleScope::Application
        );
    }

    #[test]
    fn comparison_is_a_plain_string_prefix() {
        let resolver = resolver();
        assert_eq!(
            resolver.resolve(Path::new("/opt/app/bundles-extra/x")),
            BundleScope::Application
        );
    }

    #[test]
    fn empty_roots_never_match() {
        let resolver = ScopeResolver::new("", "");
        assert_eq!(resolver.resolve(Path::new("/any")), BundleScope::Project);
    }
}
