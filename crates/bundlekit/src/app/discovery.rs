//! Bundle discovery: candidate directories and the scripts inside them.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};
use ignore::WalkBuilder;

use crate::app::scope::absolute;
use crate::domain::errors::BundleError;
use crate::infra::config::Config;

pub const COMMANDS_DIRECTORY: &str = "commands";
pub const SNIPPETS_DIRECTORY: &str = "snippets";
pub const LIB_DIRECTORY: &str = "lib";

const DEFAULT_DESCRIPTOR: &str = "bundle.toml";
const DEFAULT_EXTENSION: &str = "toml";

/// Role a script plays inside its bundle, derived from where it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptRole {
    Descriptor,
    Command,
    Snippet,
}

/// File naming rules for bundle scripts.
#[derive(Debug, Clone)]
pub struct BundleLayout {
    descriptor: String,
    extension: String,
    matcher: GlobMatcher,
}

impl BundleLayout {
    pub fn new(descriptor: impl Into<String>, extension: &str) -> Result<Self> {
        let extension = extension.trim().trim_start_matches('.').to_owned();
        let matcher = GlobBuilder::new(&format!("*.{extension}"))
            .case_insensitive(true)
            .literal_separator(true)
            .build()
            .context("invalid script extension")?
            .compile_matcher();
        Ok(Self {
            descriptor: descriptor.into(),
            extension,
            matcher,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.layout.descriptor(), &config.layout.extension())
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Whether `path` has the script extension. Only the file name is considered.
    pub fn is_script(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.matcher.is_match(Path::new(name)))
    }

    /// Whether `path` is a bundle's top-level descriptor. A file carrying the descriptor name
    /// inside `commands/` or `snippets/` is an ordinary script of that directory.
    pub fn is_descriptor(&self, path: &Path) -> bool {
        self.role_of(path) == Some(ScriptRole::Descriptor)
    }

    /// Role of `script`, judged by its parent directory before its file name.
    pub fn role_of(&self, script: &Path) -> Option<ScriptRole> {
        let parent = script.parent().and_then(Path::file_name);
        if self.is_script(script) {
            if parent.is_some_and(|name| name == COMMANDS_DIRECTORY) {
                return Some(ScriptRole::Command);
            }
            if parent.is_some_and(|name| name == SNIPPETS_DIRECTORY) {
                return Some(ScriptRole::Snippet);
            }
        }
        let named_descriptor = script
            .file_name()
            .is_some_and(|name| name == self.descriptor.as_str());
        named_descriptor.then_some(ScriptRole::Descriptor)
    }

    /// Bundle directory owning `script`: the parent of a descriptor, otherwise the grandparent.
    pub fn bundle_directory_for(&self, script: &Path) -> Option<PathBuf> {
        let script = absolute(script);
        let parent = script.parent()?;
        match self.role_of(&script) {
            Some(ScriptRole::Descriptor) => Some(parent.to_path_buf()),
            _ => parent.parent().map(Path::to_path_buf),
        }
    }

    /// Scripts of one bundle in load order: descriptor, `commands/`, then `snippets/`.
    pub fn list_bundle_scripts(&self, bundle_dir: &Path) -> Vec<PathBuf> {
        let mut result = Vec::new();
        if !is_valid_bundle_directory(bundle_dir, true) {
            return result;
        }

        let bundle_dir = absolute(bundle_dir);
        let descriptor = bundle_dir.join(&self.descriptor);
        if descriptor.is_file() {
            result.push(descriptor);
        }

        result.extend(self.scripts_in(&bundle_dir.join(COMMANDS_DIRECTORY)));
        result.extend(self.scripts_in(&bundle_dir.join(SNIPPETS_DIRECTORY)));
        result
    }

    fn scripts_in(&self, directory: &Path) -> Vec<PathBuf> {
        if !directory.is_dir() {
            return Vec::new();
        }
        let mut scripts: Vec<PathBuf> = immediate_children(directory)
            .into_iter()
            .filter(|(path, is_dir)| !is_dir && self.is_script(path))
            .map(|(path, _)| path)
            .collect();
        scripts.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        scripts
    }
}

impl Default for BundleLayout {
    fn default() -> Self {
        Self::new(DEFAULT_DESCRIPTOR, DEFAULT_EXTENSION).expect("default script glob is valid")
    }
}

/// Non-hidden immediate subdirectories of `root`, sorted by name. Empty when `root` is unusable.
pub fn list_bundle_directories(root: &Path) -> Vec<PathBuf> {
    if !is_valid_bundle_directory(root, false) {
        return Vec::new();
    }

    let root = absolute(root);
    let mut directories: Vec<PathBuf> = immediate_children(&root)
        .into_iter()
        .filter(|(path, is_dir)| *is_dir && !is_hidden(path))
        .map(|(path, _)| path)
        .collect();
    directories.sort();
    directories
}

/// Check that `dir` exists, is a directory, and is readable; log the reason when it is not.
pub fn is_valid_bundle_directory(dir: &Path, log_errors: bool) -> bool {
    match validate_bundle_directory(dir) {
        Ok(()) => true,
        Err(err) => {
            if log_errors {
                tracing::error!(error = %err, "rejecting bundle directory");
            }
            false
        }
    }
}

pub fn validate_bundle_directory(dir: &Path) -> Result<(), BundleError> {
    let invalid = |reason: &str| BundleError::InvalidDirectory {
        path: absolute(dir),
        reason: reason.to_owned(),
    };

    let metadata = fs::metadata(dir).map_err(|_| invalid("directory does not exist"))?;
    if !metadata.is_dir() {
        return Err(invalid("not a directory"));
    }
    fs::read_dir(dir).map_err(|_| invalid("directory is not readable"))?;
    Ok(())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}

fn immediate_children(directory: &Path) -> Vec<(PathBuf, bool)> {
    let mut builder = WalkBuilder::new(directory);
    builder
        .standard_filters(false)
        .follow_links(true)
        .max_depth(Some(1));

    let mut children = Vec::new();
    for result in builder.build() {
        match result {
            Ok(entry) if entry.depth() == 1 => {
                let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
                children.push((entry.into_path(), is_dir));
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, directory = %directory.display(), "skipping entry");
            }
        }
    }
    children
}
