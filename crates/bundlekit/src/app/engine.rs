//! Seams to the external collaborators the loader drives.

use std::path::{Path, PathBuf};

use crate::app::registry::BundleRegistry;
use crate::domain::errors::BundleError;

/// Executes bundle scripts. Executed scripts register their bundle and elements through
/// `registry` as a side effect.
pub trait ScriptEngine: Send + Sync {
    /// Search path of the engine's own library, first entry of every load path set.
    fn builtins_load_path(&self) -> String;

    fn execute(
        &self,
        script: &Path,
        load_paths: &[String],
        registry: &BundleRegistry,
    ) -> Result<(), BundleError>;
}

/// Supplies the project roots scanned during the project phase of a full load.
pub trait ProjectSource: Send + Sync {
    fn project_roots(&self) -> Vec<PathBuf>;
}

impl ProjectSource for Vec<PathBuf> {
    fn project_roots(&self) -> Vec<PathBuf> {
        self.clone()
    }
}

/// No projects open.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProjects;

impl ProjectSource for NoProjects {
    fn project_roots(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}
