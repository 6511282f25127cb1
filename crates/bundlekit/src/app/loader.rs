//! Orchestrates discovery, load paths, and the script engine to populate the registry.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

use crate::app::discovery::{BundleLayout, ScriptRole, list_bundle_directories};
use crate::app::engine::{NoProjects, ProjectSource, ScriptEngine};
use crate::app::load_path::load_paths_for;
use crate::app::registry::{BundleRegistry, Detached, canonical_key};
use crate::app::scope::absolute;
use crate::domain::errors::BundleError;

/// Lifecycle of one bundle directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

/// Loads bundles from the application, user, and project roots into a [`BundleRegistry`].
pub struct BundleLoader<E> {
    registry: Arc<BundleRegistry>,
    engine: E,
    layout: BundleLayout,
    projects: Box<dyn ProjectSource>,
    states: DashMap<String, LoadState>,
}

impl<E: ScriptEngine> BundleLoader<E> {
    pub fn new(registry: Arc<BundleRegistry>, engine: E, layout: BundleLayout) -> Self {
        Self {
            registry,
            engine,
            layout,
            projects: Box::new(NoProjects),
            states: DashMap::new(),
        }
    }

    pub fn with_projects(mut self, projects: impl ProjectSource + 'static) -> Self {
        self.projects = Box::new(projects);
        self
    }

    pub fn registry(&self) -> &Arc<BundleRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn layout(&self) -> &BundleLayout {
        &self.layout
    }

    pub fn state_of(&self, bundle_dir: &Path) -> LoadState {
        self.states
            .get(&canonical_key(bundle_dir))
            .map(|state| *state)
            .unwrap_or_default()
    }

    fn set_state(&self, bundle_dir: &Path, state: LoadState) {
        self.states.insert(canonical_key(bundle_dir), state);
    }

    /// Rebuild the registry from scratch: application, then user, then every project root.
    pub fn load_bundles(&self) -> Result<(), BundleError> {
        self.registry.reset();
        self.states.clear();

        self.load_application_bundles()?;
        self.load_user_bundles()?;
        self.load_project_bundles()?;

        tracing::info!(
            bundles = self.registry.bundle_count(),
            names = self.registry.all_bundle_names().len(),
            "bundles loaded"
        );
        Ok(())
    }

    pub fn load_application_bundles(&self) -> Result<(), BundleError> {
        let root = self.registry.application_bundles_path().to_path_buf();
        self.load_bundles_in(&root)
    }

    pub fn load_user_bundles(&self) -> Result<(), BundleError> {
        let root = self.registry.user_bundles_path().to_path_buf();
        self.load_bundles_in(&root)
    }

    pub fn load_project_bundles(&self) -> Result<(), BundleError> {
        for root in self.projects.project_roots() {
            self.load_bundles_in(&root)?;
        }
        Ok(())
    }

    fn load_bundles_in(&self, root: &Path) -> Result<(), BundleError> {
        for bundle_dir in list_bundle_directories(root) {
            self.load_bundle(&bundle_dir)?;
        }
        Ok(())
    }

    /// Execute every script of the bundle at `bundle_dir` in discovery order. Returns how many
    /// scripts were found.
    pub fn load_bundle(&self, bundle_dir: &Path) -> Result<usize, BundleError> {
        let _span = tracing::info_span!("load_bundle", dir = %bundle_dir.display()).entered();

        let scripts = self.layout.list_bundle_scripts(bundle_dir);
        if scripts.is_empty() {
            tracing::debug!("no scripts found");
            return Ok(0);
        }

        self.set_state(bundle_dir, LoadState::Loading);
        let load_paths = load_paths_for(&self.engine.builtins_load_path(), bundle_dir);
        for script in &scripts {
            if let Err(err) = self.load_script_with(script, &load_paths) {
                self.set_state(bundle_dir, LoadState::Unloaded);
                return Err(err);
            }
        }
        self.set_state(bundle_dir, LoadState::Loaded);
        Ok(scripts.len())
    }

    /// Load one script, deriving its bundle's load paths.
    pub fn load_script(&self, script: &Path) -> Result<(), BundleError> {
        let bundle_dir = self.owning_directory(script)?;
        let load_paths = load_paths_for(&self.engine.builtins_load_path(), &bundle_dir);
        if self.execute_script(script, &load_paths)? {
            self.set_state(&bundle_dir, LoadState::Loaded);
        }
        Ok(())
    }

    /// Load one script with an explicit load path set. Unreadable scripts are logged and skipped.
    pub fn load_script_with(&self, script: &Path, load_paths: &[String]) -> Result<(), BundleError> {
        self.execute_script(script, load_paths).map(|_| ())
    }

    /// Hand `script` to the engine. `Ok(false)` means it was unreadable and skipped.
    fn execute_script(&self, script: &Path, load_paths: &[String]) -> Result<bool, BundleError> {
        let script = absolute(script);
        if !is_readable_file(&script) {
            let err = BundleError::UnreadableScript { path: script };
            tracing::error!(error = %err, "skipping script");
            return Ok(false);
        }

        tracing::debug!(script = %script.display(), "executing script");
        self.engine.execute(&script, load_paths, &self.registry)?;
        Ok(true)
    }

    /// Unload then load `script`.
    ///
    /// If the load fails, the registry is put back as it was: bundles registered at the directory
    /// by the failed load are dropped, elements it attached are detached, and the unloaded
    /// elements return to their original positions. The error is then returned.
    pub fn reload_script(&self, script: &Path) -> Result<(), BundleError> {
        let bundle_dir = self.owning_directory(script)?;
        let registered = self
            .registry
            .bundles_at_path(&bundle_dir)
            .map_or(0, |bundles| bundles.len());
        let previous = self.state_of(&bundle_dir);

        let snapshot = self.unload_script(script)?;
        match self.load_script(script) {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(script = %script.display(), error = %err, "reload failed, restoring");
                self.registry.truncate_bundles(&bundle_dir, registered);
                self.registry.detach_script(&bundle_dir, script);
                self.registry.reattach(snapshot);
                self.set_state(&bundle_dir, previous);
                Err(err)
            }
        }
    }

    /// Detach the elements contributed by `script`.
    ///
    /// Unloading a descriptor detaches every element of the bundles at its directory; unloading a
    /// `commands/` or `snippets/` script detaches only the elements that script defined. Bundles
    /// remain registered either way.
    pub fn unload_script(&self, script: &Path) -> Result<Vec<Detached>, BundleError> {
        let script = absolute(script);
        let role = self
            .layout
            .role_of(&script)
            .ok_or_else(|| BundleError::UnsupportedUnloadTarget {
                path: script.clone(),
            })?;
        let bundle_dir = self.owning_directory(&script)?;

        if self.registry.bundles_at_path(&bundle_dir).is_none() {
            tracing::debug!(script = %script.display(), "nothing registered for script");
            return Ok(Vec::new());
        }

        let detached = match role {
            ScriptRole::Descriptor => {
                self.set_state(&bundle_dir, LoadState::Unloading);
                let detached = self.registry.detach_bundle(&bundle_dir);
                self.set_state(&bundle_dir, LoadState::Unloaded);
                detached
            }
            ScriptRole::Command | ScriptRole::Snippet => {
                self.registry.detach_script(&bundle_dir, &script)
            }
        };

        tracing::debug!(
            script = %script.display(),
            elements = detached.len(),
            "unloaded script"
        );
        Ok(detached)
    }

    fn owning_directory(&self, script: &Path) -> Result<PathBuf, BundleError> {
        self.layout
            .bundle_directory_for(script)
            .ok_or_else(|| BundleError::InvalidDirectory {
                path: absolute(script),
                reason: "script has no owning bundle directory".to_owned(),
            })
    }
}

fn is_readable_file(path: &Path) -> bool {
    path.is_file() && File::open(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Bundle, Element};
    use anyhow::Result;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::fs;

    /// Registers a bundle per descriptor and one command per command script.
    #[derive(Default)]
    struct FakeEngine {
        executed: Mutex<Vec<(PathBuf, Vec<String>)>>,
        failing: Mutex<HashSet<PathBuf>>,
        /// Files deleted while the descriptor runs, after discovery has listed them.
        doomed: Mutex<Vec<PathBuf>>,
    }

    impl ScriptEngine for FakeEngine {
        fn builtins_load_path(&self) -> String {
            "/engine/lib".to_owned()
        }

        fn execute(
            &self,
            script: &Path,
            load_paths: &[String],
            registry: &BundleRegistry,
        ) -> Result<(), BundleError> {
            self.executed
                .lock()
                .push((script.to_path_buf(), load_paths.to_vec()));
            let layout = BundleLayout::default();
            let dir = layout.bundle_directory_for(script).expect("bundle dir");
            let stem = script
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_owned();

            if layout.is_descriptor(script) {
                let name = dir.file_name().unwrap().to_string_lossy().to_uppercase();
                let scope = registry.resolve_scope(&dir);
                registry.add_bundle(Bundle::new(&dir, name, scope));
                for path in self.doomed.lock().drain(..) {
                    fs::remove_file(path).expect("remove doomed script");
                }
            } else {
                registry.add_element(&dir, Element::command(stem, "true").defined_in(script));
            }

            if self.failing.lock().contains(script) {
                return Err(BundleError::Engine(format!("{} failed", script.display())));
            }
            Ok(())
        }
    }

    fn write_script(path: &Path) -> Result<()> {
        fs::create_dir_all(path.parent().unwrap())?;
        fs::write(path, b"# script")?;
        Ok(())
    }

    fn loader(root: &Path) -> BundleLoader<FakeEngine> {
        let registry = Arc::new(BundleRegistry::with_roots(root.join("app"), root.join("user")));
        BundleLoader::new(registry, FakeEngine::default(), BundleLayout::default())
    }

    #[test]
    fn load_bundle_passes_one_load_path_set_in_discovery_order() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let bundle = temp.path().join("app/ruby");
        write_script(&bundle.join("bundle.toml"))?;
        write_script(&bundle.join("commands/b.toml"))?;
        write_script(&bundle.join("commands/a.toml"))?;

        let loader = loader(temp.path());
        assert_eq!(loader.load_bundle(&bundle)?, 3);

        let executed = loader.engine().executed.lock();
        let files: Vec<_> = executed
            .iter()
            .map(|(p, _)| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files, ["bundle.toml", "a.toml", "b.toml"]);
        let lib = bundle.join("lib").display().to_string();
        assert!(executed
            .iter()
            .all(|(_, paths)| paths == &["/engine/lib".to_owned(), lib.clone()]));
        assert_eq!(loader.state_of(&bundle), LoadState::Loaded);
        Ok(())
    }

    fn command_names(loader: &BundleLoader<FakeEngine>, name: &str) -> Vec<String> {
        loader
            .registry()
            .commands_of(name)
            .into_iter()
            .map(|c| c.name)
            .collect()
    }

    #[test]
    fn unreadable_script_is_skipped_without_registering() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let loader = loader(temp.path());

        loader.load_script(&temp.path().join("app/ghost/commands/missing.toml"))?;

        assert!(loader.registry().is_empty());
        assert!(loader.engine().executed.lock().is_empty());
        assert_eq!(loader.state_of(&temp.path().join("app/ghost")), LoadState::Unloaded);
        Ok(())
    }

    #[test]
    fn script_vanishing_after_discovery_does_not_stop_its_siblings() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let bundle = temp.path().join("app/ruby");
        write_script(&bundle.join("bundle.toml"))?;
        for name in ["a", "b", "c"] {
            write_script(&bundle.join(format!("commands/{name}.toml")))?;
        }
        let loader = loader(temp.path());
        loader.engine().doomed.lock().push(bundle.join("commands/b.toml"));

        assert_eq!(loader.load_bundle(&bundle)?, 4);

        assert_eq!(command_names(&loader, "RUBY"), ["a", "c"]);
        assert_eq!(loader.engine().executed.lock().len(), 3);
        assert_eq!(loader.state_of(&bundle), LoadState::Loaded);
        Ok(())
    }

    #[test]
    fn descriptor_named_command_script_joins_its_bundle() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let bundle = temp.path().join("app/ruby");
        let nested = bundle.join("commands/bundle.toml");
        write_script(&bundle.join("bundle.toml"))?;
        write_script(&nested)?;
        write_script(&bundle.join("commands/run.toml"))?;
        let loader = loader(temp.path());
        loader.load_bundle(&bundle)?;

        assert_eq!(loader.registry().all_bundle_names(), ["RUBY"]);
        assert_eq!(command_names(&loader, "RUBY"), ["bundle", "run"]);

        let detached = loader.unload_script(&nested)?;
        assert_eq!(detached.len(), 1);
        assert_eq!(command_names(&loader, "RUBY"), ["run"]);
        assert_eq!(loader.registry().bundle_count(), 1);
        Ok(())
    }

    #[test]
    fn unloading_descriptor_detaches_everything_but_keeps_bundle() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let bundle = temp.path().join("app/ruby");
        write_script(&bundle.join("bundle.toml"))?;
        write_script(&bundle.join("commands/run.toml"))?;
        let loader = loader(temp.path());
        loader.load_bundle(&bundle)?;
        assert_eq!(loader.registry().commands_of("RUBY").len(), 1);

        let detached = loader.unload_script(&bundle.join("bundle.toml"))?;

        assert_eq!(detached.len(), 1);
        assert!(loader.registry().commands_of("RUBY").is_empty());
        assert!(loader.registry().bundle_at_path(&bundle).is_some());
        assert_eq!(loader.state_of(&bundle), LoadState::Unloaded);
        Ok(())
    }

    #[test]
    fn unloading_unknown_target_is_an_error() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let loader = loader(temp.path());
        let err = loader
            .unload_script(&temp.path().join("app/ruby/lib/helper.toml"))
            .unwrap_err();
        assert!(matches!(err, BundleError::UnsupportedUnloadTarget { .. }));
        Ok(())
    }

    #[test]
    fn failed_reload_restores_previous_elements() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let bundle = temp.path().join("app/ruby");
        let script = bundle.join("commands/run.toml");
        write_script(&bundle.join("bundle.toml"))?;
        write_script(&script)?;
        let loader = loader(temp.path());
        loader.load_bundle(&bundle)?;

        loader.engine().failing.lock().insert(absolute(&script));
        let result = loader.reload_script(&script);

        assert!(matches!(result, Err(BundleError::Engine(_))));
        let commands = loader.registry().commands_of("RUBY");
        assert_eq!(commands.len(), 1);
        assert!(commands[0].is_live());
        Ok(())
    }

    #[test]
    fn failed_reload_keeps_element_order() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let bundle = temp.path().join("app/ruby");
        let first = bundle.join("commands/a.toml");
        write_script(&bundle.join("bundle.toml"))?;
        write_script(&first)?;
        write_script(&bundle.join("commands/b.toml"))?;
        let loader = loader(temp.path());
        loader.load_bundle(&bundle)?;
        assert_eq!(command_names(&loader, "RUBY"), ["a", "b"]);

        loader.engine().failing.lock().insert(absolute(&first));
        assert!(loader.reload_script(&first).is_err());

        assert_eq!(command_names(&loader, "RUBY"), ["a", "b"]);
        Ok(())
    }

    #[test]
    fn failed_descriptor_reload_discards_the_new_bundle() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let bundle = temp.path().join("app/ruby");
        let descriptor = bundle.join("bundle.toml");
        write_script(&descriptor)?;
        write_script(&bundle.join("commands/run.toml"))?;
        let loader = loader(temp.path());
        loader.load_bundle(&bundle)?;
        let original = loader.registry().bundle_at_path(&bundle).expect("bundle");

        loader.engine().failing.lock().insert(absolute(&descriptor));
        assert!(loader.reload_script(&descriptor).is_err());

        let registry = loader.registry();
        assert_eq!(registry.bundles_at_path(&bundle).map(|b| b.len()), Some(1));
        assert_eq!(registry.entry_by_name("RUBY").map(|e| e.len()), Some(1));
        let current = registry.bundle_at_path(&bundle).expect("bundle");
        assert!(Arc::ptr_eq(&current, &original));
        assert_eq!(command_names(&loader, "RUBY"), ["run"]);
        assert_eq!(loader.state_of(&bundle), LoadState::Loaded);
        Ok(())
    }

    #[test]
    fn engine_failure_propagates_out_of_load_bundle() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let bundle = temp.path().join("app/ruby");
        let script = bundle.join("bundle.toml");
        write_script(&script)?;
        write_script(&bundle.join("commands/run.toml"))?;
        let loader = loader(temp.path());
        loader.engine().failing.lock().insert(absolute(&script));

        assert!(loader.load_bundle(&bundle).is_err());
        assert_eq!(loader.engine().executed.lock().len(), 1);
        assert_eq!(loader.state_of(&bundle), LoadState::Unloaded);
        Ok(())
    }
}
