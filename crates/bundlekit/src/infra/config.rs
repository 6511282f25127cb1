//! Configuration management utilities.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use dirs_next::{config_dir, document_dir, home_dir};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

static DEFAULT_CONFIG: Lazy<&'static str> =
    Lazy::new(|| include_str!("../../assets/default-config.toml"));
static DEFAULT_WORKSPACE_CONFIG_PATH: &str = ".bundlekit/config.toml";
const APPLICATION_BUNDLES_DIR: &str = "bundles";
const USER_BUNDLES_DIR: &str = "Bundles";

/// Layered configuration loaded from defaults, user, workspace, and env.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default)]
    pub engine: Engine,
    #[serde(default)]
    pub projects: Projects,
    #[serde(default)]
    pub watch: Watch,
}

/// Bundle roots. Unset roots fall back to host defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Paths {
    #[serde(default)]
    pub application_bundles: Option<PathBuf>,
    #[serde(default)]
    pub user_bundles: Option<PathBuf>,
}

impl Paths {
    /// Configured application root, or `bundles/` next to the running executable.
    pub fn application_bundles(&self) -> PathBuf {
        self.application_bundles.clone().unwrap_or_else(|| {
            env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf))
                .unwrap_or_default()
                .join(APPLICATION_BUNDLES_DIR)
        })
    }

    /// Configured user root, or `Bundles/` in the documents (else home) directory.
    pub fn user_bundles(&self) -> PathBuf {
        self.user_bundles.clone().unwrap_or_else(|| {
            document_dir()
                .or_else(home_dir)
                .unwrap_or_default()
                .join(USER_BUNDLES_DIR)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Layout {
    #[serde(default)]
    descriptor: Option<String>,
    #[serde(default)]
    extension: Option<String>,
}

impl Layout {
    fn default_descriptor() -> &'static str {
        "bundle.toml"
    }

    fn default_extension() -> &'static str {
        "toml"
    }

    pub fn descriptor(&self) -> String {
        self.descriptor
            .clone()
            .unwrap_or_else(|| Self::default_descriptor().to_owned())
    }

    pub fn extension(&self) -> String {
        self.extension
            .clone()
            .unwrap_or_else(|| Self::default_extension().to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Engine {
    #[serde(default)]
    pub builtins: Option<PathBuf>,
}

impl Engine {
    /// Configured builtins directory, or `builtins/` beside the application bundles.
    pub fn builtins(&self, paths: &Paths) -> PathBuf {
        self.builtins.clone().unwrap_or_else(|| {
            let application = paths.application_bundles();
            application
                .parent()
                .map(|parent| parent.join("builtins"))
                .unwrap_or_else(|| PathBuf::from("builtins"))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Projects {
    #[serde(default)]
    pub roots: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Watch {
    #[serde(default)]
    debounce_ms: Option<u64>,
}

impl Watch {
    fn default_debounce_ms() -> u64 {
        200
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.unwrap_or_else(Self::default_debounce_ms))
    }
}

/// Environment overrides for critical settings.
#[derive(Debug, Default, Clone)]
pub struct EnvOverrides {
    application_bundles: Option<PathBuf>,
    user_bundles: Option<PathBuf>,
    builtins: Option<PathBuf>,
}

impl EnvOverrides {
    fn from_env() -> Self {
        Self {
            application_bundles: env::var_os("BUNDLEKIT_APPLICATION_BUNDLES").map(PathBuf::from),
            user_bundles: env::var_os("BUNDLEKIT_USER_BUNDLES").map(PathBuf::from),
            builtins: env::var_os("BUNDLEKIT_ENGINE_BUILTINS").map(PathBuf::from),
        }
    }

    #[cfg(test)]
    fn for_tests(application: &str, user: &str) -> Self {
        Self {
            application_bundles: Some(PathBuf::from(application)),
            user_bundles: Some(PathBuf::from(user)),
            builtins: None,
        }
    }
}

impl Config {
    /// Load configuration from defaults, user/global config, workspace config, and env overrides.
    pub fn load() -> Result<Self> {
        let env = EnvOverrides::from_env();
        let global = global_config_path();
        let workspace = workspace_config_path()?;
        Self::load_with_layers(global, workspace, env)
    }

    fn load_with_layers(
        global: Option<PathBuf>,
        workspace: Option<PathBuf>,
        env_overrides: EnvOverrides,
    ) -> Result<Self> {
        let mut layers: Vec<Config> = Vec::new();

        layers.push(Self::from_str(&DEFAULT_CONFIG)?);

        if let Some(global_path) = global.filter(|path| path.exists()) {
            layers.push(Self::from_file(&global_path)?);
        }

        if let Some(workspace_path) = workspace.filter(|path| path.exists()) {
            layers.push(Self::from_file(&workspace_path)?);
        }

        let merged = layers.into_iter().reduce(Config::merge).unwrap_or_default();
        Ok(apply_env_overrides(merged, env_overrides))
    }

    fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_str(&data)
    }

    fn from_str(contents: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(contents).with_context(|| "failed to parse TOML config".to_string())?;
        Ok(config)
    }

    /// Apply initialization-time root overrides, e.g. from command-line flags.
    pub fn with_roots(mut self, application: Option<PathBuf>, user: Option<PathBuf>) -> Self {
        if application.is_some() {
            self.paths.application_bundles = application;
        }
        if user.is_some() {
            self.paths.user_bundles = user;
        }
        self
    }

    fn merge(self, other: Self) -> Self {
        Self {
            paths: Paths {
                application_bundles: other.paths.application_bundles.or(self.paths.application_bundles),
                user_bundles: other.paths.user_bundles.or(self.paths.user_bundles),
            },
            layout: Layout {
                descriptor: other.layout.descriptor.or(self.layout.descriptor),
                extension: other.layout.extension.or(self.layout.extension),
            },
            engine: Engine {
                builtins: other.engine.builtins.or(self.engine.builtins),
            },
            projects: merge_projects(self.projects, other.projects),
            watch: Watch {
                debounce_ms: other.watch.debounce_ms.or(self.watch.debounce_ms),
            },
        }
    }
}

fn merge_projects(base: Projects, overlay: Projects) -> Projects {
    let mut roots = base.roots;
    for root in overlay.roots {
        if !roots.contains(&root) {
            roots.push(root);
        }
    }
    Projects { roots }
}

fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|base| base.join("bundlekit/config.toml"))
}

fn workspace_config_path() -> Result<Option<PathBuf>> {
    let cwd = env::current_dir()?;
    let root = find_repo_root(&cwd).unwrap_or(cwd);
    Ok(Some(root.join(DEFAULT_WORKSPACE_CONFIG_PATH)))
}

fn find_repo_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

fn apply_env_overrides(mut config: Config, env: EnvOverrides) -> Config {
    if let Some(path) = env.application_bundles {
        config.paths.application_bundles = Some(path);
    }
    if let Some(path) = env.user_bundles {
        config.paths.user_bundles = Some(path);
    }
    if let Some(path) = env.builtins {
        config.engine.builtins = Some(path);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_uses_defaults_when_no_files() {
        let config = Config::load_with_layers(None, None, EnvOverrides::default())
            .expect("load default config");
        assert_eq!(config.layout.descriptor(), "bundle.toml");
        assert_eq!(config.layout.extension(), "toml");
        assert_eq!(config.watch.debounce(), Duration::from_millis(200));
        assert!(config.paths.application_bundles.is_none());
        assert!(config.paths.user_bundles().ends_with("Bundles"));
    }

    #[test]
    fn merge_global_and_workspace() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let global = temp.path().join("config.toml");
        fs::write(
            &global,
            r#"
[paths]
user_bundles = "/home/dev/Bundles"
[projects]
roots = ["/work/a"]
"#,
        )?;

        let workspace_dir = temp.path().join("repo");
        fs::create_dir_all(workspace_dir.join(".bundlekit"))?;
        fs::write(
            workspace_dir.join(".bundlekit/config.toml"),
            r#"
[layout]
descriptor = "bundle.rb"
extension = "rb"
[projects]
roots = ["/work/a", "/work/b"]
"#,
        )?;

        let config = Config::load_with_layers(
            Some(global),
            Some(workspace_dir.join(".bundlekit/config.toml")),
            EnvOverrides::default(),
        )?;

        assert_eq!(
            config.paths.user_bundles,
            Some(PathBuf::from("/home/dev/Bundles"))
        );
        assert_eq!(config.layout.descriptor(), "bundle.rb");
        assert_eq!(config.layout.extension(), "rb");
        assert_eq!(
            config.projects.roots,
            [PathBuf::from("/work/a"), PathBuf::from("/work/b")]
        );
        Ok(())
    }

    #[test]
    fn env_overrides_take_precedence() -> Result<()> {
        let overrides = EnvOverrides::for_tests("/opt/app/bundles", "/tmp/user");
        let config = Config::load_with_layers(None, None, overrides)?;
        assert_eq!(config.paths.application_bundles(), PathBuf::from("/opt/app/bundles"));
        assert_eq!(config.paths.user_bundles(), PathBuf::from("/tmp/user"));
        assert_eq!(config.engine.builtins(&config.paths), PathBuf::from("/opt/app/builtins"));
        Ok(())
    }

    #[test]
    fn initialization_overrides_replace_roots() {
        let config = Config::default().with_roots(Some("/a".into()), None);
        assert_eq!(config.paths.application_bundles(), PathBuf::from("/a"));
        assert!(config.paths.user_bundles.is_none());
    }

    #[test]
    fn invalid_config_returns_error() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let file = temp.path().join("broken.toml");
        fs::write(&file, "this is not toml")?;
        let result = Config::from_file(&file);
        assert!(result.is_err());
        Ok(())
    }
}
