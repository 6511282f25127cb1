//! Script engine that reads bundle scripts as TOML declarations.
//!
//! A script may declare its bundle and any number of elements:
//!
//! ```toml
//! requires = ["shared"]          # resolved as shared.<ext> against the load paths
//!
//! [bundle]
//! name = "Ruby"
//!
//! [[commands]]
//! name = "Run"
//! scope = "source.ruby"
//! invoke = "ruby $FILE"
//! key_binding = "M-r"
//!
//! [[menus]]
//! name = "Ruby"
//! items = ["Run", "-", "Test"]
//!
//! [[snippets]]
//! name = "def"
//! trigger = "def"
//! expansion = "def $1\nend"
//! ```
//!
//! Elements pulled in through `requires` are attributed to the requiring script.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::Deserialize;

use crate::app::discovery::BundleLayout;
use crate::app::engine::ScriptEngine;
use crate::app::registry::BundleRegistry;
use crate::domain::errors::BundleError;
use crate::domain::model::{Bundle, Element};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptFile {
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    bundle: Option<BundleDecl>,
    #[serde(default)]
    commands: Vec<CommandDecl>,
    #[serde(default)]
    menus: Vec<MenuDecl>,
    #[serde(default)]
    snippets: Vec<SnippetDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BundleDecl {
    name: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandDecl {
    name: String,
    #[serde(default)]
    scope: String,
    invoke: String,
    #[serde(default)]
    key_binding: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MenuDecl {
    name: String,
    #[serde(default)]
    scope: String,
    #[serde(default)]
    items: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SnippetDecl {
    name: String,
    #[serde(default)]
    scope: String,
    trigger: String,
    expansion: String,
}

impl ScriptFile {
    fn parse(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read script: {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("invalid script: {}", path.display()))
    }

    fn elements(self) -> Vec<Element> {
        let commands = self.commands.into_iter().map(|decl| {
            let element = Element::command(decl.name, decl.invoke).with_scope(decl.scope);
            match decl.key_binding {
                Some(binding) => element.with_key_binding(binding),
                None => element,
            }
        });
        let menus = self
            .menus
            .into_iter()
            .map(|decl| Element::menu(decl.name, decl.items).with_scope(decl.scope));
        let snippets = self.snippets.into_iter().map(|decl| {
            Element::snippet(decl.name, decl.trigger, decl.expansion).with_scope(decl.scope)
        });
        commands.chain(menus).chain(snippets).collect()
    }
}

/// Built-in [`ScriptEngine`] for TOML bundle scripts.
#[derive(Debug, Clone)]
pub struct DeclarativeEngine {
    builtins: PathBuf,
    layout: BundleLayout,
}

impl DeclarativeEngine {
    pub fn new(builtins: impl Into<PathBuf>, layout: BundleLayout) -> Self {
        Self {
            builtins: builtins.into(),
            layout,
        }
    }

    fn resolve_require(&self, name: &str, load_paths: &[String]) -> Option<PathBuf> {
        let file = format!("{name}.{}", self.layout.extension());
        load_paths
            .iter()
            .map(|dir| Path::new(dir).join(&file))
            .find(|candidate| candidate.is_file())
    }
}

impl ScriptEngine for DeclarativeEngine {
    fn builtins_load_path(&self) -> String {
        self.builtins.display().to_string()
    }

    fn execute(
        &self,
        script: &Path,
        load_paths: &[String],
        registry: &BundleRegistry,
    ) -> Result<(), BundleError> {
        let parsed = ScriptFile::parse(script).map_err(|err| BundleError::execution(script, err))?;
        let bundle_dir = self
            .layout
            .bundle_directory_for(script)
            .ok_or_else(|| BundleError::execution(script, anyhow!("script has no bundle directory")))?;

        let mut elements = Vec::new();
        for name in &parsed.requires {
            let required = self.resolve_require(name, load_paths).ok_or_else(|| {
                BundleError::execution(script, anyhow!("cannot resolve require '{name}'"))
            })?;
            let library =
                ScriptFile::parse(&required).map_err(|err| BundleError::execution(script, err))?;
            if library.bundle.is_some() || !library.requires.is_empty() {
                tracing::warn!(
                    library = %required.display(),
                    "required scripts may only declare elements; ignoring the rest"
                );
            }
            elements.extend(library.elements());
        }

        let ScriptFile {
            bundle, commands, menus, snippets, ..
        } = parsed;

        if let Some(decl) = bundle {
            let scope = registry.resolve_scope(&bundle_dir);
            let mut bundle = Bundle::new(&bundle_dir, decl.name, scope);
            if let Some(author) = decl.author {
                bundle = bundle.with_author(author);
            }
            if let Some(description) = decl.description {
                bundle = bundle.with_description(description);
            }
            registry.add_bundle(bundle);
        }

        elements.extend(
            ScriptFile {
                commands,
                menus,
                snippets,
                ..ScriptFile::default()
            }
            .elements(),
        );
        for element in elements {
            registry.add_element(&bundle_dir, element.defined_in(script));
        }
        Ok(())
    }
}
