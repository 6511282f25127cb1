//! Domain models for bundles and the elements they contribute.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use clap::ValueEnum;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::domain::selector::ScopeSelector;

/// Shared handle to a registered bundle. Both registry indices hold clones of the same handle.
pub type BundleRef = Arc<RwLock<Bundle>>;

/// Registry-assigned identity of one registered bundle instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BundleId(pub u64);

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Layer a bundle was loaded from, ordered from least to most specific.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum BundleScope {
    Application,
    User,
    Project,
}

impl BundleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleScope::Application => "application",
            BundleScope::User => "user",
            BundleScope::Project => "project",
        }
    }
}

impl fmt::Display for BundleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three kinds of element a bundle can contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum ElementKind {
    Command,
    Menu,
    Snippet,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Command => "command",
            ElementKind::Menu => "menu",
            ElementKind::Snippet => "snippet",
        }
    }

    pub fn all() -> &'static [ElementKind] {
        &[ElementKind::Command, ElementKind::Menu, ElementKind::Snippet]
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementKind {
    type Err = ElementKindParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "command" | "commands" => Ok(ElementKind::Command),
            "menu" | "menus" => Ok(ElementKind::Menu),
            "snippet" | "snippets" => Ok(ElementKind::Snippet),
            other => Err(ElementKindParseError::UnknownKind(other.to_string())),
        }
    }
}

/// Error returned when parsing an [`ElementKind`] fails.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ElementKindParseError {
    #[error("unknown element kind '{0}'")]
    UnknownKind(String),
}

/// Kind-specific payload of an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ElementBody {
    Command {
        invoke: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_binding: Option<String>,
    },
    /// Ordered menu labels; `-` marks a separator.
    Menu { items: Vec<String> },
    Snippet { trigger: String, expansion: String },
}

/// A command, menu, or snippet contributed by a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    #[serde(default)]
    pub scope: ScopeSelector,
    /// Script that defined the element.
    pub path: PathBuf,
    /// `None` once the element has been detached from its bundle.
    #[serde(default)]
    pub owning_bundle: Option<BundleId>,
    #[serde(flatten)]
    pub body: ElementBody,
}

impl Element {
    fn with_body(name: impl Into<String>, body: ElementBody) -> Self {
        Self {
            name: name.into(),
            scope: ScopeSelector::default(),
            path: PathBuf::new(),
            owning_bundle: None,
            body,
        }
    }

    pub fn command(name: impl Into<String>, invoke: impl Into<String>) -> Self {
        Self::with_body(
            name,
            ElementBody::Command {
                invoke: invoke.into(),
                key_binding: None,
            },
        )
    }

    pub fn menu<I, S>(name: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_body(
            name,
            ElementBody::Menu {
                items: items.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn snippet(
        name: impl Into<String>,
        trigger: impl Into<String>,
        expansion: impl Into<String>,
    ) -> Self {
        Self::with_body(
            name,
            ElementBody::Snippet {
                trigger: trigger.into(),
                expansion: expansion.into(),
            },
        )
    }

    pub fn with_scope(mut self, scope: impl Into<ScopeSelector>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn defined_in(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the key binding. Ignored for non-command elements.
    pub fn with_key_binding(mut self, binding: impl Into<String>) -> Self {
        if let ElementBody::Command { key_binding, .. } = &mut self.body {
            *key_binding = Some(binding.into());
        }
        self
    }

    pub fn kind(&self) -> ElementKind {
        match self.body {
            ElementBody::Command { .. } => ElementKind::Command,
            ElementBody::Menu { .. } => ElementKind::Menu,
            ElementBody::Snippet { .. } => ElementKind::Snippet,
        }
    }

    /// Whether the element is still attached to a bundle.
    pub fn is_live(&self) -> bool {
        self.owning_bundle.is_some()
    }

    /// Whether the element's selector matches any of `scopes`.
    pub fn matches<S: AsRef<str>>(&self, scopes: &[S]) -> bool {
        self.scope.matches_any(scopes)
    }
}

/// Anything that can narrow a scope query beyond selector matching.
pub trait ElementFilter {
    fn include(&self, element: &Element) -> bool;
}

impl<F> ElementFilter for F
where
    F: Fn(&Element) -> bool,
{
    fn include(&self, element: &Element) -> bool {
        self(element)
    }
}

/// A directory-rooted unit contributing commands, menus, and snippets.
#[derive(Debug, Clone, Serialize)]
pub struct Bundle {
    id: Option<BundleId>,
    path: PathBuf,
    display_name: String,
    scope: BundleScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    commands: Vec<Element>,
    menus: Vec<Element>,
    snippets: Vec<Element>,
}

impl Bundle {
    pub fn new(path: impl Into<PathBuf>, display_name: impl Into<String>, scope: BundleScope) -> Self {
        Self {
            id: None,
            path: path.into(),
            display_name: display_name.into(),
            scope,
            author: None,
            description: None,
            commands: Vec::new(),
            menus: Vec::new(),
            snippets: Vec::new(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Identity assigned on registration; `None` until the registry accepts the bundle.
    pub fn id(&self) -> Option<BundleId> {
        self.id
    }

    pub(crate) fn assign_id(&mut self, id: BundleId) {
        self.id = Some(id);
        for kind in ElementKind::all() {
            for element in self.list_mut(*kind) {
                element.owning_bundle = Some(id);
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn scope(&self) -> BundleScope {
        self.scope
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn commands(&self) -> &[Element] {
        &self.commands
    }

    pub fn menus(&self) -> &[Element] {
        &self.menus
    }

    pub fn snippets(&self) -> &[Element] {
        &self.snippets
    }

    pub fn elements(&self, kind: ElementKind) -> &[Element] {
        match kind {
            ElementKind::Command => &self.commands,
            ElementKind::Menu => &self.menus,
            ElementKind::Snippet => &self.snippets,
        }
    }

    fn list_mut(&mut self, kind: ElementKind) -> &mut Vec<Element> {
        match kind {
            ElementKind::Command => &mut self.commands,
            ElementKind::Menu => &mut self.menus,
            ElementKind::Snippet => &mut self.snippets,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.menus.is_empty() && self.snippets.is_empty()
    }

    /// Append an element, stamping it with this bundle as owner. Returns the stored copy.
    pub fn attach(&mut self, mut element: Element) -> Element {
        element.owning_bundle = self.id;
        self.list_mut(element.kind()).push(element.clone());
        element
    }

    pub(crate) fn element_mut(&mut self, kind: ElementKind, name: &str) -> Option<&mut Element> {
        self.list_mut(kind).iter_mut().find(|element| element.name == name)
    }

    /// Remove every element, clearing owner references. Returns what was removed.
    pub fn detach_all(&mut self) -> Vec<Element> {
        self.detach_where(|_| true)
    }

    /// Remove the elements for which `predicate` holds, clearing their owner references.
    pub fn detach_where<P>(&mut self, predicate: P) -> Vec<Element>
    where
        P: Fn(&Element) -> bool,
    {
        self.detach_indexed(predicate)
            .into_iter()
            .map(|(_, element)| element)
            .collect()
    }

    /// Like [`Bundle::detach_where`], also returning each element's position in its kind's list.
    pub(crate) fn detach_indexed<P>(&mut self, predicate: P) -> Vec<(usize, Element)>
    where
        P: Fn(&Element) -> bool,
    {
        let mut detached = Vec::new();
        for kind in ElementKind::all() {
            let list = self.list_mut(*kind);
            let mut kept = Vec::with_capacity(list.len());
            for (index, mut element) in std::mem::take(list).into_iter().enumerate() {
                if predicate(&element) {
                    element.owning_bundle = None;
                    detached.push((index, element));
                } else {
                    kept.push(element);
                }
            }
            *list = kept;
        }
        detached
    }

    /// Put `element` back at `index` of its kind's list, or at the end when the list is shorter.
    ///
    /// Restoring a batch from [`Bundle::detach_indexed`] in ascending index order reproduces the
    /// original ordering.
    pub(crate) fn restore(&mut self, index: usize, mut element: Element) -> Element {
        element.owning_bundle = self.id;
        let list = self.list_mut(element.kind());
        let index = index.min(list.len());
        list.insert(index, element.clone());
        element
    }
}
