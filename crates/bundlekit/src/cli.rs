//! Command-line interface.

use std::fmt::Write as _;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;

use crate::app::discovery::BundleLayout;
use crate::app::load_path::load_paths_for;
use crate::app::loader::BundleLoader;
use crate::app::registry::BundleRegistry;
use crate::app::watch::BundleWatcher;
use crate::domain::model::{Bundle, BundleScope, Element, ElementBody, ElementKind};
use crate::infra::config::Config;
use crate::infra::declarative::DeclarativeEngine;

#[derive(Debug, Parser)]
#[command(name = "bundlekit", author, version, about = "Discover, load, and inspect script bundles")]
pub struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Application (built-in) bundles root
    #[arg(long, global = true, value_name = "DIR")]
    pub application_bundles: Option<PathBuf>,

    /// User bundles root
    #[arg(long, global = true, value_name = "DIR")]
    pub user_bundles: Option<PathBuf>,

    /// Project root to scan for bundles; repeatable
    #[arg(long = "project", global = true, value_name = "DIR")]
    pub projects: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List bundle names with their scopes and element counts
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show every bundle and element registered under a name
    Show {
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// List elements of one kind matching any of the given scopes
    Query {
        #[arg(value_enum)]
        kind: ElementKind,
        #[arg(required = true)]
        scopes: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Print the scripts of a bundle directory in load order
    Scripts { dir: PathBuf },
    /// Print the scope a path resolves to
    Scope { path: PathBuf },
    /// Load bundles and reload scripts as they change
    Watch,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Per-name summary used by `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleSummary {
    pub name: String,
    pub scopes: Vec<BundleScope>,
    pub commands: usize,
    pub menus: usize,
    pub snippets: usize,
}

pub fn summarize(registry: &BundleRegistry) -> Vec<BundleSummary> {
    registry
        .all_bundle_names()
        .into_iter()
        .filter_map(|name| registry.entry_by_name(&name))
        .map(|entry| BundleSummary {
            name: entry.name().to_owned(),
            scopes: entry.scopes(),
            commands: entry.commands().len(),
            menus: entry.menus().len(),
            snippets: entry.snippets().len(),
        })
        .collect()
}

pub fn render_listing(summaries: &[BundleSummary]) -> String {
    let width = summaries.iter().map(|s| s.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for summary in summaries {
        let scopes: Vec<_> = summary.scopes.iter().map(BundleScope::as_str).collect();
        let _ = writeln!(
            out,
            "{:width$}  [{}]  commands={} menus={} snippets={}",
            summary.name,
            scopes.join(", "),
            summary.commands,
            summary.menus,
            summary.snippets,
        );
    }
    out
}

fn describe(element: &Element) -> String {
    let detail = match &element.body {
        ElementBody::Command { invoke, key_binding } => match key_binding {
            Some(binding) => format!("{invoke} ({binding})"),
            None => invoke.clone(),
        },
        ElementBody::Menu { items } => items.join(" | "),
        ElementBody::Snippet { trigger, .. } => format!("trigger: {trigger}"),
    };
    let scope = if element.scope.is_empty() {
        "*".to_owned()
    } else {
        element.scope.to_string()
    };
    format!("{} {} [{}] {}", element.kind(), element.name, scope, detail)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let data = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{data}");
    Ok(())
}

struct Runtime {
    config: Config,
    layout: BundleLayout,
    registry: Arc<BundleRegistry>,
}

impl Runtime {
    fn new(cli: &Cli) -> Result<Self> {
        let mut config = Config::load()?
            .with_roots(cli.application_bundles.clone(), cli.user_bundles.clone());
        for project in &cli.projects {
            if !config.projects.roots.contains(project) {
                config.projects.roots.push(project.clone());
            }
        }
        let layout = BundleLayout::from_config(&config)?;
        let registry = Arc::new(BundleRegistry::with_roots(
            config.paths.application_bundles(),
            config.paths.user_bundles(),
        ));
        Ok(Self {
            config,
            layout,
            registry,
        })
    }

    fn engine(&self) -> DeclarativeEngine {
        DeclarativeEngine::new(
            self.config.engine.builtins(&self.config.paths),
            self.layout.clone(),
        )
    }

    fn loader(&self) -> BundleLoader<DeclarativeEngine> {
        BundleLoader::new(Arc::clone(&self.registry), self.engine(), self.layout.clone())
            .with_projects(self.config.projects.roots.clone())
    }

    fn load(&self) -> Result<BundleLoader<DeclarativeEngine>> {
        let loader = self.loader();
        loader.load_bundles().context("failed to load bundles")?;
        Ok(loader)
    }
}

pub fn run(cli: Cli) -> Result<()> {
    if let Command::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "bundlekit", &mut io::stdout());
        return Ok(());
    }

    let ctx = Runtime::new(&cli)?;
    match &cli.command {
        Command::List { json } => {
            ctx.load()?;
            let summaries = summarize(&ctx.registry);
            if *json {
                print_json(&summaries)?;
            } else {
                print!("{}", render_listing(&summaries));
            }
        }
        Command::Show { name, json } => {
            ctx.load()?;
            let entry = ctx
                .registry
                .entry_by_name(name)
                .with_context(|| format!("no bundle named '{name}'"))?;
            let bundles: Vec<Bundle> = entry.bundles().iter().map(|b| b.read().clone()).collect();
            if *json {
                print_json(&bundles)?;
            } else {
                for bundle in &bundles {
                    println!("{} ({}) {}", bundle.display_name(), bundle.scope(), bundle.path().display());
                    for kind in ElementKind::all() {
                        for element in bundle.elements(*kind) {
                            println!("  {}", describe(element));
                        }
                    }
                }
            }
        }
        Command::Query { kind, scopes, json } => {
            ctx.load()?;
            let elements = ctx.registry.matching_elements(*kind, scopes, None);
            if *json {
                print_json(&elements)?;
            } else {
                for element in &elements {
                    println!("{}", describe(element));
                }
            }
        }
        Command::Scripts { dir } => {
            let builtins = ctx.config.engine.builtins(&ctx.config.paths);
            for script in ctx.layout.list_bundle_scripts(dir) {
                println!("{}", script.display());
            }
            for path in load_paths_for(&builtins.display().to_string(), dir) {
                println!("load path: {path}");
            }
        }
        Command::Scope { path } => {
            println!("{}", ctx.registry.resolve_scope(path));
        }
        Command::Watch => {
            let loader = Arc::new(ctx.load()?);
            let mut roots = vec![
                ctx.registry.application_bundles_path().to_path_buf(),
                ctx.registry.user_bundles_path().to_path_buf(),
            ];
            roots.extend(ctx.config.projects.roots.iter().cloned());
            let watcher = BundleWatcher::start(loader, &roots, ctx.config.watch.debounce())?;
            watcher.run(|| false)?;
        }
        Command::Completions { .. } => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn listing_aligns_names() {
        let registry = BundleRegistry::with_roots("/app", "/user");
        let mut ruby = Bundle::new("/app/ruby", "Ruby", BundleScope::Application);
        ruby.attach(Element::command("run", "ruby $FILE"));
        ruby.attach(Element::snippet("def", "def", "def $1\nend"));
        registry.add_bundle(ruby);
        let mut project_ruby = Bundle::new("/work/ruby", "Ruby", BundleScope::Project);
        project_ruby.attach(Element::command("deploy", "cap deploy"));
        registry.add_bundle(project_ruby);
        let mut html = Bundle::new("/user/html", "HTML", BundleScope::User);
        html.attach(Element::menu("HTML", ["Preview"]));
        registry.add_bundle(html);

        assert_snapshot!(render_listing(&summarize(&registry)).trim_end(), @r"
        HTML  [user]  commands=0 menus=1 snippets=0
        Ruby  [application, project]  commands=2 menus=0 snippets=1
        ");
    }

    #[test]
    fn describes_elements() {
        let command = Element::command("run", "ruby $FILE")
            .with_scope("source.ruby")
            .with_key_binding("M-r");
        assert_eq!(describe(&command), "command run [source.ruby] ruby $FILE (M-r)");
        assert_eq!(
            describe(&Element::menu("m", ["a", "-", "b"])),
            "menu m [*] a | - | b"
        );
    }
}
