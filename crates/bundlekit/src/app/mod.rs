//! Application layer: discovery, the registry, change notification, and loading.

pub mod discovery;
pub mod engine;
pub mod entry;
pub mod events;
pub mod load_path;
pub mod loader;
pub mod registry;
pub mod scope;
pub mod watch;
