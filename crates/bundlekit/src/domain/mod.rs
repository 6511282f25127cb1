//! Core domain types shared by the registry, loader, and engines.

pub mod errors;
pub mod model;
pub mod selector;
