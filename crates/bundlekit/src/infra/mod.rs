//! Infrastructure adapters: configuration, logging, and the declarative script engine.

pub mod config;
pub mod declarative;
pub mod logging;
