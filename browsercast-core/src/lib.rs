//! Shared building blocks for the browsercast service: configuration model and
//! loading, and tracing initialisation.

pub mod bootstrap;
pub mod config;
pub mod logging;

pub use config::Config;
