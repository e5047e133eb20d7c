//! gattboard service library
//!
//! Command-line parsing, layered configuration and the wiring that turns a
//! [`gattboard_core::SyncConfig`] into a running engine.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;

pub use app::{GattboardApp, RefreshReport};
pub use cli::{Cli, Commands};
pub use config::{example_config, ConfigLoader, Overrides};
pub use error::{CliError, Result};
