//! Process configuration.
//!
//! `cli` parses the command line, `config` merges it over an optional TOML
//! file and validates the result into the immutable [`PipelineConfig`] the
//! rest of the crate runs on.

pub mod cli;
pub mod config;

pub use cli::CliArgs;
pub use config::{Config, PipelineConfig, StoreCredentials, StoreSettings};
