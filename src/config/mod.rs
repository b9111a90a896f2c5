//! Configuration module for the sitepack build
//!
//! Provides types and parsing for `sitepack.toml` project configuration.

pub mod loader;
pub mod schema;

pub use loader::{
    default_config, find_config, find_config_from, load_config, merge_cli_overrides, resolve_path,
    CliOverrides, ConfigError, CONFIG_FILENAME,
};
pub use schema::*;
