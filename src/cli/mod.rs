//! Command-line interface implementation
//!
//! This module provides the CLI entry point and dispatches to submodules
//! for specific command implementations.

mod build;
mod graph;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;

use crate::build::BuildContext;
use crate::config::{
    default_config, find_config, load_config, merge_cli_overrides, CliOverrides, ConfigError, Mode,
};

/// Exit codes
pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// Sitepack - Bundle scripts, stylesheets, markup and images for the browser
#[derive(Parser)]
#[command(name = "sitepack")]
#[command(about = "Sitepack - Bundle scripts, stylesheets, markup and images for the browser")]
#[command(version)]
pub struct Cli {
    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the bundle according to sitepack.toml
    Build {
        /// Build mode (overrides [build] mode)
        #[arg(short, long, value_enum)]
        mode: Option<Mode>,

        /// Override the entry script
        #[arg(short, long)]
        entry: Option<PathBuf>,

        /// Override output directory
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Path to sitepack.toml (default: search upward from the current directory)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Worker threads for transforms (0 = available parallelism)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Watch for changes and rebuild automatically
        #[arg(short, long)]
        watch: bool,

        /// Force rebuild (ignore cache)
        #[arg(short, long)]
        force: bool,

        /// Print the artifact manifest as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the module graph in discovery order
    Graph {
        /// Override the entry script
        #[arg(short, long)]
        entry: Option<PathBuf>,

        /// Path to sitepack.toml
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Initialise logging; `RUST_LOG` wins over the `-v` default.
fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// Load the configuration and build a context rooted at the config file's
/// directory (or the current directory when there is none).
pub(crate) fn load_context(
    config_path: Option<&Path>,
    overrides: &CliOverrides,
    verbose: bool,
) -> Result<BuildContext, ConfigError> {
    let cwd = std::env::current_dir()?;
    let config_path = config_path.map(|p| cwd.join(p)).or_else(find_config);

    let (config, root) = match config_path {
        Some(path) => {
            debug!(config = %path.display(), "using config");
            let config = load_config(Some(&path))?;
            let root = path.parent().map(Path::to_path_buf).unwrap_or_else(|| cwd.clone());
            (config, root)
        }
        None => {
            debug!("no sitepack.toml found, using defaults");
            (default_config(), cwd)
        }
    };

    let root = dunce::canonicalize(&root).unwrap_or(root);
    let config = merge_cli_overrides(config, overrides)?;
    Ok(BuildContext::new(config, root).with_verbose(verbose))
}

/// Report a configuration error with the invalid-arguments exit code.
pub(crate) fn config_failure(error: &ConfigError) -> ExitCode {
    eprintln!("Error: {}", error);
    ExitCode::from(EXIT_INVALID_ARGS)
}

/// Run the CLI.
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Build { mode, entry, out, config, jobs, watch, force, json } => {
            let overrides = CliOverrides { entry, out, mode, jobs };
            build::run_build(config.as_deref(), &overrides, watch, force, json, cli.verbose)
        }
        Commands::Graph { entry, config } => {
            let overrides = CliOverrides { entry, ..Default::default() };
            graph::run_graph(config.as_deref(), &overrides, cli.verbose)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build_flags() {
        let cli = Cli::try_parse_from([
            "sitepack", "build", "--mode", "production", "--jobs", "2", "--force", "--json", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Build { mode, jobs, force, json, watch, .. } => {
                assert_eq!(mode, Some(Mode::Production));
                assert_eq!(jobs, Some(2));
                assert!(force && json && !watch);
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        assert!(Cli::try_parse_from(["sitepack", "build", "--mode", "fast"]).is_err());
    }
}
