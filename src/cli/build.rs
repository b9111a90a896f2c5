//! Build command implementation

use std::path::Path;
use std::process::ExitCode;

use super::{config_failure, load_context, EXIT_ERROR, EXIT_SUCCESS};
use crate::build::IncrementalBuild;
use crate::config::CliOverrides;
use crate::watch::{watch_and_rebuild, WatchOptions};

/// Run the build command
pub fn run_build(
    config_path: Option<&Path>,
    overrides: &CliOverrides,
    watch: bool,
    force: bool,
    json: bool,
    verbose: bool,
) -> ExitCode {
    let context = match load_context(config_path, overrides, verbose) {
        Ok(context) => context,
        Err(e) => return config_failure(&e),
    };

    if watch {
        println!("Starting watch mode ({})...", context.mode());
        if force {
            println!("Force mode: caching disabled");
        }
        println!("Press Ctrl+C to stop");
        println!();

        return match watch_and_rebuild(WatchOptions::new(context).with_force(force)) {
            Ok(()) => ExitCode::from(EXIT_SUCCESS),
            Err(e) => {
                eprintln!("Watch error: {}", e);
                ExitCode::from(EXIT_ERROR)
            }
        };
    }

    if verbose && !json {
        println!("Building {} ({})...", context.entry_path().display(), context.mode());
    }

    match IncrementalBuild::new(context).with_force(force).run() {
        Ok(result) => {
            if json {
                match result.manifest.to_json() {
                    Ok(manifest) => println!("{}", manifest),
                    Err(e) => {
                        eprintln!("Error serializing manifest: {}", e);
                        return ExitCode::from(EXIT_ERROR);
                    }
                }
                for warning in &result.warnings {
                    eprintln!("Warning: {}", warning);
                }
            } else {
                println!("{}", result.summary());
                if verbose {
                    for entry in &result.manifest.artifacts {
                        println!("  {} ({}, {})", entry.path, entry.kind, crate::build::format_size(entry.size));
                    }
                }
            }
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Build error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
