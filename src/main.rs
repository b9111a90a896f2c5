//! Sitepack - Command-line tool for bundling static web assets

use std::process::ExitCode;

use sitepack::cli;

fn main() -> ExitCode {
    cli::run()
}
