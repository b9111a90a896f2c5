//! Sitepack - Library for bundling static web assets
//!
//! This library provides functionality to:
//! - Classify source files into scripts, stylesheets, markup and binary assets
//! - Resolve the module graph reachable from an entry script
//! - Transform every module through its content kind's chain in parallel
//! - Emit a script bundle, a style bundle, a document and images

pub mod build;
pub mod classify;
pub mod cli;
pub mod config;
pub mod graph;
pub mod script;
pub mod transforms;
pub mod watch;
