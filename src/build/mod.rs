//! Build pipeline module for sitepack
//!
//! Turns an entry script and everything it reaches into a deployable
//! bundle: one script bundle, one style bundle, one document and the
//! referenced images.
//!
//! # Overview
//!
//! The build pipeline consists of:
//! - **Resolution**: Walk references from the entry, template and favicon
//!   into a [`DependencyGraph`](crate::graph::DependencyGraph)
//! - **Planning**: Give every binary asset its output path
//! - **Transformation**: Run each module through its content kind's chain
//!   on a worker pool
//! - **Emission**: Assemble the artifacts in memory, then write them
//!
//! # Example
//!
//! ```ignore
//! use sitepack::build::{BuildContext, BuildPipeline};
//! use sitepack::config::load_config;
//!
//! let config = load_config(None)?;
//! let context = BuildContext::new(config, project_root);
//! let pipeline = BuildPipeline::new(context);
//!
//! let result = pipeline.build()?;
//! println!("Wrote {} artifacts", result.manifest.len());
//! ```

pub mod context;
pub mod emit;
pub mod error;
pub mod incremental;
pub mod manifest;
pub mod pipeline;
pub mod plan;
pub mod result;

pub use context::*;
pub use emit::*;
pub use error::*;
pub use incremental::*;
pub use manifest::*;
pub use pipeline::*;
pub use plan::*;
pub use result::*;
