//! Build error taxonomy.

use std::path::{Path, PathBuf};

use crate::build::incremental::CacheError;
use crate::classify::ContentKind;
use crate::config::ConfigError;

/// Error that aborts a build.
///
/// A failed build writes no artifacts.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BuildError {
    /// File extension outside the classifier's table
    #[error("Unsupported asset type: {}", .path.display())]
    UnsupportedAssetType { path: PathBuf },

    /// A reference could not be resolved, or its file could not be read or scanned
    #[error("Cannot resolve {}: {reason}", .path.display())]
    Resolution { path: PathBuf, reason: String },

    /// The dependency graph contains a cycle
    #[error("Cyclic dependency: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<PathBuf> },

    /// A transform step failed
    #[error("{kind} transform '{step}' failed for {}: {cause}", .path.display())]
    Transform { kind: ContentKind, step: String, path: PathBuf, cause: String },

    /// Two binary assets map to the same output path
    #[error(
        "Output collision: {} and {} both emit {}",
        .first.display(),
        .second.display(),
        .output.display()
    )]
    OutputCollision { output: PathBuf, first: PathBuf, second: PathBuf },

    /// Filesystem error while writing artifacts
    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Incremental cache could not be read or written
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Worker pool could not be started
    #[error("Failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

fn format_cycle(cycle: &[PathBuf]) -> String {
    cycle.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(" -> ")
}

impl BuildError {
    /// Wrap an IO error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io { path: path.into(), source }
    }

    /// Create a resolution error.
    pub fn resolution(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        BuildError::Resolution { path: path.into(), reason: reason.into() }
    }

    /// The source file this error is attributed to, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            BuildError::UnsupportedAssetType { path }
            | BuildError::Resolution { path, .. }
            | BuildError::Transform { path, .. }
            | BuildError::Io { path, .. } => Some(path),
            BuildError::CyclicDependency { cycle } => cycle.first().map(PathBuf::as_path),
            BuildError::OutputCollision { second, .. } => Some(second),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let err = BuildError::CyclicDependency {
            cycle: vec![PathBuf::from("a.js"), PathBuf::from("b.js"), PathBuf::from("a.js")],
        };
        assert_eq!(err.to_string(), "Cyclic dependency: a.js -> b.js -> a.js");
        assert_eq!(err.path(), Some(Path::new("a.js")));
    }

    #[test]
    fn test_transform_message() {
        let err = BuildError::Transform {
            kind: ContentKind::Stylesheet,
            step: "preprocess-to-css".to_string(),
            path: PathBuf::from("src/main.scss"),
            cause: "expected \";\"".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("stylesheet transform 'preprocess-to-css' failed"));
        assert!(msg.contains("src/main.scss"));
    }

    #[test]
    fn test_collision_message() {
        let err = BuildError::OutputCollision {
            output: PathBuf::from("images/icon.png"),
            first: PathBuf::from("a/icon.png"),
            second: PathBuf::from("b/icon.png"),
        };
        let msg = err.to_string();
        assert!(msg.contains("a/icon.png"));
        assert!(msg.contains("b/icon.png"));
        assert!(msg.contains("images/icon.png"));
    }
}
