//! Build result types.
//!
//! Contains types for representing the outcome of a build run.

use std::time::Duration;

use crate::build::manifest::{format_size, ArtifactManifest};

/// Whether artifacts were produced or reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    /// Artifacts were assembled and written
    Built,
    /// Inputs were unchanged and artifacts on disk were up to date
    Skipped,
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStatus::Built => write!(f, "built"),
            BuildStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of a successful build run.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub status: BuildStatus,
    /// Artifacts of the run (or of the cached run when skipped)
    pub manifest: ArtifactManifest,
    /// Number of modules in the dependency graph
    pub modules: usize,
    /// Non-fatal findings
    pub warnings: Vec<String>,
    /// Total build duration
    pub total_duration: Duration,
}

impl BuildResult {
    /// Create a result for a run that wrote artifacts.
    pub fn built(manifest: ArtifactManifest, modules: usize) -> Self {
        Self {
            status: BuildStatus::Built,
            manifest,
            modules,
            warnings: Vec::new(),
            total_duration: Duration::ZERO,
        }
    }

    /// Create a result for a run that reused existing artifacts.
    pub fn skipped(manifest: ArtifactManifest, modules: usize) -> Self {
        Self { status: BuildStatus::Skipped, ..Self::built(manifest, modules) }
    }

    /// Add warnings to the result.
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Set the total duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.total_duration = duration;
        self
    }

    pub fn is_skipped(&self) -> bool {
        self.status == BuildStatus::Skipped
    }

    /// Format a summary of the build result.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        match self.status {
            BuildStatus::Built => lines.push(format!(
                "Build succeeded: {} artifacts ({}) from {} modules in {:?}",
                self.manifest.len(),
                format_size(self.manifest.total_size()),
                self.modules,
                self.total_duration
            )),
            BuildStatus::Skipped => lines.push(format!(
                "Build skipped: {} artifacts up to date ({} modules unchanged)",
                self.manifest.len(),
                self.modules
            )),
        }

        if !self.warnings.is_empty() {
            lines.push(format!("Warnings ({}): ", self.warnings.len()));
            for warning in self.warnings.iter().take(5) {
                lines.push(format!("  - {}", warning));
            }
            if self.warnings.len() > 5 {
                lines.push(format!("  ... and {} more", self.warnings.len() - 5));
            }
        }

        lines.join("\n")
    }
}
