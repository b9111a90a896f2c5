//! Build context containing configuration and paths for a build.

use crate::config::{Mode, SitepackConfig};
use std::path::{Path, PathBuf};

/// Build context containing configuration and paths for a build operation.
///
/// Relative paths in the configuration are resolved against the project
/// root (the directory holding `sitepack.toml`).
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// The loaded configuration
    config: SitepackConfig,
    /// Project root directory
    project_root: PathBuf,
    /// Whether to print per-artifact details
    verbose: bool,
}

impl BuildContext {
    /// Create a new build context.
    pub fn new(config: SitepackConfig, project_root: PathBuf) -> Self {
        Self { config, project_root, verbose: false }
    }

    /// Get the configuration.
    pub fn config(&self) -> &SitepackConfig {
        &self.config
    }

    /// Get the project root directory.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn mode(&self) -> Mode {
        self.config.build.mode
    }

    /// Override the build mode.
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.config.build.mode = mode;
        self
    }

    /// Whether verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Set verbose mode.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Source directory (watched for changes).
    pub fn src_dir(&self) -> PathBuf {
        self.resolve_path(&self.config.project.src)
    }

    /// Output directory.
    pub fn out_dir(&self) -> PathBuf {
        self.resolve_path(&self.config.project.out)
    }

    /// Entry script.
    pub fn entry_path(&self) -> PathBuf {
        self.resolve_path(&self.config.project.entry)
    }

    /// Document template, if configured.
    pub fn template_path(&self) -> Option<PathBuf> {
        self.config.markup.template.as_deref().map(|p| self.resolve_path(p))
    }

    /// Favicon, if configured.
    pub fn favicon_path(&self) -> Option<PathBuf> {
        self.config.markup.favicon.as_deref().map(|p| self.resolve_path(p))
    }

    /// Incremental cache file.
    pub fn cache_path(&self) -> PathBuf {
        self.resolve_path(&self.config.build.cache)
    }

    /// Resolve a path relative to the project root.
    ///
    /// If the path is absolute, returns it unchanged.
    /// If relative, joins it with the project root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        crate::config::loader::resolve_path(&self.project_root, path)
    }
}
