//! Incremental build support.
//!
//! Skips a build whose inputs are unchanged since the last successful run.
//!
//! # How It Works
//!
//! The cache file (`.sitepack-cache.json` in the project root) records:
//!
//! 1. A content hash of every module in the last dependency graph
//! 2. The build mode and a fingerprint of the configuration
//! 3. The manifest of the artifacts that build wrote
//!
//! The graph is always resolved (a change can add or remove modules). If
//! every hash, the mode and the fingerprint match, and every artifact on
//! disk still matches its recorded hash, the build is skipped.
//!
//! # Example
//!
//! ```ignore
//! use sitepack::build::{BuildContext, IncrementalBuild};
//!
//! let context = BuildContext::new(config, project_root);
//! let result = IncrementalBuild::new(context).with_force(force).run()?;
//! println!("{}", result.summary());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::build::manifest::{hash_bytes, ArtifactManifest};
use crate::build::{BuildContext, BuildError, BuildPipeline, BuildResult};
use crate::config::{Mode, SitepackConfig};
use crate::graph::DependencyGraph;

/// Current cache format version.
const CACHE_VERSION: u32 = 1;

/// Error during cache operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CacheError {
    /// IO error
    #[error("Cache IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// JSON parsing error
    #[error("Cache JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Version mismatch
    #[error("Cache version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// State of the last successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCache {
    /// Cache format version
    pub version: u32,
    pub mode: Mode,
    /// Hash of the effective configuration
    pub config_fingerprint: String,
    /// Module id to content hash
    pub sources: BTreeMap<String, String>,
    pub manifest: ArtifactManifest,
}

impl BuildCache {
    pub fn new(
        mode: Mode,
        config_fingerprint: String,
        sources: BTreeMap<String, String>,
        manifest: ArtifactManifest,
    ) -> Self {
        Self { version: CACHE_VERSION, mode, config_fingerprint, sources, manifest }
    }

    /// Load a cache from a file.
    ///
    /// Returns `Ok(None)` if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, CacheError> {
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(path).map_err(|source| CacheError::Io { path: path.to_path_buf(), source })?;
        let cache: BuildCache = serde_json::from_reader(BufReader::new(file))?;

        if cache.version != CACHE_VERSION {
            return Err(CacheError::VersionMismatch { expected: CACHE_VERSION, found: cache.version });
        }

        Ok(Some(cache))
    }

    /// Save the cache to a file.
    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        let io = |source| CacheError::Io { path: path.to_path_buf(), source };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io)?;
        }
        let file = File::create(path).map_err(io)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Whether this cache describes a build of exactly these inputs.
    pub fn matches(&self, mode: Mode, config_fingerprint: &str, sources: &BTreeMap<String, String>) -> bool {
        self.mode == mode && self.config_fingerprint == config_fingerprint && &self.sources == sources
    }
}

/// Hash of the effective configuration.
pub fn config_fingerprint(config: &SitepackConfig) -> String {
    let serialized = serde_json::to_vec(config).unwrap_or_default();
    hash_bytes(&serialized)
}

/// Content hash of every module in the graph, keyed by module id.
pub fn source_hashes(graph: &DependencyGraph) -> Result<BTreeMap<String, String>, BuildError> {
    graph.nodes().iter().map(|node| Ok((node.id.clone(), hash_bytes(node.content()?)))).collect()
}

/// Incremental build pipeline.
///
/// Wraps the standard build pipeline with cache-based change detection.
pub struct IncrementalBuild {
    pipeline: BuildPipeline,
    /// Whether to rebuild regardless of the cache
    force: bool,
}

impl IncrementalBuild {
    /// Create a new incremental build.
    pub fn new(context: BuildContext) -> Self {
        Self { pipeline: BuildPipeline::new(context), force: false }
    }

    /// Set force mode (rebuild regardless of the cache).
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    fn context(&self) -> &BuildContext {
        self.pipeline.context()
    }

    /// Load the cache, treating an unreadable or outdated one as absent.
    fn load_cache(&self) -> Option<BuildCache> {
        let path = self.context().cache_path();
        match BuildCache::load(&path) {
            Ok(cache) => cache,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring build cache");
                None
            }
        }
    }

    /// Run the incremental build.
    pub fn run(&self) -> Result<BuildResult, BuildError> {
        let start = Instant::now();
        let context = self.context();
        let graph = self.pipeline.resolve()?;
        let sources = source_hashes(&graph)?;
        let fingerprint = config_fingerprint(context.config());
        let mode = context.mode();

        if !self.force {
            if let Some(cache) = self.load_cache() {
                if cache.matches(mode, &fingerprint, &sources) {
                    let changed = cache.manifest.verify(&context.out_dir())?;
                    if changed.is_empty() {
                        info!(modules = graph.len(), "build is up to date");
                        return Ok(BuildResult::skipped(cache.manifest, graph.len())
                            .with_warnings(graph.warnings().to_vec())
                            .with_duration(start.elapsed()));
                    }
                    debug!(?changed, "artifacts changed on disk");
                } else {
                    debug!("inputs changed since last build");
                }
            }
        }

        let mut result = self.pipeline.build_graph(&graph)?;
        let cache_path = context.cache_path();
        if let Err(e) = BuildCache::new(mode, fingerprint, sources, result.manifest.clone()).save(&cache_path) {
            warn!(path = %cache_path.display(), error = %e, "could not save build cache");
            result.warnings.push(format!("build cache not saved: {}", e));
        }
        Ok(result.with_duration(start.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::BuildStatus;
    use crate::config::default_config;
    use tempfile::TempDir;

    fn project() -> (TempDir, BuildContext) {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        fs::create_dir_all(dir.join("src/js")).unwrap();
        fs::write(dir.join("src/js/scripts.js"), "import './util.js';").unwrap();
        fs::write(dir.join("src/js/util.js"), "export const x = 1;").unwrap();
        let context = BuildContext::new(default_config(), dir.to_path_buf());
        (temp, context)
    }

    #[test]
    fn test_second_build_is_skipped() {
        let (_temp, context) = project();
        let first = IncrementalBuild::new(context.clone()).run().unwrap();
        assert_eq!(first.status, BuildStatus::Built);
        assert!(context.cache_path().exists());

        let second = IncrementalBuild::new(context).run().unwrap();
        assert_eq!(second.status, BuildStatus::Skipped);
        assert_eq!(second.manifest, first.manifest);
    }

    #[test]
    fn test_force_rebuilds() {
        let (_temp, context) = project();
        IncrementalBuild::new(context.clone()).run().unwrap();
        let forced = IncrementalBuild::new(context).with_force(true).run().unwrap();
        assert_eq!(forced.status, BuildStatus::Built);
    }

    #[test]
    fn test_source_change_rebuilds() {
        let (temp, context) = project();
        IncrementalBuild::new(context.clone()).run().unwrap();
        fs::write(temp.path().join("src/js/util.js"), "export const x = 2;").unwrap();
        let result = IncrementalBuild::new(context).run().unwrap();
        assert_eq!(result.status, BuildStatus::Built);
    }

    #[test]
    fn test_mode_change_rebuilds() {
        let (_temp, context) = project();
        IncrementalBuild::new(context.clone()).run().unwrap();
        let result = IncrementalBuild::new(context.with_mode(Mode::Production)).run().unwrap();
        assert_eq!(result.status, BuildStatus::Built);
    }

    #[test]
    fn test_deleted_artifact_rebuilds() {
        let (_temp, context) = project();
        IncrementalBuild::new(context.clone()).run().unwrap();
        fs::remove_file(context.out_dir().join("bundle.js")).unwrap();
        let result = IncrementalBuild::new(context.clone()).run().unwrap();
        assert_eq!(result.status, BuildStatus::Built);
        assert!(context.out_dir().join("bundle.js").exists());
    }

    #[test]
    fn test_corrupt_cache_is_ignored() {
        let (_temp, context) = project();
        fs::write(context.cache_path(), "not json").unwrap();
        let result = IncrementalBuild::new(context).run().unwrap();
        assert_eq!(result.status, BuildStatus::Built);
    }

    #[test]
    fn test_unwritable_cache_keeps_build() {
        let (_temp, context) = project();
        let mut config = context.config().clone();
        config.build.cache = PathBuf::from("src/js/scripts.js/cache.json");
        let context = BuildContext::new(config, context.project_root().to_path_buf());

        let result = IncrementalBuild::new(context.clone()).run().unwrap();
        assert_eq!(result.status, BuildStatus::Built);
        assert!(result.warnings.iter().any(|w| w.contains("build cache not saved")));
        assert!(context.out_dir().join("bundle.js").exists());
    }

    #[test]
    fn test_cache_version_mismatch() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache.json");
        let mut cache = BuildCache::new(Mode::Development, "fp".into(), BTreeMap::new(), ArtifactManifest::default());
        cache.version = 99;
        cache.save(&path).unwrap();
        assert!(matches!(BuildCache::load(&path), Err(CacheError::VersionMismatch { found: 99, .. })));
    }
}
