//! Watch mode for automatic rebuilds on file changes
//!
//! Provides file system watching with debouncing for the `sitepack build --watch` command.

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::time::Duration;
use tracing::debug;

use crate::build::{BuildContext, BuildError, BuildResult, IncrementalBuild};
use crate::classify::is_classifiable;

/// Error during watch mode
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WatchError {
    /// Failed to initialize file watcher
    #[error("Failed to initialize file watcher: {0}")]
    WatcherInit(#[source] notify::Error),
    /// Failed to add watch path
    #[error("Failed to watch path: {0}")]
    WatchPath(#[source] notify::Error),
    /// Channel receive error
    #[error("Watch channel error: {0}")]
    ChannelError(String),
    /// Source directory not found
    #[error("Source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),
}

/// Tracks files with errors across build iterations for recovery detection
#[derive(Debug, Default)]
pub struct ErrorTracker {
    /// Files that had errors in the previous build
    files_with_errors: HashSet<PathBuf>,
}

impl ErrorTracker {
    /// Create a new error tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Update tracker with the outcome of a build, returns list of fixed files
    pub fn update(&mut self, outcome: &Result<BuildResult, BuildError>) -> Vec<PathBuf> {
        let current: HashSet<PathBuf> = match outcome {
            Ok(_) => HashSet::new(),
            Err(e) => e.path().map(Path::to_path_buf).into_iter().collect(),
        };

        let mut fixed: Vec<PathBuf> = self.files_with_errors.difference(&current).cloned().collect();
        fixed.sort();

        self.files_with_errors = current;
        fixed
    }

    /// Check if there are any tracked errors
    pub fn has_errors(&self) -> bool {
        !self.files_with_errors.is_empty()
    }

    /// Get the number of files with errors
    pub fn error_count(&self) -> usize {
        self.files_with_errors.len()
    }
}

/// Options for watch mode
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Build context; its `[watch]` section sets debounce and screen clearing
    pub context: BuildContext,
    /// Rebuild without consulting the incremental cache
    pub force: bool,
}

impl WatchOptions {
    pub fn new(context: BuildContext) -> Self {
        Self { context, force: false }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Clear the terminal screen; a no-op when stdout is not a terminal
fn clear_screen() {
    if atty::is(atty::Stream::Stdout) {
        // ANSI escape code to clear screen and move cursor to top-left
        print!("\x1B[2J\x1B[1;1H");
    }
}

/// Format duration for display
fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}

/// Get current timestamp for logging
fn timestamp() -> String {
    use std::time::SystemTime;
    let now = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
    let secs = now.as_secs() % 86400;
    format!("{:02}:{:02}:{:02}", (secs / 3600) % 24, (secs / 60) % 60, secs % 60)
}

/// Perform a single build iteration.
pub fn do_build(options: &WatchOptions) -> Result<BuildResult, BuildError> {
    IncrementalBuild::new(options.context.clone()).with_force(options.force).run()
}

/// Watch for file changes and rebuild automatically.
///
/// This function blocks and runs until interrupted (Ctrl+C). Build failures
/// are reported and watching continues.
///
/// # Example
/// ```ignore
/// let context = BuildContext::new(config, project_root);
/// watch_and_rebuild(WatchOptions::new(context))?;
/// ```
pub fn watch_and_rebuild(options: WatchOptions) -> Result<(), WatchError> {
    let src_dir = options.context.src_dir();
    if !src_dir.exists() {
        return Err(WatchError::SourceNotFound(src_dir));
    }
    let out_dir = options.context.out_dir();
    let watch_config = &options.context.config().watch;

    let (tx, rx) = channel();
    let debounce_duration = Duration::from_millis(u64::from(watch_config.debounce_ms));
    let mut debouncer = new_debouncer(debounce_duration, tx).map_err(WatchError::WatcherInit)?;
    debouncer.watcher().watch(&src_dir, RecursiveMode::Recursive).map_err(WatchError::WatchPath)?;

    let mut error_tracker = ErrorTracker::new();

    if watch_config.clear_screen {
        clear_screen();
    }
    println!("[{}] Building...", timestamp());
    let outcome = do_build(&options);
    let fixed = error_tracker.update(&outcome);
    print_build_outcome(&outcome, &fixed);
    println!("[{}] Watching {} for changes...", timestamp(), src_dir.display());

    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                let relevant_changes: Vec<_> = events
                    .iter()
                    .filter(|e| {
                        matches!(e.kind, DebouncedEventKind::Any) && is_relevant_file(&e.path, &out_dir)
                    })
                    .collect();

                if relevant_changes.is_empty() {
                    continue;
                }
                for event in &relevant_changes {
                    debug!(path = %event.path.display(), "change detected");
                    if let Some(name) = event.path.file_name() {
                        println!("[{}] Changed: {}", timestamp(), name.to_string_lossy());
                    }
                }

                if watch_config.clear_screen {
                    clear_screen();
                }

                println!("[{}] Building...", timestamp());
                let outcome = do_build(&options);
                let fixed = error_tracker.update(&outcome);
                print_build_outcome(&outcome, &fixed);

                println!("[{}] Watching {} for changes...", timestamp(), src_dir.display());
            }
            Ok(Err(error)) => {
                eprintln!("[{}] Watch error: {:?}", timestamp(), error);
                eprintln!("[{}] Continuing to watch...", timestamp());
            }
            Err(e) => {
                return Err(WatchError::ChannelError(e.to_string()));
            }
        }
    }
}

/// Check if a file is relevant for rebuilding.
///
/// Files the classifier knows trigger a rebuild, except artifacts the build
/// itself wrote (the output dir may sit inside the source dir).
fn is_relevant_file(path: &Path, out_dir: &Path) -> bool {
    is_classifiable(path) && !path.starts_with(out_dir)
}

/// Print build outcome to console with fixed file notifications
fn print_build_outcome(outcome: &Result<BuildResult, BuildError>, fixed_files: &[PathBuf]) {
    for fixed in fixed_files {
        if let Some(name) = fixed.file_name() {
            println!("[{}] Fixed: {}", timestamp(), name.to_string_lossy());
        }
    }

    match outcome {
        Ok(result) if result.is_skipped() => {
            println!("[{}] Up to date - Artifacts: {}", timestamp(), result.manifest.len());
        }
        Ok(result) => {
            println!(
                "[{}] Build complete ({}) - Modules: {} | Artifacts: {} | Size: {}",
                timestamp(),
                format_duration(result.total_duration),
                result.modules,
                result.manifest.len(),
                result.manifest.total_size_string()
            );
            for warning in &result.warnings {
                eprintln!("[{}] Warning: {}", timestamp(), warning);
            }
        }
        Err(error) => {
            println!("[{}] Build failed", timestamp());
            eprintln!("[{}] Error: {}", timestamp(), error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;
    use tempfile::TempDir;

    fn resolution_failure(path: &str) -> Result<BuildResult, BuildError> {
        Err(BuildError::resolution(path, "not found"))
    }

    fn success() -> Result<BuildResult, BuildError> {
        Ok(BuildResult::built(Default::default(), 1))
    }

    #[test]
    fn test_is_relevant_file() {
        let out = Path::new("/project/dist");
        assert!(is_relevant_file(Path::new("/project/src/js/main.js"), out));
        assert!(is_relevant_file(Path::new("/project/src/css/site.scss"), out));
        assert!(is_relevant_file(Path::new("/project/src/index.html"), out));
        assert!(is_relevant_file(Path::new("/project/src/images/logo.png"), out));
        assert!(!is_relevant_file(Path::new("/project/src/readme.md"), out));
        assert!(!is_relevant_file(Path::new("/project/src/noextension"), out));
        assert!(!is_relevant_file(Path::new("/project/dist/bundle.js"), out));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(50)), "50ms");
        assert_eq!(format_duration(Duration::from_millis(999)), "999ms");
        assert_eq!(format_duration(Duration::from_millis(1000)), "1.00s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }

    #[test]
    fn test_watch_error_source_not_found() {
        let temp = TempDir::new().unwrap();
        let context = BuildContext::new(default_config(), temp.path().join("missing"));
        let result = watch_and_rebuild(WatchOptions::new(context));
        assert!(matches!(result, Err(WatchError::SourceNotFound(_))));
    }

    #[test]
    fn test_do_build_runs_incremental_build() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("src/js")).unwrap();
        std::fs::write(temp.path().join("src/js/scripts.js"), "export default 1;").unwrap();
        let options = WatchOptions::new(BuildContext::new(default_config(), temp.path().to_path_buf()));

        assert!(!do_build(&options).unwrap().is_skipped());
        assert!(do_build(&options).unwrap().is_skipped());
        assert!(!do_build(&options.clone().with_force(true)).unwrap().is_skipped());
    }

    #[test]
    fn test_error_tracker_new() {
        let tracker = ErrorTracker::new();
        assert!(!tracker.has_errors());
        assert_eq!(tracker.error_count(), 0);
    }

    #[test]
    fn test_error_tracker_detects_fixed_files() {
        let mut tracker = ErrorTracker::new();

        assert!(tracker.update(&resolution_failure("src/js/a.js")).is_empty());
        assert!(tracker.has_errors());

        let fixed = tracker.update(&resolution_failure("src/js/b.js"));
        assert_eq!(fixed, vec![PathBuf::from("src/js/a.js")]);
        assert_eq!(tracker.error_count(), 1);

        let fixed = tracker.update(&success());
        assert_eq!(fixed, vec![PathBuf::from("src/js/b.js")]);
        assert!(!tracker.has_errors());
    }

    #[test]
    fn test_error_tracker_ignores_pathless_errors() {
        let mut tracker = ErrorTracker::new();
        let outcome = Err(BuildError::Config(crate::config::ConfigError::Validation(vec!["x".into()])));
        tracker.update(&outcome);
        assert!(!tracker.has_errors());
    }
}
