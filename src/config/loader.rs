//! Configuration loading and discovery for `sitepack.toml`
//!
//! Provides functions to find, load, and merge configuration.

use super::schema::{
    BuildConfig, MarkupConfig, Mode, OutputConfig, ProjectConfig, ScriptConfig, SitepackConfig, StyleConfig,
    WatchConfig,
};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the project configuration file.
pub const CONFIG_FILENAME: &str = "sitepack.toml";

/// Configuration loading error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// File I/O error
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("Failed to parse sitepack.toml: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error
    #[error("Config validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Validation(Vec<String>),
}

/// CLI arguments that can override config values
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// Override entry script
    pub entry: Option<PathBuf>,
    /// Override output directory
    pub out: Option<PathBuf>,
    /// Override build mode
    pub mode: Option<Mode>,
    /// Number of parallel jobs
    pub jobs: Option<usize>,
}

/// Find sitepack.toml by walking up from the current working directory.
pub fn find_config() -> Option<PathBuf> {
    let cwd = env::current_dir().ok()?;
    find_config_from(cwd)
}

/// Find sitepack.toml by walking up from a specific directory.
pub fn find_config_from(start: PathBuf) -> Option<PathBuf> {
    let mut current = start;

    loop {
        let config_path = current.join(CONFIG_FILENAME);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Load configuration from a sitepack.toml file.
///
/// If a path is provided, loads from that file. Otherwise, uses `find_config()`
/// to locate the config file. If no config file is found, returns a default
/// configuration.
pub fn load_config(path: Option<&Path>) -> Result<SitepackConfig, ConfigError> {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config(),
    };

    match config_path {
        Some(p) => load_config_file(&p),
        None => Ok(default_config()),
    }
}

/// Load configuration from a specific file path.
fn load_config_file(path: &Path) -> Result<SitepackConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let config: SitepackConfig = toml::from_str(&contents)?;
    validated(config)
}

fn validated(config: SitepackConfig) -> Result<SitepackConfig, ConfigError> {
    let errors = config.validate();
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors.into_iter().map(|e| e.to_string()).collect()));
    }
    Ok(config)
}

/// Create a default configuration when no sitepack.toml is found.
///
/// The project name is the current directory name.
pub fn default_config() -> SitepackConfig {
    let project_name = env::current_dir()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unnamed".to_string());

    SitepackConfig {
        project: ProjectConfig {
            name: project_name,
            src: PathBuf::from("src"),
            entry: PathBuf::from("src/js/scripts.js"),
            out: PathBuf::from("dist"),
        },
        output: OutputConfig::default(),
        markup: MarkupConfig::default(),
        style: StyleConfig::default(),
        script: ScriptConfig::default(),
        build: BuildConfig::default(),
        watch: WatchConfig::default(),
    }
}

/// Merge CLI overrides into a configuration.
///
/// CLI arguments take precedence over config file values. The merged
/// configuration is validated again.
pub fn merge_cli_overrides(
    mut config: SitepackConfig,
    overrides: &CliOverrides,
) -> Result<SitepackConfig, ConfigError> {
    if let Some(ref entry) = overrides.entry {
        config.project.entry = entry.clone();
    }

    if let Some(ref out) = overrides.out {
        config.project.out = out.clone();
    }

    if let Some(mode) = overrides.mode {
        config.build.mode = mode;
    }

    if let Some(jobs) = overrides.jobs {
        config.build.jobs = jobs;
    }

    validated(config)
}

/// Get the project root directory from a config file path.
///
/// Returns the parent directory of the sitepack.toml file.
pub fn project_root(config_path: &Path) -> Option<&Path> {
    config_path.parent()
}

/// Resolve a path relative to the project root.
///
/// If the path is absolute, returns it unchanged.
/// If relative, joins it with the project root.
pub fn resolve_path(project_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let config_path = dir.join(CONFIG_FILENAME);
        File::create(&config_path)
            .expect("should create config file")
            .write_all(content.as_bytes())
            .expect("should write config content");
        config_path
    }

    #[test]
    fn test_find_config_in_current_dir() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(temp.path(), "[project]\nname = \"test\"");

        let found = find_config_from(temp.path().to_path_buf());
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_find_config_in_parent_dir() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(temp.path(), "[project]\nname = \"test\"");

        let subdir = temp.path().join("src").join("js");
        fs::create_dir_all(&subdir).expect("should create subdirectories");

        let found = find_config_from(subdir);
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_find_config_not_found() {
        let temp = TempDir::new().expect("should create temp dir");
        let found = find_config_from(temp.path().to_path_buf());
        assert_eq!(found, None);
    }

    #[test]
    fn test_load_config_from_file() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(
            temp.path(),
            "[project]\nname = \"shop\"\nentry = \"web/main.js\"\n\n[build]\nmode = \"production\"",
        );

        let config = load_config(Some(&config_path)).expect("should load config");
        assert_eq!(config.project.name, "shop");
        assert_eq!(config.project.entry, PathBuf::from("web/main.js"));
        assert_eq!(config.build.mode, Mode::Production);
    }

    #[test]
    fn test_load_config_parse_error() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(temp.path(), "[project\nname = ");

        let err = load_config(Some(&config_path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_config_validation_error() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(temp.path(), "[project]\nname = \"\"");

        let err = load_config(Some(&config_path)).unwrap_err();
        match err {
            ConfigError::Validation(errors) => {
                assert!(errors.iter().any(|e| e.contains("project.name")))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    #[serial]
    fn test_load_config_without_file_uses_defaults() {
        let temp = TempDir::new().expect("should create temp dir");
        let original = env::current_dir().expect("should read cwd");
        env::set_current_dir(temp.path()).expect("should enter temp dir");

        let config = load_config(None);

        env::set_current_dir(original).expect("should restore cwd");
        let config = config.expect("defaults should load");
        assert_eq!(config.project.entry, PathBuf::from("src/js/scripts.js"));
        assert_eq!(config.project.out, PathBuf::from("dist"));
    }

    #[test]
    fn test_merge_cli_overrides() {
        let overrides = CliOverrides {
            entry: Some(PathBuf::from("app/index.js")),
            out: Some(PathBuf::from("public")),
            mode: Some(Mode::Production),
            jobs: Some(2),
        };

        let config = merge_cli_overrides(default_config(), &overrides).expect("valid overrides");
        assert_eq!(config.project.entry, PathBuf::from("app/index.js"));
        assert_eq!(config.project.out, PathBuf::from("public"));
        assert_eq!(config.build.mode, Mode::Production);
        assert_eq!(config.build.jobs, 2);
    }

    #[test]
    fn test_merge_cli_overrides_revalidates() {
        let overrides =
            CliOverrides { entry: Some(PathBuf::from("app/index.ts")), ..Default::default() };
        assert!(merge_cli_overrides(default_config(), &overrides).is_err());
    }

    #[test]
    fn test_resolve_path() {
        let root = Path::new("/project");
        assert_eq!(resolve_path(root, Path::new("src/js")), PathBuf::from("/project/src/js"));
        assert_eq!(resolve_path(root, Path::new("/abs/dir")), PathBuf::from("/abs/dir"));
    }
}
