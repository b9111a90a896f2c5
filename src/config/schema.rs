//! Configuration schema types for `sitepack.toml`
//!
//! Defines the structure and validation rules for sitepack project configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Build mode selector
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Readable output
    #[default]
    Development,
    /// Optimized output (minified markup)
    Production,
}

impl Mode {
    /// Whether markup should be minified in this mode.
    pub fn minify_markup(self) -> bool {
        matches!(self, Mode::Production)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Development => write!(f, "development"),
            Mode::Production => write!(f, "production"),
        }
    }
}

/// Project metadata section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name (required)
    pub name: String,
    /// Source directory, watched for changes
    #[serde(default = "default_src")]
    pub src: PathBuf,
    /// Entry script
    #[serde(default = "default_entry")]
    pub entry: PathBuf,
    /// Build output directory
    #[serde(default = "default_out")]
    pub out: PathBuf,
}

fn default_src() -> PathBuf {
    PathBuf::from("src")
}

fn default_entry() -> PathBuf {
    PathBuf::from("src/js/scripts.js")
}

fn default_out() -> PathBuf {
    PathBuf::from("dist")
}

/// Output file naming
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Script bundle filename
    #[serde(default = "default_script")]
    pub script: String,
    /// Style bundle filename
    #[serde(default = "default_style")]
    pub style: String,
    /// Markup document filename
    #[serde(default = "default_document")]
    pub document: String,
    /// Subdirectory for binary assets
    #[serde(default = "default_images")]
    pub images: String,
    /// Asset filename template (`[name]`, `[ext]`, `[hash]`)
    #[serde(default = "default_asset_name")]
    pub asset_name: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            script: default_script(),
            style: default_style(),
            document: default_document(),
            images: default_images(),
            asset_name: default_asset_name(),
        }
    }
}

fn default_script() -> String {
    "bundle.js".to_string()
}

fn default_style() -> String {
    "bundle.css".to_string()
}

fn default_document() -> String {
    "index.html".to_string()
}

fn default_images() -> String {
    "images".to_string()
}

fn default_asset_name() -> String {
    "[name].[ext]".to_string()
}

/// Markup document settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkupConfig {
    /// HTML template the document is rendered from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PathBuf>,
    /// Favicon linked from the document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<PathBuf>,
    /// Title of the generated document when no template is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Browser versions the stylesheet post-processor targets.
///
/// Each value is a major version; unset browsers are not targeted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserTargets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firefox: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safari: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ios_saf: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opera: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samsung: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ie: Option<u32>,
}

impl BrowserTargets {
    /// Whether no browser is targeted.
    pub fn is_empty(&self) -> bool {
        *self == BrowserTargets::default()
    }

    /// Targeted engines as a script target list, e.g. `chrome60,safari11`.
    ///
    /// Android's stock browser has no script engine name of its own and is
    /// left out.
    pub fn engine_list(&self) -> String {
        let engines = [
            ("chrome", self.chrome),
            ("edge", self.edge),
            ("firefox", self.firefox),
            ("safari", self.safari),
            ("ios", self.ios_saf),
            ("opera", self.opera),
            ("samsung", self.samsung),
            ("ie", self.ie),
        ];
        engines
            .iter()
            .filter_map(|(name, version)| version.map(|v| format!("{}{}", name, v)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Stylesheet settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StyleConfig {
    /// Print the style bundle minified
    #[serde(default)]
    pub minify: bool,
    /// Browser targets for vendor prefixing
    #[serde(default)]
    pub targets: BrowserTargets,
}

/// Script settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Syntax target, an ES version (`es2015`) or engine list (`chrome58,safari11`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Script target used when neither `script.target` nor `style.targets` is set
pub const DEFAULT_SCRIPT_TARGET: &str = "es5";

/// Build execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Default build mode
    #[serde(default)]
    pub mode: Mode,
    /// Worker threads for transforms (0 = available parallelism)
    #[serde(default)]
    pub jobs: usize,
    /// Incremental cache file, relative to the project root
    #[serde(default = "default_cache")]
    pub cache: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { mode: Mode::default(), jobs: 0, cache: default_cache() }
    }
}

fn default_cache() -> PathBuf {
    PathBuf::from(".sitepack-cache.json")
}

/// Watch mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Debounce delay in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u32,
    /// Clear terminal between rebuilds
    #[serde(default = "default_true")]
    pub clear_screen: bool,
}

fn default_debounce_ms() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 100, clear_screen: true }
    }
}

/// Complete sitepack.toml configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitepackConfig {
    /// Project metadata (required)
    pub project: ProjectConfig,
    /// Output naming
    #[serde(default)]
    pub output: OutputConfig,
    /// Document settings
    #[serde(default)]
    pub markup: MarkupConfig,
    /// Stylesheet settings
    #[serde(default)]
    pub style: StyleConfig,
    /// Script settings
    #[serde(default)]
    pub script: ScriptConfig,
    /// Build settings
    #[serde(default)]
    pub build: BuildConfig,
    /// Watch mode settings
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    /// Path to the invalid field (e.g., "output.script")
    pub field: String,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sitepack.toml: '{}' {}", self.field, self.message)
    }
}

impl SitepackConfig {
    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        if self.project.name.is_empty() {
            errors.push(ConfigValidationError {
                field: "project.name".to_string(),
                message: "must be a non-empty string".to_string(),
            });
        }

        let is_script = self
            .project
            .entry
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "js" | "mjs"));
        if !is_script {
            errors.push(ConfigValidationError {
                field: "project.entry".to_string(),
                message: "must be a JavaScript file".to_string(),
            });
        }

        let filenames = [
            ("output.script", &self.output.script),
            ("output.style", &self.output.style),
            ("output.document", &self.output.document),
        ];
        for (field, name) in filenames {
            if name.is_empty() || name.contains(['/', '\\']) {
                errors.push(ConfigValidationError {
                    field: field.to_string(),
                    message: "must be a plain filename".to_string(),
                });
            }
        }
        for (i, (field, name)) in filenames.iter().enumerate() {
            if filenames[..i].iter().any(|(_, other)| other == name) {
                errors.push(ConfigValidationError {
                    field: field.to_string(),
                    message: format!("'{}' is already used by another output", name),
                });
            }
        }

        let images = PathBuf::from(&self.output.images);
        if self.output.images.is_empty() || images.is_absolute() {
            errors.push(ConfigValidationError {
                field: "output.images".to_string(),
                message: "must be a relative directory".to_string(),
            });
        }

        let template = &self.output.asset_name;
        if !template.contains("[name]") && !template.contains("[hash]") {
            errors.push(ConfigValidationError {
                field: "output.asset_name".to_string(),
                message: "must contain [name] or [hash]".to_string(),
            });
        }

        if let Some(target) = &self.script.target {
            if let Err(e) = oxc_transformer::TransformOptions::from_target(target) {
                errors.push(ConfigValidationError {
                    field: "script.target".to_string(),
                    message: format!("is not a valid target: {}", e),
                });
            }
        }

        if self.watch.debounce_ms == 0 {
            errors.push(ConfigValidationError {
                field: "watch.debounce_ms".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }

        errors
    }

    /// Syntax target for the script chain: `script.target`, else the
    /// stylesheet browser targets, else ES5.
    pub fn script_target(&self) -> String {
        match &self.script.target {
            Some(target) => target.clone(),
            None if !self.style.targets.is_empty() => self.style.targets.engine_list(),
            None => DEFAULT_SCRIPT_TARGET.to_string(),
        }
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}
