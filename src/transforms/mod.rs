//! Content transform chains.
//!
//! Every content kind has a fixed, ordered chain of steps. A step takes the
//! previous step's payload plus per-node metadata and produces the next
//! payload; the last payload is the node's output.
//!
//! # Module Structure
//!
//! - [`script`] - Syntax down-levelling and ES module lowering
//! - [`style`] - Sass compilation and CSS post-processing
//! - [`markup`] - HTML reference rewriting and minification
//! - [`asset`] - Binary passthrough
//!
//! # Example
//!
//! ```ignore
//! use sitepack::transforms::{ChainRegistry, Payload, TransformMeta};
//!
//! let registry = ChainRegistry::new(&config.style, &config.script_target())?;
//! let chain = registry.chain_for(node.kind);
//! let output = chain.run(Payload::Text(source), &mut meta)?;
//! ```

pub mod asset;
pub mod markup;
pub mod script;
pub mod style;

use std::collections::HashMap;
use std::path::PathBuf;

use crate::build::BuildError;
use crate::classify::ContentKind;
use crate::config::{ConfigError, ConfigValidationError, Mode, StyleConfig};

pub use asset::Passthrough;
pub use markup::{minify_markup, Render};
pub use script::{DownLevel, LowerModules};
pub use style::{sass_definitions, wrap_in_conditions, PostProcess, PreprocessToCss};

/// Content flowing through a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    /// Take the payload as text; binary payloads are an error.
    pub fn into_text(self) -> Result<String, StepError> {
        match self {
            Payload::Text(text) => Ok(text),
            Payload::Bytes(bytes) => String::from_utf8(bytes)
                .map_err(|e| StepError::new(format!("expected text content: {}", e))),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Bytes(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Payload::Text(text) => text.into_bytes(),
            Payload::Bytes(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where a specifier in the current node led during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
    pub target: PathBuf,
    pub module_id: String,
    pub kind: ContentKind,
    /// Output path of a binary asset, relative to the document
    pub public_path: Option<String>,
}

/// Per-node context handed to every step of a chain.
#[derive(Debug, Clone)]
pub struct TransformMeta {
    pub path: PathBuf,
    pub module_id: String,
    pub kind: ContentKind,
    pub mode: Mode,
    /// Resolved references, keyed by specifier as written
    pub references: HashMap<String, ResolvedReference>,
    /// Sass definitions from imported sheets, compiled ahead of the source
    pub style_prelude: String,
    /// `@import` rules left for the browser, hoisted to the top of the style bundle
    pub hoisted_imports: Vec<String>,
    pub warnings: Vec<String>,
}

impl TransformMeta {
    pub fn new(path: impl Into<PathBuf>, module_id: impl Into<String>, kind: ContentKind, mode: Mode) -> Self {
        Self {
            path: path.into(),
            module_id: module_id.into(),
            kind,
            mode,
            references: HashMap::new(),
            style_prelude: String::new(),
            hoisted_imports: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_references(mut self, references: HashMap<String, ResolvedReference>) -> Self {
        self.references = references;
        self
    }

    pub fn with_style_prelude(mut self, prelude: impl Into<String>) -> Self {
        self.style_prelude = prelude.into();
        self
    }

    pub fn reference(&self, specifier: &str) -> Option<&ResolvedReference> {
        self.references.get(specifier)
    }
}

/// Failure inside a single step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StepError {
    pub message: String,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// One stage of a chain. Steps are pure: they read only their input and
/// the node metadata.
pub trait TransformStep: Send + Sync {
    /// Stable step name, reported in errors.
    fn name(&self) -> &'static str;

    fn apply(&self, input: Payload, meta: &mut TransformMeta) -> Result<Payload, StepError>;
}

/// Ordered steps for one content kind.
pub struct TransformChain {
    kind: ContentKind,
    steps: Vec<Box<dyn TransformStep>>,
}

impl TransformChain {
    pub fn new(kind: ContentKind) -> Self {
        Self { kind, steps: Vec::new() }
    }

    pub fn with_step(mut self, step: impl TransformStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step in order, stopping at the first failure.
    pub fn run(&self, input: Payload, meta: &mut TransformMeta) -> Result<Payload, BuildError> {
        let mut payload = input;
        for step in &self.steps {
            tracing::trace!(module = %meta.module_id, step = step.name(), "transform");
            payload = step.apply(payload, meta).map_err(|e| BuildError::Transform {
                kind: self.kind,
                step: step.name().to_string(),
                path: meta.path.clone(),
                cause: e.message,
            })?;
        }
        Ok(payload)
    }
}

impl std::fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformChain")
            .field("kind", &self.kind)
            .field("steps", &self.step_names())
            .finish()
    }
}

/// Chains for every content kind, fixed for the duration of a run.
#[derive(Debug)]
pub struct ChainRegistry {
    script: TransformChain,
    style: TransformChain,
    markup: TransformChain,
    asset: TransformChain,
}

impl ChainRegistry {
    /// Build the chains; fails when `script_target` is not a known target.
    pub fn new(style: &StyleConfig, script_target: &str) -> Result<Self, BuildError> {
        let down_level = DownLevel::new(script_target).map_err(|e| {
            let invalid = ConfigValidationError {
                field: "script.target".to_string(),
                message: format!("'{}' is not a valid target: {}", script_target, e),
            };
            ConfigError::Validation(vec![invalid.to_string()])
        })?;
        Ok(Self {
            script: TransformChain::new(ContentKind::Script).with_step(down_level).with_step(LowerModules),
            style: TransformChain::new(ContentKind::Stylesheet)
                .with_step(PreprocessToCss)
                .with_step(PostProcess::new(style)),
            markup: TransformChain::new(ContentKind::Markup).with_step(Render),
            asset: TransformChain::new(ContentKind::BinaryAsset).with_step(Passthrough),
        })
    }

    pub fn chain_for(&self, kind: ContentKind) -> &TransformChain {
        match kind {
            ContentKind::Script => &self.script,
            ContentKind::Stylesheet => &self.style,
            ContentKind::Markup => &self.markup,
            ContentKind::BinaryAsset => &self.asset,
        }
    }
}
