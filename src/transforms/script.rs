//! Script chain: syntax down-levelling and module lowering.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use oxc_allocator::Allocator;
use oxc_codegen::Codegen;
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use oxc_transformer::{HelperLoaderMode, TransformOptions, Transformer};
use regex::Regex;

use super::{Payload, StepError, TransformMeta, TransformStep};
use crate::script::{lower_module, ModuleSyntax, HELPERS_OBJECT, SUPPORTED_HELPERS};

static HELPER_USE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bbabelHelpers\.([A-Za-z0-9_$]+)").unwrap());

/// Rewrites syntax newer than the configured target into older forms.
///
/// Helpers the rewritten code needs are read from the bundle's
/// `babelHelpers` object; only helpers the bundle runtime provides are
/// accepted.
#[derive(Debug, Clone)]
pub struct DownLevel {
    target: String,
    options: TransformOptions,
}

impl DownLevel {
    /// Build the step for an ES version (`es2015`) or engine list
    /// (`chrome58,safari11`).
    pub fn new(target: &str) -> Result<Self, String> {
        let mut options = TransformOptions::from_target(target)?;
        options.helper_loader.mode = HelperLoaderMode::External;
        Ok(Self { target: target.to_string(), options })
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl TransformStep for DownLevel {
    fn name(&self) -> &'static str {
        "syntax-down-level"
    }

    fn apply(&self, input: Payload, meta: &mut TransformMeta) -> Result<Payload, StepError> {
        let source = input.into_text()?;
        let allocator = Allocator::default();
        let parsed = Parser::new(&allocator, &source, SourceType::mjs()).parse();
        if let Some(error) = parsed.errors.first() {
            return Err(StepError::new(format!("syntax error: {}", error)));
        }
        let mut program = parsed.program;

        let semantic = SemanticBuilder::new().build(&program).semantic;
        let (symbols, scopes) = semantic.into_symbol_table_and_scope_tree();
        let transformed = Transformer::new(&allocator, &meta.path, &self.options)
            .build_with_symbols_and_scopes(symbols, scopes, &mut program);
        if let Some(error) = transformed.errors.first() {
            return Err(StepError::new(format!("cannot lower to {}: {}", self.target, error)));
        }

        let code = Codegen::new().build(&program).code;
        let missing: BTreeSet<&str> = HELPER_USE
            .captures_iter(&code)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|name| !SUPPORTED_HELPERS.contains(name))
            .collect();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.into_iter().collect();
            return Err(StepError::new(format!(
                "lowering to {} needs {} helper(s) the bundle runtime lacks: {}",
                self.target,
                HELPERS_OBJECT,
                names.join(", ")
            )));
        }
        Ok(Payload::Text(code))
    }
}

/// Rewrites ES module syntax into a `__define` registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowerModules;

impl TransformStep for LowerModules {
    fn name(&self) -> &'static str {
        "lower-modules"
    }

    fn apply(&self, input: Payload, meta: &mut TransformMeta) -> Result<Payload, StepError> {
        let source = input.into_text()?;
        let syntax = ModuleSyntax::parse(&source).map_err(|e| StepError::new(e.to_string()))?;
        let lowered = lower_module(&source, &syntax, &meta.module_id, |specifier| {
            meta.reference(specifier).map(|r| r.module_id.clone())
        })
        .map_err(|e| StepError::new(e.to_string()))?;
        Ok(Payload::Text(lowered))
    }
}
