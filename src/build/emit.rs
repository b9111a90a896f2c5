//! Artifact aggregation and emission.
//!
//! [`Emitter::assemble`] builds every artifact in memory; only when all of
//! them exist does [`Emitter::write`] touch the output directory, so a failed
//! build leaves no partial output behind.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::build::manifest::{Artifact, ArtifactKind, ArtifactManifest};
use crate::build::pipeline::NodeOutputs;
use crate::build::plan::AssetPlan;
use crate::build::BuildError;
use crate::classify::ContentKind;
use crate::config::{Mode, SitepackConfig};
use crate::graph::{DependencyGraph, NodeId};
use crate::script::{
    empty_module, quote, require_call, value_module, BUNDLE_CLOSE, BUNDLE_OPEN, HELPERS, HELPERS_OBJECT, RUNTIME,
};
use crate::transforms::{minify_markup, wrap_in_conditions};

/// Escape text for an HTML text node or attribute.
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

/// Offset of the first `<name` tag (or `</name` with a leading `/` in
/// `name`), not counting longer names such as `<header` for `head`.
fn find_tag(lower: &str, name: &str) -> Option<usize> {
    let needle = format!("<{}", name);
    lower.match_indices(&needle).map(|(at, _)| at).find(|&at| {
        lower[at + needle.len()..]
            .chars()
            .next()
            .map_or(true, |c| c == '>' || c == '/' || c.is_ascii_whitespace())
    })
}

/// Insert tags before `</head>`, after `<head>` when there is no closing
/// tag, or at the very start otherwise.
fn inject_head(document: &str, tags: &str) -> String {
    let lower = document.to_ascii_lowercase();
    let at = match find_tag(&lower, "/head") {
        Some(close) => close,
        None => match find_tag(&lower, "head") {
            Some(open) => lower[open..].find('>').map_or(0, |p| open + p + 1),
            None => 0,
        },
    };
    let mut out = String::with_capacity(document.len() + tags.len());
    out.push_str(&document[..at]);
    out.push_str(tags);
    out.push_str(&document[at..]);
    out
}

/// Assembles and writes the artifacts of a build.
pub struct Emitter<'a> {
    config: &'a SitepackConfig,
    plan: &'a AssetPlan,
    mode: Mode,
}

impl<'a> Emitter<'a> {
    pub fn new(config: &'a SitepackConfig, plan: &'a AssetPlan, mode: Mode) -> Self {
        Self { config, plan, mode }
    }

    fn text_of<'o>(&self, graph: &DependencyGraph, outputs: &'o NodeOutputs, id: NodeId) -> Result<&'o str, BuildError> {
        outputs
            .get(id)
            .and_then(|o| o.text())
            .ok_or_else(|| BuildError::resolution(&graph.node(id).path, "no text output for module"))
    }

    /// Module registry runtime, syntax helpers when a module uses them,
    /// every script module in dependency order, value modules for
    /// non-scripts that scripts import, then the calls that start the
    /// entry and markup-referenced scripts.
    pub fn script_bundle(&self, graph: &DependencyGraph, outputs: &NodeOutputs) -> Result<String, BuildError> {
        let mut modules = String::new();
        for id in graph.script_order() {
            modules.push_str(self.text_of(graph, outputs, id)?);
        }

        let mut bundle = String::new();
        bundle.push_str(BUNDLE_OPEN);
        bundle.push_str(RUNTIME);
        if modules.contains(&format!("{}.", HELPERS_OBJECT)) {
            bundle.push_str(HELPERS);
        }
        bundle.push_str(&modules);

        for id in graph.script_imported_non_scripts() {
            let node = graph.node(id);
            let module = match node.kind {
                ContentKind::BinaryAsset => {
                    let public = self.plan.public_path(id).unwrap_or_default();
                    value_module(&node.id, &quote(public))
                }
                ContentKind::Markup => value_module(&node.id, &quote(self.text_of(graph, outputs, id)?)),
                ContentKind::Stylesheet | ContentKind::Script => empty_module(&node.id),
            };
            bundle.push_str(&module);
        }

        let entry = graph.entry();
        bundle.push_str(&require_call(&entry.id));
        for id in graph.markup_scripts() {
            if id != entry.index {
                bundle.push_str(&require_call(&graph.node(id).id));
            }
        }
        bundle.push_str(BUNDLE_CLOSE);
        Ok(bundle)
    }

    /// Browser-level `@import`s first, then every sheet with imported
    /// sheets before their importers. A sheet reached only through
    /// conditional imports is wrapped in their conditions, once per path.
    pub fn style_bundle(&self, graph: &DependencyGraph, outputs: &NodeOutputs) -> Result<String, BuildError> {
        let order = graph.style_order();
        let mut imports: Vec<&str> = Vec::new();
        for id in &order {
            for rule in outputs.get(*id).map(|o| o.hoisted_imports.as_slice()).unwrap_or_default() {
                if !imports.contains(&rule.as_str()) {
                    imports.push(rule);
                }
            }
        }

        let mut bundle = String::new();
        for rule in imports {
            bundle.push_str(rule);
            bundle.push('\n');
        }
        for id in order {
            let css = self.text_of(graph, outputs, id)?;
            let paths = graph.style_conditions(id);
            if paths.iter().any(Vec::is_empty) {
                bundle.push_str(css);
            } else {
                for conditions in &paths {
                    bundle.push_str(&wrap_in_conditions(css, conditions));
                }
            }
        }
        Ok(bundle)
    }

    fn default_document(&self) -> String {
        let title = self.config.markup.title.as_deref().unwrap_or(&self.config.project.name);
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n<title>{}</title>\n</head>\n<body>\n</body>\n</html>\n",
            escape_html(title)
        )
    }

    /// The rendered template (or a generated document) with the favicon,
    /// style bundle and script bundle linked from its head.
    pub fn document(&self, graph: &DependencyGraph, outputs: &NodeOutputs) -> Result<String, BuildError> {
        let document = match graph.template() {
            Some(template) => self.text_of(graph, outputs, template.index)?.to_string(),
            None if self.mode.minify_markup() => minify_markup(&self.default_document()),
            None => self.default_document(),
        };

        let output = &self.config.output;
        let mut tags = Vec::new();
        if let Some(href) = graph.favicon().and_then(|f| self.plan.public_path(f.index)) {
            tags.push(format!("<link rel=\"icon\" href=\"{}\">", escape_html(href)));
        }
        tags.push(format!("<link href=\"{}\" rel=\"stylesheet\">", escape_html(&output.style)));
        tags.push(format!("<script defer src=\"{}\"></script>", escape_html(&output.script)));

        let injected = match self.mode {
            Mode::Production => tags.concat(),
            Mode::Development => tags.iter().map(|t| format!("{}\n", t)).collect(),
        };
        Ok(inject_head(&document, &injected))
    }

    /// Build every artifact in memory.
    pub fn assemble(&self, graph: &DependencyGraph, outputs: &NodeOutputs) -> Result<Vec<Artifact>, BuildError> {
        let output = &self.config.output;
        let mut artifacts = vec![
            Artifact::new(ArtifactKind::ScriptBundle, &output.script, self.script_bundle(graph, outputs)?.into_bytes()),
            Artifact::new(ArtifactKind::StyleBundle, &output.style, self.style_bundle(graph, outputs)?.into_bytes()),
            Artifact::new(ArtifactKind::MarkupDocument, &output.document, self.document(graph, outputs)?.into_bytes()),
        ];

        for (id, path) in self.plan.entries() {
            let content = outputs
                .get(id)
                .map(|o| o.payload.as_bytes().to_vec())
                .ok_or_else(|| BuildError::resolution(&graph.node(id).path, "no output for asset"))?;
            artifacts.push(Artifact::new(ArtifactKind::BinaryAsset, PathBuf::from(path), content));
        }
        Ok(artifacts)
    }

    /// Write assembled artifacts under `out_dir`.
    pub fn write(&self, artifacts: &[Artifact], out_dir: &Path) -> Result<ArtifactManifest, BuildError> {
        std::fs::create_dir_all(out_dir).map_err(|e| BuildError::io(out_dir, e))?;
        for artifact in artifacts {
            let path = out_dir.join(&artifact.path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
            }
            std::fs::write(&path, &artifact.content).map_err(|e| BuildError::io(&path, e))?;
            debug!(kind = %artifact.kind, path = %artifact.path.display(), size = artifact.size(), "wrote artifact");
        }
        Ok(ArtifactManifest::from_artifacts(artifacts))
    }

    /// Assemble, then write.
    pub fn emit(&self, graph: &DependencyGraph, outputs: &NodeOutputs, out_dir: &Path) -> Result<ArtifactManifest, BuildError> {
        let artifacts = self.assemble(graph, outputs)?;
        self.write(&artifacts, out_dir)
    }
}
