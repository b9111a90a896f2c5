//! Build pipeline orchestration.
//!
//! The pipeline resolves the dependency graph, plans asset names, runs every
//! node through its transform chain and hands the outputs to the emitter.
//!
//! # Example
//!
//! ```ignore
//! use sitepack::build::{BuildContext, BuildPipeline};
//! use sitepack::config::load_config;
//!
//! let config = load_config(None)?;
//! let context = BuildContext::new(config, project_root);
//! let result = BuildPipeline::new(context).build()?;
//! println!("{}", result.summary());
//! ```

use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use crate::build::emit::Emitter;
use crate::build::plan::AssetPlan;
use crate::build::{BuildContext, BuildError, BuildResult};
use crate::classify::{ContentKind, StyleSyntax};
use crate::config::Mode;
use crate::graph::{DependencyGraph, ModuleNode, Resolver};
use crate::transforms::{sass_definitions, ChainRegistry, Payload, ResolvedReference, TransformMeta};

/// Transformed output of one node.
#[derive(Debug, Clone)]
pub struct NodeOutput {
    pub path: PathBuf,
    pub kind: ContentKind,
    pub payload: Payload,
    /// `@import` rules a stylesheet leaves to the browser
    pub hoisted_imports: Vec<String>,
    pub warnings: Vec<String>,
}

impl NodeOutput {
    /// Output as text; binary payloads are not valid UTF-8 in general.
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            Payload::Bytes(_) => None,
        }
    }
}

/// Outputs of every node, indexed like the graph.
#[derive(Debug, Clone, Default)]
pub struct NodeOutputs {
    outputs: Vec<NodeOutput>,
}

impl NodeOutputs {
    pub fn get(&self, id: usize) -> Option<&NodeOutput> {
        self.outputs.get(id)
    }

    /// Look an output up by source path.
    pub fn by_path(&self, path: &Path) -> Option<&NodeOutput> {
        self.outputs.iter().find(|o| o.path == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeOutput> {
        self.outputs.iter()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Warnings raised by transforms, in discovery order.
    pub fn warnings(&self) -> Vec<String> {
        self.outputs.iter().flat_map(|o| o.warnings.iter().cloned()).collect()
    }
}

/// Runs every node of a graph through its transform chain on a worker pool.
pub struct Orchestrator<'a> {
    registry: &'a ChainRegistry,
    plan: &'a AssetPlan,
    /// Worker threads (0 = available parallelism)
    jobs: usize,
}

impl<'a> Orchestrator<'a> {
    pub fn new(registry: &'a ChainRegistry, plan: &'a AssetPlan) -> Self {
        Self { registry, plan, jobs: 0 }
    }

    /// Set the number of worker threads.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Transform every node.
    ///
    /// All nodes are processed before the results are inspected; the error
    /// reported is the first one in discovery order.
    pub fn run(&self, graph: &DependencyGraph, mode: Mode) -> Result<NodeOutputs, BuildError> {
        let _span = tracing::debug_span!("transform", modules = graph.len()).entered();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(self.jobs).build()?;
        debug!(workers = pool.current_num_threads(), "worker pool started");

        let results: Vec<Result<NodeOutput, BuildError>> = pool.install(|| {
            graph.nodes().par_iter().map(|node| self.transform(graph, node, mode)).collect()
        });
        let outputs = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        Ok(NodeOutputs { outputs })
    }

    fn references(&self, graph: &DependencyGraph, node: &ModuleNode) -> HashMap<String, ResolvedReference> {
        node.edges
            .iter()
            .map(|edge| {
                let target = graph.node(edge.target);
                let reference = ResolvedReference {
                    target: target.path.clone(),
                    module_id: target.id.clone(),
                    kind: target.kind,
                    public_path: self.plan.public_path(edge.target).map(str::to_string),
                };
                (edge.specifier.clone(), reference)
            })
            .collect()
    }

    /// Definitions of the same-syntax Sass sheets a sheet imports.
    fn style_prelude(&self, graph: &DependencyGraph, node: &ModuleNode) -> Result<String, BuildError> {
        let syntax = StyleSyntax::from_path(&node.path);
        if syntax == StyleSyntax::Css {
            return Ok(String::new());
        }
        let mut prelude = String::new();
        for id in graph.style_imports_of(node.index) {
            let imported = graph.node(id);
            if StyleSyntax::from_path(&imported.path) == syntax {
                prelude.push_str(&sass_definitions(imported.text()?, syntax));
            }
        }
        Ok(prelude)
    }

    fn transform(&self, graph: &DependencyGraph, node: &ModuleNode, mode: Mode) -> Result<NodeOutput, BuildError> {
        let input = if node.kind.is_text() {
            Payload::Text(node.text()?.to_string())
        } else {
            Payload::Bytes(node.content()?.to_vec())
        };

        let mut meta = TransformMeta::new(&node.path, &node.id, node.kind, mode)
            .with_references(self.references(graph, node));
        if node.kind == ContentKind::Stylesheet {
            meta = meta.with_style_prelude(self.style_prelude(graph, node)?);
        }

        let payload = self.registry.chain_for(node.kind).run(input, &mut meta)?;
        Ok(NodeOutput {
            path: node.path.clone(),
            kind: node.kind,
            payload,
            hoisted_imports: meta.hoisted_imports,
            warnings: meta.warnings,
        })
    }
}

/// Build pipeline for executing builds.
pub struct BuildPipeline {
    /// Build context
    context: BuildContext,
}

impl BuildPipeline {
    /// Create a new build pipeline.
    pub fn new(context: BuildContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    /// Resolve the dependency graph from the configured roots.
    pub fn resolve(&self) -> Result<DependencyGraph, BuildError> {
        let template = self.context.template_path();
        let favicon = self.context.favicon_path();
        Resolver::new(self.context.project_root()).resolve_roots(
            &self.context.entry_path(),
            template.as_deref(),
            favicon.as_deref(),
        )
    }

    /// Run the build pipeline.
    ///
    /// Resolves the graph, transforms every module and writes the artifacts.
    pub fn build(&self) -> Result<BuildResult, BuildError> {
        let start = Instant::now();
        let graph = self.resolve()?;
        let result = self.build_graph(&graph)?;
        Ok(result.with_duration(start.elapsed()))
    }

    /// Run the build for an already resolved graph.
    pub fn build_graph(&self, graph: &DependencyGraph) -> Result<BuildResult, BuildError> {
        let start = Instant::now();
        let config = self.context.config();
        let mode = self.context.mode();

        let plan = AssetPlan::new(graph, &config.output)?;
        let registry = ChainRegistry::new(&config.style, &config.script_target())?;
        let outputs = Orchestrator::new(&registry, &plan).with_jobs(config.build.jobs).run(graph, mode)?;

        let manifest = Emitter::new(config, &plan, mode).emit(graph, &outputs, &self.context.out_dir())?;
        info!(artifacts = manifest.len(), modules = graph.len(), %mode, "build complete");

        let mut warnings = graph.warnings().to_vec();
        warnings.extend(outputs.warnings());
        Ok(BuildResult::built(manifest, graph.len())
            .with_warnings(warnings)
            .with_duration(start.elapsed()))
    }
}
