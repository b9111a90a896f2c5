//! Module dependency graph.
//!
//! The graph holds every file reachable from the build roots, in discovery
//! order, together with the references between them. It is produced by the
//! [`Resolver`] and is read-only afterwards; file contents are loaded lazily
//! and cached once per node so worker threads can share the graph.
//!
//! # Example
//!
//! ```ignore
//! use sitepack::graph::Resolver;
//!
//! let graph = Resolver::new(project_root).resolve_roots(&entry, None, None)?;
//! for id in graph.script_order() {
//!     println!("{}", graph.node(id).id);
//! }
//! ```

pub mod references;
pub mod resolver;
pub mod specifier;

pub use resolver::{resolve, Resolver};

use once_cell::sync::OnceCell;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::build::BuildError;
use crate::classify::ContentKind;

/// Index of a node; equal to its discovery index.
pub type NodeId = usize;

/// How one file references another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceKind {
    /// Script `import` / `export from` / `import()`
    Import,
    /// Stylesheet `@import`
    StyleImport,
    /// Stylesheet `url(...)`
    UrlReference,
    /// Attribute reference in markup
    MarkupAsset,
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceKind::Import => write!(f, "import"),
            ReferenceKind::StyleImport => write!(f, "style-import"),
            ReferenceKind::UrlReference => write!(f, "url-reference"),
            ReferenceKind::MarkupAsset => write!(f, "markup-asset"),
        }
    }
}

/// An outgoing reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub target: NodeId,
    /// The reference exactly as written in the source
    pub specifier: String,
    pub kind: ReferenceKind,
    /// Media, `supports()` or `layer` condition of a stylesheet import
    pub condition: Option<String>,
}

/// A file in the graph.
#[derive(Debug)]
pub struct ModuleNode {
    /// Absolute, normalized path
    pub path: PathBuf,
    /// Project-relative path with forward slashes
    pub id: String,
    pub kind: ContentKind,
    /// First-visit order
    pub index: NodeId,
    /// Outgoing references in source order
    pub edges: Vec<Edge>,
    /// Whether the node's own references were followed
    pub expanded: bool,
    content: OnceCell<Arc<[u8]>>,
}

impl ModuleNode {
    pub(crate) fn new(path: PathBuf, id: String, kind: ContentKind, index: NodeId) -> Self {
        Self { path, id, kind, index, edges: Vec::new(), expanded: false, content: OnceCell::new() }
    }

    /// Raw file content, read on first access.
    pub fn content(&self) -> Result<&[u8], BuildError> {
        self.content.get_or_try_init(|| self.load()).map(|bytes| &bytes[..])
    }

    fn load(&self) -> Result<Arc<[u8]>, BuildError> {
        std::fs::read(&self.path)
            .map(Arc::from)
            .map_err(|e| BuildError::resolution(&self.path, format!("cannot read file: {}", e)))
    }

    /// File content as UTF-8 text.
    pub fn text(&self) -> Result<&str, BuildError> {
        std::str::from_utf8(self.content()?)
            .map_err(|e| BuildError::resolution(&self.path, format!("file is not valid UTF-8: {}", e)))
    }

    /// Shared handle to the content, for callers that must not borrow the node.
    pub(crate) fn shared_content(&self) -> Result<Arc<[u8]>, BuildError> {
        self.content.get_or_try_init(|| self.load()).cloned()
    }

    /// Edges of one kind.
    pub fn edges_of(&self, kind: ReferenceKind) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }
}

/// Resolved dependency graph of a build.
#[derive(Debug)]
pub struct DependencyGraph {
    root: PathBuf,
    nodes: Vec<ModuleNode>,
    index: HashMap<PathBuf, NodeId>,
    entry: NodeId,
    template: Option<NodeId>,
    favicon: Option<NodeId>,
    warnings: Vec<String>,
}

impl DependencyGraph {
    pub(crate) fn new(
        root: PathBuf,
        nodes: Vec<ModuleNode>,
        index: HashMap<PathBuf, NodeId>,
        entry: NodeId,
    ) -> Self {
        Self { root, nodes, index, entry, template: None, favicon: None, warnings: Vec::new() }
    }

    pub(crate) fn with_template(mut self, template: Option<NodeId>) -> Self {
        self.template = template;
        self
    }

    pub(crate) fn with_favicon(mut self, favicon: Option<NodeId>) -> Self {
        self.favicon = favicon;
        self
    }

    pub(crate) fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Directory module ids are relative to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Nodes in discovery order.
    pub fn nodes(&self) -> &[ModuleNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &ModuleNode {
        &self.nodes[id]
    }

    /// Look a node up by its normalized path.
    pub fn get(&self, path: &Path) -> Option<&ModuleNode> {
        self.index.get(path).map(|&id| &self.nodes[id])
    }

    pub fn entry(&self) -> &ModuleNode {
        &self.nodes[self.entry]
    }

    /// Document template root, if configured.
    pub fn template(&self) -> Option<&ModuleNode> {
        self.template.map(|id| &self.nodes[id])
    }

    /// Favicon root, if configured.
    pub fn favicon(&self) -> Option<&ModuleNode> {
        self.favicon.map(|id| &self.nodes[id])
    }

    /// Non-fatal findings from resolution.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes of one kind in discovery order.
    pub fn nodes_of(&self, kind: ContentKind) -> impl Iterator<Item = &ModuleNode> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    /// Script nodes with dependencies before dependents.
    pub fn script_order(&self) -> Vec<NodeId> {
        self.topological_order(ContentKind::Script, ReferenceKind::Import)
    }

    /// Stylesheet nodes with imported sheets before their importers.
    pub fn style_order(&self) -> Vec<NodeId> {
        self.topological_order(ContentKind::Stylesheet, ReferenceKind::StyleImport)
    }

    /// Conditions a stylesheet's rules apply under, one entry per distinct
    /// import path reaching it, outermost condition first.
    ///
    /// An empty entry means some path applies the sheet unconditionally; a
    /// sheet no stylesheet imports (a bundle root) always has one.
    pub fn style_conditions(&self, id: NodeId) -> Vec<Vec<&str>> {
        let mut paths: Vec<Vec<&str>> = Vec::new();
        for node in &self.nodes {
            for edge in node.edges.iter().filter(|e| e.target == id) {
                let style_import =
                    edge.kind == ReferenceKind::StyleImport && node.kind == ContentKind::Stylesheet;
                let parents = if style_import && node.index != id {
                    self.style_conditions(node.index)
                } else {
                    vec![Vec::new()]
                };
                for mut path in parents {
                    if let (true, Some(condition)) = (style_import, edge.condition.as_deref()) {
                        path.push(condition);
                    }
                    if !paths.contains(&path) {
                        paths.push(path);
                    }
                }
            }
        }
        if paths.is_empty() {
            paths.push(Vec::new());
        }
        paths
    }

    /// Kahn's algorithm over nodes of `kind` and edges of `edge_kind` between
    /// them. Ready nodes leave a min-heap on discovery index, so ties follow
    /// first-discovery order.
    fn topological_order(&self, kind: ContentKind, edge_kind: ReferenceKind) -> Vec<NodeId> {
        let member = |id: NodeId| self.nodes[id].kind == kind;
        let mut pending: HashMap<NodeId, usize> = HashMap::new();
        let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

        for node in self.nodes.iter().filter(|n| n.kind == kind) {
            let mut deps: Vec<NodeId> = node
                .edges_of(edge_kind)
                .map(|e| e.target)
                .filter(|&t| member(t) && t != node.index)
                .collect();
            deps.sort_unstable();
            deps.dedup();
            for &dep in &deps {
                dependents.entry(dep).or_default().push(node.index);
            }
            pending.insert(node.index, deps.len());
        }

        let mut ready: BinaryHeap<Reverse<NodeId>> =
            pending.iter().filter(|(_, &count)| count == 0).map(|(&id, _)| Reverse(id)).collect();
        let mut order = Vec::with_capacity(pending.len());

        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for &dependent in dependents.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(count) = pending.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse(dependent));
                    }
                }
            }
        }

        // Cycles are rejected during resolution; keep anything left over in
        // discovery order rather than dropping it.
        if order.len() < pending.len() {
            let mut rest: Vec<NodeId> =
                pending.keys().copied().filter(|id| !order.contains(id)).collect();
            rest.sort_unstable();
            order.extend(rest);
        }
        order
    }

    /// Non-script nodes that some script imports, in discovery order.
    pub fn script_imported_non_scripts(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes_of(ContentKind::Script)
            .flat_map(|n| n.edges_of(ReferenceKind::Import))
            .map(|e| e.target)
            .filter(|&t| self.nodes[t].kind != ContentKind::Script)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Scripts referenced from markup, in discovery order.
    pub fn markup_scripts(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes_of(ContentKind::Markup)
            .flat_map(|n| n.edges_of(ReferenceKind::MarkupAsset))
            .map(|e| e.target)
            .filter(|&t| self.nodes[t].kind == ContentKind::Script)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Stylesheets transitively `@import`ed by `id`, dependencies first.
    pub fn style_imports_of(&self, id: NodeId) -> Vec<NodeId> {
        fn walk(graph: &DependencyGraph, id: NodeId, seen: &mut Vec<NodeId>) {
            for edge in graph.nodes[id].edges_of(ReferenceKind::StyleImport) {
                if !seen.contains(&edge.target) && edge.target != id {
                    walk(graph, edge.target, seen);
                    if !seen.contains(&edge.target) {
                        seen.push(edge.target);
                    }
                }
            }
        }
        let mut seen = Vec::new();
        walk(self, id, &mut seen);
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(kinds: &[(&str, ContentKind)], edges: &[(NodeId, NodeId, ReferenceKind)]) -> DependencyGraph {
        let mut nodes: Vec<ModuleNode> = kinds
            .iter()
            .enumerate()
            .map(|(i, (name, kind))| ModuleNode::new(PathBuf::from(name), name.to_string(), *kind, i))
            .collect();
        for &(from, to, kind) in edges {
            let specifier = nodes[to].id.clone();
            nodes[from].edges.push(Edge { target: to, specifier, kind, condition: None });
        }
        let index = nodes.iter().map(|n| (n.path.clone(), n.index)).collect();
        DependencyGraph::new(PathBuf::from("/"), nodes, index, 0)
    }

    #[test]
    fn test_script_order_dependencies_first() {
        use ContentKind::Script;
        let g = graph(
            &[("main.js", Script), ("a.js", Script), ("shared.js", Script), ("b.js", Script)],
            &[
                (0, 1, ReferenceKind::Import),
                (1, 2, ReferenceKind::Import),
                (0, 3, ReferenceKind::Import),
                (3, 2, ReferenceKind::Import),
            ],
        );
        assert_eq!(g.script_order(), vec![2, 1, 3, 0]);
    }

    #[test]
    fn test_script_order_ties_follow_discovery() {
        use ContentKind::Script;
        let g = graph(
            &[("main.js", Script), ("x.js", Script), ("y.js", Script)],
            &[(0, 1, ReferenceKind::Import), (0, 2, ReferenceKind::Import)],
        );
        assert_eq!(g.script_order(), vec![1, 2, 0]);
    }

    #[test]
    fn test_style_order_and_transitive_imports() {
        use ContentKind::{Script, Stylesheet};
        let g = graph(
            &[
                ("main.js", Script),
                ("style.scss", Stylesheet),
                ("base.scss", Stylesheet),
                ("vars.scss", Stylesheet),
            ],
            &[
                (0, 1, ReferenceKind::Import),
                (1, 2, ReferenceKind::StyleImport),
                (2, 3, ReferenceKind::StyleImport),
            ],
        );
        assert_eq!(g.style_order(), vec![3, 2, 1]);
        assert_eq!(g.style_imports_of(1), vec![3, 2]);
        assert_eq!(g.script_imported_non_scripts(), vec![1]);
    }

    #[test]
    fn test_style_conditions_nest_along_import_paths() {
        use ContentKind::{Script, Stylesheet};
        let mut g = graph(
            &[
                ("main.js", Script),
                ("style.css", Stylesheet),
                ("print.css", Stylesheet),
                ("wide.css", Stylesheet),
                ("shared.css", Stylesheet),
            ],
            &[
                (0, 1, ReferenceKind::Import),
                (1, 2, ReferenceKind::StyleImport),
                (1, 4, ReferenceKind::StyleImport),
                (2, 3, ReferenceKind::StyleImport),
                (2, 4, ReferenceKind::StyleImport),
            ],
        );
        g.nodes[1].edges[0].condition = Some("print".into());
        g.nodes[2].edges[0].condition = Some("(min-width: 40em)".into());

        assert_eq!(g.style_conditions(1), vec![Vec::<&str>::new()]);
        assert_eq!(g.style_conditions(2), vec![vec!["print"]]);
        assert_eq!(g.style_conditions(3), vec![vec!["print", "(min-width: 40em)"]]);
        assert_eq!(g.style_conditions(4), vec![vec![], vec!["print"]]);
    }

    #[test]
    fn test_markup_scripts() {
        use ContentKind::{Markup, Script};
        let g = graph(
            &[("main.js", Script), ("index.html", Markup), ("legacy.js", Script)],
            &[(1, 2, ReferenceKind::MarkupAsset)],
        );
        assert_eq!(g.markup_scripts(), vec![2]);
        assert_eq!(g.script_order(), vec![0, 2]);
    }

    #[test]
    fn test_reference_kind_display() {
        assert_eq!(ReferenceKind::StyleImport.to_string(), "style-import");
        assert_eq!(ReferenceKind::MarkupAsset.to_string(), "markup-asset");
    }
}
