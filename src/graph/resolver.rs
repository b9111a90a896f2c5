//! Depth-first module graph resolution.
//!
//! Walks references from the build roots, classifying and resolving each
//! one, and records nodes in first-visit order. A per-node visit state
//! detects cycles: reaching a node that is still in progress closes a loop.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::references::{scan_markup, scan_stylesheet};
use super::specifier::{is_external, resolve_script, resolve_style_import, resolve_url, strip_suffix};
use super::{DependencyGraph, Edge, ModuleNode, NodeId, ReferenceKind};
use crate::build::BuildError;
use crate::classify::{classify, ContentKind, StyleSyntax};
use crate::script::ModuleSyntax;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    /// On the current traversal path
    InProgress,
    /// References followed
    Done,
    /// Reached only through non-recursing edges; references not followed yet
    Leaf,
}

/// How far to go into a node reached by an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Follow {
    /// Record the node without reading it
    Leaf,
    /// Follow its references; reaching it again on the current path is a cycle
    Expand,
    /// Follow its references, but the edge that reached it (a markup link)
    /// orders nothing, so it never closes a cycle
    Linked,
}

/// A node on the current traversal path.
#[derive(Debug, Clone, Copy)]
struct Frame {
    id: NodeId,
    linked: bool,
}

/// A reference found while scanning a node, before resolution.
struct PendingReference {
    offset: usize,
    specifier: String,
    kind: ReferenceKind,
    condition: Option<String>,
}

/// Resolves the dependency graph of a project.
pub struct Resolver {
    root: PathBuf,
    nodes: Vec<ModuleNode>,
    index: HashMap<PathBuf, NodeId>,
    state: Vec<VisitState>,
    stack: Vec<Frame>,
    warnings: Vec<String>,
}

/// Resolve the graph reachable from a single entry script.
///
/// Module ids are relative to the entry's directory.
pub fn resolve(entry: &Path) -> Result<DependencyGraph, BuildError> {
    let entry = normalize(entry)
        .map_err(|reason| BuildError::resolution(entry, format!("entry not found ({})", reason)))?;
    let root = entry.parent().map(Path::to_path_buf).unwrap_or_default();
    Resolver::new(root).resolve_roots(&entry, None, None)
}

/// Normalize an existing path to an absolute path without `.`/`..` segments.
fn normalize(path: &Path) -> Result<PathBuf, String> {
    dunce::canonicalize(path).map_err(|e| format!("cannot access {}: {}", path.display(), e))
}

impl Resolver {
    /// Create a resolver; module ids are made relative to `project_root`.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let root = project_root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            nodes: Vec::new(),
            index: HashMap::new(),
            state: Vec::new(),
            stack: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Resolve from the entry script plus the optional document template and
    /// favicon roots.
    pub fn resolve_roots(
        mut self,
        entry: &Path,
        template: Option<&Path>,
        favicon: Option<&Path>,
    ) -> Result<DependencyGraph, BuildError> {
        let _span = tracing::debug_span!("resolve", entry = %entry.display()).entered();

        let entry_id = self.visit_root(entry, Follow::Expand, "entry")?;
        if self.nodes[entry_id].kind != ContentKind::Script {
            return Err(BuildError::resolution(entry, "entry must be a script module"));
        }
        let template_id = template.map(|t| self.visit_root(t, Follow::Expand, "template")).transpose()?;
        let favicon_id = favicon.map(|f| self.visit_root(f, Follow::Leaf, "favicon")).transpose()?;

        debug!(modules = self.nodes.len(), "graph resolved");

        Ok(DependencyGraph::new(self.root, self.nodes, self.index, entry_id)
            .with_template(template_id)
            .with_favicon(favicon_id)
            .with_warnings(self.warnings))
    }

    fn visit_root(&mut self, path: &Path, follow: Follow, role: &str) -> Result<NodeId, BuildError> {
        let normalized = normalize(path)
            .map_err(|reason| BuildError::resolution(path, format!("{} not found ({})", role, reason)))?;
        self.visit(normalized, follow)
    }

    fn module_id(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                std::path::Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        parts.join("/")
    }

    /// Position of an in-progress node on the traversal path.
    fn stack_position(&self, id: NodeId) -> usize {
        self.stack.iter().position(|frame| frame.id == id).unwrap_or(0)
    }

    /// Whether reaching in-progress `id` again closes a loop of ordering
    /// edges: no markup link lies on the path since it was entered.
    fn closes_cycle(&self, id: NodeId) -> bool {
        let start = self.stack_position(id);
        !self.stack.get(start + 1..).unwrap_or_default().iter().any(|frame| frame.linked)
    }

    fn cycle_error(&self, closing: NodeId) -> BuildError {
        let start = self.stack_position(closing);
        let mut cycle: Vec<PathBuf> =
            self.stack[start..].iter().map(|frame| PathBuf::from(&self.nodes[frame.id].id)).collect();
        cycle.push(PathBuf::from(&self.nodes[closing].id));
        BuildError::CyclicDependency { cycle }
    }

    /// Visit a normalized path, following the node's own references unless
    /// `follow` is [`Follow::Leaf`] or its kind has none.
    fn visit(&mut self, path: PathBuf, follow: Follow) -> Result<NodeId, BuildError> {
        let id = match self.index.get(&path) {
            Some(&id) => {
                match (self.state[id], follow) {
                    (VisitState::InProgress, Follow::Expand) if self.closes_cycle(id) => {
                        return Err(self.cycle_error(id))
                    }
                    (VisitState::InProgress | VisitState::Done, _) | (VisitState::Leaf, Follow::Leaf) => {
                        return Ok(id)
                    }
                    (VisitState::Leaf, _) => {}
                }
                id
            }
            None => {
                let kind = classify(&path)?;
                let id = self.nodes.len();
                let module_id = self.module_id(&path);
                debug!(module = %module_id, %kind, index = id, "discovered");
                self.nodes.push(ModuleNode::new(path.clone(), module_id, kind, id));
                self.index.insert(path, id);
                self.state.push(VisitState::Leaf);
                id
            }
        };

        let kind = self.nodes[id].kind;
        if kind == ContentKind::BinaryAsset {
            self.state[id] = VisitState::Done;
            return Ok(id);
        }
        let follow = match follow {
            Follow::Linked if !kind.follows_references() => Follow::Leaf,
            other => other,
        };
        if follow == Follow::Leaf {
            return Ok(id);
        }

        self.state[id] = VisitState::InProgress;
        self.stack.push(Frame { id, linked: follow == Follow::Linked });

        let pending = self.scan(id)?;
        let dir = self.nodes[id].path.parent().map(Path::to_path_buf).unwrap_or_default();
        let child_follow = if kind.follows_references() { Follow::Expand } else { Follow::Linked };
        let mut edges: Vec<Edge> = Vec::with_capacity(pending.len());

        for reference in pending {
            let resolved = match reference.kind {
                ReferenceKind::Import => resolve_script(&reference.specifier, &dir),
                ReferenceKind::StyleImport => resolve_style_import(&reference.specifier, &dir),
                ReferenceKind::UrlReference | ReferenceKind::MarkupAsset => {
                    resolve_url(&reference.specifier, &dir)
                }
            }
            .and_then(|p| normalize(&p))
            .map_err(|reason| {
                let missing: PathBuf = dir.join(strip_suffix(&reference.specifier)).components().collect();
                BuildError::resolution(missing, format!("{} (referenced from {})", reason, self.nodes[id].id))
            })?;

            let target = self.visit(resolved, child_follow)?;
            let edge = Edge {
                target,
                specifier: reference.specifier,
                kind: reference.kind,
                condition: reference.condition,
            };
            if !edges.contains(&edge) {
                edges.push(edge);
            }
        }

        self.stack.pop();
        self.state[id] = VisitState::Done;
        let node = &mut self.nodes[id];
        node.edges = edges;
        node.expanded = true;
        Ok(id)
    }

    /// Collect a node's references in source order.
    fn scan(&mut self, id: NodeId) -> Result<Vec<PendingReference>, BuildError> {
        let node = &self.nodes[id];
        let content = node.shared_content()?;
        let source = std::str::from_utf8(&content).map_err(|e| {
            BuildError::resolution(&node.path, format!("file is not valid UTF-8: {}", e))
        })?;

        let mut pending = Vec::new();
        match node.kind {
            ContentKind::Script => {
                let syntax = ModuleSyntax::parse(source).map_err(|e| {
                    BuildError::resolution(&node.path, format!("cannot scan module syntax: {}", e))
                })?;
                for offset in &syntax.non_literal_imports {
                    let (line, column) = crate::script::lexer::line_column(source, *offset);
                    let message = format!(
                        "{}:{}:{}: dynamic import with a non-literal argument is left as-is",
                        node.id, line, column
                    );
                    warn!("{}", message);
                    self.warnings.push(message);
                }
                for (offset, specifier) in syntax.items.iter().enumerate().filter_map(|(i, item)| {
                    item.specifier().map(|s| (i, s.to_string()))
                }) {
                    pending.push(PendingReference {
                        offset,
                        specifier,
                        kind: ReferenceKind::Import,
                        condition: None,
                    });
                }
            }
            ContentKind::Stylesheet => {
                let refs = scan_stylesheet(source, StyleSyntax::from_path(&node.path));
                for import in &refs.imports {
                    for specifier in &import.specifiers {
                        if is_followed(specifier) {
                            pending.push(PendingReference {
                                offset: import.rule.start,
                                specifier: specifier.clone(),
                                kind: ReferenceKind::StyleImport,
                                condition: import.condition.clone(),
                            });
                        }
                    }
                }
                for url in refs.urls.iter().filter(|u| is_followed(&u.value)) {
                    pending.push(PendingReference {
                        offset: url.span.start,
                        specifier: url.value.clone(),
                        kind: ReferenceKind::UrlReference,
                        condition: None,
                    });
                }
                pending.sort_by_key(|r| r.offset);
            }
            ContentKind::Markup => {
                for reference in scan_markup(source).into_iter().filter(|r| is_followed(&r.value)) {
                    pending.push(PendingReference {
                        offset: reference.value_span.start,
                        specifier: reference.value,
                        kind: ReferenceKind::MarkupAsset,
                        condition: None,
                    });
                }
            }
            ContentKind::BinaryAsset => {}
        }
        Ok(pending)
    }
}

/// Whether a stylesheet or markup reference is resolved as a project file.
///
/// Root-relative references (`/img/x.png`) address the deployed site, not
/// the source tree, and are left untouched.
pub fn is_followed(reference: &str) -> bool {
    !is_external(reference) && !reference.starts_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::TempDir;

    fn create_file(dir: &Path, relative: &str, content: &str) -> PathBuf {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        File::create(&path).unwrap().write_all(content.as_bytes()).unwrap();
        path
    }

    fn ids(graph: &DependencyGraph) -> Vec<&str> {
        graph.nodes().iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_discovery_order_is_depth_first() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let entry = create_file(
            dir,
            "src/main.js",
            "import { a } from './a.js';\nimport './style.scss';\nimport b from './b.js';",
        );
        create_file(dir, "src/a.js", "import './shared.js'; export const a = 1;");
        create_file(dir, "src/b.js", "import './shared.js'; export default 2;");
        create_file(dir, "src/shared.js", "");
        create_file(dir, "src/style.scss", "@import 'base';\n.x { background: url(img/bg.png); }");
        create_file(dir, "src/_base.scss", "body { margin: 0; }");
        create_file(dir, "src/img/bg.png", "png");

        let graph = Resolver::new(dir).resolve_roots(&entry, None, None).unwrap();
        assert_eq!(ids(&graph), vec![
            "src/main.js",
            "src/a.js",
            "src/shared.js",
            "src/style.scss",
            "src/_base.scss",
            "src/img/bg.png",
            "src/b.js",
        ]);
        assert_eq!(graph.entry().id, "src/main.js");
        let style = graph.get(&dunce::canonicalize(dir.join("src/style.scss")).unwrap()).unwrap();
        let kinds: Vec<_> = style.edges.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ReferenceKind::StyleImport, ReferenceKind::UrlReference]);
        assert_eq!(style.edges[0].specifier, "base");
    }

    #[test]
    fn test_cycle_is_rejected_with_path() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let entry = create_file(dir, "a.js", "import './b.js';");
        create_file(dir, "b.js", "import './a.js';");

        let err = Resolver::new(dir).resolve_roots(&entry, None, None).unwrap_err();
        match err {
            BuildError::CyclicDependency { cycle } => {
                assert_eq!(cycle, vec![PathBuf::from("a.js"), PathBuf::from("b.js"), PathBuf::from("a.js")])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_style_cycle_is_rejected() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let entry = create_file(dir, "main.js", "import './a.scss';");
        create_file(dir, "a.scss", "@import 'b';");
        create_file(dir, "b.scss", "@import 'a';");

        let err = Resolver::new(dir).resolve_roots(&entry, None, None).unwrap_err();
        assert!(matches!(err, BuildError::CyclicDependency { .. }));
    }

    #[test]
    fn test_self_import_is_a_cycle() {
        let temp = TempDir::new().unwrap();
        let entry = create_file(temp.path(), "self.js", "import './self.js';");
        let err = resolve(&entry).unwrap_err();
        assert!(err.to_string().contains("self.js -> self.js"));
    }

    #[test]
    fn test_missing_reference_names_missing_path() {
        let temp = TempDir::new().unwrap();
        let entry = create_file(temp.path(), "src/main.js", "import x from './missing.js?v=2';");
        let err = resolve(&entry).unwrap_err();
        match &err {
            BuildError::Resolution { path, reason } => {
                let expected = dunce::canonicalize(temp.path()).unwrap().join("src").join("missing.js");
                assert_eq!(path, &expected);
                assert!(reason.contains("./missing.js"));
                assert!(reason.contains("referenced from main.js"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unsupported_reference_fails() {
        let temp = TempDir::new().unwrap();
        let entry = create_file(temp.path(), "main.js", "import data from './data.json';");
        create_file(temp.path(), "data.json", "{}");
        let err = resolve(&entry).unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedAssetType { .. }));
    }

    #[test]
    fn test_markup_linked_sheets_are_expanded() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let entry = create_file(dir, "src/main.js", "");
        let template = create_file(
            dir,
            "src/index.html",
            r#"<link rel="stylesheet" href="extra.css"><img src="logo.png"><a href="page.html">x</a>"#,
        );
        create_file(dir, "src/extra.css", "@import 'base.css';\n.x { background: url(bg.png); }");
        create_file(dir, "src/base.css", "");
        create_file(dir, "src/bg.png", "png");
        create_file(dir, "src/logo.png", "png");

        let graph = Resolver::new(dir).resolve_roots(&entry, Some(&template), None).unwrap();
        assert_eq!(
            ids(&graph),
            vec!["src/main.js", "src/index.html", "src/extra.css", "src/base.css", "src/bg.png", "src/logo.png"]
        );
        let extra = &graph.nodes()[2];
        assert!(extra.expanded);
        assert_eq!(extra.edges.len(), 2);
        assert_eq!(graph.template().unwrap().edges.len(), 2);
    }

    #[test]
    fn test_markup_linked_script_importing_its_importer_is_not_a_cycle() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let entry = create_file(dir, "main.js", "import page from './page.html';");
        create_file(dir, "page.html", r#"<script src="widget.js"></script>"#);
        create_file(dir, "widget.js", "import './main.js';");

        let graph = resolve(&entry).unwrap();
        assert_eq!(ids(&graph), vec!["main.js", "page.html", "widget.js"]);
        assert!(graph.nodes()[2].expanded);
        assert_eq!(graph.script_order(), vec![0, 2]);
    }

    #[test]
    fn test_conditional_style_imports_are_followed() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let entry = create_file(dir, "main.js", "import './style.css';");
        create_file(dir, "style.css", "@import 'print.css' print;\n@import url(https://cdn.example/x.css) screen;");
        create_file(dir, "print.css", "");

        let graph = resolve(&entry).unwrap();
        assert_eq!(ids(&graph), vec!["main.js", "style.css", "print.css"]);
        let edge = &graph.nodes()[1].edges[0];
        assert_eq!(edge.condition.as_deref(), Some("print"));
        assert_eq!(graph.style_conditions(2), vec![vec!["print"]]);
    }

    #[test]
    #[serial_test::serial]
    fn test_resolve_relative_entry() {
        let temp = TempDir::new().unwrap();
        create_file(temp.path(), "main.js", "import './util.js';");
        create_file(temp.path(), "util.js", "");

        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(temp.path()).unwrap();
        let graph = resolve(Path::new("main.js"));
        std::env::set_current_dir(previous).unwrap();

        let graph = graph.unwrap();
        assert_eq!(ids(&graph), vec!["main.js", "util.js"]);
        assert_eq!(graph.root(), dunce::canonicalize(temp.path()).unwrap());
    }

    #[test]
    fn test_leaf_is_expanded_when_reached_by_recursing_edge() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        // page.html reaches late.js first (as a leaf); main.js then imports it
        let entry = create_file(dir, "main.js", "import page from './page.html';\nimport './late.js';");
        create_file(dir, "page.html", r#"<script src="late.js"></script>"#);
        create_file(dir, "late.js", "import './dep.js';");
        create_file(dir, "dep.js", "");

        let graph = resolve(&entry).unwrap();
        assert_eq!(ids(&graph), vec!["main.js", "page.html", "late.js", "dep.js"]);
        let late = &graph.nodes()[2];
        assert!(late.expanded);
        assert_eq!(late.edges.len(), 1);
    }

    #[test]
    fn test_markup_reference_back_to_importer_is_not_a_cycle() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let entry = create_file(dir, "main.js", "import page from './page.html';");
        create_file(dir, "page.html", r#"<script src="main.js"></script>"#);

        let graph = resolve(&entry).unwrap();
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_external_and_dynamic_references_skipped() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let entry = create_file(dir, "main.js", "import('./lazy.js'); import(name);");
        create_file(dir, "lazy.js", "");
        create_file(
            dir,
            "index.html",
            r#"<script src="https://cdn.example/x.js"></script><img src="/abs.png"><img src="data:image/png;base64,AA">"#,
        );

        let graph = Resolver::new(dir)
            .resolve_roots(&entry, Some(&dir.join("index.html")), None)
            .unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.warnings().len(), 1);
        assert!(graph.template().unwrap().edges.is_empty());
    }

    #[test]
    fn test_binary_assets_are_not_read() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let entry = create_file(dir, "main.js", "import logo from './logo.png';");
        create_file(dir, "logo.png", "\u{0}\u{1}binary");
        let favicon = create_file(dir, "favicon.ico", "ico");

        let graph = Resolver::new(dir).resolve_roots(&entry, None, Some(&favicon)).unwrap();
        assert_eq!(graph.favicon().unwrap().kind, ContentKind::BinaryAsset);
        assert_eq!(graph.nodes()[1].kind, ContentKind::BinaryAsset);
        assert!(graph.nodes()[1].content.get().is_none());
    }

    #[test]
    fn test_missing_root_is_resolution_error() {
        let temp = TempDir::new().unwrap();
        let err = Resolver::new(temp.path())
            .resolve_roots(&temp.path().join("nope.js"), None, None)
            .unwrap_err();
        assert!(err.to_string().contains("entry not found"));
    }
}
