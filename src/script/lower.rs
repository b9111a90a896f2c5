//! Down-levelling of ES module syntax.
//!
//! Each module becomes a factory registered with `__define`. Imports turn
//! into `__require` calls hoisted to the top of the factory, exports into
//! getters installed on the module's `exports` object. Reads of imported
//! bindings become member reads on the required module, so they stay live.

use std::collections::BTreeMap;

use oxc_allocator::Allocator;
use oxc_ast::AstKind;
use oxc_parser::Parser;
use oxc_semantic::{AstNode, AstNodes, SemanticBuilder};
use oxc_span::{GetSpan, SourceType};

use super::syntax::{DefaultExport, ModuleItem, ModuleSyntax, Span};

/// Binding that holds an anonymous or expression default export.
pub const DEFAULT_EXPORT_BINDING: &str = "__default_export";

/// Module lowering failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LowerError {
    /// A specifier the lowering could not map to a module id
    #[error("unresolved module specifier '{specifier}'")]
    Unresolved { specifier: String },
    #[error("{0}")]
    Parse(String),
}

/// A reference to an imported binding.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BindingUse {
    span: Span,
    local: String,
    /// `{ name }` object shorthand
    shorthand: bool,
}

/// Whether the identifier at `node` is both key and value of an object
/// literal property.
fn is_shorthand<'a>(nodes: &'a AstNodes<'a>, node: &'a AstNode<'a>) -> bool {
    let span = node.kind().span();
    let mut current = node;
    while let Some(parent) = nodes.parent_node(current.id()) {
        let kind = parent.kind();
        if kind.span() != span {
            return false;
        }
        if let AstKind::ObjectProperty(property) = kind {
            return property.shorthand;
        }
        current = parent;
    }
    false
}

/// Every reference to the given module-scope bindings, in source order.
///
/// References are resolved by scope, so locals that shadow an import are
/// not reported.
fn binding_uses(source: &str, locals: &[&str]) -> Result<Vec<BindingUse>, LowerError> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, SourceType::mjs()).parse();
    if let Some(error) = parsed.errors.first() {
        return Err(LowerError::Parse(error.to_string()));
    }
    let semantic = SemanticBuilder::new().build(&parsed.program).semantic;
    let scopes = semantic.scopes();
    let nodes = semantic.nodes();

    let mut uses = Vec::new();
    for &local in locals {
        let Some(symbol) = scopes.get_binding(scopes.root_scope_id(), local) else {
            continue;
        };
        for reference in semantic.symbols().get_resolved_references(symbol) {
            let node = nodes.get_node(reference.node_id());
            let span = node.kind().span();
            uses.push(BindingUse {
                span: Span { start: span.start as usize, end: span.end as usize },
                local: local.to_string(),
                shorthand: is_shorthand(nodes, node),
            });
        }
    }
    uses.sort_by_key(|u| u.span.start);
    Ok(uses)
}

/// Quote a string as a JavaScript string literal.
pub fn quote(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// `object.name`, or `object["name"]` when `name` is not an identifier.
fn member(object: &str, name: &str) -> String {
    if is_identifier(name) {
        format!("{}.{}", object, name)
    } else {
        format!("{}[{}]", object, quote(name))
    }
}

struct Edit {
    start: usize,
    end: usize,
    text: String,
}

impl Edit {
    /// Remove a span, keeping its line breaks so line numbers survive.
    fn blank(source: &str, span: Span) -> Self {
        let newlines = source[span.start..span.end].matches('\n').count();
        Edit { start: span.start, end: span.end, text: "\n".repeat(newlines) }
    }

    fn replace(span: Span, text: impl Into<String>) -> Self {
        Edit { start: span.start, end: span.end, text: text.into() }
    }

    fn insert(at: usize, text: &str) -> Self {
        Edit { start: at, end: at, text: text.to_string() }
    }
}

/// Lower one module into a `__define(...)` registration.
///
/// `resolve` maps each specifier, as written, to the id of the module it
/// resolved to during graph construction.
pub fn lower_module<F>(
    source: &str,
    syntax: &ModuleSyntax,
    module_id: &str,
    resolve: F,
) -> Result<String, LowerError>
where
    F: Fn(&str) -> Option<String>,
{
    let target = |specifier: &str| {
        resolve(specifier).ok_or_else(|| LowerError::Unresolved { specifier: specifier.to_string() })
    };

    let mut edits = Vec::new();
    let mut getters: Vec<(String, String)> = Vec::new();
    let mut header = Vec::new();
    // local name of an imported binding -> expression reading it
    let mut imported: BTreeMap<String, String> = BTreeMap::new();
    let mut deps = 0usize;
    let mut next_dep = || {
        let name = format!("__dep{}", deps);
        deps += 1;
        name
    };

    for item in &syntax.items {
        match item {
            ModuleItem::Import { span, specifier, clause } => {
                let id = target(specifier)?;
                if clause.is_empty() {
                    header.push(format!("__require({});", quote(&id)));
                } else {
                    let dep = next_dep();
                    header.push(format!("var {} = __require({});", dep, quote(&id)));
                    if let Some(namespace) = &clause.namespace {
                        header.push(format!("var {} = {};", namespace, dep));
                    }
                    if let Some(default) = &clause.default {
                        imported.insert(default.clone(), member(&dep, "default"));
                    }
                    for binding in &clause.named {
                        imported.insert(binding.local.clone(), member(&dep, &binding.imported));
                    }
                }
                edits.push(Edit::blank(source, *span));
            }
            ModuleItem::DynamicImport { span, specifier } => {
                let id = target(specifier)?;
                edits.push(Edit::replace(
                    *span,
                    format!(
                        "Promise.resolve().then(function () {{ return __require({}); }})",
                        quote(&id)
                    ),
                ));
            }
            ModuleItem::ExportDeclaration { keyword, names } => {
                edits.push(Edit::replace(*keyword, ""));
                getters.extend(names.iter().map(|n| (n.clone(), n.clone())));
            }
            ModuleItem::ExportDefault { keyword, value } => match value {
                DefaultExport::Declaration { name } => {
                    edits.push(Edit::replace(*keyword, ""));
                    getters.push(("default".to_string(), name.clone()));
                }
                DefaultExport::Anonymous { terminator } => {
                    edits.push(Edit::replace(*keyword, format!("var {} = ", DEFAULT_EXPORT_BINDING)));
                    edits.push(Edit::insert(*terminator, ";"));
                    getters.push(("default".to_string(), DEFAULT_EXPORT_BINDING.to_string()));
                }
                DefaultExport::Expression => {
                    edits.push(Edit::replace(*keyword, format!("var {} = ", DEFAULT_EXPORT_BINDING)));
                    getters.push(("default".to_string(), DEFAULT_EXPORT_BINDING.to_string()));
                }
            },
            ModuleItem::ExportList { span, bindings, from } => {
                match from {
                    Some(specifier) => {
                        let id = target(specifier)?;
                        let dep = next_dep();
                        header.push(format!("var {} = __require({});", dep, quote(&id)));
                        getters.extend(
                            bindings.iter().map(|b| (b.exported.clone(), member(&dep, &b.local))),
                        );
                    }
                    None => {
                        getters.extend(bindings.iter().map(|b| (b.exported.clone(), b.local.clone())))
                    }
                }
                edits.push(Edit::blank(source, *span));
            }
            ModuleItem::ExportAll { span, alias, specifier } => {
                let id = target(specifier)?;
                match alias {
                    Some(alias) => {
                        let dep = next_dep();
                        header.push(format!("var {} = __require({});", dep, quote(&id)));
                        getters.push((alias.clone(), dep));
                    }
                    None => header.push(format!("__reexport(exports, __require({}));", quote(&id))),
                }
                edits.push(Edit::blank(source, *span));
            }
            ModuleItem::ImportMeta { span } => {
                edits.push(Edit::replace(*span, format!("({{ url: {} }})", quote(module_id))));
            }
        }
    }

    for (_, expr) in getters.iter_mut() {
        if let Some(read) = imported.get(expr.as_str()) {
            *expr = read.clone();
        }
    }

    if !imported.is_empty() {
        let locals: Vec<&str> = imported.keys().map(String::as_str).collect();
        for usage in binding_uses(source, &locals)? {
            let inside_edit = edits
                .iter()
                .any(|e| e.start < e.end && e.start <= usage.span.start && usage.span.end <= e.end);
            if inside_edit {
                continue;
            }
            let read = &imported[&usage.local];
            let text = if usage.shorthand { format!("{}: {}", usage.local, read) } else { read.clone() };
            edits.push(Edit::replace(usage.span, text));
        }
    }

    let mut out = String::with_capacity(source.len() + 256);
    out.push_str(&format!(
        "__define({}, function (module, exports, __require) {{\n",
        quote(module_id)
    ));
    if !getters.is_empty() {
        out.push_str("__export(exports, {\n");
        let entries: Vec<String> = getters
            .iter()
            .map(|(name, expr)| format!("  {}: function () {{ return {}; }}", quote(name), expr))
            .collect();
        out.push_str(&entries.join(",\n"));
        out.push_str("\n});\n");
    }
    for line in &header {
        out.push_str(line);
        out.push('\n');
    }

    edits.sort_by_key(|e| (e.start, e.end));
    let mut cursor = 0;
    for edit in &edits {
        out.push_str(&source[cursor..edit.start]);
        out.push_str(&edit.text);
        cursor = edit.end;
    }
    out.push_str(&source[cursor..]);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("});\n");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lower(source: &str, ids: &[(&str, &str)]) -> String {
        let map: HashMap<&str, &str> = ids.iter().copied().collect();
        let syntax = ModuleSyntax::parse(source).unwrap();
        lower_module(source, &syntax, "src/js/main.js", |s| map.get(s).map(|id| id.to_string()))
            .unwrap()
    }

    #[test]
    fn test_imports_become_hoisted_requires() {
        let out = lower(
            "greet();\nimport { greet, shout as yell } from './util.js';\nimport './side.js';\n",
            &[("./util.js", "src/js/util.js"), ("./side.js", "src/js/side.js")],
        );
        assert!(out.starts_with("__define(\"src/js/main.js\", function (module, exports, __require) {\n"));
        assert!(out.contains("var __dep0 = __require(\"src/js/util.js\");\n"));
        assert!(out.contains("\n__dep0.greet();\n"));
        assert!(!out.contains("var greet"));
        assert!(out.contains("__require(\"src/js/side.js\");\n"));
        assert!(!out.contains("import"));
        let header_end = out.find("__dep0.greet();").unwrap();
        assert!(out.find("__dep0").unwrap() < header_end);
        assert!(out.ends_with("});\n"));
    }

    #[test]
    fn test_default_and_namespace_imports() {
        let out = lower(
            "import App, * as all from './app.js';\nnew App(all);",
            &[("./app.js", "src/app.js")],
        );
        assert!(out.contains("var all = __dep0;"));
        assert!(out.contains("new __dep0.default(all);"));
    }

    #[test]
    fn test_imported_bindings_stay_live() {
        let out = lower(
            "import { count, inc } from './counter.js';\ninc();\nconsole.log('count=' + count);\n",
            &[("./counter.js", "src/js/counter.js")],
        );
        assert!(out.contains("\n__dep0.inc();\n"));
        assert!(out.contains("console.log('count=' + __dep0.count);"));
        assert!(!out.contains("var count"));
    }

    #[test]
    fn test_shadowed_and_property_names_untouched() {
        let out = lower(
            "import { count } from './c.js';\nfunction f(count) { return count; }\nconst o = { count, total: count };\no.count = obj.count;\n",
            &[("./c.js", "c.js")],
        );
        assert!(out.contains("function f(count) { return count; }"));
        assert!(out.contains("const o = { count: __dep0.count, total: __dep0.count };"));
        assert!(out.contains("o.count = obj.count;"));
    }

    #[test]
    fn test_reexported_import_reads_through() {
        let out = lower("import { a } from './a.js';\nexport { a as b };", &[("./a.js", "a.js")]);
        assert!(out.contains("\"b\": function () { return __dep0.a; }"));
    }

    #[test]
    fn test_import_meta_replaced() {
        let out = lower("const here = import.meta.url;", &[]);
        assert!(out.contains("const here = ({ url: \"src/js/main.js\" }).url;"));
        assert!(!out.contains("import.meta"));
    }

    #[test]
    fn test_export_getters() {
        let out = lower(
            "export const a = 1;\nexport function f() {}\nconst b = 2;\nexport { b as \"b-name\" };\n",
            &[],
        );
        assert!(out.contains("__export(exports, {\n"));
        assert!(out.contains("  \"a\": function () { return a; }"));
        assert!(out.contains("  \"f\": function () { return f; }"));
        assert!(out.contains("  \"b-name\": function () { return b; }"));
        assert!(out.contains("\nconst a = 1;"));
        assert!(out.contains("\nfunction f() {}"));
    }

    #[test]
    fn test_default_exports() {
        let out = lower("export default function () { return 1; }\n(x)();", &[]);
        assert!(out.contains("var __default_export = function () { return 1; };\n(x)();"));
        assert!(out.contains("\"default\": function () { return __default_export; }"));

        let out = lower("export default class Widget {}", &[]);
        assert!(out.contains("\nclass Widget {}"));
        assert!(out.contains("\"default\": function () { return Widget; }"));

        let out = lower("export default 6 * 7;", &[]);
        assert!(out.contains("var __default_export = 6 * 7;"));
    }

    #[test]
    fn test_reexports() {
        let out = lower(
            "export * from './a.js';\nexport * as b from './b.js';\nexport { x as y } from './c.js';",
            &[("./a.js", "a.js"), ("./b.js", "b.js"), ("./c.js", "c.js")],
        );
        assert!(out.contains("__reexport(exports, __require(\"a.js\"));"));
        assert!(out.contains("var __dep0 = __require(\"b.js\");"));
        assert!(out.contains("\"b\": function () { return __dep0; }"));
        assert!(out.contains("var __dep1 = __require(\"c.js\");"));
        assert!(out.contains("\"y\": function () { return __dep1.x; }"));
    }

    #[test]
    fn test_dynamic_import_is_promise_wrapped() {
        let out = lower("load(() => import('./lazy.js'));", &[("./lazy.js", "src/lazy.js")]);
        assert!(out.contains(
            "load(() => Promise.resolve().then(function () { return __require(\"src/lazy.js\"); }));"
        ));
    }

    #[test]
    fn test_line_count_preserved_for_removed_imports() {
        let source = "import {\n  a,\n  b\n} from './x.js';\nfail();\n";
        let out = lower(source, &[("./x.js", "x.js")]);
        let header = "var __dep0 = __require(\"x.js\");\n";
        let body = &out[out.find(header).unwrap() + header.len()..];
        assert!(body.starts_with("\n\n\n\nfail();"));
    }

    #[test]
    fn test_unresolved_specifier_fails() {
        let source = "import x from './missing.js';";
        let syntax = ModuleSyntax::parse(source).unwrap();
        let err = lower_module(source, &syntax, "m.js", |_| None).unwrap_err();
        assert_eq!(err, LowerError::Unresolved { specifier: "./missing.js".to_string() });
    }

    #[test]
    fn test_member_access_quoting() {
        assert_eq!(member("d", "name"), "d.name");
        assert_eq!(member("d", "kebab-case"), "d[\"kebab-case\"]");
    }
}
