//! Stylesheet chain: Sass compilation and CSS post-processing.

use std::ops::Range;

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};

use super::{Payload, StepError, TransformMeta, TransformStep};
use crate::classify::StyleSyntax;
use crate::config::{BrowserTargets, StyleConfig};
use crate::graph::references::{mask_style_comments, scan_stylesheet};
use crate::graph::resolver::is_followed;

/// Quote a value as a CSS string.
fn css_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Keep only the line breaks of a removed range.
fn line_breaks(text: &str) -> String {
    "\n".repeat(text.matches('\n').count())
}

fn apply_edits(source: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    edits.sort_by_key(|(range, _)| range.start);
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for (range, text) in edits {
        out.push_str(&source[cursor..range.start]);
        out.push_str(&text);
        cursor = range.end;
    }
    out.push_str(&source[cursor..]);
    out
}

/// Index just past the `)` closing the parenthesis that `text` opens with.
fn closing_paren(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &text[prefix.len()..])
}

/// Split `(inner) rest` into `inner` and `rest`.
fn parenthesized(text: &str) -> Option<(&str, &str)> {
    if !text.starts_with('(') {
        return None;
    }
    let end = closing_paren(text)?;
    Some((text[1..end - 1].trim(), text[end..].trim_start()))
}

/// At-rule preludes equivalent to one `@import` condition, outermost first:
/// `layer(x) supports(display: grid) print` opens `@layer x`,
/// `@supports (display: grid)` and `@media print`.
fn condition_blocks(condition: &str) -> Vec<String> {
    let mut rest = condition.trim();
    let mut blocks = Vec::new();

    if let Some(after) = strip_prefix_ignore_case(rest, "layer") {
        if let Some((name, tail)) = parenthesized(after) {
            blocks.push(format!("@layer {}", name));
            rest = tail;
        } else if after.is_empty() || after.starts_with(char::is_whitespace) {
            blocks.push("@layer".to_string());
            rest = after.trim_start();
        }
    }

    if let Some((test, tail)) = strip_prefix_ignore_case(rest, "supports").and_then(parenthesized) {
        if test.starts_with('(') || test.starts_with("not ") || test.starts_with("selector(") {
            blocks.push(format!("@supports {}", test));
        } else {
            blocks.push(format!("@supports ({})", test));
        }
        rest = tail;
    }

    if !rest.is_empty() {
        blocks.push(format!("@media {}", rest));
    }
    blocks
}

/// Wrap compiled CSS in the blocks of its import conditions, outermost
/// condition first.
pub fn wrap_in_conditions(css: &str, conditions: &[&str]) -> String {
    let blocks: Vec<String> = conditions.iter().flat_map(|c| condition_blocks(c)).collect();
    let mut out = String::with_capacity(css.len() + 32 * blocks.len());
    for block in &blocks {
        out.push_str(block);
        out.push_str(" {\n");
    }
    out.push_str(css);
    if !css.is_empty() && !css.ends_with('\n') {
        out.push('\n');
    }
    for _ in &blocks {
        out.push_str("}\n");
    }
    out
}

/// Removes bundled `@import`s, rewrites asset `url()`s and compiles Sass.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreprocessToCss;

impl TransformStep for PreprocessToCss {
    fn name(&self) -> &'static str {
        "preprocess-to-css"
    }

    fn apply(&self, input: Payload, meta: &mut TransformMeta) -> Result<Payload, StepError> {
        let source = input.into_text()?;
        let syntax = StyleSyntax::from_path(&meta.path);
        let refs = scan_stylesheet(&source, syntax);
        let mut edits = Vec::new();

        for import in &refs.imports {
            let rule_text = &source[import.rule.clone()];
            let mut external = Vec::new();
            for specifier in &import.specifiers {
                if meta.reference(specifier).is_some() {
                    continue;
                }
                if is_followed(specifier) {
                    return Err(StepError::new(format!("unresolved @import '{}'", specifier)));
                }
                external.push(specifier);
            }
            if import.is_conditional() && !external.is_empty() {
                let mut rule = rule_text.trim().to_string();
                if !rule.ends_with(';') {
                    rule.push(';');
                }
                meta.hoisted_imports.push(rule);
            } else {
                for specifier in external {
                    meta.hoisted_imports.push(format!("@import {};", css_string(specifier)));
                }
            }
            edits.push((import.rule.clone(), line_breaks(rule_text)));
        }

        for url in &refs.urls {
            if let Some(public) = meta.reference(&url.value).and_then(|r| r.public_path.as_deref()) {
                edits.push((url.span.clone(), format!("url({})", css_string(public))));
            }
        }

        let css = apply_edits(&source, edits);
        let input_syntax = match syntax {
            StyleSyntax::Scss => grass::InputSyntax::Scss,
            StyleSyntax::Sass => grass::InputSyntax::Sass,
            StyleSyntax::Css => return Ok(Payload::Text(css)),
        };

        let mut options = grass::Options::default().input_syntax(input_syntax).quiet(true);
        if let Some(dir) = meta.path.parent() {
            options = options.load_path(dir);
        }
        let input = if meta.style_prelude.is_empty() {
            css
        } else {
            format!("{}\n{}", meta.style_prelude, css)
        };
        grass::from_string(input, &options)
            .map(Payload::Text)
            .map_err(|e| StepError::new(e.to_string()))
    }
}

/// Parses, prefixes and prints CSS for the configured browsers.
#[derive(Debug, Clone, Default)]
pub struct PostProcess {
    minify: bool,
    browsers: Option<Browsers>,
}

/// lightningcss encodes versions as `major << 16 | minor << 8 | patch`.
fn browser_version(major: u32) -> u32 {
    major << 16
}

fn browsers(targets: &BrowserTargets) -> Option<Browsers> {
    if targets.is_empty() {
        return None;
    }
    let v = |major: Option<u32>| major.map(browser_version);
    Some(Browsers {
        android: v(targets.android),
        chrome: v(targets.chrome),
        edge: v(targets.edge),
        firefox: v(targets.firefox),
        ie: v(targets.ie),
        ios_saf: v(targets.ios_saf),
        opera: v(targets.opera),
        safari: v(targets.safari),
        samsung: v(targets.samsung),
    })
}

impl PostProcess {
    pub fn new(style: &StyleConfig) -> Self {
        Self { minify: style.minify, browsers: browsers(&style.targets) }
    }

    fn targets(&self) -> Targets {
        Targets { browsers: self.browsers, ..Targets::default() }
    }
}

impl TransformStep for PostProcess {
    fn name(&self) -> &'static str {
        "post-process"
    }

    fn apply(&self, input: Payload, meta: &mut TransformMeta) -> Result<Payload, StepError> {
        let css = input.into_text()?;
        let parser_options = ParserOptions { filename: meta.module_id.clone(), ..ParserOptions::default() };
        let mut sheet =
            StyleSheet::parse(&css, parser_options).map_err(|e| StepError::new(e.to_string()))?;
        sheet
            .minify(MinifyOptions { targets: self.targets(), ..MinifyOptions::default() })
            .map_err(|e| StepError::new(e.to_string()))?;
        let printed = sheet
            .to_css(PrinterOptions { minify: self.minify, targets: self.targets(), ..PrinterOptions::default() })
            .map_err(|e| StepError::new(e.to_string()))?;

        let mut code = printed.code;
        if !code.is_empty() && !code.ends_with('\n') {
            code.push('\n');
        }
        Ok(Payload::Text(code))
    }
}

/// Top-level `$variable`, `@mixin` and `@function` definitions of a Sass
/// sheet, in source order. Plain CSS has none.
pub fn sass_definitions(source: &str, syntax: StyleSyntax) -> String {
    match syntax {
        StyleSyntax::Scss => scss_definitions(source),
        StyleSyntax::Sass => indented_definitions(source),
        StyleSyntax::Css => String::new(),
    }
}

fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// End of a `$name: value;` declaration, just past its `;`.
fn declaration_end(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'(' | b'{' | b'[' => depth += 1,
            b')' | b'}' | b']' => depth = depth.saturating_sub(1),
            b';' if depth == 0 => return i + 1,
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

/// End of an `@mixin`/`@function` block, just past its closing `}`.
fn block_end(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut parens = 0usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'(' => parens += 1,
            b')' => parens = parens.saturating_sub(1),
            b'{' if parens == 0 => depth += 1,
            b'}' if parens == 0 => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

fn starts_with_at_rule(text: &str, name: &str) -> bool {
    text.strip_prefix(name)
        .is_some_and(|rest| rest.starts_with(|c: char| c.is_whitespace() || c == '('))
}

fn scss_definitions(source: &str) -> String {
    let masked = mask_style_comments(source, StyleSyntax::Scss);
    let bytes = masked.as_bytes();
    let mut out = String::new();
    let mut depth = 0usize;
    let mut statement_start = true;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if depth == 0 && statement_start && !c.is_ascii_whitespace() {
            let rest = &masked[i..];
            let end = if rest.starts_with('$') {
                Some(declaration_end(bytes, i))
            } else if starts_with_at_rule(rest, "@mixin") || starts_with_at_rule(rest, "@function") {
                Some(block_end(bytes, i))
            } else {
                None
            };
            if let Some(end) = end {
                out.push_str(source[i..end].trim_end());
                out.push('\n');
                i = end;
                continue;
            }
            statement_start = false;
        }
        match c {
            b'"' | b'\'' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    statement_start = true;
                }
            }
            b';' if depth == 0 => statement_start = true,
            _ => {}
        }
        i += 1;
    }
    out
}

fn indented_definitions(source: &str) -> String {
    let masked = mask_style_comments(source, StyleSyntax::Sass);
    let mut out = String::new();
    let mut capturing = false;

    for (line, masked_line) in source.lines().zip(masked.lines()) {
        let trimmed = masked_line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !masked_line.starts_with(|c: char| c == ' ' || c == '\t') {
            capturing = trimmed.starts_with('$')
                || trimmed.starts_with('=')
                || starts_with_at_rule(trimmed, "@mixin")
                || starts_with_at_rule(trimmed, "@function");
        }
        if capturing {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ContentKind;
    use crate::config::Mode;
    use crate::transforms::ResolvedReference;
    use std::path::PathBuf;

    fn meta(path: &str, refs: &[(&str, ContentKind, Option<&str>)]) -> TransformMeta {
        let references = refs
            .iter()
            .map(|(spec, kind, public)| {
                (
                    spec.to_string(),
                    ResolvedReference {
                        target: PathBuf::from(spec),
                        module_id: spec.to_string(),
                        kind: *kind,
                        public_path: public.map(str::to_string),
                    },
                )
            })
            .collect();
        TransformMeta::new(path, path, ContentKind::Stylesheet, Mode::Development)
            .with_references(references)
    }

    fn preprocess(source: &str, meta: &mut TransformMeta) -> Result<String, StepError> {
        PreprocessToCss.apply(Payload::Text(source.to_string()), meta).map(|p| p.into_text().unwrap())
    }

    #[test]
    fn test_bundled_imports_removed_and_urls_rewritten() {
        let mut meta = meta(
            "src/style.scss",
            &[
                ("base", ContentKind::Stylesheet, None),
                ("img/bg.png", ContentKind::BinaryAsset, Some("images/bg.png")),
            ],
        );
        let out = preprocess("@import 'base';\n.a { background: url(img/bg.png); }\n", &mut meta).unwrap();
        assert!(!out.contains("@import"));
        assert!(out.contains("url(\"images/bg.png\")"));
        assert!(meta.hoisted_imports.is_empty());
    }

    #[test]
    fn test_prelude_definitions_are_visible() {
        let mut meta = meta("src/style.scss", &[]).with_style_prelude(
            "$brand: red;\n@mixin pad { padding: 1px; }\n",
        );
        let out = preprocess(".a { color: $brand; @include pad; }", &mut meta).unwrap();
        assert!(out.contains("color: red;"));
        assert!(out.contains("padding: 1px;"));
    }

    #[test]
    fn test_remote_imports_hoisted() {
        let mut meta = meta("src/fonts.css", &[("print.css", ContentKind::Stylesheet, None)]);
        let out = preprocess(
            "@import url(https://fonts.example/css?family=Roboto);\n@import url(https://cdn.example/print.css) print;\n@import 'print.css' print;\n.a { color: red; }\n",
            &mut meta,
        )
        .unwrap();
        assert_eq!(
            meta.hoisted_imports,
            vec![
                "@import \"https://fonts.example/css?family=Roboto\";",
                "@import url(https://cdn.example/print.css) print;"
            ]
        );
        assert_eq!(out, "\n\n\n.a { color: red; }\n");
    }

    #[test]
    fn test_unresolved_conditional_import_fails() {
        let mut meta = meta("src/style.css", &[]);
        let err = preprocess("@import 'print.css' print;", &mut meta).unwrap_err();
        assert!(err.message.contains("print.css"));
    }

    #[test]
    fn test_wrap_in_conditions() {
        assert_eq!(wrap_in_conditions(".a{}", &["print"]), "@media print {\n.a{}\n}\n");
        assert_eq!(
            wrap_in_conditions(".a{}\n", &["layer(base) supports(display: grid) screen", "(min-width: 40em)"]),
            "@layer base {\n@supports (display: grid) {\n@media screen {\n@media (min-width: 40em) {\n.a{}\n}\n}\n}\n}\n"
        );
        assert_eq!(
            wrap_in_conditions(".a{}", &["supports(not (display: grid))"]),
            "@supports not (display: grid) {\n.a{}\n}\n"
        );
        assert_eq!(wrap_in_conditions(".a{}", &["layer"]), "@layer {\n.a{}\n}\n");
    }

    #[test]
    fn test_unresolved_local_import_fails() {
        let mut meta = meta("src/extra.css", &[]);
        let err = preprocess("@import 'other.css';", &mut meta).unwrap_err();
        assert!(err.message.contains("other.css"));
    }

    #[test]
    fn test_sass_compile_error_surfaces() {
        let mut meta = meta("src/broken.scss", &[]);
        assert!(preprocess(".a { color: $undefined; }", &mut meta).is_err());
    }

    #[test]
    fn test_indented_sass_compiles() {
        let mut meta = meta("src/style.sass", &[]).with_style_prelude("$gap: 4px\n");
        let out = preprocess(".a\n  margin: $gap\n", &mut meta).unwrap();
        assert!(out.contains("margin: 4px;"));
    }

    #[test]
    fn test_post_process_prefixes_for_targets() {
        let style = StyleConfig {
            minify: false,
            targets: BrowserTargets { safari: Some(13), ..BrowserTargets::default() },
        };
        let mut meta = meta("src/a.css", &[]);
        let out = PostProcess::new(&style)
            .apply(Payload::Text(".a { user-select: none; }".into()), &mut meta)
            .unwrap()
            .into_text()
            .unwrap();
        assert!(out.contains("-webkit-user-select: none"));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn test_post_process_minifies() {
        let style = StyleConfig { minify: true, ..StyleConfig::default() };
        let mut meta = meta("src/a.css", &[]);
        let out = PostProcess::new(&style)
            .apply(Payload::Text(".a {\n  color: red;\n}\n\n.b { margin: 0 }\n".into()), &mut meta)
            .unwrap()
            .into_text()
            .unwrap();
        assert!(out.starts_with(".a{"));
        assert_eq!(out.trim_end().lines().count(), 1);
    }

    #[test]
    fn test_post_process_rejects_invalid_css() {
        let mut meta = meta("src/a.css", &[]);
        let err = PostProcess::default().apply(Payload::Text("..a { color: red; }".into()), &mut meta);
        assert!(err.is_err());
    }

    #[test]
    fn test_scss_definitions() {
        let src = "// vars\n$brand: #333 !default;\n$map: (a: 1, b: 2);\n@mixin center($w) {\n  margin: 0 auto;\n  width: $w;\n}\n.rule { $local: 1px; color: $brand; }\n@function double($n) { @return $n * 2; }\n";
        let defs = sass_definitions(src, StyleSyntax::Scss);
        assert_eq!(
            defs,
            "$brand: #333 !default;\n$map: (a: 1, b: 2);\n@mixin center($w) {\n  margin: 0 auto;\n  width: $w;\n}\n@function double($n) { @return $n * 2; }\n"
        );
        assert!(sass_definitions(".a { color: red; }", StyleSyntax::Css).is_empty());
    }

    #[test]
    fn test_indented_definitions() {
        let src = "$brand: red\n=pad\n  padding: 1px\n.a\n  color: $brand\n@mixin big\n  font-size: 2em\n";
        assert_eq!(
            sass_definitions(src, StyleSyntax::Sass),
            "$brand: red\n=pad\n  padding: 1px\n@mixin big\n  font-size: 2em\n"
        );
    }
}
