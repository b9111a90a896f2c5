//! Reference scanning for stylesheets and markup.
//!
//! Scanners return byte ranges into the original source so the transform
//! steps can rewrite exactly what the resolver followed.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

use crate::classify::StyleSyntax;

/// Brace-syntax `@import`, terminated by `;` (may span lines).
static BLOCK_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)@import\s+([^;{}]+?)\s*(?:;|\}|$)").unwrap());

/// Indented-syntax `@import`, terminated by the end of the line.
static LINE_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)@import[ \t]+([^\n;]+?)[ \t]*;?[ \t]*$").unwrap());

static URL_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\burl\(\s*(?:"([^"]*)"|'([^']*)'|([^"')\s]*))\s*\)"#).unwrap()
});

static TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"<([a-zA-Z][a-zA-Z0-9:-]*)((?:\s+[^\s/>"'=]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'=<>`]+))?)*)\s*/?>"#,
    )
    .unwrap()
});

static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([^\s/>"'=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#).unwrap()
});

static SCRIPT_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<script\b[^>]*>").unwrap());
static SCRIPT_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</script\s*>").unwrap());
static STYLE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<style\b[^>]*>").unwrap());
static STYLE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</style\s*>").unwrap());

/// Elements whose `src` attribute references a file.
const SRC_ELEMENTS: &[&str] =
    &["img", "script", "source", "video", "audio", "input", "embed", "track", "iframe"];

/// Replace a range with spaces, keeping line breaks.
fn blank(bytes: &mut [u8], range: Range<usize>) {
    for b in &mut bytes[range] {
        if *b != b'\n' {
            *b = b' ';
        }
    }
}

fn into_string(bytes: Vec<u8>, original: &str) -> String {
    // Only whole characters are replaced with ASCII, so this never fails.
    String::from_utf8(bytes).unwrap_or_else(|_| original.to_string())
}

fn find_from(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    haystack.get(from..)?.windows(needle.len()).position(|w| w == needle).map(|p| p + from)
}

/// Blank out stylesheet comments, preserving byte offsets.
///
/// Strings and unquoted `url(...)` bodies are skipped so `//` inside them
/// is not mistaken for a line comment.
pub fn mask_style_comments(source: &str, syntax: StyleSyntax) -> String {
    let bytes = source.as_bytes();
    let mut out = bytes.to_vec();
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q || b == b'\n' {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'"' | b'\'' => quote = Some(b),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = find_from(bytes, i + 2, b"*/").map_or(bytes.len(), |p| p + 2);
                blank(&mut out, i..end);
                i = end;
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') && syntax.has_line_comments() => {
                let end = find_from(bytes, i, b"\n").unwrap_or(bytes.len());
                blank(&mut out, i..end);
                i = end;
                continue;
            }
            b'u' | b'U'
                if bytes.len() >= i + 4
                    && bytes[i..i + 4].eq_ignore_ascii_case(b"url(")
                    && !matches!(bytes.get(i + 4), Some(b'"' | b'\'')) =>
            {
                i = find_from(bytes, i, b")").map_or(bytes.len(), |p| p + 1);
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    into_string(out, source)
}

/// An `@import` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleImport {
    /// The whole rule, including a trailing `;`
    pub rule: Range<usize>,
    /// Imported specifiers, in order
    pub specifiers: Vec<String>,
    /// Trailing `layer`, `supports()` or media query text, if any
    pub condition: Option<String>,
}

impl StyleImport {
    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}

/// A `url(...)` outside `@import` rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlReference {
    /// The whole `url(...)` expression
    pub span: Range<usize>,
    pub value: String,
}

/// References found in a stylesheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleReferences {
    pub imports: Vec<StyleImport>,
    pub urls: Vec<UrlReference>,
}

/// Split at top-level commas (outside quotes and parentheses).
fn split_arguments(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(text[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

/// Condition text following an import's URL.
fn condition(rest: &str) -> Option<String> {
    let rest = rest.trim();
    (!rest.is_empty()).then(|| rest.to_string())
}

/// Parse one `@import` argument into its specifier and condition.
fn import_argument(arg: &str) -> Option<(String, Option<String>)> {
    let quoted = |s: &str| -> Option<(String, usize)> {
        let q = s.chars().next().filter(|c| matches!(c, '"' | '\''))?;
        let end = s[1..].find(q)? + 1;
        Some((s[1..end].to_string(), end + 1))
    };

    if let Some((value, consumed)) = quoted(arg) {
        return Some((value, condition(&arg[consumed..])));
    }
    if arg.len() >= 4 && arg[..4].eq_ignore_ascii_case("url(") {
        let close = arg.find(')')?;
        let inner = arg[4..close].trim();
        let value = quoted(inner).map_or_else(|| inner.to_string(), |(v, _)| v);
        return Some((value, condition(&arg[close + 1..])));
    }
    let value = arg.split_whitespace().next()?;
    Some((value.to_string(), condition(&arg[value.len()..])))
}

/// Whether a `url()` value is computed by the preprocessor.
fn is_dynamic(value: &str) -> bool {
    value.starts_with('$') || value.contains("#{")
}

/// Collect `@import` rules and `url()` references from a stylesheet.
pub fn scan_stylesheet(source: &str, syntax: StyleSyntax) -> StyleReferences {
    let masked = mask_style_comments(source, syntax);
    let mut refs = StyleReferences::default();

    let import_pattern = match syntax {
        StyleSyntax::Sass => &*LINE_IMPORT,
        StyleSyntax::Scss | StyleSyntax::Css => &*BLOCK_IMPORT,
    };
    for caps in import_pattern.captures_iter(&masked) {
        let (Some(whole), Some(args)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let mut rule = whole.range();
        // A `}` closing the enclosing block is not part of the rule
        if masked[rule.clone()].ends_with('}') {
            rule.end -= 1;
        }
        let mut specifiers = Vec::new();
        let mut condition: Option<String> = None;
        for arg in split_arguments(args.as_str()) {
            // A media query list continues past the comma
            if let Some(condition) = condition.as_mut() {
                condition.push_str(", ");
                condition.push_str(arg);
                continue;
            }
            if let Some((value, rest)) = import_argument(arg) {
                condition = rest;
                specifiers.push(value);
            }
        }
        refs.imports.push(StyleImport { rule, specifiers, condition });
    }

    for caps in URL_FUNCTION.captures_iter(&masked) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if refs.imports.iter().any(|import| import.rule.contains(&whole.start())) {
            continue;
        }
        let value = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .map_or("", |m| m.as_str())
            .trim()
            .to_string();
        if value.is_empty() || is_dynamic(&value) {
            continue;
        }
        refs.urls.push(UrlReference { span: whole.range(), value });
    }

    refs
}

/// Blank out HTML comments and the bodies of `<script>`/`<style>` elements.
pub fn mask_markup(source: &str) -> String {
    let mut out = source.as_bytes().to_vec();

    let mut i = 0;
    while let Some(start) = find_from(source.as_bytes(), i, b"<!--") {
        let end = find_from(source.as_bytes(), start + 4, b"-->").map_or(source.len(), |p| p + 3);
        blank(&mut out, start..end);
        i = end;
    }
    let masked = into_string(out, source);

    let mut out = masked.clone().into_bytes();
    for (open, close) in [(&*SCRIPT_OPEN, &*SCRIPT_CLOSE), (&*STYLE_OPEN, &*STYLE_CLOSE)] {
        for tag in open.find_iter(&masked) {
            let body_end = close.find_at(&masked, tag.end()).map_or(masked.len(), |m| m.start());
            if body_end > tag.end() {
                blank(&mut out, tag.end()..body_end);
            }
        }
    }
    into_string(out, source)
}

/// A file reference found in markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupReference {
    /// Lowercase element name
    pub tag: String,
    /// Lowercase attribute name
    pub attribute: String,
    pub value: String,
    /// Byte range of the value (one `srcset` candidate URL at a time)
    pub value_span: Range<usize>,
    /// The element: its start tag, extended through `</script>` for scripts
    pub element: Range<usize>,
    /// A `<script src>` or `<link rel="stylesheet">` that the bundles replace
    pub bundled_tag: bool,
}

struct Attribute {
    name: String,
    value: Option<(String, Range<usize>)>,
}

fn attributes(masked: &str, range: Range<usize>) -> Vec<Attribute> {
    let text = &masked[range.clone()];
    ATTRIBUTE
        .captures_iter(text)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps.get(2).or_else(|| caps.get(3)).or_else(|| caps.get(4)).map(|m| {
                (m.as_str().to_string(), range.start + m.start()..range.start + m.end())
            });
            Some(Attribute { name, value })
        })
        .collect()
}

/// Split a `srcset` value into candidate URLs with their byte ranges.
fn srcset_candidates(value: &str, offset: usize) -> Vec<(String, Range<usize>)> {
    let mut candidates = Vec::new();
    let mut pos = 0;
    for part in value.split(',') {
        let leading = part.len() - part.trim_start().len();
        let url = part.trim_start().split_whitespace().next().unwrap_or("");
        if !url.is_empty() {
            let start = offset + pos + leading;
            candidates.push((url.to_string(), start..start + url.len()));
        }
        pos += part.len() + 1;
    }
    candidates
}

/// Collect file references from markup.
pub fn scan_markup(source: &str) -> Vec<MarkupReference> {
    let masked = mask_markup(source);
    let mut refs = Vec::new();

    for caps in TAG.captures_iter(&masked) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let tag = name.as_str().to_ascii_lowercase();
        let attrs = caps.get(2).map_or_else(Vec::new, |m| attributes(&masked, m.range()));
        let attr_value = |wanted: &str| {
            attrs.iter().find(|a| a.name == wanted).and_then(|a| a.value.as_ref())
        };

        let mut element = whole.range();
        if tag == "script" {
            if let Some(close) = SCRIPT_CLOSE.find_at(&masked, whole.end()) {
                element.end = close.end();
            }
        }

        let rel = attr_value("rel").map(|(v, _)| v.to_ascii_lowercase()).unwrap_or_default();
        let mut push = |attribute: &str, value: &str, span: Range<usize>, bundled: bool| {
            refs.push(MarkupReference {
                tag: tag.clone(),
                attribute: attribute.to_string(),
                value: value.to_string(),
                value_span: span,
                element: element.clone(),
                bundled_tag: bundled,
            });
        };

        if SRC_ELEMENTS.contains(&tag.as_str()) {
            if let Some((value, span)) = attr_value("src") {
                push("src", value.as_str(), span.clone(), tag == "script");
            }
        }
        if tag == "link" && (rel.contains("stylesheet") || rel.contains("icon")) {
            if let Some((value, span)) = attr_value("href") {
                push("href", value.as_str(), span.clone(), rel.contains("stylesheet"));
            }
        }
        if tag == "video" {
            if let Some((value, span)) = attr_value("poster") {
                push("poster", value.as_str(), span.clone(), false);
            }
        }
        if matches!(tag.as_str(), "img" | "source") {
            if let Some((value, span)) = attr_value("srcset") {
                for (url, range) in srcset_candidates(value, span.start) {
                    push("srcset", &url, range, false);
                }
            }
        }
    }

    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_style_comments_keeps_offsets() {
        let src = "a { /* x */ b: c; } // gone\n.d { e: url(http://x/y.png); }";
        let masked = mask_style_comments(src, StyleSyntax::Scss);
        assert_eq!(masked.len(), src.len());
        assert!(!masked.contains("/* x */"));
        assert!(!masked.contains("gone"));
        assert!(masked.contains("url(http://x/y.png)"));

        let css = mask_style_comments("a { b: c } // not a comment in css", StyleSyntax::Css);
        assert!(css.contains("// not a comment"));
    }

    #[test]
    fn test_scan_scss_imports() {
        let src = "@import 'base';\n// @import 'commented';\n@import \"a\", 'b';\n@import url(reset.css);\n@import 'print.css' print;\n.x { color: red; }";
        let refs = scan_stylesheet(src, StyleSyntax::Scss);
        assert_eq!(refs.imports.len(), 4);
        assert_eq!(refs.imports[0].specifiers, vec!["base"]);
        assert_eq!(&src[refs.imports[0].rule.clone()], "@import 'base';");
        assert_eq!(refs.imports[1].specifiers, vec!["a", "b"]);
        assert_eq!(refs.imports[2].specifiers, vec!["reset.css"]);
        assert!(!refs.imports[2].is_conditional());
        assert_eq!(refs.imports[3].condition.as_deref(), Some("print"));
        assert!(refs.urls.is_empty(), "url() inside @import is not a url reference");
    }

    #[test]
    fn test_import_conditions() {
        let src = "@import url(\"grid.css\") supports(display: grid) screen and (min-width: 40em);\n@import wide.css layer(base);";
        let refs = scan_stylesheet(src, StyleSyntax::Css);
        assert_eq!(refs.imports[0].specifiers, vec!["grid.css"]);
        assert_eq!(
            refs.imports[0].condition.as_deref(),
            Some("supports(display: grid) screen and (min-width: 40em)")
        );
        assert_eq!(refs.imports[1].specifiers, vec!["wide.css"]);
        assert_eq!(refs.imports[1].condition.as_deref(), Some("layer(base)"));

        let refs = scan_stylesheet("@import 'print.css' print, projection;", StyleSyntax::Css);
        assert_eq!(refs.imports[0].specifiers, vec!["print.css"]);
        assert_eq!(refs.imports[0].condition.as_deref(), Some("print, projection"));
    }

    #[test]
    fn test_scan_indented_sass_imports() {
        let src = "@import base, mixins\n.a\n  color: red\n";
        let refs = scan_stylesheet(src, StyleSyntax::Sass);
        assert_eq!(refs.imports.len(), 1);
        assert_eq!(refs.imports[0].specifiers, vec!["base", "mixins"]);
        assert_eq!(&src[refs.imports[0].rule.clone()], "@import base, mixins");
    }

    #[test]
    fn test_scan_urls() {
        let src = ".a { background: url(\"../images/bg.png\"); }\n.b { mask: url('#m'); cursor: url(hand.png) , auto; }\n.c { background: url($img); }";
        let refs = scan_stylesheet(src, StyleSyntax::Scss);
        let values: Vec<_> = refs.urls.iter().map(|u| u.value.as_str()).collect();
        assert_eq!(values, vec!["../images/bg.png", "#m", "hand.png"]);
        assert_eq!(&src[refs.urls[0].span.clone()], "url(\"../images/bg.png\")");
    }

    #[test]
    fn test_scan_markup_references() {
        let src = r#"<!DOCTYPE html>
<html>
<head>
  <link rel="stylesheet" href="css/extra.css">
  <link rel="shortcut icon" href='images/favicon.ico'>
  <link rel="preconnect" href="https://fonts.example">
  <!-- <img src="images/commented.png"> -->
</head>
<body>
  <img src="images/logo.png" srcset="images/logo-2x.png 2x, images/logo-3x.png 3x" alt="x > y">
  <video poster=images/poster.jpg></video>
  <script src="js/legacy.js"></script>
  <script>var s = "<img src='images/inline.png'>";</script>
</body>
</html>"#;
        let refs = scan_markup(src);
        let values: Vec<_> = refs.iter().map(|r| r.value.as_str()).collect();
        assert_eq!(values, vec![
            "css/extra.css",
            "images/favicon.ico",
            "images/logo.png",
            "images/logo-2x.png",
            "images/logo-3x.png",
            "images/poster.jpg",
            "js/legacy.js",
        ]);
        for r in &refs {
            assert_eq!(&src[r.value_span.clone()], r.value);
        }
        assert!(refs[0].bundled_tag);
        assert!(!refs[1].bundled_tag);
        let script = refs.last().unwrap();
        assert!(script.bundled_tag);
        assert_eq!(&src[script.element.clone()], r#"<script src="js/legacy.js"></script>"#);
    }

    #[test]
    fn test_mask_markup_blanks_raw_text() {
        let src = "<style>.a{background:url(x.png)}</style><p>keep</p>";
        let masked = mask_markup(src);
        assert_eq!(masked.len(), src.len());
        assert!(!masked.contains("x.png"));
        assert!(masked.contains("<p>keep</p>"));
    }
}
