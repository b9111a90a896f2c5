//! Markup chain: reference rewriting and production minification.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

use super::{Payload, StepError, TransformMeta, TransformStep};
use crate::classify::ContentKind;
use crate::graph::references::scan_markup;

static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static DOCTYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<!doctype\s+html[^>]*>").unwrap());
static TYPED_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<(?:script|style|link)\b[^>]*>").unwrap());
static REDUNDANT_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\s+type\s*=\s*(?:"text/(?:javascript|css)"|'text/(?:javascript|css)'|text/(?:javascript|css)\b)"#)
        .unwrap()
});
static BETWEEN_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r">\s*\n\s*<").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}|[\t\r\n]").unwrap());
static RAW_TEXT_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<(pre|textarea|script|style)\b[^>]*>").unwrap());

/// Escape a value for use inside a double- or single-quoted attribute.
fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;").replace('\'', "&#39;")
}

/// Widen a removed element to its whole line when nothing else is on it.
fn whole_line(source: &str, range: Range<usize>) -> Range<usize> {
    let line_start = source[..range.start].rfind('\n').map_or(0, |p| p + 1);
    let line_end = source[range.end..].find('\n').map_or(source.len(), |p| range.end + p + 1);
    let before_blank = source[line_start..range.start].trim().is_empty();
    let after_blank = source[range.end..line_end].trim().is_empty();
    if before_blank && after_blank {
        line_start..line_end
    } else {
        range
    }
}

/// Rewrites asset references, drops elements the bundles replace and
/// minifies in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct Render;

impl TransformStep for Render {
    fn name(&self) -> &'static str {
        "render"
    }

    fn apply(&self, input: Payload, meta: &mut TransformMeta) -> Result<Payload, StepError> {
        let source = input.into_text()?;
        let mut edits: Vec<(Range<usize>, String)> = Vec::new();

        for reference in scan_markup(&source) {
            let Some(resolved) = meta.reference(&reference.value) else {
                continue;
            };
            let bundled = matches!(resolved.kind, ContentKind::Script | ContentKind::Stylesheet);
            if reference.bundled_tag && bundled {
                let range = whole_line(&source, reference.element.clone());
                if !edits.iter().any(|(r, _)| r.start < range.end && range.start < r.end) {
                    edits.push((range, String::new()));
                }
            } else if let Some(public) = &resolved.public_path {
                edits.push((reference.value_span.clone(), escape_attribute(public)));
            }
        }

        edits.sort_by_key(|(range, _)| range.start);
        let mut out = String::with_capacity(source.len());
        let mut cursor = 0;
        for (range, text) in edits {
            if range.start < cursor {
                continue;
            }
            out.push_str(&source[cursor..range.start]);
            out.push_str(&text);
            cursor = range.end;
        }
        out.push_str(&source[cursor..]);

        if meta.mode.minify_markup() {
            out = minify_markup(&out);
        }
        Ok(Payload::Text(out))
    }
}

fn minify_chunk(chunk: &str) -> String {
    let chunk = COMMENT.replace_all(chunk, |caps: &regex::Captures| {
        // Conditional comments are markup, not commentary
        if caps[0].starts_with("<!--[if") {
            caps[0].to_string()
        } else {
            String::new()
        }
    });
    let chunk = DOCTYPE.replace_all(&chunk, "<!doctype html>");
    let chunk = TYPED_TAG.replace_all(&chunk, |caps: &regex::Captures| REDUNDANT_TYPE.replace_all(&caps[0], "").into_owned());
    let chunk = BETWEEN_TAGS.replace_all(&chunk, "><");
    WHITESPACE.replace_all(&chunk, " ").into_owned()
}

/// Minify an HTML document.
///
/// Removes comments, collapses whitespace outside `pre`, `textarea`,
/// `script` and `style` bodies, shortens the doctype and drops redundant
/// `type` attributes.
pub fn minify_markup(source: &str) -> String {
    let lower = source.to_ascii_lowercase();
    let mut out = String::with_capacity(source.len());
    let mut pos = 0;

    while let Some(caps) = RAW_TEXT_OPEN.captures_at(source, pos) {
        let (Some(open), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        out.push_str(&minify_chunk(&source[pos..open.end()]));
        let close = format!("</{}", name.as_str().to_ascii_lowercase());
        let body_end = lower[open.end()..].find(&close).map_or(source.len(), |p| open.end() + p);
        out.push_str(&source[open.end()..body_end]);
        pos = body_end;
    }
    out.push_str(&minify_chunk(&source[pos..]));
    out.trim().to_string()
}
