//! Content classification by file extension.
//!
//! Every file that enters the build is mapped to one of a closed set of
//! content kinds. The kind decides which transform chain runs and whether the
//! resolver follows the file's own references.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::build::BuildError;

/// The kind of content a source file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentKind {
    /// JavaScript module
    Script,
    /// Sass, Scss or plain CSS
    Stylesheet,
    /// HTML document or fragment
    Markup,
    /// Image copied to the output unchanged
    BinaryAsset,
}

impl ContentKind {
    /// All kinds, in dispatch-table order.
    pub const ALL: [ContentKind; 4] =
        [ContentKind::Script, ContentKind::Stylesheet, ContentKind::Markup, ContentKind::BinaryAsset];

    /// Whether the resolver follows references found inside files of this kind.
    pub fn follows_references(self) -> bool {
        matches!(self, ContentKind::Script | ContentKind::Stylesheet)
    }

    /// Whether the content is text (as opposed to opaque bytes).
    pub fn is_text(self) -> bool {
        !matches!(self, ContentKind::BinaryAsset)
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentKind::Script => write!(f, "script"),
            ContentKind::Stylesheet => write!(f, "stylesheet"),
            ContentKind::Markup => write!(f, "markup"),
            ContentKind::BinaryAsset => write!(f, "binary asset"),
        }
    }
}

/// Source syntax of a stylesheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleSyntax {
    /// Brace-delimited Sass (`.scss`)
    Scss,
    /// Indented Sass (`.sass`)
    Sass,
    /// Plain CSS
    Css,
}

impl StyleSyntax {
    /// Determine the syntax from a stylesheet path.
    ///
    /// Unknown extensions are treated as plain CSS.
    pub fn from_path(path: &Path) -> Self {
        match extension(path).as_deref() {
            Some("scss") => StyleSyntax::Scss,
            Some("sass") => StyleSyntax::Sass,
            _ => StyleSyntax::Css,
        }
    }

    /// Whether `//` line comments are legal in this syntax.
    pub fn has_line_comments(self) -> bool {
        !matches!(self, StyleSyntax::Css)
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase())
}

/// Classify a path by its extension.
///
/// Fails with [`BuildError::UnsupportedAssetType`] for anything outside the
/// extension table; there is no passthrough for unknown files.
pub fn classify(path: &Path) -> Result<ContentKind, BuildError> {
    match extension(path).as_deref() {
        Some("js" | "mjs") => Ok(ContentKind::Script),
        Some("sass" | "scss" | "css") => Ok(ContentKind::Stylesheet),
        Some("html" | "htm") => Ok(ContentKind::Markup),
        Some("png" | "jpg" | "jpeg" | "gif" | "svg" | "ico") => Ok(ContentKind::BinaryAsset),
        _ => Err(BuildError::UnsupportedAssetType { path: path.to_path_buf() }),
    }
}

/// Whether a path has an extension the classifier accepts.
pub fn is_classifiable(path: &Path) -> bool {
    classify(path).is_ok()
}
