//! Artifacts and the artifact manifest.
//!
//! Every build produces one script bundle, one style bundle, one document
//! and zero or more binary assets. The manifest lists each of them with its
//! size and content hash:
//!
//! ```json
//! {
//!   "artifacts": [
//!     { "kind": "script-bundle", "path": "bundle.js", "size": 2048, "hash": "9f2c..." },
//!     { "kind": "style-bundle", "path": "bundle.css", "size": 512, "hash": "41ab..." },
//!     { "kind": "markup-document", "path": "index.html", "size": 300, "hash": "c07e..." },
//!     { "kind": "binary-asset", "path": "images/logo.png", "size": 4096, "hash": "5d1a..." }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::build::BuildError;

/// What an artifact is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    ScriptBundle,
    StyleBundle,
    MarkupDocument,
    BinaryAsset,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::ScriptBundle => write!(f, "script bundle"),
            ArtifactKind::StyleBundle => write!(f, "style bundle"),
            ArtifactKind::MarkupDocument => write!(f, "document"),
            ArtifactKind::BinaryAsset => write!(f, "asset"),
        }
    }
}

/// An output file, assembled in memory before anything is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    /// Path relative to the output directory
    pub path: PathBuf,
    pub content: Vec<u8>,
    pub hash: String,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, path: impl Into<PathBuf>, content: Vec<u8>) -> Self {
        let hash = hash_bytes(&content);
        Self { kind, path: path.into(), content, hash }
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    /// Content as text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

/// Manifest entry for one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub kind: ArtifactKind,
    /// Output-relative path with forward slashes
    pub path: String,
    pub size: u64,
    pub hash: String,
}

/// Every artifact of a build, in emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub artifacts: Vec<ArtifactEntry>,
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

impl ArtifactManifest {
    pub fn from_artifacts(artifacts: &[Artifact]) -> Self {
        let artifacts = artifacts
            .iter()
            .map(|a| ArtifactEntry {
                kind: a.kind,
                path: slash_path(&a.path),
                size: a.size(),
                hash: a.hash.clone(),
            })
            .collect();
        Self { artifacts }
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Look up an entry by its output-relative path.
    pub fn get(&self, path: &str) -> Option<&ArtifactEntry> {
        self.artifacts.iter().find(|a| a.path == path)
    }

    pub fn of_kind(&self, kind: ArtifactKind) -> impl Iterator<Item = &ArtifactEntry> {
        self.artifacts.iter().filter(move |a| a.kind == kind)
    }

    pub fn total_size(&self) -> u64 {
        self.artifacts.iter().map(|a| a.size).sum()
    }

    pub fn total_size_string(&self) -> String {
        format_size(self.total_size())
    }

    /// Check the artifacts on disk against their recorded hashes.
    ///
    /// Returns the paths of artifacts that are missing or changed.
    pub fn verify(&self, out_dir: &Path) -> Result<Vec<String>, BuildError> {
        let mut changed = Vec::new();
        for entry in &self.artifacts {
            let path = out_dir.join(&entry.path);
            if !path.exists() {
                changed.push(entry.path.clone());
                continue;
            }
            let content = std::fs::read(&path).map_err(|e| BuildError::io(&path, e))?;
            if hash_bytes(&content) != entry.hash {
                changed.push(entry.path.clone());
            }
        }
        Ok(changed)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Content hash used for artifacts, asset names and the incremental cache.
pub fn hash_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Format a byte size as a human-readable string.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    }
}
