//! Output naming for binary assets.
//!
//! Every binary asset in the graph gets its output path before any
//! transform runs, so stylesheets, markup and scripts can reference the
//! final location and collisions abort the build before work is done.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::build::manifest::hash_bytes;
use crate::build::BuildError;
use crate::classify::ContentKind;
use crate::config::OutputConfig;
use crate::graph::{DependencyGraph, ModuleNode, NodeId};

/// Length of the `[hash]` placeholder expansion.
const NAME_HASH_LEN: usize = 16;

/// Output-relative paths of every binary asset.
#[derive(Debug, Clone, Default)]
pub struct AssetPlan {
    outputs: HashMap<NodeId, String>,
    order: Vec<NodeId>,
}

/// Expand an asset name template for one source file.
fn expand_name(template: &str, node: &ModuleNode) -> Result<String, BuildError> {
    let path = &node.path;
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = path.extension().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();

    let mut name = template.replace("[name]", &stem).replace("[ext]", &ext);
    if name.contains("[hash]") {
        let hash = hash_bytes(node.content()?);
        name = name.replace("[hash]", &hash[..NAME_HASH_LEN]);
    }
    Ok(name)
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
}

impl AssetPlan {
    /// Name every binary asset of the graph.
    ///
    /// Assets go to `<images>/<asset_name>`; the favicon root keeps its file
    /// name at the top of the output directory.
    pub fn new(graph: &DependencyGraph, output: &OutputConfig) -> Result<Self, BuildError> {
        let images = output.images.trim_matches('/');
        let favicon = graph.favicon().map(|n| n.index);
        let mut plan = AssetPlan::default();
        let mut claimed: HashMap<String, NodeId> = HashMap::new();

        for node in graph.nodes_of(ContentKind::BinaryAsset) {
            let output_path = if Some(node.index) == favicon {
                file_name(&node.path)
            } else {
                format!("{}/{}", images, expand_name(&output.asset_name, node)?)
            };

            if let Some(&first) = claimed.get(&output_path) {
                return Err(BuildError::OutputCollision {
                    output: PathBuf::from(&output_path),
                    first: PathBuf::from(&graph.node(first).id),
                    second: PathBuf::from(&node.id),
                });
            }
            tracing::debug!(module = %node.id, output = %output_path, "asset planned");
            claimed.insert(output_path.clone(), node.index);
            plan.outputs.insert(node.index, output_path);
            plan.order.push(node.index);
        }
        Ok(plan)
    }

    /// Output-relative path of an asset, used as its public URL.
    pub fn public_path(&self, id: NodeId) -> Option<&str> {
        self.outputs.get(&id).map(String::as_str)
    }

    /// Assets and their output paths in discovery order.
    pub fn entries(&self) -> impl Iterator<Item = (NodeId, &str)> {
        self.order.iter().map(|id| (*id, self.outputs[id].as_str()))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Resolver;
    use std::fs;
    use tempfile::TempDir;

    fn create_file(dir: &Path, relative: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_default_names() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let entry = create_file(dir, "main.js", b"import a from './img/logo.png';");
        create_file(dir, "img/logo.png", b"png");
        let favicon = create_file(dir, "img/favicon.ico", b"ico");

        let graph = Resolver::new(dir).resolve_roots(&entry, None, Some(&favicon)).unwrap();
        let plan = AssetPlan::new(&graph, &OutputConfig::default()).unwrap();
        let entries: Vec<_> = plan.entries().map(|(_, p)| p.to_string()).collect();
        assert_eq!(entries, vec!["images/logo.png", "favicon.ico"]);
        assert_eq!(plan.public_path(1), Some("images/logo.png"));
        assert_eq!(plan.public_path(0), None);
    }

    #[test]
    fn test_hashed_names() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let entry = create_file(dir, "main.js", b"import a from './logo.png';");
        create_file(dir, "logo.png", b"png-bytes");

        let graph = Resolver::new(dir).resolve_roots(&entry, None, None).unwrap();
        let output = OutputConfig { asset_name: "[name].[hash].[ext]".into(), ..OutputConfig::default() };
        let plan = AssetPlan::new(&graph, &output).unwrap();
        let expected = format!("images/logo.{}.png", &hash_bytes(b"png-bytes")[..16]);
        assert_eq!(plan.public_path(1), Some(expected.as_str()));
    }

    #[test]
    fn test_collision_detected() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let entry = create_file(dir, "main.js", b"import a from './a/icon.png';\nimport b from './b/icon.png';");
        create_file(dir, "a/icon.png", b"one");
        create_file(dir, "b/icon.png", b"two");

        let graph = Resolver::new(dir).resolve_roots(&entry, None, None).unwrap();
        let err = AssetPlan::new(&graph, &OutputConfig::default()).unwrap_err();
        match err {
            BuildError::OutputCollision { output, first, second } => {
                assert_eq!(output, PathBuf::from("images/icon.png"));
                assert_eq!(first, PathBuf::from("a/icon.png"));
                assert_eq!(second, PathBuf::from("b/icon.png"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_hash_in_name_avoids_collision() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let entry = create_file(dir, "main.js", b"import a from './a/icon.png';\nimport b from './b/icon.png';");
        create_file(dir, "a/icon.png", b"one");
        create_file(dir, "b/icon.png", b"two");

        let graph = Resolver::new(dir).resolve_roots(&entry, None, None).unwrap();
        let output = OutputConfig { asset_name: "[hash].[ext]".into(), ..OutputConfig::default() };
        assert_eq!(AssetPlan::new(&graph, &output).unwrap().len(), 2);
    }
}
