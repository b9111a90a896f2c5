//! Graph command implementation

use std::path::Path;
use std::process::ExitCode;

use super::{config_failure, load_context, EXIT_ERROR, EXIT_SUCCESS};
use crate::build::BuildPipeline;
use crate::config::CliOverrides;
use crate::graph::DependencyGraph;

/// Render the graph as text: one line per node in discovery order, each
/// followed by its outgoing references.
pub(crate) fn format_graph(graph: &DependencyGraph) -> String {
    let mut out = String::new();
    for node in graph.nodes() {
        let marker = if node.expanded || !node.kind.follows_references() { "" } else { " (leaf)" };
        out.push_str(&format!("{:>3}  {:<12} {}{}\n", node.index, node.kind.to_string(), node.id, marker));
        for edge in &node.edges {
            out.push_str(&format!(
                "       -> {} [{}] {}\n",
                graph.node(edge.target).id,
                edge.kind,
                edge.specifier
            ));
        }
    }
    out
}

/// Run the graph command
pub fn run_graph(config_path: Option<&Path>, overrides: &CliOverrides, verbose: bool) -> ExitCode {
    let context = match load_context(config_path, overrides, verbose) {
        Ok(context) => context,
        Err(e) => return config_failure(&e),
    };

    match BuildPipeline::new(context).resolve() {
        Ok(graph) => {
            print!("{}", format_graph(&graph));
            for warning in graph.warnings() {
                eprintln!("Warning: {}", warning);
            }
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Resolution error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Resolver;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_format_graph_lists_nodes_and_edges() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        fs::write(dir.join("main.js"), "import './util.js';").unwrap();
        fs::write(dir.join("util.js"), "export const a = 1;").unwrap();

        let graph = Resolver::new(dir).resolve_roots(&dir.join("main.js"), None, None).unwrap();
        let text = format_graph(&graph);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("main.js"));
        assert!(lines[1].contains("-> util.js [import] ./util.js"));
        assert!(lines[2].contains("util.js"));
    }
}
