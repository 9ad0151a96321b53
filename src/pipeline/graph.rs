//! The stage dependency graph.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::config::AssemblyConfig;
use crate::error::{AssemblyError, Result};
use crate::stages::StageId;

/// Which stages run, and what each waits for.
#[derive(Debug)]
pub struct StageGraph {
    graph: DiGraph<StageId, ()>,
    nodes: BTreeMap<StageId, NodeIndex>,
}

impl StageGraph {
    /// The graph for `config`. The install node exists only when an install
    /// target is configured.
    pub fn for_config(config: &AssemblyConfig) -> Result<Self> {
        let stages = StageId::ALL
            .into_iter()
            .filter(|id| *id != StageId::Install || config.install_dir.is_some());
        Self::from_stages(stages)
    }

    /// Build a graph over `stages`. Every dependency must be present.
    pub fn from_stages(stages: impl IntoIterator<Item = StageId>) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut nodes = BTreeMap::new();
        for id in stages {
            if nodes.contains_key(&id) {
                return Err(AssemblyError::Graph(format!("stage '{id}' added twice")));
            }
            nodes.insert(id, graph.add_node(id));
        }
        for (&id, &node) in &nodes {
            for dep in id.dependencies() {
                let Some(&from) = nodes.get(dep) else {
                    return Err(AssemblyError::Graph(format!(
                        "stage '{id}' depends on '{dep}', which is not in the graph"
                    )));
                };
                graph.add_edge(from, node, ());
            }
        }
        if toposort(&graph, None).is_err() {
            return Err(AssemblyError::Graph("stage graph has a cycle".to_string()));
        }
        Ok(Self { graph, nodes })
    }

    pub fn contains(&self, id: StageId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct dependencies of `id` that are part of this graph.
    pub fn dependencies(&self, id: StageId) -> Vec<StageId> {
        let Some(&node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        let mut deps: Vec<StageId> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .map(|n| self.graph[n])
            .collect();
        deps.sort();
        deps
    }

    /// Topological order; among ready stages, declaration order wins.
    pub fn execution_order(&self) -> Vec<StageId> {
        let mut pending: BTreeMap<StageId, usize> = self
            .nodes
            .iter()
            .map(|(&id, &node)| {
                let incoming = self
                    .graph
                    .neighbors_directed(node, Direction::Incoming)
                    .count();
                (id, incoming)
            })
            .collect();
        let mut ready: BTreeSet<StageId> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_first() {
            order.push(id);
            for next in self
                .graph
                .neighbors_directed(self.nodes[&id], Direction::Outgoing)
            {
                let next = self.graph[next];
                if let Some(count) = pending.get_mut(&next) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(next);
                    }
                }
            }
        }
        order
    }

    /// Human-readable plan, one stage per line.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (step, id) in self.execution_order().into_iter().enumerate() {
            let deps = self.dependencies(id);
            if deps.is_empty() {
                let _ = writeln!(out, "{}. {id}", step + 1);
            } else {
                let deps: Vec<_> = deps.iter().map(|d| d.name()).collect();
                let _ = writeln!(out, "{}. {id} (after {})", step + 1, deps.join(", "));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssemblyConfig;
    use std::path::Path;

    const CONFIG: &str = r#"
base_runtime = "rt"
scripts_dir = "scripts"

[[modules]]
id = "lsp"

[launcher]
name = "app"
entry_class = "org.app.Main"
"#;

    #[test]
    fn no_install_node_without_target() {
        let config = AssemblyConfig::from_toml_str(CONFIG, Path::new("/w")).unwrap();
        let graph = StageGraph::for_config(&config).unwrap();
        assert!(!graph.contains(StageId::Install));
        assert_eq!(
            graph.execution_order(),
            vec![
                StageId::CollectArtifacts,
                StageId::BuildRuntimeImage,
                StageId::RegisterLaunchers,
                StageId::InstallScripts,
            ]
        );
    }

    #[test]
    fn install_node_runs_last() {
        let config = AssemblyConfig::from_toml_str(CONFIG, Path::new("/w"))
            .unwrap()
            .with_install_dir(Some("/opt/app".into()));
        let graph = StageGraph::for_config(&config).unwrap();
        assert!(graph.contains(StageId::Install));
        assert_eq!(graph.execution_order().last(), Some(&StageId::Install));
        assert_eq!(graph.dependencies(StageId::Install).len(), 3);
    }

    #[test]
    fn missing_dependency_is_a_graph_error() {
        let err = StageGraph::from_stages([StageId::RegisterLaunchers]).unwrap_err();
        assert!(matches!(err, AssemblyError::Graph(_)));
    }

    #[test]
    fn describe_lists_dependencies() {
        let graph = StageGraph::from_stages(StageId::ALL).unwrap();
        let plan = graph.describe();
        assert!(plan.starts_with("1. collect-artifacts\n"));
        assert!(plan.contains(
            "5. install (after build-runtime-image, register-launchers, install-scripts)"
        ));
    }
}
