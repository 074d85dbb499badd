use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::TableInfo;

/// Summary of the table reference graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSummary {
    pub nodes: usize,
    pub edges: usize,
}

/// Deterministic ordering report over every table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyReport {
    pub summary: GraphSummary,
    pub topo_order: Option<Vec<String>>,
    pub cycle: Option<Vec<String>>,
}

/// Directed graph of leafref edges, referencing table -> referenced table.
///
/// Topological orders list referencing tables before the tables they point
/// at, with ties broken by name. Self references are not edges.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
    key_edges: BTreeMap<String, BTreeSet<String>>,
    modules: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn build(tables: &BTreeMap<String, TableInfo>) -> Self {
        let mut graph = DependencyGraph::default();

        for info in tables.values() {
            graph.edges.entry(info.name.clone()).or_default();
            graph
                .modules
                .entry(info.module.clone())
                .or_default()
                .insert(info.name.clone());

            for descriptors in info.leafrefs.values() {
                for descriptor in descriptors {
                    if descriptor.target_table == info.name {
                        continue;
                    }
                    let Some(target) = tables.get(&descriptor.target_table) else {
                        continue;
                    };
                    graph
                        .edges
                        .entry(info.name.clone())
                        .or_default()
                        .insert(target.name.clone());
                    if target.is_key(&descriptor.target_field) {
                        graph
                            .key_edges
                            .entry(info.name.clone())
                            .or_default()
                            .insert(target.name.clone());
                    }
                }
            }

            if let Some(parent) = &info.dependent_on {
                if parent != &info.name && tables.contains_key(parent) {
                    graph
                        .edges
                        .entry(info.name.clone())
                        .or_default()
                        .insert(parent.clone());
                    graph
                        .key_edges
                        .entry(info.name.clone())
                        .or_default()
                        .insert(parent.clone());
                }
            }
        }

        graph
    }

    pub fn contains(&self, table: &str) -> bool {
        self.edges.contains_key(table)
    }

    /// Tables `table` points at.
    pub fn references(&self, table: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(table)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Every table holding a reference into `table`.
    pub fn referring_tables(&self, table: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|(_, targets)| targets.contains(table))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Topologically order the given tables; unknown names are skipped.
    pub fn sort_dep_tables<S: AsRef<str>>(&self, tables: &[S]) -> Result<Vec<String>> {
        let nodes: BTreeSet<String> = tables
            .iter()
            .map(|table| table.as_ref())
            .filter(|table| self.contains(table))
            .map(str::to_string)
            .collect();
        self.sort_nodes(&nodes, &self.edges)
    }

    /// Every table of `module`, topologically ordered.
    pub fn ordered_tables(&self, module: &str) -> Result<Vec<String>> {
        let nodes = self
            .modules
            .get(module)
            .ok_or_else(|| Error::UnknownModule(module.to_string()))?;
        self.sort_nodes(nodes, &self.edges)
    }

    /// `table` and the tables of `module` whose reference targets a key of
    /// `table`, topologically ordered.
    pub fn ordered_dep_tables(&self, module: &str, table: &str) -> Result<Vec<String>> {
        let members = self
            .modules
            .get(module)
            .ok_or_else(|| Error::UnknownModule(module.to_string()))?;
        if !self.contains(table) {
            return Err(Error::UnknownTable(table.to_string()));
        }

        let mut nodes: BTreeSet<String> = members
            .iter()
            .filter(|member| {
                self.key_edges
                    .get(member.as_str())
                    .is_some_and(|targets| targets.contains(table))
            })
            .cloned()
            .collect();
        nodes.insert(table.to_string());

        self.sort_nodes(&nodes, &self.key_edges)
    }

    /// Transitive closure of tables reachable from `table`, topologically
    /// ordered and including `table` itself.
    pub fn dep_tables(&self, table: &str) -> Result<Vec<String>> {
        if !self.contains(table) {
            return Err(Error::UnknownTable(table.to_string()));
        }

        let mut seen = BTreeSet::new();
        let mut pending = vec![table.to_string()];
        while let Some(current) = pending.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            pending.extend(self.references(&current).map(str::to_string));
        }

        self.sort_nodes(&seen, &self.edges)
    }

    /// Ordering report over the whole graph, cycles included.
    pub fn report(&self) -> DependencyReport {
        let nodes = self.edges.len();
        let edges = self.edges.values().map(|targets| targets.len()).sum();
        let summary = GraphSummary { nodes, edges };

        match toposort(&self.edges) {
            Ok(order) => DependencyReport {
                summary,
                topo_order: Some(order),
                cycle: None,
            },
            Err(cycle) => DependencyReport {
                summary,
                topo_order: None,
                cycle: Some(cycle),
            },
        }
    }

    fn sort_nodes(
        &self,
        nodes: &BTreeSet<String>,
        edges: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<Vec<String>> {
        let induced: BTreeMap<String, BTreeSet<String>> = nodes
            .iter()
            .map(|node| {
                let targets = edges
                    .get(node)
                    .map(|targets| targets.intersection(nodes).cloned().collect())
                    .unwrap_or_default();
                (node.clone(), targets)
            })
            .collect();

        toposort(&induced).map_err(Error::Cycle)
    }
}

fn toposort(graph: &BTreeMap<String, BTreeSet<String>>) -> std::result::Result<Vec<String>, Vec<String>> {
    let mut indegree: BTreeMap<&str, usize> =
        graph.keys().map(|node| (node.as_str(), 0)).collect();

    for targets in graph.values() {
        for target in targets {
            *indegree.entry(target.as_str()).or_insert(0) += 1;
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter_map(|(node, count)| if *count == 0 { Some(*node) } else { None })
        .collect();

    let mut order = Vec::with_capacity(indegree.len());

    while let Some(node) = ready.pop_first() {
        order.push(node.to_string());

        if let Some(targets) = graph.get(node) {
            for target in targets {
                if let Some(count) = indegree.get_mut(target.as_str()) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.insert(target.as_str());
                    }
                }
            }
        }
    }

    if order.len() == indegree.len() {
        Ok(order)
    } else {
        Err(indegree
            .into_iter()
            .filter_map(|(node, count)| if count > 0 { Some(node.to_string()) } else { None })
            .collect())
    }
}
