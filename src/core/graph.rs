//! Block dependency graph
//!
//! Computes build order over the blocks declared in a [`ProjectConfig`].

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::config::defaults;
use crate::core::project::ProjectConfig;
use crate::error::GraphError;

/// Dependency graph between declared blocks
///
/// Nodes are kept in declaration order; that order breaks ties between
/// blocks with no ordering constraint.
#[derive(Debug, Default, Clone)]
pub struct BlockGraph {
    /// Block ids in declaration order
    nodes: Vec<String>,
    /// Block id -> index in `nodes`
    index: HashMap<String, usize>,
    /// Adjacency list: consumer -> providers
    providers: Vec<Vec<usize>>,
}

impl BlockGraph {
    /// Derive the graph from the resolved configuration
    ///
    /// A dependency on a declared block becomes an edge. A dependency whose
    /// key is not a declared block is a literal external file and creates
    /// no edge, unless its path points into that block's own working
    /// directory (`temp/<key>/...`), which means a block was expected.
    pub fn build(config: &ProjectConfig) -> Result<Self, GraphError> {
        let mut graph = Self::default();
        for id in config.block_ids() {
            graph.add_block(id);
        }

        for (consumer, spec) in config.blocks() {
            for (dependency, pattern) in &spec.project.dependencies {
                if graph.index.contains_key(dependency) {
                    graph.add_edge(consumer, dependency);
                } else if points_into_block(pattern, dependency) {
                    return Err(GraphError::UnknownDependency {
                        block: consumer.to_string(),
                        dependency: dependency.clone(),
                    });
                } else {
                    tracing::debug!(
                        "Block '{}' uses external file '{}' for '{}'",
                        consumer,
                        pattern,
                        dependency
                    );
                }
            }
        }

        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Add a block node
    pub fn add_block(&mut self, id: &str) {
        if !self.index.contains_key(id) {
            self.index.insert(id.to_string(), self.nodes.len());
            self.nodes.push(id.to_string());
            self.providers.push(Vec::new());
        }
    }

    /// Record that `consumer` depends on `provider` (both must be declared)
    pub fn add_edge(&mut self, consumer: &str, provider: &str) {
        if let (Some(&c), Some(&p)) = (self.index.get(consumer), self.index.get(provider)) {
            if !self.providers[c].contains(&p) {
                self.providers[c].push(p);
            }
        }
    }

    /// Number of blocks
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no blocks
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `id` is a declared block
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Direct providers of `id`, in declaration order
    pub fn providers(&self, id: &str) -> Vec<&str> {
        let Some(&i) = self.index.get(id) else {
            return Vec::new();
        };
        let mut providers = self.providers[i].clone();
        providers.sort_unstable();
        providers.iter().map(|&p| self.nodes[p].as_str()).collect()
    }

    /// Deterministic build order for `selected` and everything it depends on
    ///
    /// `all` expands to every declared block.
    pub fn order(&self, selected: &[String]) -> Result<Vec<String>, GraphError> {
        let roots = self.selection(selected)?;

        let mut closure = HashSet::new();
        let mut stack = roots;
        while let Some(node) = stack.pop() {
            if closure.insert(node) {
                stack.extend(self.providers[node].iter().copied());
            }
        }

        Ok(self.sort(&closure))
    }

    /// Build order of exactly `selected`, without pulling in dependencies
    pub fn order_only(&self, selected: &[String]) -> Result<Vec<String>, GraphError> {
        let nodes: HashSet<usize> = self.selection(selected)?.into_iter().collect();
        Ok(self.sort(&nodes))
    }

    fn selection(&self, selected: &[String]) -> Result<Vec<usize>, GraphError> {
        if selected.iter().any(|s| s == defaults::ALL_BLOCKS) {
            return Ok((0..self.nodes.len()).collect());
        }
        selected
            .iter()
            .map(|id| {
                self.index
                    .get(id)
                    .copied()
                    .ok_or_else(|| GraphError::UnknownBlock { block: id.clone() })
            })
            .collect()
    }

    /// Kahn's algorithm restricted to `nodes`, always taking the earliest
    /// declared ready block
    fn sort(&self, nodes: &HashSet<usize>) -> Vec<String> {
        let mut pending: HashMap<usize, usize> = nodes
            .iter()
            .map(|&n| {
                let count = self.providers[n].iter().filter(|p| nodes.contains(p)).count();
                (n, count)
            })
            .collect();

        let mut ready: BTreeSet<usize> = pending
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(&n, _)| n)
            .collect();

        let mut order = Vec::with_capacity(nodes.len());
        while let Some(next) = ready.pop_first() {
            pending.remove(&next);
            order.push(self.nodes[next].clone());
            for (&consumer, count) in &mut pending {
                if self.providers[consumer].contains(&next) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(consumer);
                    }
                }
            }
        }
        order
    }

    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut temp_visited = HashSet::new();
        let mut path = Vec::new();

        for node in 0..self.nodes.len() {
            if !visited.contains(&node) {
                self.visit(node, &mut visited, &mut temp_visited, &mut path)?;
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        node: usize,
        visited: &mut HashSet<usize>,
        temp_visited: &mut HashSet<usize>,
        path: &mut Vec<usize>,
    ) -> Result<(), GraphError> {
        if temp_visited.contains(&node) {
            let start = path.iter().position(|&n| n == node).unwrap_or(0);
            let cycle = path[start..]
                .iter()
                .chain(std::iter::once(&node))
                .map(|&n| self.nodes[n].clone())
                .collect();
            return Err(GraphError::CircularDependency { cycle });
        }
        if visited.contains(&node) {
            return Ok(());
        }

        temp_visited.insert(node);
        path.push(node);
        for &provider in &self.providers[node] {
            self.visit(provider, visited, temp_visited, path)?;
        }
        path.pop();
        temp_visited.remove(&node);
        visited.insert(node);
        Ok(())
    }
}

/// Whether `pattern` points into `temp/<block>/`
fn points_into_block(pattern: &str, block: &str) -> bool {
    let pattern = pattern.trim_start_matches("./");
    let prefix = format!("{}/{}/", defaults::TEMP_DIR, block);
    pattern.starts_with(&prefix)
}
