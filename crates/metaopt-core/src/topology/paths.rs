//! Path enumeration: k-shortest (Yen, hop count) and all simple paths.

use super::{NodePair, Topology};
use crate::error::{MetaOptError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;

/// A loop-free node sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Path {
    nodes: Vec<String>,
}

impl Path {
    pub fn new(nodes: Vec<String>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn source(&self) -> Option<&str> {
        self.nodes.first().map(String::as_str)
    }

    pub fn target(&self) -> Option<&str> {
        self.nodes.last().map(String::as_str)
    }

    /// Number of edges
    pub fn hops(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    /// Consecutive `(from, to)` pairs
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.nodes.windows(2).map(|w| (w[0].as_str(), w[1].as_str()))
    }

    pub fn uses_edge(&self, source: &str, target: &str) -> bool {
        self.edges().any(|(s, t)| s == source && t == target)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.nodes.join("->"))
    }
}

/// Which path set an encoder routes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PathType {
    /// Up to `k` shortest paths by hop count
    #[default]
    KShortest,
    /// Every simple path
    AllSimple,
}

impl Topology {
    /// Up to `k` loop-free paths in non-decreasing hop count (Yen's algorithm).
    ///
    /// Ties break on node insertion order, so results are deterministic.
    pub fn shortest_k_paths(&self, k: usize, source: &str, target: &str) -> Result<Vec<Path>> {
        let s = self.node_index(source)?;
        let t = self.node_index(target)?;
        if s == t {
            return Err(MetaOptError::topology(format!("path from {} to itself", source)));
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        let n = self.num_nodes();
        let none_banned = vec![false; n];
        let Some(first) = self.bfs_path(s, t, &none_banned, &HashSet::new()) else {
            return Ok(Vec::new());
        };

        let mut accepted: Vec<Vec<usize>> = vec![first];
        let mut candidates: BTreeSet<(usize, Vec<usize>)> = BTreeSet::new();
        while accepted.len() < k {
            let Some(last) = accepted.last().cloned() else { break };
            for i in 0..last.len() - 1 {
                let spur = last[i];
                let root = &last[..=i];
                let mut banned_edges = HashSet::new();
                for p in &accepted {
                    if p.len() > i + 1 && &p[..=i] == root {
                        banned_edges.insert((p[i], p[i + 1]));
                    }
                }
                let mut banned_nodes = vec![false; n];
                for &u in &root[..i] {
                    banned_nodes[u] = true;
                }
                if let Some(spur_path) = self.bfs_path(spur, t, &banned_nodes, &banned_edges) {
                    let mut total: Vec<usize> = root[..i].to_vec();
                    total.extend(spur_path);
                    if !accepted.contains(&total) {
                        candidates.insert((total.len(), total));
                    }
                }
            }
            match candidates.pop_first() {
                Some((_, next)) => accepted.push(next),
                None => break,
            }
        }
        Ok(accepted.into_iter().map(|p| self.to_path(&p)).collect())
    }

    /// Every simple path from `source` to `target`, depth-first.
    pub fn all_simple_paths(&self, source: &str, target: &str) -> Result<Vec<Path>> {
        let s = self.node_index(source)?;
        let t = self.node_index(target)?;
        if s == t {
            return Err(MetaOptError::topology(format!("path from {} to itself", source)));
        }
        let mut out = Vec::new();
        let mut on_path = vec![false; self.num_nodes()];
        let mut stack = vec![s];
        on_path[s] = true;
        self.dfs_paths(t, &mut stack, &mut on_path, &mut out);
        Ok(out)
    }

    fn dfs_paths(&self, t: usize, stack: &mut Vec<usize>, on_path: &mut [bool], out: &mut Vec<Path>) {
        let Some(&u) = stack.last() else { return };
        for &v in self.successor_indices(u) {
            if on_path[v] {
                continue;
            }
            stack.push(v);
            if v == t {
                out.push(self.to_path(stack));
            } else {
                on_path[v] = true;
                self.dfs_paths(t, stack, on_path, out);
                on_path[v] = false;
            }
            stack.pop();
        }
    }

    /// Path set per reachable pair
    pub fn compute_paths(&self, path_type: PathType, k: usize) -> Result<BTreeMap<NodePair, Vec<Path>>> {
        let mut out = BTreeMap::new();
        for (s, t) in self.reachable_pairs() {
            let paths = match path_type {
                PathType::KShortest => self.shortest_k_paths(k, &s, &t)?,
                PathType::AllSimple => self.all_simple_paths(&s, &t)?,
            };
            out.insert((s, t), paths);
        }
        Ok(out)
    }

    /// Hop count of the shortest path, if any
    pub fn shortest_path_length(&self, source: &str, target: &str) -> Result<Option<usize>> {
        let s = self.node_index(source)?;
        let t = self.node_index(target)?;
        let banned = vec![false; self.num_nodes()];
        Ok(self.bfs_path(s, t, &banned, &HashSet::new()).map(|p| p.len() - 1))
    }

    fn bfs_path(
        &self,
        s: usize,
        t: usize,
        banned_nodes: &[bool],
        banned_edges: &HashSet<(usize, usize)>,
    ) -> Option<Vec<usize>> {
        let n = self.num_nodes();
        let mut parent: Vec<Option<usize>> = vec![None; n];
        let mut seen = vec![false; n];
        seen[s] = true;
        let mut queue = VecDeque::from([s]);
        while let Some(u) = queue.pop_front() {
            if u == t {
                let mut path = vec![t];
                let mut cur = t;
                while let Some(p) = parent[cur] {
                    path.push(p);
                    cur = p;
                }
                path.reverse();
                return Some(path);
            }
            for &v in self.successor_indices(u) {
                if seen[v] || banned_nodes[v] || banned_edges.contains(&(u, v)) {
                    continue;
                }
                seen[v] = true;
                parent[v] = Some(u);
                queue.push_back(v);
            }
        }
        None
    }

    fn to_path(&self, indices: &[usize]) -> Path {
        Path::new(indices.iter().map(|&i| self.node_name(i).to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder() -> Topology {
        // a-b-c on top, d-e-f below, rungs a-d, b-e, c-f (both directions)
        let mut t = Topology::new();
        for (x, y) in [("a", "b"), ("b", "c"), ("d", "e"), ("e", "f"), ("a", "d"), ("b", "e"), ("c", "f")] {
            t.add_bidirectional_edge(x, y, 1.0).unwrap();
        }
        t
    }

    #[test]
    fn test_k_shortest_ordering() {
        let t = ladder();
        let paths = t.shortest_k_paths(4, "a", "f").unwrap();
        assert_eq!(paths.len(), 4);
        assert_eq!(paths[0].hops(), 3);
        assert!(paths.windows(2).all(|w| w[0].hops() <= w[1].hops()));
        let unique: HashSet<_> = paths.iter().collect();
        assert_eq!(unique.len(), 4);
        for p in &paths {
            assert_eq!(p.source(), Some("a"));
            assert_eq!(p.target(), Some("f"));
            let distinct: HashSet<_> = p.nodes().iter().collect();
            assert_eq!(distinct.len(), p.nodes().len());
        }
    }

    #[test]
    fn test_k_shortest_runs_out() {
        let mut t = Topology::new();
        t.add_edge("a", "b", 1.0).unwrap();
        t.add_edge("b", "c", 1.0).unwrap();
        let paths = t.shortest_k_paths(3, "a", "c").unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].to_string(), "a->b->c");
        assert!(t.shortest_k_paths(2, "c", "a").unwrap().is_empty());
    }

    #[test]
    fn test_all_simple_paths_counts() {
        let t = ladder();
        let all = t.all_simple_paths("a", "f").unwrap();
        let k = t.shortest_k_paths(100, "a", "f").unwrap();
        assert_eq!(all.len(), k.len());
        assert!(all.iter().all(|p| p.edges().all(|(s, d)| t.has_edge(s, d))));
        assert!(all.iter().any(|p| p.uses_edge("e", "b")));
    }

    #[test]
    fn test_compute_paths_covers_reachable_pairs() {
        let t = ladder();
        let paths = t.compute_paths(PathType::KShortest, 2).unwrap();
        assert_eq!(paths.len(), 30);
        assert!(paths.values().all(|p| !p.is_empty() && p.len() <= 2));
        assert_eq!(t.shortest_path_length("a", "f").unwrap(), Some(3));
    }

    #[test]
    fn test_unknown_node() {
        let t = ladder();
        assert!(matches!(
            t.shortest_k_paths(1, "a", "z"),
            Err(MetaOptError::Topology(_))
        ));
    }
}
