//! Contiguous random node partitioning.
//!
//! Leader election: pick one random seed node per partition, then
//! repeatedly take a random unassigned node and attach it to one of the
//! partitions it already borders, skipping partitions that have grown past
//! `(1 + tolerance) · (⌊n / k⌋ + 1)` nodes. If no unassigned node borders an
//! eligible partition, start over with new seeds.

use super::Topology;
use crate::error::{MetaOptError, Result};
use rand::rngs::StdRng;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::SeedableRng;
use std::collections::{BTreeSet, VecDeque};
use tracing::debug;

const MAX_ATTEMPTS: usize = 1000;

/// `⌊√n⌋`, at least 1
pub fn default_num_partitions(topology: &Topology) -> usize {
    ((topology.num_nodes() as f64).sqrt().floor() as usize).max(1)
}

/// Partition index per node, aligned with [`Topology::nodes`].
pub fn leader_election_uniform(
    topology: &Topology,
    num_partitions: usize,
    seed: u64,
    tolerance: f64,
) -> Result<Vec<usize>> {
    let n = topology.num_nodes();
    if num_partitions == 0 || num_partitions > n {
        return Err(MetaOptError::invalid_parameter(
            "num_partitions",
            format!("must be in 1..={}, got {}", n, num_partitions),
        ));
    }
    if !(tolerance.is_finite() && tolerance >= 0.0) {
        return Err(MetaOptError::invalid_parameter("tolerance", "must be non-negative"));
    }

    let neighbors = undirected_neighbors(topology);
    let cap = (1.0 + tolerance) * ((n / num_partitions) as f64 + 1.0);
    let mut rng = StdRng::seed_from_u64(seed);

    for attempt in 0..MAX_ATTEMPTS {
        let mut assignment: Vec<Option<usize>> = vec![None; n];
        let mut sizes = vec![0usize; num_partitions];
        let seeds = (0..n).choose_multiple(&mut rng, num_partitions);
        for (part, &node) in seeds.iter().enumerate() {
            assignment[node] = Some(part);
            sizes[part] = 1;
        }

        let mut stuck = false;
        loop {
            let mut unassigned: Vec<usize> = (0..n).filter(|&i| assignment[i].is_none()).collect();
            if unassigned.is_empty() {
                break;
            }
            unassigned.shuffle(&mut rng);
            let pick = unassigned.iter().find_map(|&node| {
                let eligible: BTreeSet<usize> = neighbors[node]
                    .iter()
                    .filter_map(|&v| assignment[v])
                    .filter(|&p| (sizes[p] as f64) <= cap)
                    .collect();
                (!eligible.is_empty()).then_some((node, eligible))
            });
            match pick {
                Some((node, eligible)) => {
                    let Some(&part) = eligible.iter().choose(&mut rng) else {
                        stuck = true;
                        break;
                    };
                    assignment[node] = Some(part);
                    sizes[part] += 1;
                }
                None => {
                    stuck = true;
                    break;
                }
            }
        }

        if !stuck {
            debug!(attempt, num_partitions, ?sizes, "partitioned topology");
            return Ok(assignment.into_iter().flatten().collect());
        }
        debug!(attempt, "invalid partitioning, retrying with new seeds");
    }
    Err(MetaOptError::topology(format!(
        "no contiguous partitioning into {} parts after {} attempts",
        num_partitions, MAX_ATTEMPTS
    )))
}

/// Whether every partition induces a connected (undirected) subgraph
pub fn is_contiguous(topology: &Topology, assignment: &[usize]) -> bool {
    if assignment.len() != topology.num_nodes() {
        return false;
    }
    let neighbors = undirected_neighbors(topology);
    let parts: BTreeSet<usize> = assignment.iter().copied().collect();
    parts.into_iter().all(|p| {
        let members: Vec<usize> = (0..assignment.len()).filter(|&i| assignment[i] == p).collect();
        let Some(&start) = members.first() else { return true };
        let mut seen = vec![false; assignment.len()];
        seen[start] = true;
        let mut queue = VecDeque::from([start]);
        let mut count = 1;
        while let Some(u) = queue.pop_front() {
            for &v in &neighbors[u] {
                if !seen[v] && assignment[v] == p {
                    seen[v] = true;
                    count += 1;
                    queue.push_back(v);
                }
            }
        }
        count == members.len()
    })
}

fn undirected_neighbors(topology: &Topology) -> Vec<BTreeSet<usize>> {
    let n = topology.num_nodes();
    let mut out = vec![BTreeSet::new(); n];
    for u in 0..n {
        for &v in topology.successor_indices(u) {
            out[u].insert(v);
            out[v].insert(u);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(side: usize) -> Topology {
        let mut t = Topology::new();
        for r in 0..side {
            for c in 0..side {
                let here = format!("{}_{}", r, c);
                if c + 1 < side {
                    t.add_bidirectional_edge(&here, &format!("{}_{}", r, c + 1), 1.0).unwrap();
                }
                if r + 1 < side {
                    t.add_bidirectional_edge(&here, &format!("{}_{}", r + 1, c), 1.0).unwrap();
                }
            }
        }
        t
    }

    #[test]
    fn test_partitions_are_contiguous_and_complete() {
        let t = grid(4);
        let k = default_num_partitions(&t);
        assert_eq!(k, 4);
        let assignment = leader_election_uniform(&t, k, 7, 0.2).unwrap();
        assert_eq!(assignment.len(), 16);
        assert!(assignment.iter().all(|&p| p < k));
        let used: BTreeSet<usize> = assignment.iter().copied().collect();
        assert_eq!(used.len(), k);
        assert!(is_contiguous(&t, &assignment));
    }

    #[test]
    fn test_seed_is_deterministic() {
        let t = grid(3);
        let a = leader_election_uniform(&t, 3, 11, 0.2).unwrap();
        let b = leader_election_uniform(&t, 3, 11, 0.2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_partition_count() {
        let t = grid(2);
        assert!(leader_election_uniform(&t, 0, 0, 0.2).is_err());
        assert!(leader_election_uniform(&t, 5, 0, 0.2).is_err());
    }

    #[test]
    fn test_is_contiguous_detects_split() {
        let mut t = Topology::new();
        t.add_bidirectional_edge("a", "b", 1.0).unwrap();
        t.add_bidirectional_edge("b", "c", 1.0).unwrap();
        assert!(is_contiguous(&t, &[0, 0, 1]));
        assert!(!is_contiguous(&t, &[0, 1, 0]));
    }
}
