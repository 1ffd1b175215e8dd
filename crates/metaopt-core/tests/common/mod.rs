//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use metaopt_core::topology::{NodePair, Topology};

/// a→b, a→c, b→d, c→d, all capacity 10.
pub fn diamond() -> Topology {
    let mut t = Topology::new();
    for (s, d) in [("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")] {
        t.add_edge(s, d, 10.0).expect("valid edge");
    }
    t
}

/// a→b (cap 4) with a detour a→c→b (cap 4 each).
pub fn detour() -> Topology {
    let mut t = Topology::new();
    for (s, d) in [("a", "b"), ("a", "c"), ("c", "b")] {
        t.add_edge(s, d, 4.0).expect("valid edge");
    }
    t
}

pub fn pair(s: &str, t: &str) -> NodePair {
    (s.to_string(), t.to_string())
}

/// Every reachable pair except `keep`, for pinning demands to zero
pub fn all_but(topology: &Topology, keep: &NodePair) -> Vec<NodePair> {
    topology
        .reachable_pairs()
        .into_iter()
        .filter(|p| p != keep)
        .collect()
}

/// Route test logs through the test harness when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
