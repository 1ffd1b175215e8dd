//! Integration tests for topology files and demand matrices on disk.

mod common;

use metaopt_core::demand::{demands_from_json, demands_to_json, DemandStats};
use metaopt_core::topology::{PathType, Topology, DEFAULT_CAPACITY};
use std::collections::BTreeMap;

/// Saving and loading keeps nodes, edges and capacities.
#[test]
fn topology_survives_file_round_trip() {
    let topo = common::diamond();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("diamond.json");
    topo.save(&path).unwrap();

    let loaded = Topology::load(&path).unwrap();
    assert_eq!(loaded.nodes(), topo.nodes());
    assert_eq!(loaded.edges(), topo.edges());
    assert_eq!(loaded.total_capacity(), 40.0);
    assert_eq!(
        loaded.compute_paths(PathType::KShortest, 2).unwrap(),
        topo.compute_paths(PathType::KShortest, 2).unwrap()
    );
}

/// networkx output with integer ids, no capacities and `"directed": false`.
#[test]
fn undirected_networkx_file_gets_both_directions() {
    let json = r#"{
        "directed": false,
        "multigraph": false,
        "graph": {},
        "nodes": [{"id": 0}, {"id": 1}, {"id": 2}],
        "links": [{"source": 0, "target": 1}, {"source": 1, "target": 2, "capacity": 5.0}]
    }"#;
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), json).unwrap();

    let topo = Topology::load(file.path()).unwrap();
    assert_eq!(topo.num_nodes(), 3);
    assert_eq!(topo.num_edges(), 4);
    assert_eq!(topo.capacity("1", "0").unwrap(), DEFAULT_CAPACITY);
    assert_eq!(topo.capacity("2", "1").unwrap(), 5.0);
    assert_eq!(topo.reachable_pairs().len(), 6);
}

/// A malformed file is a serialization error, not a panic.
#[test]
fn malformed_topology_is_an_error() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), "{\"nodes\": 3}").unwrap();
    assert!(matches!(
        Topology::load(file.path()),
        Err(metaopt_core::MetaOptError::Serialization(_))
    ));
    assert!(matches!(
        Topology::load(file.path().with_extension("missing")),
        Err(metaopt_core::MetaOptError::Io(_))
    ));
}

/// Demand matrices keep their `"(s, t)"` keys through a file.
#[test]
fn demand_matrix_round_trip_and_stats() {
    let topo = common::diamond();
    let demands: BTreeMap<_, _> = topo
        .reachable_pairs()
        .into_iter()
        .enumerate()
        .map(|(i, p)| (p, i as f64))
        .collect();
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), demands_to_json(&demands).unwrap()).unwrap();
    let back = demands_from_json(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
    assert_eq!(back, demands);

    let stats = DemandStats::from_demands(&topo, &back, 1e-9);
    assert_eq!(stats.num_pairs, 12);
    assert_eq!(stats.num_positive, demands.len() - 1);
    assert_eq!(stats.max_demand, (demands.len() - 1) as f64);
}
