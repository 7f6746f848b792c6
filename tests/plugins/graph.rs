use gantry::core::error::GantryError;
use gantry::plugins::graph::{
    Acyclicity, DependencyMap, classify, critical_path, detect_cycle, downstream_nodes,
    impact_analysis, reverse_dependencies, upstream_nodes,
};
use std::collections::BTreeSet;

fn graph(edges: &[(&str, &[&str])]) -> DependencyMap {
    edges
        .iter()
        .map(|(id, deps)| (id.to_string(), deps.iter().map(|d| d.to_string()).collect()))
        .collect()
}

fn ids(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

fn chain() -> DependencyMap {
    // C -> B -> A, D -> A
    graph(&[("A", &[]), ("B", &["A"]), ("C", &["B"]), ("D", &["A"])])
}

#[test]
fn upstream_is_nearest_first() {
    assert_eq!(upstream_nodes("C", &chain()).unwrap(), ids(&["B", "A"]));
    assert!(upstream_nodes("A", &chain()).unwrap().is_empty());
}

#[test]
fn downstream_is_transitive_dependents() {
    let expected: BTreeSet<String> = ids(&["B", "C", "D"]).into_iter().collect();
    assert_eq!(downstream_nodes("A", &chain()).unwrap(), expected);
    assert_eq!(impact_analysis("A", &chain()).unwrap(), expected);
    assert!(downstream_nodes("C", &chain()).unwrap().is_empty());
}

#[test]
fn upstream_and_downstream_are_inverse() {
    let deps = chain();
    for node in deps.keys() {
        for up in upstream_nodes(node, &deps).unwrap() {
            assert!(
                downstream_nodes(&up, &deps).unwrap().contains(node),
                "{} should be downstream of {}",
                node,
                up
            );
        }
    }
}

#[test]
fn critical_path_picks_longest_chain() {
    let deps = chain();
    let nodes = ids(&["A", "B", "C", "D"]);
    assert_eq!(critical_path(&deps, &nodes).unwrap(), ids(&["A", "B", "C"]));
}

#[test]
fn critical_path_ties_follow_input_order() {
    let deps = graph(&[("A", &[]), ("B", &["A"]), ("X", &[]), ("Y", &["X"])]);
    assert_eq!(
        critical_path(&deps, &ids(&["X", "Y", "A", "B"])).unwrap(),
        ids(&["X", "Y"])
    );
    assert_eq!(
        critical_path(&deps, &ids(&["A", "B", "X", "Y"])).unwrap(),
        ids(&["A", "B"])
    );
}

#[test]
fn critical_path_ignores_edges_outside_nodes() {
    let deps = chain();
    assert_eq!(
        critical_path(&deps, &ids(&["B", "C", "D"])).unwrap(),
        ids(&["B", "C"])
    );
    assert!(critical_path(&deps, &[]).unwrap().is_empty());
}

#[test]
fn cycles_fail_fast_everywhere() {
    let deps = graph(&[("A", &["C"]), ("B", &["A"]), ("C", &["B"])]);
    assert!(detect_cycle(&deps).is_some());
    assert!(matches!(classify(&deps), Acyclicity::Cyclic(_)));

    let nodes = ids(&["A", "B", "C"]);
    for err in [
        upstream_nodes("A", &deps).unwrap_err(),
        downstream_nodes("A", &deps).unwrap_err(),
        critical_path(&deps, &nodes).unwrap_err(),
    ] {
        match err {
            GantryError::CyclicDependency { cycle } => {
                assert!(cycle.len() >= 3);
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("expected cycle error, got {other}"),
        }
    }
}

#[test]
fn reverse_dependencies_inverts_edges() {
    let rev = reverse_dependencies(&chain());
    assert_eq!(rev["A"], ids(&["B", "D"]));
    assert_eq!(rev["B"], ids(&["C"]));
    assert!(!rev.contains_key("C"));
}
