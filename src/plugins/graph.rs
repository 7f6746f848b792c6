//! Dependency graph analysis over `packet id -> direct prerequisite ids`.
//!
//! Edges point from a dependent packet to its prerequisite. Every traversal
//! checks the reachable subgraph for cycles first and fails with
//! [`GantryError::CyclicDependency`] instead of trusting the input.

use crate::core::error::GantryError;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

pub type DependencyMap = BTreeMap<String, Vec<String>>;

/// Outcome of a whole-graph cycle check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acyclicity {
    /// Topological order, prerequisites before dependents.
    Acyclic(Vec<String>),
    /// Nodes of the first cycle found, closed (`A -> B -> A`).
    Cyclic(Vec<String>),
}

fn prereqs<'a>(deps: &'a DependencyMap, node: &str) -> &'a [String] {
    deps.get(node).map(Vec::as_slice).unwrap_or(&[])
}

/// Iterative DFS from `roots`; returns the first cycle reached.
fn find_cycle_from<'a, I>(deps: &DependencyMap, roots: I) -> Option<Vec<String>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut done: HashSet<&str> = HashSet::new();
    for root in roots {
        if done.contains(root) {
            continue;
        }
        let mut path: Vec<&str> = vec![root];
        let mut on_path: HashSet<&str> = HashSet::from([root]);
        let mut cursors: Vec<usize> = vec![0];

        while let Some(node) = path.last().copied() {
            let idx = cursors.last().copied().unwrap_or(0);
            let next = prereqs(deps, node).get(idx);
            match next {
                Some(next) => {
                    if let Some(c) = cursors.last_mut() {
                        *c += 1;
                    }
                    let next = next.as_str();
                    if on_path.contains(next) {
                        let start = path.iter().position(|n| *n == next).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|n| n.to_string()).collect();
                        cycle.push(next.to_string());
                        return Some(cycle);
                    }
                    if !done.contains(next) {
                        path.push(next);
                        on_path.insert(next);
                        cursors.push(0);
                    }
                }
                None => {
                    path.pop();
                    cursors.pop();
                    on_path.remove(node);
                    done.insert(node);
                }
            }
        }
    }
    None
}

fn ensure_acyclic_from(deps: &DependencyMap, root: &str) -> Result<(), GantryError> {
    match find_cycle_from(deps, [root]) {
        Some(cycle) => Err(GantryError::CyclicDependency { cycle }),
        None => Ok(()),
    }
}

/// First cycle anywhere in the graph, if any.
pub fn detect_cycle(deps: &DependencyMap) -> Option<Vec<String>> {
    find_cycle_from(deps, deps.keys().map(String::as_str))
}

/// Classify the whole graph, returning a topological order when acyclic.
pub fn classify(deps: &DependencyMap) -> Acyclicity {
    if let Some(cycle) = detect_cycle(deps) {
        return Acyclicity::Cyclic(cycle);
    }
    let mut nodes: Vec<&str> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for (id, pre) in deps {
        for n in std::iter::once(id).chain(pre.iter()) {
            if seen.insert(n.as_str()) {
                nodes.push(n.as_str());
            }
        }
    }
    let mut indegree: HashMap<&str, usize> = nodes
        .iter()
        .map(|n| (*n, prereqs(deps, n).iter().collect::<HashSet<_>>().len()))
        .collect();
    let children = reverse_dependencies(deps);
    let mut queue: VecDeque<&str> = nodes
        .iter()
        .copied()
        .filter(|n| indegree.get(n) == Some(&0))
        .collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(n) = queue.pop_front() {
        order.push(n.to_string());
        for child in children.get(n).into_iter().flatten() {
            if let Some(d) = indegree.get_mut(child.as_str()) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(child.as_str());
                }
            }
        }
    }
    Acyclicity::Acyclic(order)
}

/// Invert the edge set: prerequisite -> direct dependents, in map order.
pub fn reverse_dependencies(deps: &DependencyMap) -> DependencyMap {
    let mut rev: DependencyMap = BTreeMap::new();
    for (target, sources) in deps {
        for source in sources {
            let entry = rev.entry(source.clone()).or_default();
            if !entry.contains(target) {
                entry.push(target.clone());
            }
        }
    }
    rev
}

/// Transitive prerequisites of `id`, nearest first (breadth-first).
pub fn upstream_nodes(id: &str, deps: &DependencyMap) -> Result<Vec<String>, GantryError> {
    ensure_acyclic_from(deps, id)?;
    let mut seen: HashSet<&str> = HashSet::from([id]);
    let mut out = Vec::new();
    let mut queue: VecDeque<&str> = prereqs(deps, id).iter().map(String::as_str).collect();
    while let Some(node) = queue.pop_front() {
        if !seen.insert(node) {
            continue;
        }
        out.push(node.to_string());
        queue.extend(prereqs(deps, node).iter().map(String::as_str));
    }
    Ok(out)
}

/// Every packet that directly or indirectly requires `id`.
pub fn downstream_nodes(id: &str, deps: &DependencyMap) -> Result<BTreeSet<String>, GantryError> {
    let rev = reverse_dependencies(deps);
    if let Some(cycle) = find_cycle_from(&rev, [id]) {
        // Cycle was found walking inverted edges; report it in dependency order.
        let mut cycle = cycle;
        cycle.reverse();
        return Err(GantryError::CyclicDependency { cycle });
    }
    let mut out = BTreeSet::new();
    let mut queue: VecDeque<&str> = prereqs(&rev, id).iter().map(String::as_str).collect();
    while let Some(node) = queue.pop_front() {
        if node == id || !out.insert(node.to_string()) {
            continue;
        }
        queue.extend(prereqs(&rev, node).iter().map(String::as_str));
    }
    Ok(out)
}

/// What breaks if `id` changes.
pub fn impact_analysis(id: &str, deps: &DependencyMap) -> Result<BTreeSet<String>, GantryError> {
    downstream_nodes(id, deps)
}

/// Longest dependency chain (by edge count) among `nodes`, root first.
///
/// Only edges between members of `nodes` count. Ties go to the node that
/// appears first in `nodes`.
pub fn critical_path(deps: &DependencyMap, nodes: &[String]) -> Result<Vec<String>, GantryError> {
    let rank: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .rev()
        .map(|(i, n)| (n.as_str(), i))
        .collect();
    if let Some(cycle) = find_cycle_from(deps, nodes.iter().map(String::as_str)) {
        return Err(GantryError::CyclicDependency { cycle });
    }

    // Restrict to edges between selected nodes, then walk in Kahn order.
    let sub: DependencyMap = nodes
        .iter()
        .map(|n| {
            let pre = prereqs(deps, n)
                .iter()
                .filter(|p| rank.contains_key(p.as_str()))
                .cloned()
                .collect();
            (n.clone(), pre)
        })
        .collect();
    let order = match classify(&sub) {
        Acyclicity::Acyclic(order) => order,
        Acyclicity::Cyclic(cycle) => return Err(GantryError::CyclicDependency { cycle }),
    };

    // depth[n] = edges on the longest chain ending at n; best[n] = its predecessor.
    let mut depth: HashMap<&str, usize> = HashMap::new();
    let mut best: HashMap<&str, &str> = HashMap::new();
    for node in &order {
        let node = node.as_str();
        let mut chosen: Option<(&str, usize)> = None;
        for pre in prereqs(&sub, node) {
            let pre = pre.as_str();
            let d = depth.get(pre).copied().unwrap_or(0) + 1;
            let better = match chosen {
                None => true,
                Some((cur, cur_d)) => d > cur_d || (d == cur_d && rank[pre] < rank[cur]),
            };
            if better {
                chosen = Some((pre, d));
            }
        }
        let d = match chosen {
            Some((pre, d)) => {
                best.insert(node, pre);
                d
            }
            None => 0,
        };
        depth.insert(node, d);
    }

    let mut end: Option<(&str, usize)> = None;
    for n in nodes {
        let d = depth.get(n.as_str()).copied().unwrap_or(0);
        if end.is_none_or(|(_, cur)| d > cur) {
            end = Some((n.as_str(), d));
        }
    }

    let Some((mut cursor, _)) = end else {
        return Ok(Vec::new());
    };
    let mut path = vec![cursor.to_string()];
    while let Some(&prev) = best.get(cursor) {
        path.push(prev.to_string());
        cursor = prev;
    }
    path.reverse();
    Ok(path)
}
