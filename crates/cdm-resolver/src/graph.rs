//! Dependency graph construction and topological scheduling.
//!
//! Edges point from dependent to dependency: `graph.deps("counter_writer")`
//! lists what `counter_writer` needs deployed before it can build. Both
//! sort functions use Kahn's algorithm over dependency counts; the flat
//! sort drains eligible units round by round in discovery order, which is
//! exactly the concatenation of the layered sort. That equivalence is a
//! contract (see the property test below), because callers interleave the
//! two representations: progress tables index the flat order while the
//! executor walks layers.

use std::collections::HashMap;

use cdm_types::error::CycleError;
use cdm_types::unit::ContractUnit;

/// Mapping from unit name to the names it depends on, preserving the
/// discovery order of both units and edges.
///
/// Every edge target must itself be a unit in the graph; the detector
/// enforces that before a graph is ever built, so an unknown name here is
/// a caller bug rather than a user error.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    order: Vec<String>,
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a unit with its dependency list. Re-inserting a name
    /// replaces its edges without changing its discovery position.
    pub fn insert(&mut self, name: impl Into<String>, deps: Vec<String>) {
        let name = name.into();
        if !self.edges.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.edges.insert(name, deps);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Unit names in discovery order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn deps(&self, name: &str) -> &[String] {
        self.edges.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }
}

/// Build the dependency graph for a set of detected units.
///
/// Pure: every unit appears as a key, including units with no
/// dependencies.
pub fn build_dependency_graph(units: &[ContractUnit]) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for unit in units {
        graph.insert(unit.name.clone(), unit.dependencies.clone());
    }
    graph
}

/// Deterministic flat topological order: every dependency precedes each of
/// its dependents, ties broken by discovery order.
///
/// Fails with [`CycleError`] if the graph contains a cycle; the error
/// names every unit that could not be scheduled, at least one of which
/// lies on a cycle. A partial order is never returned.
pub fn toposort(graph: &DependencyGraph) -> Result<Vec<String>, CycleError> {
    let mut remaining: HashMap<&str, usize> = HashMap::with_capacity(graph.len());
    for name in graph.names() {
        remaining.insert(name, graph.deps(name).len());
    }
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for name in graph.names() {
        for dep in graph.deps(name) {
            dependents.entry(dep.as_str()).or_default().push(name);
        }
    }

    // Round-based Kahn: drain every currently-eligible unit in discovery
    // order before admitting units that became eligible mid-round. Units
    // admitted in the same round ended up eligible together, so within a
    // round discovery order is the only tie-breaker needed.
    let mut order: Vec<String> = Vec::with_capacity(graph.len());
    loop {
        let round: Vec<&str> = graph
            .names()
            .filter(|name| remaining.get(name) == Some(&0))
            .collect();
        if round.is_empty() {
            break;
        }
        for name in round {
            remaining.remove(name);
            if let Some(deps) = dependents.get(name) {
                for dependent in deps {
                    if let Some(count) = remaining.get_mut(dependent) {
                        *count -= 1;
                    }
                }
            }
            order.push(name.to_string());
        }
    }

    if order.len() < graph.len() {
        let involved: Vec<String> = graph
            .names()
            .filter(|name| remaining.contains_key(name))
            .map(String::from)
            .collect();
        return Err(CycleError { involved });
    }
    Ok(order)
}

/// Layered topological order: layer `k` holds exactly the units whose
/// dependencies all live in layers `0..k`, so members of one layer may
/// build and deploy in parallel.
///
/// Concatenating the layers in order reproduces [`toposort`] for every
/// input graph.
pub fn toposort_layers(graph: &DependencyGraph) -> Result<Vec<Vec<String>>, CycleError> {
    let mut remaining: HashMap<&str, usize> = HashMap::with_capacity(graph.len());
    for name in graph.names() {
        remaining.insert(name, graph.deps(name).len());
    }

    // dependency -> dependents, for decrementing counts on emit
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for name in graph.names() {
        for dep in graph.deps(name) {
            dependents.entry(dep.as_str()).or_default().push(name);
        }
    }

    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut emitted = 0usize;

    loop {
        // discovery order makes the layer ordering reproducible
        let ready: Vec<&str> = graph
            .names()
            .filter(|name| remaining.get(name) == Some(&0))
            .collect();
        if ready.is_empty() {
            break;
        }
        for name in &ready {
            remaining.remove(name);
            if let Some(deps) = dependents.get(name) {
                for dependent in deps {
                    if let Some(count) = remaining.get_mut(dependent) {
                        *count -= 1;
                    }
                }
            }
        }
        emitted += ready.len();
        layers.push(ready.into_iter().map(String::from).collect());
    }

    if emitted < graph.len() {
        // everything left is blocked on a cycle (directly or transitively)
        let involved: Vec<String> = graph
            .names()
            .filter(|name| remaining.contains_key(name))
            .map(String::from)
            .collect();
        return Err(CycleError { involved });
    }

    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn graph_of(entries: &[(&str, &[&str])]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for (name, deps) in entries {
            g.insert(*name, deps.iter().map(|d| d.to_string()).collect());
        }
        g
    }

    #[test]
    fn empty_graph_sorts_to_nothing() {
        let g = DependencyGraph::new();
        assert_eq!(toposort(&g).unwrap(), Vec::<String>::new());
        assert_eq!(toposort_layers(&g).unwrap(), Vec::<Vec<String>>::new());
    }

    #[test]
    fn linear_chain() {
        let g = graph_of(&[("c", &["b"]), ("b", &["a"]), ("a", &[])]);
        assert_eq!(toposort(&g).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(
            toposort_layers(&g).unwrap(),
            vec![vec!["a"], vec!["b"], vec!["c"]]
        );
    }

    #[test]
    fn shared_counter_shape() {
        let g = graph_of(&[
            ("counter", &[]),
            ("counter_writer", &["counter"]),
            ("counter_reader", &["counter"]),
        ]);
        assert_eq!(
            toposort(&g).unwrap(),
            vec!["counter", "counter_writer", "counter_reader"]
        );
        assert_eq!(
            toposort_layers(&g).unwrap(),
            vec![vec!["counter"], vec!["counter_writer", "counter_reader"]]
        );
    }

    #[test]
    fn ties_break_by_discovery_order() {
        let g = graph_of(&[("z", &[]), ("a", &[]), ("m", &["z"])]);
        assert_eq!(toposort(&g).unwrap(), vec!["z", "a", "m"]);
    }

    #[test]
    fn two_cycle_is_reported() {
        let g = graph_of(&[("a", &["b"]), ("b", &["a"])]);
        let err = toposort(&g).unwrap_err();
        assert_eq!(err.involved, vec!["a", "b"]);
        assert!(err.to_string().contains("circular dependency"));
    }

    #[test]
    fn cycle_error_never_truncates_to_partial_order() {
        // d is schedulable; a cycle elsewhere must still fail the whole sort
        let g = graph_of(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"]), ("d", &[])]);
        let err = toposort_layers(&g).unwrap_err();
        assert!(err.involved.contains(&"a".to_string()));
        assert!(!err.involved.contains(&"d".to_string()));
        assert!(toposort(&g).is_err());
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let g = graph_of(&[("a", &["a"])]);
        assert!(toposort(&g).is_err());
    }

    #[test]
    fn diamond_layers() {
        let g = graph_of(&[
            ("top", &["left", "right"]),
            ("left", &["base"]),
            ("right", &["base"]),
            ("base", &[]),
        ]);
        assert_eq!(
            toposort_layers(&g).unwrap(),
            vec![vec!["base"], vec!["left", "right"], vec!["top"]]
        );
    }

    /// Random DAGs: edges only point from later discovery indices to
    /// earlier ones, so the graph is acyclic by construction.
    fn arb_dag() -> impl Strategy<Value = DependencyGraph> {
        (2usize..12)
            .prop_flat_map(|n| {
                proptest::collection::vec(proptest::collection::vec(any::<bool>(), n), n)
                    .prop_map(move |adj| (n, adj))
            })
            .prop_map(|(n, adj)| {
                let mut g = DependencyGraph::new();
                for i in 0..n {
                    let deps: Vec<String> = (0..i)
                        .filter(|&j| adj[i][j])
                        .map(|j| format!("unit{j}"))
                        .collect();
                    g.insert(format!("unit{i}"), deps);
                }
                g
            })
    }

    proptest! {
        #[test]
        fn flat_order_is_a_valid_permutation(g in arb_dag()) {
            let flat = toposort(&g).unwrap();
            prop_assert_eq!(flat.len(), g.len());
            let pos: std::collections::HashMap<&str, usize> =
                flat.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
            for name in g.names() {
                for dep in g.deps(name) {
                    prop_assert!(pos[dep.as_str()] < pos[name]);
                }
            }
        }

        #[test]
        fn layers_concatenate_to_flat_order(g in arb_dag()) {
            let flat = toposort(&g).unwrap();
            let layered: Vec<String> =
                toposort_layers(&g).unwrap().into_iter().flatten().collect();
            prop_assert_eq!(flat, layered);
        }

        #[test]
        fn every_unit_lands_in_exactly_one_layer(g in arb_dag()) {
            let layers = toposort_layers(&g).unwrap();
            let mut seen = std::collections::HashSet::new();
            for layer in &layers {
                prop_assert!(!layer.is_empty());
                for name in layer {
                    prop_assert!(seen.insert(name.clone()));
                }
            }
            prop_assert_eq!(seen.len(), g.len());
        }

        #[test]
        fn layer_index_is_minimal(g in arb_dag()) {
            let layers = toposort_layers(&g).unwrap();
            let layer_of: std::collections::HashMap<&str, usize> = layers
                .iter()
                .enumerate()
                .flat_map(|(k, layer)| layer.iter().map(move |n| (n.as_str(), k)))
                .collect();
            for name in g.names() {
                let deepest_dep = g
                    .deps(name)
                    .iter()
                    .map(|d| layer_of[d.as_str()] + 1)
                    .max()
                    .unwrap_or(0);
                prop_assert_eq!(layer_of[name], deepest_dep);
            }
        }
    }
}
