//! Call graph construction across the three strategies
//!
//! The zoo fixture has `Animal.speak` overridden by `Dog.speak` and
//! `Cat.speak`, called virtually from `Zoo.main` and `Zoo.feed`.

use callflow_core::call_graph::{stats, Graph, StrategyKind};
use callflow_core::program::Program;
use callflow_core::{resolve_callees_in_graph, AnalysisError};
use callflow_test_helpers::analyze::{edge_names, graph, load, method_names};
use callflow_test_helpers::fixtures;
use rustc_hash::FxHashSet;

fn pairs(edges: &[(&str, &str)]) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = edges
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();
    pairs.sort();
    pairs
}

fn root_names(program: &Program, graph: &Graph) -> Vec<String> {
    graph
        .roots()
        .iter()
        .map(|&m| program.method_name(m).to_string())
        .collect()
}

// =============================================================================
// Single callee
// =============================================================================

#[test]
fn test_single_callee_drops_true_virtual_calls() {
    let program = load(fixtures::zoo()).unwrap();
    let g = graph(&program, StrategyKind::SingleCallee, 0).unwrap();

    assert_eq!(
        method_names(&program, &g),
        vec!["Animal.speak", "Zoo.feed", "Zoo.main"]
    );
    assert_eq!(edge_names(&program, &g), pairs(&[("Zoo.main", "Zoo.feed")]));
    // The dispatched method is a root of its own
    assert_eq!(root_names(&program, &g), vec!["Animal.speak", "Zoo.main"]);
}

// =============================================================================
// Complete
// =============================================================================

#[test]
fn test_complete_fans_out_to_every_overrider() {
    let program = load(fixtures::zoo()).unwrap();
    let g = graph(&program, StrategyKind::Complete, 0).unwrap();

    assert_eq!(
        method_names(&program, &g),
        vec!["Animal.speak", "Cat.speak", "Dog.speak", "Zoo.feed", "Zoo.main"]
    );
    assert_eq!(
        edge_names(&program, &g),
        pairs(&[
            ("Zoo.feed", "Animal.speak"),
            ("Zoo.feed", "Cat.speak"),
            ("Zoo.feed", "Dog.speak"),
            ("Zoo.main", "Animal.speak"),
            ("Zoo.main", "Cat.speak"),
            ("Zoo.main", "Dog.speak"),
            ("Zoo.main", "Zoo.feed"),
        ])
    );
    assert_eq!(root_names(&program, &g), vec!["Zoo.main"]);
}

#[test]
fn test_complete_roots_exclude_overriders_of_pinned_methods() {
    let program = load(indoc::indoc! {r#"
        classes:
          - name: Base
            methods:
              - name: run
                root: true
                code:
                  - { op: return }
          - name: Sub
            super: Base
            methods:
              - name: run
                code:
                  - { op: return }
          - name: Config
            methods:
              - name: "<clinit>"
                static: true
                code:
                  - { op: return }
    "#})
    .unwrap();

    let complete = graph(&program, StrategyKind::Complete, 0).unwrap();
    assert_eq!(
        root_names(&program, &complete),
        vec!["Base.run", "Config.<clinit>"]
    );
    // Nothing calls Sub.run, so the complete graph never reaches it
    assert_eq!(
        method_names(&program, &complete),
        vec!["Base.run", "Config.<clinit>"]
    );

    let multiple = graph(&program, StrategyKind::MultipleCallee, 5).unwrap();
    assert!(root_names(&program, &multiple).contains(&"Sub.run".to_string()));
}

#[test]
fn test_fan_out_edges_share_one_callsite() {
    let program = load(fixtures::zoo()).unwrap();
    let g = graph(&program, StrategyKind::Complete, 0).unwrap();
    let counts = stats(&g);

    // main: speak fan-out (3) + feed; feed: speak fan-out (3);
    // entry -> main; three leaves -> exit
    assert_eq!(counts.edges, 1 + 4 + 3 + 3);
    // main has two invokes, feed one
    assert_eq!(counts.callsites, 3);
    // entry, exit and five methods
    assert_eq!(counts.nodes, 7);

    let main = program.method_by_name("Zoo.main").unwrap();
    let speak_site = g
        .successors(g.node(&program, main).unwrap())
        .find_map(|edge| edge.callsite)
        .unwrap();
    let callees = resolve_callees_in_graph(&program, &g, main, speak_site).unwrap();
    assert_eq!(callees.len(), 3);
}

// =============================================================================
// Multiple callee
// =============================================================================

#[test]
fn test_multiple_callee_below_threshold_matches_complete() {
    let program = load(fixtures::zoo()).unwrap();
    let multiple = graph(&program, StrategyKind::MultipleCallee, 5).unwrap();
    let complete = graph(&program, StrategyKind::Complete, 0).unwrap();

    assert_eq!(edge_names(&program, &multiple), edge_names(&program, &complete));
    assert_eq!(root_names(&program, &multiple), vec!["Zoo.main"]);
}

#[test]
fn test_big_override_is_promoted_to_root() {
    let program = load(&fixtures::big_override(4)).unwrap();
    let g = graph(&program, StrategyKind::MultipleCallee, 3).unwrap();
    let handle = program.method_by_name("Handler.handle").unwrap();

    assert!(g.roots().contains(&handle));
    for i in 0..4 {
        let overrider = program
            .method_by_name(&format!("Handler{}.handle", i))
            .unwrap();
        assert!(g.roots().contains(&overrider));
    }

    // No call site fans out into the big override
    let node = g.node(&program, handle).unwrap();
    assert!(g
        .predecessors(node)
        .all(|edge| edge.caller == g.entry()));
    assert_eq!(
        edge_names(&program, &g),
        pairs(&[("Dispatcher.main", "Dispatcher.route")])
    );
}

#[test]
fn test_threshold_is_exclusive() {
    let program = load(&fixtures::big_override(3)).unwrap();
    let g = graph(&program, StrategyKind::MultipleCallee, 3).unwrap();
    let handle = program.method_by_name("Handler.handle").unwrap();

    assert!(!g.roots().contains(&handle));
    // main and route each fan out to handle and its three overriders
    let fan_out = g
        .edges()
        .iter()
        .filter(|edge| {
            g.method(edge.callee)
                .is_some_and(|m| program.method_name(m).ends_with(".handle"))
        })
        .count();
    assert_eq!(fan_out, 8);
}

// =============================================================================
// Structural properties
// =============================================================================

#[test]
fn test_mutual_recursion_terminates_with_one_node_each() {
    let program = load(fixtures::mutual_recursion()).unwrap();
    for kind in [
        StrategyKind::SingleCallee,
        StrategyKind::Complete,
        StrategyKind::MultipleCallee,
    ] {
        let g = graph(&program, kind, 5).unwrap();
        assert_eq!(
            method_names(&program, &g),
            vec!["Ping.a", "Ping.b", "Ping.main"],
            "{}",
            kind
        );
        assert_eq!(
            edge_names(&program, &g),
            pairs(&[
                ("Ping.a", "Ping.b"),
                ("Ping.b", "Ping.a"),
                ("Ping.main", "Ping.a"),
            ])
        );
    }
}

#[test]
fn test_sentinels_frame_the_graph() {
    let program = load(fixtures::zoo()).unwrap();
    for kind in [
        StrategyKind::SingleCallee,
        StrategyKind::Complete,
        StrategyKind::MultipleCallee,
    ] {
        let g = graph(&program, kind, 1).unwrap();
        let entry = g.entry();
        let exit = g.exit();

        assert!(g.get(entry).is_entry());
        assert!(g.get(exit).is_exit());
        assert_eq!(g.predecessors(entry).count(), 0);

        let from_entry: FxHashSet<_> = g.successors(entry).map(|edge| edge.callee).collect();
        for &root in g.roots() {
            assert!(from_entry.contains(&g.node(&program, root).unwrap()));
        }
        for node in g.nodes().filter(|&n| n != entry && n != exit) {
            assert!(g.predecessors(node).count() > 0);
            let successors: Vec<_> = g.successors(node).collect();
            assert!(!successors.is_empty());
            if successors.iter().any(|edge| edge.callee == exit) {
                assert_eq!(successors.len(), 1);
                assert_eq!(successors[0].callsite, None);
            }
        }
    }
}

#[test]
fn test_construction_is_deterministic() {
    let program = load(fixtures::zoo()).unwrap();
    for kind in [
        StrategyKind::SingleCallee,
        StrategyKind::Complete,
        StrategyKind::MultipleCallee,
    ] {
        let first = graph(&program, kind, 1).unwrap();
        let second = graph(&program, kind, 1).unwrap();
        assert_eq!(first.edges(), second.edges());
        assert_eq!(first.roots(), second.roots());
    }
}

#[test]
fn test_query_for_method_outside_graph_fails() {
    let program = load(fixtures::zoo()).unwrap();
    let g = graph(&program, StrategyKind::SingleCallee, 0).unwrap();
    let dog = program.method_by_name("Dog.speak").unwrap();

    let err = g.node(&program, dog).unwrap_err();
    assert!(matches!(err, AnalysisError::MissingNode { .. }));
    assert!(err.to_string().contains("Dog.speak"));
}

#[test]
fn test_cyclic_hierarchy_is_fatal() {
    let program = load(indoc::indoc! {r#"
        classes:
          - name: A
            super: B
          - name: B
            super: A
    "#})
    .unwrap();
    let err = graph(&program, StrategyKind::SingleCallee, 0).unwrap_err();
    assert!(err.contains("cycle"));
}
