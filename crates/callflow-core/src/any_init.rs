//! Methods reachable from initializers
//!
//! Code running inside a `<clinit>` or `<init>` can observe fields before
//! they are assigned, so field reads there may see the default `null` even
//! when every write stores a non-null value. This pass collects every method
//! transitively called from an initializer through the call graph.

use dashmap::DashSet;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::call_graph::{resolve_callees_in_graph, resolved_invokes, Graph};
use crate::errors::Result;
use crate::program::{MethodId, Program};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnyInitReachables {
    methods: FxHashSet<MethodId>,
}

impl AnyInitReachables {
    pub fn contains(&self, method: MethodId) -> bool {
        self.methods.contains(&method)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = MethodId> + '_ {
        self.methods.iter().copied()
    }
}

/// Scan every initializer with a body in parallel.
///
/// Initializers themselves are never members; calls into another initializer
/// stop the walk, since that initializer is scanned on its own.
pub fn find_any_init_reachables(program: &Program, graph: &Graph) -> Result<AnyInitReachables> {
    let inits: Vec<MethodId> = program
        .methods()
        .filter(|(_, m)| m.is_any_init() && m.has_body())
        .map(|(id, _)| id)
        .collect();
    let reached: DashSet<MethodId> = DashSet::new();

    inits
        .par_iter()
        .try_for_each(|&init| scan_initializer(program, graph, init, &reached))?;

    let methods: FxHashSet<MethodId> = reached.into_iter().collect();
    debug!(
        "[any-init] {} initializers reach {} methods",
        inits.len(),
        methods.len()
    );
    Ok(AnyInitReachables { methods })
}

fn scan_initializer(
    program: &Program,
    graph: &Graph,
    init: MethodId,
    reached: &DashSet<MethodId>,
) -> Result<()> {
    if !graph.has_node(init) {
        trace!(
            "[any-init] {} is not in the call graph",
            program.method_name(init)
        );
        return Ok(());
    }
    for (insn, _, callee) in resolved_invokes(program, init) {
        let target = program.method(callee);
        if target.is_external() || !target.is_concrete() {
            continue;
        }
        for callee in resolve_callees_in_graph(program, graph, init, insn)? {
            mark_reachable(program, graph, callee, reached)?;
        }
    }
    Ok(())
}

/// Walk the call graph from `start`. The set insert both records and claims
/// a method, so concurrent walks never expand the same method twice.
fn mark_reachable(
    program: &Program,
    graph: &Graph,
    start: MethodId,
    reached: &DashSet<MethodId>,
) -> Result<()> {
    let mut stack = vec![start];
    while let Some(method) = stack.pop() {
        let m = program.method(method);
        if m.is_any_init() || !m.has_body() {
            continue;
        }
        if !reached.insert(method) {
            continue;
        }
        for (insn, _, callee) in resolved_invokes(program, method) {
            let target = program.method(callee);
            if target.is_external() || !target.is_concrete() {
                continue;
            }
            stack.extend(resolve_callees_in_graph(program, graph, method, insn)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_graph::{complete_call_graph, single_callee_graph};
    use indoc::indoc;

    const SHAPES: &str = indoc! {r#"
        classes:
          - name: Shape
            methods:
              - name: area
                code:
                  - { op: const, dest: 1, value: 0 }
                  - { op: return, src: 1 }
          - name: Circle
            super: Shape
            methods:
              - name: area
                code:
                  - { op: const, dest: 1, value: 3 }
                  - { op: return, src: 1 }
          - name: Square
            super: Shape
            methods:
              - name: area
                code:
                  - { op: const, dest: 1, value: 4 }
                  - { op: return, src: 1 }
          - name: Base
            methods:
              - name: "<init>"
                code:
                  - { op: invoke, kind: static, method: Base.register, args: [] }
                  - { op: return }
              - name: register
                static: true
                code:
                  - { op: return }
          - name: Canvas
            super: Base
            methods:
              - name: main
                static: true
                root: true
                code:
                  - { op: new, dest: 0, class: Canvas }
                  - { op: invoke, kind: direct, method: "Canvas.<init>", args: [0] }
                  - { op: return }
              - name: "<init>"
                params: [Shape]
                code:
                  - { op: invoke, kind: direct, method: "Base.<init>", args: [0] }
                  - { op: invoke, kind: static, method: Canvas.layout, args: [] }
                  - { op: invoke, kind: virtual, method: Shape.area, args: [1], dest: 2 }
                  - { op: return }
              - name: layout
                static: true
                code:
                  - { op: invoke, kind: static, method: Canvas.measure, args: [] }
                  - { op: return }
              - name: measure
                static: true
                code:
                  - { op: invoke, kind: static, method: Canvas.layout, args: [] }
                  - { op: return }
              - name: unused
                static: true
                code:
                  - { op: return }
    "#};

    fn names(program: &Program, reachables: &AnyInitReachables) -> Vec<String> {
        let mut names: Vec<String> = reachables
            .iter()
            .map(|m| program.method_name(m).to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_transitive_callees_are_collected() {
        let program = Program::from_yaml_str(SHAPES).unwrap();
        let graph = single_callee_graph(&program).unwrap();
        let reachables = find_any_init_reachables(&program, &graph).unwrap();

        assert_eq!(
            names(&program, &reachables),
            vec!["Base.register", "Canvas.layout", "Canvas.measure"]
        );
    }

    #[test]
    fn test_initializers_are_not_members() {
        let program = Program::from_yaml_str(SHAPES).unwrap();
        let graph = single_callee_graph(&program).unwrap();
        let reachables = find_any_init_reachables(&program, &graph).unwrap();

        let base_init = program.method_by_name("Base.<init>").unwrap();
        let canvas_init = program.method_by_name("Canvas.<init>").unwrap();
        assert!(!reachables.contains(base_init));
        assert!(!reachables.contains(canvas_init));
    }

    #[test]
    fn test_unresolved_dispatch_is_not_followed() {
        let program = Program::from_yaml_str(SHAPES).unwrap();
        let graph = single_callee_graph(&program).unwrap();
        let reachables = find_any_init_reachables(&program, &graph).unwrap();

        for name in ["Shape.area", "Circle.area", "Square.area", "Canvas.unused"] {
            let method = program.method_by_name(name).unwrap();
            assert!(!reachables.contains(method), "{} should not be reached", name);
        }
    }

    #[test]
    fn test_fan_out_edges_are_followed() {
        let program = Program::from_yaml_str(SHAPES).unwrap();
        let graph = complete_call_graph(&program).unwrap();
        let reachables = find_any_init_reachables(&program, &graph).unwrap();

        let circle = program.method_by_name("Circle.area").unwrap();
        let square = program.method_by_name("Square.area").unwrap();
        assert!(reachables.contains(circle));
        assert!(reachables.contains(square));
    }

    #[test]
    fn test_initializer_outside_graph_is_skipped() {
        let program = Program::from_yaml_str(indoc! {r#"
            classes:
              - name: Lonely
                methods:
                  - name: "<init>"
                    code:
                      - { op: invoke, kind: static, method: Lonely.work, args: [] }
                      - { op: return }
                  - name: work
                    static: true
                    code:
                      - { op: return }
        "#})
        .unwrap();
        let graph = single_callee_graph(&program).unwrap();
        let reachables = find_any_init_reachables(&program, &graph).unwrap();
        assert!(reachables.is_empty());
    }
}
