//! Interprocedural call graph
//!
//! Nodes live in an arena addressed by [`NodeId`]; edges are records in one
//! table addressed by [`EdgeId`]. Two sentinel nodes frame the graph: the
//! ghost entry has an edge to every root, and every method without outgoing
//! calls has an edge to the ghost exit. The graph may contain cycles.

mod strategy;

pub use strategy::{
    BuildStrategy, CallGraphStrategy, CallSite, CompleteCallGraph, MultipleCallee,
    MultipleCalleeBase, SingleCallee, StrategyKind,
};
pub(crate) use strategy::resolved_invokes;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Write as _;
use tracing::{debug, info};

use crate::errors::{AnalysisError, Result};
use crate::override_graph::MethodOverrideGraph;
use crate::program::{InsnId, MethodId, Program};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(u32);

impl EdgeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    GhostEntry,
    GhostExit,
    Method(MethodId),
}

#[derive(Debug, Clone)]
pub struct Node {
    kind: NodeKind,
    successors: Vec<EdgeId>,
    predecessors: Vec<EdgeId>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            successors: Vec::new(),
            predecessors: Vec::new(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn method(&self) -> Option<MethodId> {
        match self.kind {
            NodeKind::Method(method) => Some(method),
            _ => None,
        }
    }

    pub fn is_entry(&self) -> bool {
        self.kind == NodeKind::GhostEntry
    }

    pub fn is_exit(&self) -> bool {
        self.kind == NodeKind::GhostExit
    }

    /// Outgoing edges in insertion order
    pub fn successors(&self) -> &[EdgeId] {
        &self.successors
    }

    pub fn predecessors(&self) -> &[EdgeId] {
        &self.predecessors
    }
}

/// A call from `caller` to `callee`. `callsite` is the invoke in the caller's
/// body, or `None` for the sentinel edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub caller: NodeId,
    pub callee: NodeId,
    pub callsite: Option<InsnId>,
}

const ENTRY: NodeId = NodeId(0);
const EXIT: NodeId = NodeId(1);

#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    method_nodes: FxHashMap<MethodId, NodeId>,
    roots: Vec<MethodId>,
}

impl Graph {
    /// Build the graph for a strategy.
    ///
    /// Every root gets an edge from the entry; the traversal then follows the
    /// strategy's callsites depth-first from each root, visiting every method
    /// once. Methods not reachable from a root are never added.
    pub fn build<S: BuildStrategy + ?Sized>(strategy: &S) -> Self {
        let mut graph = Graph {
            nodes: vec![Node::new(NodeKind::GhostEntry), Node::new(NodeKind::GhostExit)],
            edges: Vec::new(),
            method_nodes: FxHashMap::default(),
            roots: strategy.roots(),
        };

        let roots = graph.roots.clone();
        for &root in &roots {
            let node = graph.make_node(root);
            graph.add_edge(ENTRY, node, None);
        }

        let mut visited: FxHashSet<MethodId> = FxHashSet::default();
        for &root in &roots {
            let mut stack = vec![root];
            while let Some(caller) = stack.pop() {
                if !visited.insert(caller) {
                    continue;
                }
                let caller_node = graph.make_node(caller);
                let callsites = strategy.callsites(caller);
                if callsites.is_empty() {
                    graph.add_edge(caller_node, EXIT, None);
                }
                for callsite in &callsites {
                    let callee_node = graph.make_node(callsite.callee);
                    graph.add_edge(caller_node, callee_node, Some(callsite.invoke));
                }
                // Reversed so the first callsite is explored first
                stack.extend(
                    callsites
                        .iter()
                        .rev()
                        .map(|cs| cs.callee)
                        .filter(|callee| !visited.contains(callee)),
                );
            }
        }

        debug!(
            "[cg] built graph: {} roots, {} nodes, {} edges",
            graph.roots.len(),
            graph.nodes.len(),
            graph.edges.len()
        );
        graph
    }

    fn make_node(&mut self, method: MethodId) -> NodeId {
        if let Some(&node) = self.method_nodes.get(&method) {
            return node;
        }
        let node = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(NodeKind::Method(method)));
        self.method_nodes.insert(method, node);
        node
    }

    fn add_edge(&mut self, caller: NodeId, callee: NodeId, callsite: Option<InsnId>) {
        let edge = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge {
            caller,
            callee,
            callsite,
        });
        self.nodes[caller.index()].successors.push(edge);
        self.nodes[callee.index()].predecessors.push(edge);
    }

    pub fn entry(&self) -> NodeId {
        ENTRY
    }

    pub fn exit(&self) -> NodeId {
        EXIT
    }

    pub fn has_node(&self, method: MethodId) -> bool {
        self.method_nodes.contains_key(&method)
    }

    /// The node of a method that must be in the graph
    pub fn node(&self, program: &Program, method: MethodId) -> Result<NodeId> {
        self.method_nodes
            .get(&method)
            .copied()
            .ok_or_else(|| AnalysisError::MissingNode {
                method: program.method_name(method).to_string(),
            })
    }

    pub fn node_of(&self, method: MethodId) -> Option<NodeId> {
        self.method_nodes.get(&method).copied()
    }

    pub fn get(&self, node: NodeId) -> &Node {
        &self.nodes[node.index()]
    }

    /// The method of a node, `None` for the sentinels
    pub fn method(&self, node: NodeId) -> Option<MethodId> {
        self.nodes[node.index()].method()
    }

    pub fn edge(&self, edge: EdgeId) -> &Edge {
        &self.edges[edge.index()]
    }

    pub fn successors(&self, node: NodeId) -> impl Iterator<Item = &Edge> + '_ {
        self.nodes[node.index()]
            .successors
            .iter()
            .map(move |&e| &self.edges[e.index()])
    }

    pub fn predecessors(&self, node: NodeId) -> impl Iterator<Item = &Edge> + '_ {
        self.nodes[node.index()]
            .predecessors
            .iter()
            .map(move |&e| &self.edges[e.index()])
    }

    /// All node ids, sentinels first
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Roots in the order the strategy produced them
    pub fn roots(&self) -> &[MethodId] {
        &self.roots
    }

    /// Methods in the graph, in node order
    pub fn methods(&self) -> impl Iterator<Item = MethodId> + '_ {
        self.nodes.iter().filter_map(Node::method)
    }

    /// Method nodes whose qualified name contains `needle`
    pub fn find_methods(&self, program: &Program, needle: &str) -> Vec<NodeId> {
        self.nodes()
            .filter(|&node| {
                self.method(node)
                    .is_some_and(|m| program.method_name(m).contains(needle))
            })
            .collect()
    }

    pub fn node_name<'p>(&self, program: &'p Program, node: NodeId) -> &'p str {
        match self.get(node).kind {
            NodeKind::GhostEntry => "<entry>",
            NodeKind::GhostExit => "<exit>",
            NodeKind::Method(m) => program.method_name(m),
        }
    }

    /// Render a node with how it is reached and what it calls
    pub fn describe(&self, program: &Program, node: NodeId) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.node_name(program, node));
        let _ = writeln!(out, "  called by:");
        for edge in self.predecessors(node) {
            let _ = writeln!(
                out,
                "    {}{}",
                self.node_name(program, edge.caller),
                callsite_suffix(edge.callsite)
            );
        }
        let _ = writeln!(out, "  calls:");
        for edge in self.successors(node) {
            let _ = writeln!(
                out,
                "    {}{}",
                self.node_name(program, edge.callee),
                callsite_suffix(edge.callsite)
            );
        }
        out
    }
}

fn callsite_suffix(callsite: Option<InsnId>) -> String {
    callsite.map(|insn| format!(" at {}", insn)).unwrap_or_default()
}

pub fn single_callee_graph(program: &Program) -> Result<Graph> {
    build_graph(program, StrategyKind::SingleCallee, 0)
}

pub fn complete_call_graph(program: &Program) -> Result<Graph> {
    build_graph(program, StrategyKind::Complete, 0)
}

pub fn multiple_callee_graph(program: &Program, big_override_threshold: u32) -> Result<Graph> {
    build_graph(program, StrategyKind::MultipleCallee, big_override_threshold)
}

/// Build the override graph, then the call graph for `kind`
pub fn build_graph(
    program: &Program,
    kind: StrategyKind,
    big_override_threshold: u32,
) -> Result<Graph> {
    let mog = MethodOverrideGraph::build(program)?;
    Ok(build_graph_with(program, &mog, kind, big_override_threshold))
}

/// Build the call graph against an existing override graph
pub fn build_graph_with(
    program: &Program,
    mog: &MethodOverrideGraph,
    kind: StrategyKind,
    big_override_threshold: u32,
) -> Graph {
    let strategy = CallGraphStrategy::new(program, mog, kind, big_override_threshold);
    let graph = Graph::build(&strategy);
    info!(
        "[cg] {} call graph: {} nodes, {} edges",
        kind,
        graph.node_count(),
        graph.edges().len()
    );
    graph
}

/// Callees of `method` whose edges carry exactly the invoke `insn`.
///
/// Fails if `method` has no node in the graph.
pub fn resolve_callees_in_graph(
    program: &Program,
    graph: &Graph,
    method: MethodId,
    insn: InsnId,
) -> Result<FxHashSet<MethodId>> {
    let node = graph.node(program, method)?;
    Ok(graph
        .successors(node)
        .filter(|edge| edge.callsite == Some(insn))
        .filter_map(|edge| graph.method(edge.callee))
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CallGraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub callsites: usize,
}

/// Count nodes, edges and distinct call sites reachable from the entry
pub fn stats(graph: &Graph) -> CallGraphStats {
    let mut visited: FxHashSet<NodeId> = FxHashSet::default();
    let mut queue = VecDeque::from([graph.entry()]);
    let mut stats = CallGraphStats::default();

    while let Some(node) = queue.pop_front() {
        if !visited.insert(node) {
            continue;
        }
        let mut callsites: FxHashSet<InsnId> = FxHashSet::default();
        for edge in graph.successors(node) {
            stats.edges += 1;
            queue.push_back(edge.callee);
            if let Some(insn) = edge.callsite {
                callsites.insert(insn);
            }
        }
        stats.callsites += callsites.len();
    }
    stats.nodes = visited.len();
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const RECURSION: &str = indoc! {r#"
        classes:
          - name: App
            methods:
              - name: main
                static: true
                root: true
                code:
                  - { op: invoke, kind: static, method: App.ping }
                  - { op: invoke, kind: static, method: App.ping }
                  - { op: return }
              - name: ping
                static: true
                code:
                  - { op: invoke, kind: static, method: App.pong }
                  - { op: return }
              - name: pong
                static: true
                code:
                  - { op: invoke, kind: static, method: App.ping }
                  - { op: return }
              - name: unused
                static: true
                code:
                  - { op: return }
    "#};

    fn method_node(program: &Program, graph: &Graph, name: &str) -> NodeId {
        let method = program.method_by_name(name).unwrap();
        graph.node(program, method).unwrap()
    }

    #[test]
    fn test_mutual_recursion_terminates() {
        let program = Program::from_yaml_str(RECURSION).unwrap();
        let graph = single_callee_graph(&program).unwrap();

        // entry, exit, main, ping, pong
        assert_eq!(graph.node_count(), 5);
        let ping = method_node(&program, &graph, "App.ping");
        let pong = method_node(&program, &graph, "App.pong");
        assert!(graph.successors(ping).any(|e| e.callee == pong));
        assert!(graph.successors(pong).any(|e| e.callee == ping));
        assert!(!graph.has_node(program.method_by_name("App.unused").unwrap()));
    }

    #[test]
    fn test_edges_are_not_deduplicated() {
        let program = Program::from_yaml_str(RECURSION).unwrap();
        let graph = single_callee_graph(&program).unwrap();
        let main = method_node(&program, &graph, "App.main");
        let ping = method_node(&program, &graph, "App.ping");

        let to_ping: Vec<&Edge> = graph.successors(main).filter(|e| e.callee == ping).collect();
        assert_eq!(to_ping.len(), 2);
        assert_ne!(to_ping[0].callsite, to_ping[1].callsite);
    }

    #[test]
    fn test_sentinel_edges() {
        let program = Program::from_yaml_str(RECURSION).unwrap();
        let graph = single_callee_graph(&program).unwrap();
        let main = method_node(&program, &graph, "App.main");

        let from_entry: Vec<&Edge> = graph.successors(graph.entry()).collect();
        assert_eq!(from_entry.len(), 1);
        assert_eq!(from_entry[0].callee, main);
        assert_eq!(from_entry[0].callsite, None);
        assert!(graph.get(graph.entry()).is_entry());
        assert!(graph.get(graph.exit()).is_exit());
        // Every method here calls something, so nothing reaches the exit
        assert_eq!(graph.predecessors(graph.exit()).count(), 0);
    }

    #[test]
    fn test_missing_node_is_an_error() {
        let program = Program::from_yaml_str(RECURSION).unwrap();
        let graph = single_callee_graph(&program).unwrap();
        let unused = program.method_by_name("App.unused").unwrap();

        let err = graph.node(&program, unused).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingNode { ref method } if method == "App.unused"));
        assert!(resolve_callees_in_graph(&program, &graph, unused, InsnId(0)).is_err());
    }

    #[test]
    fn test_resolve_callees_in_graph() {
        let program = Program::from_yaml_str(RECURSION).unwrap();
        let graph = single_callee_graph(&program).unwrap();
        let main = program.method_by_name("App.main").unwrap();
        let ping = program.method_by_name("App.ping").unwrap();

        let callees = resolve_callees_in_graph(&program, &graph, main, InsnId(0)).unwrap();
        assert_eq!(callees.len(), 1);
        assert!(callees.contains(&ping));
        // The return is not a call site
        assert!(resolve_callees_in_graph(&program, &graph, main, InsnId(2))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_stats_counts_distinct_callsites() {
        let program = Program::from_yaml_str(indoc! {r#"
            classes:
              - name: Shape
                methods:
                  - name: draw
                    code:
                      - { op: return }
              - name: Circle
                super: Shape
                methods:
                  - name: draw
                    code:
                      - { op: return }
              - name: Canvas
                methods:
                  - name: paint
                    static: true
                    root: true
                    params: [Shape]
                    code:
                      - { op: invoke, kind: virtual, method: Shape.draw, args: [0] }
                      - { op: return }
        "#})
        .unwrap();
        let graph = complete_call_graph(&program).unwrap();
        let stats = stats(&graph);

        // entry, exit, paint, Shape.draw, Circle.draw
        assert_eq!(stats.nodes, 5);
        // entry->paint, paint->Shape.draw, paint->Circle.draw, two exits
        assert_eq!(stats.edges, 5);
        assert_eq!(stats.callsites, 1);
    }

    #[test]
    fn test_find_and_describe() {
        let program = Program::from_yaml_str(RECURSION).unwrap();
        let graph = single_callee_graph(&program).unwrap();

        let found = graph.find_methods(&program, "ng");
        let names: Vec<&str> = found.iter().map(|&n| graph.node_name(&program, n)).collect();
        assert_eq!(names, vec!["App.ping", "App.pong"]);

        let ping = method_node(&program, &graph, "App.ping");
        let text = graph.describe(&program, ping);
        assert!(text.starts_with("App.ping\n"));
        assert!(text.contains("App.main at #0"));
        assert!(text.contains("App.pong at #0"));
    }
}
