//! Analysis helpers for callflow tests
//!
//! Each helper loads a YAML program description and runs one stage of the
//! pipeline, mapping errors to strings so tests can `unwrap` with a readable
//! message.

use callflow_core::call_graph::{build_graph, Graph, StrategyKind};
use callflow_core::program::Program;
use callflow_core::type_analysis::{GlobalTypeAnalysis, GlobalTypeAnalysisResult};

/// Load a program description
pub fn load(source: &str) -> Result<Program, String> {
    Program::from_yaml_str(source).map_err(|e| e.to_string())
}

/// Build the call graph of `program` with `kind`
///
/// # Arguments
/// * `threshold` - Big override threshold, only read by the multiple-callee strategy
pub fn graph(program: &Program, kind: StrategyKind, threshold: u32) -> Result<Graph, String> {
    build_graph(program, kind, threshold).map_err(|e| e.to_string())
}

/// Qualified names of every method in `graph`, sorted
pub fn method_names(program: &Program, graph: &Graph) -> Vec<String> {
    let mut names: Vec<String> = graph
        .methods()
        .map(|m| program.method_name(m).to_string())
        .collect();
    names.sort();
    names
}

/// `(caller, callee)` name pairs of the method-to-method edges, sorted,
/// duplicates kept
pub fn edge_names(program: &Program, graph: &Graph) -> Vec<(String, String)> {
    let mut edges: Vec<(String, String)> = graph
        .edges()
        .iter()
        .filter_map(|edge| {
            let caller = graph.method(edge.caller)?;
            let callee = graph.method(edge.callee)?;
            Some((
                program.method_name(caller).to_string(),
                program.method_name(callee).to_string(),
            ))
        })
        .collect();
    edges.sort();
    edges
}

/// Run the global type analysis with default options
pub fn analyze(program: &Program) -> Result<GlobalTypeAnalysisResult<'_>, String> {
    GlobalTypeAnalysis::default()
        .analyze(program)
        .map_err(|e| e.to_string())
}

/// Run the global type analysis with `analysis`
pub fn analyze_with<'p>(
    program: &'p Program,
    analysis: &GlobalTypeAnalysis,
) -> Result<GlobalTypeAnalysisResult<'p>, String> {
    analysis.analyze(program).map_err(|e| e.to_string())
}
