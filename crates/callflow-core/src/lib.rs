pub mod any_init;
pub mod call_graph;
pub mod config;
pub mod di;
pub mod diagnostics;
pub mod errors;
pub mod override_graph;
pub mod program;
pub mod type_analysis;

pub use any_init::{find_any_init_reachables, AnyInitReachables};
pub use call_graph::{
    build_graph, build_graph_with, complete_call_graph, multiple_callee_graph,
    resolve_callees_in_graph, single_callee_graph, stats, CallGraphStats, CallGraphStrategy,
    Graph, NodeId, StrategyKind,
};
pub use config::{AnalysisConfig, CliOverrides};
pub use di::Container;
pub use diagnostics::{
    CollectingDiagnosticHandler, ConsoleDiagnosticHandler, Diagnostic, DiagnosticHandler,
    DiagnosticLevel,
};
pub use errors::{AnalysisError, Result};
pub use override_graph::MethodOverrideGraph;
pub use program::{MethodId, Program};
pub use type_analysis::{
    AnalysisReport, GlobalTypeAnalysis, GlobalTypeAnalysisResult, GlobalTypeAnalyzer,
    MethodSummary, TypeDomain, WholeProgramState,
};
