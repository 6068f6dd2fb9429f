//! Interprocedural type analysis over the call graph
//!
//! `GlobalTypeAnalyzer` propagates argument environments along call-graph
//! edges until the callee entry states stop changing. `GlobalTypeAnalysis`
//! drives repeated runs of it, refining the whole-program state in between.

use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use tracing::{debug, info, trace, warn};

use super::domain::{ArgumentTypeEnvironment, ArgumentTypePartition};
use super::local::{LocalContext, LocalTypeAnalyzer, RegisterEnvironment};
use super::summary::MethodSummary;
use super::whole_program_state::WholeProgramState;
use crate::any_init::{find_any_init_reachables, AnyInitReachables};
use crate::call_graph::{build_graph_with, Edge, Graph, NodeId, StrategyKind};
use crate::config::AnalysisConfig;
use crate::errors::Result;
use crate::override_graph::MethodOverrideGraph;
use crate::program::{InsnId, Instruction, MethodId, Program};

pub struct GlobalTypeAnalyzer<'p> {
    program: &'p Program,
    graph: Graph,
    any_init: AnyInitReachables,
    wps: WholeProgramState,
    entry_states: Vec<ArgumentTypeEnvironment>,
    exit_partitions: Vec<ArgumentTypePartition>,
}

impl<'p> GlobalTypeAnalyzer<'p> {
    /// Every node starts unreachable and the whole-program state knows nothing
    pub fn new(program: &'p Program, graph: Graph, any_init: AnyInitReachables) -> Self {
        let nodes = graph.node_count();
        Self {
            program,
            graph,
            any_init,
            wps: WholeProgramState::default(),
            entry_states: vec![ArgumentTypeEnvironment::bottom(); nodes],
            exit_partitions: vec![ArgumentTypePartition::default(); nodes],
        }
    }

    pub fn program(&self) -> &'p Program {
        self.program
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn any_init_reachables(&self) -> &AnyInitReachables {
        &self.any_init
    }

    pub fn whole_program_state(&self) -> &WholeProgramState {
        &self.wps
    }

    /// Replace the snapshot used by the next `run`
    pub fn set_whole_program_state(&mut self, wps: WholeProgramState) {
        self.wps = wps;
    }

    /// Propagate argument environments from the entry sentinel until every
    /// callee entry state is stable.
    ///
    /// Entry states are reset first, so a rerun with a refined whole-program
    /// state starts from scratch.
    pub fn run(&mut self) -> Result<()> {
        for state in &mut self.entry_states {
            *state = ArgumentTypeEnvironment::bottom();
        }
        for partition in &mut self.exit_partitions {
            *partition = ArgumentTypePartition::default();
        }

        let entry = self.graph.entry();
        self.entry_states[entry.index()] = ArgumentTypeEnvironment::top();

        let mut worklist = VecDeque::from([entry]);
        let mut queued: FxHashSet<NodeId> = FxHashSet::from_iter([entry]);
        let mut visits = 0usize;

        while let Some(node) = worklist.pop_front() {
            queued.remove(&node);
            visits += 1;

            let partition = self.analyze_node(node)?;
            let edges: Vec<Edge> = self.graph.successors(node).copied().collect();
            for edge in &edges {
                let contribution = Self::analyze_edge(edge, &partition);
                let callee = edge.callee;
                if self.entry_states[callee.index()].join_with(&contribution)
                    && queued.insert(callee)
                {
                    worklist.push_back(callee);
                }
            }
            self.exit_partitions[node.index()] = partition;
        }

        debug!(
            "[global] fixpoint after {} node visits over {} nodes",
            visits,
            self.graph.node_count()
        );
        Ok(())
    }

    /// Outgoing argument environments of `node`, one per call-graph callsite.
    ///
    /// Sentinels and methods without a body produce an empty partition.
    pub fn analyze_node(&self, node: NodeId) -> Result<ArgumentTypePartition> {
        let mut partition = ArgumentTypePartition::default();
        let Some(method) = self.graph.method(node) else {
            return Ok(partition);
        };
        if !self.program.method(method).has_body() {
            return Ok(partition);
        }

        let callsites: FxHashSet<InsnId> = self
            .graph
            .successors(node)
            .filter_map(|edge| edge.callsite)
            .collect();
        let lta = self.analyze_method(method, &self.wps, &self.entry_states[node.index()])?;

        lta.for_each_state(|id, insn, state| {
            if !callsites.contains(&id) {
                return;
            }
            if let Instruction::Invoke { args, .. } = insn {
                let mut env = ArgumentTypeEnvironment::top();
                for (position, &reg) in args.iter().enumerate() {
                    env.set(position as u32, state.get(reg));
                }
                partition.set(id, env);
            }
        });
        Ok(partition)
    }

    /// Contribution of `edge` to its callee's entry state. Edges without a
    /// callsite carry no information.
    pub fn analyze_edge(
        edge: &Edge,
        partition: &ArgumentTypePartition,
    ) -> ArgumentTypeEnvironment {
        match edge.callsite {
            None => ArgumentTypeEnvironment::top(),
            Some(insn) => partition.get(insn),
        }
    }

    /// Local analysis of `method` seeded with its current entry state
    pub fn get_local_analysis(&self, method: MethodId) -> Result<LocalTypeAnalyzer<'_>> {
        let node = self.graph.node(self.program, method)?;
        self.analyze_method(method, &self.wps, &self.entry_states[node.index()])
    }

    /// Run the local analysis of `method` with `args` bound to its parameters.
    ///
    /// A bottom argument environment is analyzed as top: the method's body
    /// still gets a state even when no caller was proven.
    pub fn analyze_method<'a>(
        &'a self,
        method: MethodId,
        wps: &'a WholeProgramState,
        args: &ArgumentTypeEnvironment,
    ) -> Result<LocalTypeAnalyzer<'a>> {
        let body = self.program.body_of(method)?;
        let mut params = RegisterEnvironment::top();
        if !args.is_bottom() {
            for (position, insn) in body.param_instructions().enumerate() {
                if let Instruction::LoadParam { dest } = insn {
                    params.set(*dest, args.get(position as u32));
                }
            }
        }

        let mut context = LocalContext::for_method(self.program, method, wps);
        context.any_init_reachable = self.any_init.contains(method);
        let mut lta = LocalTypeAnalyzer::new(self.program, method, context)?;
        lta.run(params);
        Ok(lta)
    }

    /// Whether some caller was proven for `method`.
    ///
    /// Methods only called through dispatch the strategy could not resolve
    /// look unreachable here even though they have a node.
    pub fn is_reachable(&self, method: MethodId) -> bool {
        self.graph
            .node_of(method)
            .is_some_and(|node| !self.entry_states[node.index()].is_bottom())
    }

    pub fn entry_state_at(&self, node: NodeId) -> &ArgumentTypeEnvironment {
        &self.entry_states[node.index()]
    }

    pub fn exit_state_at(&self, node: NodeId) -> &ArgumentTypePartition {
        &self.exit_partitions[node.index()]
    }

    /// What downstream passes consume for `method`
    pub fn summary(&self, method: MethodId) -> Result<MethodSummary> {
        let node = self.graph.node(self.program, method)?;
        let reachable = self.is_reachable(method);
        let return_type = if reachable && self.program.method(method).has_body() {
            Some(self.get_local_analysis(method)?.return_type())
        } else {
            None
        };
        Ok(MethodSummary {
            method,
            node,
            arguments: self.entry_states[node.index()].clone(),
            reachable,
            any_init_reachable: self.any_init.contains(method),
            return_type,
        })
    }

    /// Summaries of every method in the call graph, in node order
    pub fn summaries(&self) -> Result<Vec<MethodSummary>> {
        self.graph.methods().map(|m| self.summary(m)).collect()
    }
}

/// Outcome of `GlobalTypeAnalysis::analyze`
pub struct GlobalTypeAnalysisResult<'p> {
    pub analyzer: GlobalTypeAnalyzer<'p>,
    pub strategy: StrategyKind,
    /// Refinement runs after the bootstrap run
    pub iterations: usize,
    pub max_iterations: usize,
    pub converged: bool,
}

impl<'p> GlobalTypeAnalysisResult<'p> {
    pub fn whole_program_state(&self) -> &WholeProgramState {
        self.analyzer.whole_program_state()
    }

    pub fn any_init_reachables(&self) -> &AnyInitReachables {
        self.analyzer.any_init_reachables()
    }

    pub fn graph(&self) -> &Graph {
        self.analyzer.graph()
    }
}

#[derive(Debug, Clone)]
pub struct GlobalTypeAnalysis {
    pub max_global_analysis_iteration: usize,
    pub strategy: StrategyKind,
    pub big_override_threshold: u32,
}

impl Default for GlobalTypeAnalysis {
    fn default() -> Self {
        Self {
            max_global_analysis_iteration: 10,
            strategy: StrategyKind::SingleCallee,
            big_override_threshold: 5,
        }
    }
}

impl GlobalTypeAnalysis {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            max_global_analysis_iteration: config.type_analysis.max_global_analysis_iteration,
            strategy: config.call_graph.strategy,
            big_override_threshold: config.call_graph.big_override_threshold,
        }
    }

    /// Build the call graph, then alternate global runs with whole-program
    /// state refinement until the state stops improving or the iteration
    /// cap is hit.
    pub fn analyze<'p>(&self, program: &'p Program) -> Result<GlobalTypeAnalysisResult<'p>> {
        let mog = MethodOverrideGraph::build(program)?;
        let non_true_virtuals = mog.non_true_virtuals(program);
        let graph = build_graph_with(program, &mog, self.strategy, self.big_override_threshold);

        // Force every CFG up front so the parallel passes only read them
        program
            .methods()
            .filter_map(|(_, m)| m.body())
            .collect::<Vec<_>>()
            .par_iter()
            .for_each(|body| {
                body.cfg();
            });

        let any_init = find_any_init_reachables(program, &graph)?;
        let mut gta = GlobalTypeAnalyzer::new(program, graph, any_init);

        gta.run()?;
        let mut iterations = 0usize;
        let mut converged = false;
        while iterations < self.max_global_analysis_iteration {
            let wps = WholeProgramState::build(program, &gta, &non_true_virtuals)?;
            trace!(
                "[global] field changes:\n{}",
                gta.whole_program_state().field_partition_diff(&wps, program)
            );
            trace!(
                "[global] method changes:\n{}",
                gta.whole_program_state().method_partition_diff(&wps, program)
            );
            debug!(
                "[global] iteration {}: {} resolved fields, {} resolved methods",
                iterations,
                wps.num_resolved_fields(),
                wps.num_resolved_methods()
            );
            if gta.whole_program_state().leq(&wps) {
                converged = true;
                break;
            }
            gta.set_whole_program_state(wps);
            gta.run()?;
            iterations += 1;
        }

        info!(
            "[global] finished after {} of at most {} iterations",
            iterations, self.max_global_analysis_iteration
        );
        if !converged {
            warn!(
                "[global] no fixpoint within {} iterations, keeping the last state",
                self.max_global_analysis_iteration
            );
        }

        Ok(GlobalTypeAnalysisResult {
            analyzer: gta,
            strategy: self.strategy,
            iterations,
            max_iterations: self.max_global_analysis_iteration,
            converged,
        })
    }
}
