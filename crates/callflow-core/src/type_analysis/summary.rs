//! Per-method results handed to downstream passes, and their serializable
//! report form

use serde::Serialize;

use super::domain::{ArgumentTypeEnvironment, TypeDomain};
use super::global::GlobalTypeAnalysisResult;
use crate::call_graph::{stats, CallGraphStats, NodeId};
use crate::errors::Result;
use crate::program::{MethodId, Program};

#[derive(Debug, Clone)]
pub struct MethodSummary {
    pub method: MethodId,
    pub node: NodeId,
    /// Entry state after the last global run
    pub arguments: ArgumentTypeEnvironment,
    pub reachable: bool,
    pub any_init_reachable: bool,
    /// `None` for unreachable methods and methods without a body
    pub return_type: Option<TypeDomain>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodReport {
    pub name: String,
    pub node: usize,
    pub reachable: bool,
    pub any_init_reachable: bool,
    /// `None` when the arguments are unreachable
    pub arguments: Option<Vec<ArgumentReport>>,
    pub return_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArgumentReport {
    pub position: u32,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueReport {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub strategy: String,
    pub call_graph: CallGraphStats,
    pub iterations: usize,
    pub max_iterations: usize,
    pub converged: bool,
    pub any_init_reachable: Vec<String>,
    pub fields: Vec<ValueReport>,
    pub return_types: Vec<ValueReport>,
    pub methods: Vec<MethodReport>,
}

impl MethodSummary {
    pub fn report(&self, program: &Program) -> MethodReport {
        let arguments = self.arguments.bindings().map(|bindings| {
            let mut args: Vec<ArgumentReport> = bindings
                .iter()
                .map(|(&position, value)| ArgumentReport {
                    position,
                    value: value.display(program).to_string(),
                })
                .collect();
            args.sort_by_key(|arg| arg.position);
            args
        });
        MethodReport {
            name: program.method_name(self.method).to_string(),
            node: self.node.index(),
            reachable: self.reachable,
            any_init_reachable: self.any_init_reachable,
            arguments,
            return_type: self
                .return_type
                .map(|value| value.display(program).to_string()),
        }
    }
}

impl AnalysisReport {
    pub fn new(program: &Program, result: &GlobalTypeAnalysisResult<'_>) -> Result<Self> {
        let wps = result.whole_program_state();
        let value_reports = |values: Vec<(&str, TypeDomain)>| -> Vec<ValueReport> {
            values
                .into_iter()
                .map(|(name, value)| ValueReport {
                    name: name.to_string(),
                    value: value.display(program).to_string(),
                })
                .collect()
        };

        let mut any_init_reachable: Vec<String> = result
            .any_init_reachables()
            .iter()
            .map(|m| program.method_name(m).to_string())
            .collect();
        any_init_reachable.sort();

        let methods = result
            .analyzer
            .summaries()?
            .iter()
            .map(|summary| summary.report(program))
            .collect();

        Ok(Self {
            strategy: result.strategy.to_string(),
            call_graph: stats(result.graph()),
            iterations: result.iterations,
            max_iterations: result.max_iterations,
            converged: result.converged,
            any_init_reachable,
            fields: value_reports(wps.fields(program)),
            return_types: value_reports(wps.methods(program)),
            methods,
        })
    }
}
