use crate::call_graph::{build_graph, Graph};
use crate::config::AnalysisConfig;
use crate::diagnostics::{ConsoleDiagnosticHandler, Diagnostic, DiagnosticHandler};
use crate::errors::Result;
use crate::program::Program;
use crate::type_analysis::{GlobalTypeAnalysis, GlobalTypeAnalysisResult};
use std::sync::Arc;

/// Dependency injection container
/// Manages all shared dependencies and creates instances with proper wiring
pub struct Container {
    config: Arc<AnalysisConfig>,
    diagnostic_handler: Arc<dyn DiagnosticHandler>,
}

impl Container {
    /// Create a new container with production dependencies
    pub fn new(config: AnalysisConfig) -> Self {
        let diagnostic_handler = Arc::new(ConsoleDiagnosticHandler::new(config.diagnostics.pretty));

        Container {
            config: Arc::new(config),
            diagnostic_handler,
        }
    }

    /// Create a container with custom dependencies (for testing)
    pub fn with_dependencies(
        config: AnalysisConfig,
        diagnostic_handler: Arc<dyn DiagnosticHandler>,
    ) -> Self {
        Container {
            config: Arc::new(config),
            diagnostic_handler,
        }
    }

    pub fn config(&self) -> &Arc<AnalysisConfig> {
        &self.config
    }

    pub fn diagnostic_handler(&self) -> &Arc<dyn DiagnosticHandler> {
        &self.diagnostic_handler
    }

    /// Call graph for the configured strategy
    pub fn build_call_graph(&self, program: &Program) -> Result<Graph> {
        build_graph(
            program,
            self.config.call_graph.strategy,
            self.config.call_graph.big_override_threshold,
        )
    }

    /// Run the global type analysis with the configured options.
    ///
    /// Hitting the iteration cap is reported as a warning; the last state is
    /// still returned.
    pub fn analyze<'p>(&self, program: &'p Program) -> Result<GlobalTypeAnalysisResult<'p>> {
        let result = GlobalTypeAnalysis::from_config(&self.config).analyze(program)?;
        if !result.converged {
            self.diagnostic_handler.report(Diagnostic::warning(format!(
                "global type analysis stopped after {} of {} iterations without reaching a fixpoint",
                result.iterations, result.max_iterations
            )));
        }
        Ok(result)
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostic_handler.has_errors()
    }

    pub fn error_count(&self) -> usize {
        self.diagnostic_handler.error_count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostic_handler.warning_count()
    }
}
