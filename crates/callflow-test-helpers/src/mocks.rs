//! Mock implementations for testing

use callflow_core::diagnostics::{Diagnostic, DiagnosticHandler, DiagnosticLevel};
use std::sync::{Arc, Mutex, PoisonError};

/// A mock diagnostic handler that collects diagnostics
#[derive(Debug, Default)]
pub struct MockDiagnosticHandler {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl MockDiagnosticHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Messages of every diagnostic at `level`, in report order
    pub fn messages(&self, level: DiagnosticLevel) -> Vec<String> {
        self.get_diagnostics()
            .into_iter()
            .filter(|d| d.level == level)
            .map(|d| d.message)
            .collect()
    }
}

impl DiagnosticHandler for MockDiagnosticHandler {
    fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }

    fn error_count(&self) -> usize {
        self.messages(DiagnosticLevel::Error).len()
    }

    fn warning_count(&self) -> usize {
        self.messages(DiagnosticLevel::Warning).len()
    }

    fn get_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
