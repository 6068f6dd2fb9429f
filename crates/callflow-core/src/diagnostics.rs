use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Info,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Info => "info",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Info,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level, self.message)
    }
}

/// Trait for handling diagnostics
/// This allows for dependency injection and testing with mock handlers
pub trait DiagnosticHandler: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);

    fn error(&self, message: &str) {
        self.report(Diagnostic::error(message));
    }

    fn warning(&self, message: &str) {
        self.report(Diagnostic::warning(message));
    }

    fn info(&self, message: &str) {
        self.report(Diagnostic::info(message));
    }

    fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    fn error_count(&self) -> usize;
    fn warning_count(&self) -> usize;
    fn get_diagnostics(&self) -> Vec<Diagnostic>;
}

/// Diagnostics recorded so far, shared by both handlers
#[derive(Default)]
struct DiagnosticLog {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl DiagnosticLog {
    fn lock(&self) -> MutexGuard<'_, Vec<Diagnostic>> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, diagnostic: Diagnostic) {
        self.lock().push(diagnostic);
    }

    fn count(&self, level: DiagnosticLevel) -> usize {
        self.lock().iter().filter(|d| d.level == level).count()
    }

    fn all(&self) -> Vec<Diagnostic> {
        self.lock().clone()
    }
}

/// Console-based diagnostic handler that prints to stderr
pub struct ConsoleDiagnosticHandler {
    log: DiagnosticLog,
    pretty: bool,
}

impl ConsoleDiagnosticHandler {
    pub fn new(pretty: bool) -> Self {
        Self {
            log: DiagnosticLog::default(),
            pretty,
        }
    }
}

impl DiagnosticHandler for ConsoleDiagnosticHandler {
    fn report(&self, diagnostic: Diagnostic) {
        if self.pretty {
            let rest = diagnostic.to_string();
            let level = diagnostic.level.to_string();
            eprintln!("\x1b[1m{}\x1b[0m{}", level, &rest[level.len()..]);
        } else {
            eprintln!("{}", diagnostic);
        }
        self.log.push(diagnostic);
    }

    fn error_count(&self) -> usize {
        self.log.count(DiagnosticLevel::Error)
    }

    fn warning_count(&self) -> usize {
        self.log.count(DiagnosticLevel::Warning)
    }

    fn get_diagnostics(&self) -> Vec<Diagnostic> {
        self.log.all()
    }
}

/// Collecting diagnostic handler for testing
/// Collects all diagnostics without printing
#[derive(Default)]
pub struct CollectingDiagnosticHandler {
    log: DiagnosticLog,
}

impl CollectingDiagnosticHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiagnosticHandler for CollectingDiagnosticHandler {
    fn report(&self, diagnostic: Diagnostic) {
        self.log.push(diagnostic);
    }

    fn error_count(&self) -> usize {
        self.log.count(DiagnosticLevel::Error)
    }

    fn warning_count(&self) -> usize {
        self.log.count(DiagnosticLevel::Warning)
    }

    fn get_diagnostics(&self) -> Vec<Diagnostic> {
        self.log.all()
    }
}
