use thiserror::Error;

/// Errors raised while loading a program or running the analyses over it.
///
/// Everything except `Io`, `Config` and `Load` is a precondition violation:
/// the analysis cannot continue and the message names the offending method.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid program description: {0}")]
    Load(String),

    #[error("Method {method} has no node in the call graph")]
    MissingNode { method: String },

    #[error("Method {method} is expected to have a body but has none")]
    MissingBody { method: String },

    #[error("Failed to build the method override graph: class {class} is part of an inheritance cycle")]
    OverrideGraph { class: String },
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
