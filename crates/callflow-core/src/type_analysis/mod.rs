pub mod domain;
pub mod global;
pub mod local;
pub mod summary;
pub mod whole_program_state;

pub use domain::{
    AbstractEnvironment, ArgumentTypeEnvironment, ArgumentTypePartition, Nullness, SingletonType,
    TypeDomain, TypeTag,
};
pub use global::{GlobalTypeAnalysis, GlobalTypeAnalysisResult, GlobalTypeAnalyzer};
pub use local::{LocalContext, LocalTypeAnalyzer, RegisterEnvironment, TypeState};
pub use summary::{AnalysisReport, MethodReport, MethodSummary};
pub use whole_program_state::WholeProgramState;
