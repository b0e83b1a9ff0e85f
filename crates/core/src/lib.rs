pub mod collaborators;
pub mod types;

pub use collaborators::{
    CodeFixApplier, CollaboratorError, CommandExecutor, ExecutionOutcome, FixOutcome,
    ResearchOutcome, ResearchProvider,
};
pub use types::{next_id, ErrorAnalysis, ErrorCategory, ErrorContext, ErrorSeverity, RiskLevel};
