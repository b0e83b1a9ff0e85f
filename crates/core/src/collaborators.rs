use crate::types::ErrorAnalysis;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("Collaborator failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub success: bool,
    pub solutions: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixOutcome {
    pub success: bool,
    pub fixes_applied: Vec<String>,
    pub modified_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Looks up candidate solutions for a classified error.
#[async_trait]
pub trait ResearchProvider: Send + Sync {
    async fn research(&self, query: &str) -> Result<ResearchOutcome, CollaboratorError>;
}

/// Applies source-level fixes suggested by an analysis and prior research.
#[async_trait]
pub trait CodeFixApplier: Send + Sync {
    async fn apply_fix(
        &self,
        analysis: &ErrorAnalysis,
        research: Option<&ResearchOutcome>,
    ) -> Result<FixOutcome, CollaboratorError>;
}

/// Executes a (possibly corrected) command and reports the outcome.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command_parts: &[String])
        -> Result<ExecutionOutcome, CollaboratorError>;
}
