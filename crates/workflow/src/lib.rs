pub mod corrections;
pub mod orchestrator;
pub mod session;

pub use corrections::corrected_command;
pub use orchestrator::{
    OrchestratorConfig, RecoveryOrchestrator, RecoveryStatistics, StrategyStats,
};
pub use session::{
    select_strategy, RecoveryAttempt, RecoverySession, RecoveryStatus, RecoveryStrategy,
};
