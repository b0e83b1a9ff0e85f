use chrono::{DateTime, Utc};
use recoup_core::{
    next_id, ErrorAnalysis, ErrorCategory, ErrorSeverity, ResearchOutcome, RiskLevel,
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Aborted,
    RequiresManual,
}

impl RecoveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecoveryStatus::Success
                | RecoveryStatus::Failed
                | RecoveryStatus::Aborted
                | RecoveryStatus::RequiresManual
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    WebResearchOnly,
    CodeFixRequired,
    CommandRetry,
    MultiStepRecovery,
    ManualIntervention,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::WebResearchOnly => "web_research_only",
            RecoveryStrategy::CodeFixRequired => "code_fix_required",
            RecoveryStrategy::CommandRetry => "command_retry",
            RecoveryStrategy::MultiStepRecovery => "multi_step_recovery",
            RecoveryStrategy::ManualIntervention => "manual_intervention",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// First matching rule wins.
pub fn select_strategy(analysis: &ErrorAnalysis) -> RecoveryStrategy {
    if analysis.requires_code_fix
        && matches!(analysis.severity, ErrorSeverity::High | ErrorSeverity::Critical)
    {
        return RecoveryStrategy::MultiStepRecovery;
    }
    if analysis.requires_code_fix {
        return RecoveryStrategy::CodeFixRequired;
    }
    if analysis.requires_command_retry {
        return if analysis.category == ErrorCategory::CommandSyntax {
            RecoveryStrategy::CommandRetry
        } else {
            RecoveryStrategy::MultiStepRecovery
        };
    }
    if analysis.category == ErrorCategory::SystemError {
        return if analysis.severity == ErrorSeverity::Critical {
            RecoveryStrategy::ManualIntervention
        } else {
            RecoveryStrategy::MultiStepRecovery
        };
    }
    if analysis.category == ErrorCategory::UnknownError {
        return RecoveryStrategy::WebResearchOnly;
    }
    RecoveryStrategy::MultiStepRecovery
}

/// One try within a session. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub attempt_id: String,
    pub strategy: RecoveryStrategy,
    pub actions: Vec<String>,
    pub collaborators: Vec<String>,
    pub success: bool,
    pub duration: f64,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RecoveryAttempt {
    pub fn new(
        strategy: RecoveryStrategy,
        actions: Vec<String>,
        collaborators: Vec<String>,
        success: bool,
        duration: f64,
        error: Option<String>,
    ) -> Self {
        Self {
            attempt_id: next_id("attempt"),
            strategy,
            actions,
            collaborators,
            success,
            duration,
            error,
            timestamp: Utc::now(),
        }
    }
}

/// Aggregate root for one recovery run. Mutated only by the orchestrator;
/// frozen once a terminal status is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySession {
    pub session_id: String,
    pub analysis: ErrorAnalysis,
    pub strategy: RecoveryStrategy,
    pub risk_level: RiskLevel,
    pub max_attempts: u32,
    pub attempts: Vec<RecoveryAttempt>,
    pub status: RecoveryStatus,
    pub total_time: f64,
    pub research_result: Option<ResearchOutcome>,
    pub fixes_applied: Vec<String>,
    pub commands_retried: Vec<String>,
    pub manual_intervention_required: bool,
    pub session_log: Vec<String>,
    pub started_at: DateTime<Utc>,
}

impl RecoverySession {
    pub fn new(analysis: ErrorAnalysis, strategy: RecoveryStrategy, max_attempts: u32) -> Self {
        let risk_level = RiskLevel::from_severity(analysis.severity);
        Self {
            session_id: next_id("recovery"),
            analysis,
            strategy,
            risk_level,
            max_attempts,
            attempts: Vec::new(),
            status: RecoveryStatus::Pending,
            total_time: 0.0,
            research_result: None,
            fixes_applied: Vec::new(),
            commands_retried: Vec::new(),
            manual_intervention_required: false,
            session_log: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Appends a timestamped narration line and mirrors it to the tracer.
    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(session_id = %self.session_id, "{}", message);
        self.session_log
            .push(format!("[{}] {}", Utc::now().format("%H:%M:%S"), message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recoup_core::ErrorContext;

    fn analysis(
        category: ErrorCategory,
        severity: ErrorSeverity,
        code_fix: bool,
        retry: bool,
    ) -> ErrorAnalysis {
        ErrorAnalysis {
            error_id: next_id("err"),
            category,
            severity,
            primary_message: "boom".to_string(),
            secondary_messages: Vec::new(),
            matched_patterns: Vec::new(),
            suggested_fixes: Vec::new(),
            research_query: String::new(),
            requires_code_fix: code_fix,
            requires_command_retry: retry,
            context: ErrorContext::new("cmd", 1, "", ""),
            confidence: 0.8,
            analysis_time: 0.0,
        }
    }

    #[test]
    fn test_strategy_selection_order() {
        // Code fix at high severity outranks everything else.
        assert_eq!(
            select_strategy(&analysis(ErrorCategory::CodeError, ErrorSeverity::High, true, true)),
            RecoveryStrategy::MultiStepRecovery
        );
        assert_eq!(
            select_strategy(&analysis(ErrorCategory::CodeError, ErrorSeverity::Medium, true, false)),
            RecoveryStrategy::CodeFixRequired
        );
        assert_eq!(
            select_strategy(&analysis(
                ErrorCategory::CommandSyntax,
                ErrorSeverity::Low,
                false,
                true
            )),
            RecoveryStrategy::CommandRetry
        );
        assert_eq!(
            select_strategy(&analysis(
                ErrorCategory::DependencyError,
                ErrorSeverity::Medium,
                false,
                true
            )),
            RecoveryStrategy::MultiStepRecovery
        );
        assert_eq!(
            select_strategy(&analysis(
                ErrorCategory::SystemError,
                ErrorSeverity::Critical,
                false,
                false
            )),
            RecoveryStrategy::ManualIntervention
        );
        assert_eq!(
            select_strategy(&analysis(
                ErrorCategory::SystemError,
                ErrorSeverity::Medium,
                false,
                false
            )),
            RecoveryStrategy::MultiStepRecovery
        );
        assert_eq!(
            select_strategy(&analysis(
                ErrorCategory::UnknownError,
                ErrorSeverity::Medium,
                false,
                false
            )),
            RecoveryStrategy::WebResearchOnly
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!RecoveryStatus::Pending.is_terminal());
        assert!(!RecoveryStatus::InProgress.is_terminal());
        assert!(RecoveryStatus::Success.is_terminal());
        assert!(RecoveryStatus::Aborted.is_terminal());
        assert!(RecoveryStatus::RequiresManual.is_terminal());
    }

    #[test]
    fn test_session_risk_derived_from_severity() {
        let session = RecoverySession::new(
            analysis(ErrorCategory::SystemError, ErrorSeverity::Critical, false, false),
            RecoveryStrategy::ManualIntervention,
            3,
        );
        assert_eq!(session.risk_level, RiskLevel::Maximum);
        assert_eq!(session.status, RecoveryStatus::Pending);
    }
}
