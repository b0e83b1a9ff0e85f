use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Immutable record of one failed command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub execution_time: f64,
    pub working_directory: String,
    pub environment: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorContext {
    pub fn new(
        command: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            execution_time: 0.0,
            working_directory: String::new(),
            environment: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// First whitespace-separated token of the command, if any.
    pub fn base_command(&self) -> Option<&str> {
        self.command.split_whitespace().next()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    CodeError,
    CommandSyntax,
    SystemError,
    NetworkError,
    DependencyError,
    ConfigurationError,
    UnknownError,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::CodeError => "code_error",
            ErrorCategory::CommandSyntax => "command_syntax",
            ErrorCategory::SystemError => "system_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::DependencyError => "dependency_error",
            ErrorCategory::ConfigurationError => "config_error",
            ErrorCategory::UnknownError => "unknown_error",
        };
        write!(f, "{}", name)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        };
        write!(f, "{}", name)
    }
}

/// Risk tier attached to an operation awaiting authorization or confirmation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Maximum,
}

impl RiskLevel {
    pub fn from_severity(severity: ErrorSeverity) -> Self {
        match severity {
            ErrorSeverity::Low => RiskLevel::Low,
            ErrorSeverity::Medium => RiskLevel::Medium,
            ErrorSeverity::High => RiskLevel::High,
            ErrorSeverity::Critical => RiskLevel::Maximum,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RiskLevel::Minimal => "minimal",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Maximum => "maximum",
        };
        write!(f, "{}", name)
    }
}

/// Structured classification of one failed execution. Produced once by the
/// classifier and owned by the recovery workflow for the session lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub error_id: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub primary_message: String,
    pub secondary_messages: Vec<String>,
    pub matched_patterns: Vec<String>,
    pub suggested_fixes: Vec<String>,
    pub research_query: String,
    pub requires_code_fix: bool,
    pub requires_command_retry: bool,
    pub context: ErrorContext,
    pub confidence: f64,
    pub analysis_time: f64,
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique process-local id: `<prefix>_<millis>_<seq>`.
pub fn next_id(prefix: &str) -> String {
    let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}_{}", prefix, Utc::now().timestamp_millis(), seq)
}
