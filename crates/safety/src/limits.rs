use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LimitsError {
    #[error("Invalid limit: {0}")]
    Invalid(String),
}

/// Hard ceilings for autonomous recovery activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyLimits {
    pub max_concurrent_recoveries: usize,
    pub max_recovery_attempts_per_hour: u32,
    pub max_recovery_time_per_session_secs: u64,
    pub max_recovery_time_per_hour_secs: u64,
    pub max_code_modifications_per_hour: u32,
    pub max_retries_per_session: u32,
    pub max_memory_usage_mb: u64,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_cooldown_secs: u64,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_concurrent_recoveries: 3,
            max_recovery_attempts_per_hour: 10,
            max_recovery_time_per_session_secs: 300,
            max_recovery_time_per_hour_secs: 1800,
            max_code_modifications_per_hour: 5,
            max_retries_per_session: 3,
            max_memory_usage_mb: 500,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_cooldown_secs: 300,
        }
    }
}

impl SafetyLimits {
    pub fn validate(&self) -> Result<(), LimitsError> {
        if self.max_concurrent_recoveries == 0 {
            return Err(LimitsError::Invalid(
                "max_concurrent_recoveries must be at least 1".to_string(),
            ));
        }
        if self.max_recovery_attempts_per_hour == 0 {
            return Err(LimitsError::Invalid(
                "max_recovery_attempts_per_hour must be at least 1".to_string(),
            ));
        }
        if self.max_recovery_time_per_session_secs > self.max_recovery_time_per_hour_secs {
            return Err(LimitsError::Invalid(
                "session time budget exceeds hourly time budget".to_string(),
            ));
        }
        if self.circuit_breaker_failure_threshold == 0 {
            return Err(LimitsError::Invalid(
                "circuit_breaker_failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time snapshot checked before each authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_usage_mb: u64,
    pub active_recoveries: usize,
    pub recovery_attempts_hour: u32,
    pub total_recovery_time_hour_secs: f64,
    pub code_modifications_hour: u32,
}

impl ResourceUsage {
    /// Violations that block outright. Concurrency and the hourly attempt
    /// quota are checked separately by the manager so they can produce
    /// softer denials with retry hints.
    pub fn exceeds_limits(&self, limits: &SafetyLimits) -> Vec<String> {
        let mut violations = Vec::new();
        if self.memory_usage_mb > limits.max_memory_usage_mb {
            violations.push(format!(
                "memory usage {}MB exceeds limit {}MB",
                self.memory_usage_mb, limits.max_memory_usage_mb
            ));
        }
        if self.total_recovery_time_hour_secs > limits.max_recovery_time_per_hour_secs as f64 {
            violations.push(format!(
                "hourly recovery time {:.0}s exceeds limit {}s",
                self.total_recovery_time_hour_secs, limits.max_recovery_time_per_hour_secs
            ));
        }
        if self.code_modifications_hour > limits.max_code_modifications_per_hour {
            violations.push(format!(
                "{} code modifications this hour exceeds limit {}",
                self.code_modifications_hour, limits.max_code_modifications_per_hour
            ));
        }
        violations
    }
}
