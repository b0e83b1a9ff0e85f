use crate::audit::{AuditEvent, AuditEventType, AuditLog};
use crate::breaker::CircuitBreaker;
use crate::limits::{LimitsError, ResourceUsage, SafetyLimits};
use crate::monitor::ResourceMonitor;
use chrono::{Timelike, Utc};
use parking_lot::Mutex;
use recoup_core::RiskLevel;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::time::Duration;

const COMPLETION_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Recovery,
    CodeFix,
    CommandRetry,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Recovery => "recovery",
            OperationType::CodeFix => "code_fix",
            OperationType::CommandRetry => "command_retry",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Posture attached to a granted or denied authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    Safe,
    Cautious,
    Restricted,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authorization {
    pub authorized: bool,
    pub reason: String,
    pub safety_level: SafetyLevel,
    pub conditions: Vec<String>,
    pub retry_after_secs: Option<u64>,
}

impl Authorization {
    fn granted(safety_level: SafetyLevel, conditions: Vec<String>) -> Self {
        Self {
            authorized: true,
            reason: "authorized".to_string(),
            safety_level,
            conditions,
            retry_after_secs: None,
        }
    }

    fn denied(reason: String, safety_level: SafetyLevel, retry_after_secs: Option<u64>) -> Self {
        Self {
            authorized: false,
            reason,
            safety_level,
            conditions: Vec::new(),
            retry_after_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub operation_id: String,
    pub operation_type: OperationType,
    pub success: bool,
    pub duration_secs: f64,
    pub code_modifications: u32,
    pub completed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyStatus {
    pub active_recoveries: usize,
    pub attempts_this_hour: u32,
    pub code_modifications_this_hour: u32,
    pub recovery_time_this_hour_secs: f64,
    pub memory_usage_mb: u64,
    pub breaker_states: HashMap<String, String>,
    pub completed_operations: usize,
}

#[derive(Debug, Default, Clone)]
struct HourStats {
    attempts: u32,
    code_modifications: u32,
    recovery_time_secs: f64,
}

#[derive(Default)]
struct ManagerState {
    breakers: HashMap<OperationType, CircuitBreaker>,
    active: HashSet<String>,
    hourly: HashMap<String, HourStats>,
    /// Half-open trial slots acquired per operation id, so an admission
    /// resolved under another category can hand its slot back.
    trials: HashMap<String, HashSet<OperationType>>,
    history: VecDeque<CompletionRecord>,
}

/// Central authority for recovery safety. Every recovery operation must
/// pass `authorize` before touching collaborators and report back through
/// `register_completion`. Denials never raise; they come back as a
/// structured `Authorization` the caller can act on.
pub struct SafetyManager {
    limits: SafetyLimits,
    monitor: ResourceMonitor,
    audit: Option<AuditLog>,
    state: Mutex<ManagerState>,
}

impl SafetyManager {
    pub fn new(limits: SafetyLimits) -> Result<Self, LimitsError> {
        limits.validate()?;
        Ok(Self {
            limits,
            monitor: ResourceMonitor::new(),
            audit: None,
            state: Mutex::new(ManagerState::default()),
        })
    }

    pub fn with_audit_log(limits: SafetyLimits, audit: AuditLog) -> Result<Self, LimitsError> {
        limits.validate()?;
        Ok(Self {
            limits,
            monitor: ResourceMonitor::new(),
            audit: Some(audit),
            state: Mutex::new(ManagerState::default()),
        })
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    /// Gate one operation. Checks run in fixed order: circuit breaker,
    /// hard resource limits, concurrency, hourly quota. A grant registers
    /// the operation as active and counts the attempt.
    pub fn authorize(
        &self,
        operation: OperationType,
        operation_id: &str,
        risk_level: RiskLevel,
    ) -> Authorization {
        // Probe outside the lock; sysinfo refresh is not cheap.
        let memory_usage_mb = self.monitor.current_memory_mb();

        let mut state = self.state.lock();

        let breaker = state
            .breakers
            .entry(operation)
            .or_insert_with(|| self.new_breaker(operation));
        if !breaker.poll() {
            let retry_after = breaker.cooldown_remaining_secs();
            drop(state);
            let reason = format!("circuit breaker open for {}", operation);
            tracing::warn!(operation_id, operation = %operation, "authorization denied: {}", reason);
            self.audit_event(
                AuditEvent::new(
                    AuditEventType::RiskyOperationBlocked,
                    json!({ "operation_id": operation_id, "operation": operation.as_str(), "reason": reason }),
                )
                .with_risk(risk_level),
            );
            return Authorization::denied(reason, SafetyLevel::Blocked, retry_after);
        }

        let hour_key = current_hour_key();
        let hour = state.hourly.get(&hour_key).cloned().unwrap_or_default();
        let usage = ResourceUsage {
            memory_usage_mb,
            active_recoveries: state.active.len(),
            recovery_attempts_hour: hour.attempts,
            total_recovery_time_hour_secs: hour.recovery_time_secs,
            code_modifications_hour: hour.code_modifications,
        };

        let violations = usage.exceeds_limits(&self.limits);
        if !violations.is_empty() {
            drop(state);
            let reason = format!("resource limits exceeded: {}", violations.join("; "));
            tracing::warn!(operation_id, "authorization denied: {}", reason);
            self.audit_event(
                AuditEvent::new(
                    AuditEventType::ResourceLimitExceeded,
                    json!({ "operation_id": operation_id, "violations": violations }),
                )
                .with_risk(risk_level)
                .with_usage(usage),
            );
            return Authorization::denied(reason, SafetyLevel::Blocked, None);
        }

        // Re-authorizing an already-active operation does not hold a second slot.
        if !state.active.contains(operation_id)
            && state.active.len() >= self.limits.max_concurrent_recoveries
        {
            drop(state);
            let reason = format!(
                "maximum concurrent recoveries reached ({})",
                self.limits.max_concurrent_recoveries
            );
            tracing::warn!(operation_id, "authorization denied: {}", reason);
            self.audit_event(
                AuditEvent::new(
                    AuditEventType::SafetyLimitHit,
                    json!({ "operation_id": operation_id, "limit": "max_concurrent_recoveries" }),
                )
                .with_risk(risk_level)
                .with_usage(usage),
            );
            return Authorization::denied(reason, SafetyLevel::Restricted, None);
        }

        if hour.attempts >= self.limits.max_recovery_attempts_per_hour {
            drop(state);
            let reason = format!(
                "hourly recovery attempt limit reached ({})",
                self.limits.max_recovery_attempts_per_hour
            );
            tracing::warn!(operation_id, "authorization denied: {}", reason);
            self.audit_event(
                AuditEvent::new(
                    AuditEventType::SafetyLimitHit,
                    json!({ "operation_id": operation_id, "limit": "max_recovery_attempts_per_hour" }),
                )
                .with_risk(risk_level)
                .with_usage(usage),
            );
            return Authorization::denied(reason, SafetyLevel::Restricted, Some(secs_to_next_hour()));
        }

        let (safety_level, conditions) = self.assess_posture(operation, risk_level, &usage);

        // Grant: take the slot, count the attempt, consume any half-open trial.
        state.active.insert(operation_id.to_string());
        state.hourly.entry(hour_key).or_default().attempts += 1;
        let trial_acquired = state
            .breakers
            .get_mut(&operation)
            .map(|breaker| breaker.acquire())
            .unwrap_or(false);
        if trial_acquired {
            state
                .trials
                .entry(operation_id.to_string())
                .or_default()
                .insert(operation);
        }
        drop(state);

        tracing::info!(
            operation_id,
            operation = %operation,
            risk = %risk_level,
            level = ?safety_level,
            "recovery operation authorized"
        );
        self.audit_event(
            AuditEvent::new(
                AuditEventType::RecoveryStarted,
                json!({ "operation_id": operation_id, "operation": operation.as_str() }),
            )
            .with_session(operation_id)
            .with_risk(risk_level)
            .with_usage(usage),
        );

        Authorization::granted(safety_level, conditions)
    }

    fn assess_posture(
        &self,
        operation: OperationType,
        risk_level: RiskLevel,
        usage: &ResourceUsage,
    ) -> (SafetyLevel, Vec<String>) {
        if risk_level >= RiskLevel::Maximum {
            return (
                SafetyLevel::Restricted,
                vec![
                    "manual confirmation required".to_string(),
                    "audit trail mandatory".to_string(),
                    "rollback plan required".to_string(),
                ],
            );
        }

        let memory_pressure =
            usage.memory_usage_mb as f64 > self.limits.max_memory_usage_mb as f64 * 0.8;
        let concurrency_pressure = usage.active_recoveries as f64
            > self.limits.max_concurrent_recoveries as f64 * 0.7;
        if memory_pressure || concurrency_pressure {
            return (
                SafetyLevel::Cautious,
                vec![
                    "enhanced monitoring".to_string(),
                    "reduced timeout".to_string(),
                ],
            );
        }

        if operation == OperationType::CodeFix && usage.code_modifications_hour > 3 {
            return (
                SafetyLevel::Cautious,
                vec!["code modification budget nearly exhausted".to_string()],
            );
        }

        (SafetyLevel::Safe, Vec::new())
    }

    /// Reports the outcome of a previously authorized operation. Feeds the
    /// per-category circuit breaker and the hourly usage counters.
    pub fn register_completion(
        &self,
        operation_id: &str,
        operation: OperationType,
        success: bool,
        duration_secs: f64,
        code_modifications: u32,
    ) {
        let opened = {
            let mut state = self.state.lock();
            state.active.remove(operation_id);

            let hour = state.hourly.entry(current_hour_key()).or_default();
            hour.recovery_time_secs += duration_secs;
            hour.code_modifications += code_modifications;

            let breaker = state
                .breakers
                .entry(operation)
                .or_insert_with(|| self.new_breaker(operation));
            let opened = if success {
                breaker.record_success();
                false
            } else {
                breaker.record_failure()
            };

            // Trial slots this operation acquired under other categories
            // never get a verdict here; hand them back.
            let pending_trials = state.trials.remove(operation_id).unwrap_or_default();
            for category in pending_trials {
                if category != operation {
                    if let Some(breaker) = state.breakers.get_mut(&category) {
                        breaker.release_trial();
                    }
                }
            }

            state.history.push_back(CompletionRecord {
                operation_id: operation_id.to_string(),
                operation_type: operation,
                success,
                duration_secs,
                code_modifications,
                completed_at: Utc::now().to_rfc3339(),
            });
            if state.history.len() > COMPLETION_HISTORY_LIMIT {
                state.history.pop_front();
            }
            opened
        };

        tracing::info!(
            operation_id,
            operation = %operation,
            success,
            duration_secs,
            "recovery operation completed"
        );
        let event_type = if success {
            AuditEventType::RecoveryCompleted
        } else {
            AuditEventType::RecoveryFailed
        };
        self.audit_event(
            AuditEvent::new(
                event_type,
                json!({
                    "operation_id": operation_id,
                    "operation": operation.as_str(),
                    "duration_secs": duration_secs,
                    "code_modifications": code_modifications,
                }),
            )
            .with_session(operation_id),
        );

        if opened {
            tracing::warn!(operation = %operation, "circuit breaker opened");
            self.audit_event(AuditEvent::new(
                AuditEventType::CircuitBreakerOpened,
                json!({ "operation": operation.as_str() }),
            ));
        }
    }

    pub fn record_manual_intervention(&self, operation_id: &str, reason: &str) {
        tracing::warn!(operation_id, reason, "manual intervention required");
        self.audit_event(
            AuditEvent::new(
                AuditEventType::ManualInterventionRequired,
                json!({ "operation_id": operation_id, "reason": reason }),
            )
            .with_session(operation_id),
        );
    }

    /// Drops hourly counters older than the current and previous hour.
    /// Invoked explicitly by the host on its own schedule.
    pub fn cleanup_expired_stats(&self) -> usize {
        let current = current_hour_key();
        let previous = previous_hour_key();
        let mut state = self.state.lock();
        let before = state.hourly.len();
        // Hour keys are zero-padded so lexicographic order is time order.
        state.hourly.retain(|key, _| *key == current || *key == previous);
        let removed = before - state.hourly.len();
        if removed > 0 {
            tracing::debug!(removed, "stale hourly stats pruned");
        }
        removed
    }

    pub fn get_safety_status(&self) -> SafetyStatus {
        let memory_usage_mb = self.monitor.current_memory_mb();
        let state = self.state.lock();
        let hour = state
            .hourly
            .get(&current_hour_key())
            .cloned()
            .unwrap_or_default();

        SafetyStatus {
            active_recoveries: state.active.len(),
            attempts_this_hour: hour.attempts,
            code_modifications_this_hour: hour.code_modifications,
            recovery_time_this_hour_secs: hour.recovery_time_secs,
            memory_usage_mb,
            breaker_states: state
                .breakers
                .iter()
                .map(|(op, b)| (op.as_str().to_string(), b.state().as_str().to_string()))
                .collect(),
            completed_operations: state.history.len(),
        }
    }

    pub fn get_completion_history(&self, limit: usize) -> Vec<CompletionRecord> {
        let state = self.state.lock();
        state.history.iter().rev().take(limit).cloned().collect()
    }

    fn new_breaker(&self, operation: OperationType) -> CircuitBreaker {
        let (threshold, cooldown_secs) = match operation {
            OperationType::CodeFix => (3, 600),
            OperationType::CommandRetry => (5, 180),
            OperationType::Recovery => (
                self.limits.circuit_breaker_failure_threshold,
                self.limits.circuit_breaker_cooldown_secs,
            ),
        };
        CircuitBreaker::new(threshold, Duration::from_secs(cooldown_secs))
    }

    // Audit failures degrade to a log line; safety decisions never block on IO.
    fn audit_event(&self, event: AuditEvent) {
        if let Some(log) = &self.audit {
            if let Err(e) = log.record(&event) {
                tracing::warn!(error = %e, "failed to write audit event");
            }
        }
    }
}

fn current_hour_key() -> String {
    Utc::now().format("%Y-%m-%dT%H").to_string()
}

fn previous_hour_key() -> String {
    (Utc::now() - chrono::Duration::hours(1))
        .format("%Y-%m-%dT%H")
        .to_string()
}

fn secs_to_next_hour() -> u64 {
    let now = Utc::now();
    3600 - (now.minute() as u64 * 60 + now.second() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SafetyManager {
        SafetyManager::new(SafetyLimits::default()).unwrap()
    }

    #[test]
    fn test_grant_registers_active_and_attempt() {
        let mgr = manager();
        let auth = mgr.authorize(OperationType::Recovery, "op_1", RiskLevel::Medium);
        assert!(auth.authorized);
        assert_eq!(auth.safety_level, SafetyLevel::Safe);

        let status = mgr.get_safety_status();
        assert_eq!(status.active_recoveries, 1);
        assert_eq!(status.attempts_this_hour, 1);
    }

    #[test]
    fn test_maximum_risk_is_restricted_with_conditions() {
        let mgr = manager();
        let auth = mgr.authorize(OperationType::CodeFix, "op_1", RiskLevel::Maximum);
        assert!(auth.authorized);
        assert_eq!(auth.safety_level, SafetyLevel::Restricted);
        assert_eq!(auth.conditions.len(), 3);
    }

    #[test]
    fn test_completion_releases_slot() {
        let mgr = manager();
        mgr.authorize(OperationType::Recovery, "op_1", RiskLevel::Medium);
        mgr.register_completion("op_1", OperationType::Recovery, true, 1.5, 0);

        let status = mgr.get_safety_status();
        assert_eq!(status.active_recoveries, 0);
        assert_eq!(status.completed_operations, 1);
        assert!(status.recovery_time_this_hour_secs >= 1.5);
    }

    #[test]
    fn test_hourly_quota_denial_has_retry_hint() {
        let limits = SafetyLimits {
            max_recovery_attempts_per_hour: 2,
            ..SafetyLimits::default()
        };
        let mgr = SafetyManager::new(limits).unwrap();
        for i in 0..2 {
            let id = format!("op_{}", i);
            assert!(mgr.authorize(OperationType::Recovery, &id, RiskLevel::Low).authorized);
            mgr.register_completion(&id, OperationType::Recovery, true, 0.1, 0);
        }

        let denied = mgr.authorize(OperationType::Recovery, "op_over", RiskLevel::Low);
        assert!(!denied.authorized);
        assert_eq!(denied.safety_level, SafetyLevel::Restricted);
        assert!(denied.reason.contains("hourly"));
        assert!(denied.retry_after_secs.is_some());
    }
}
