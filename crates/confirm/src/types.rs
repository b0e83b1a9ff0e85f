use chrono::{DateTime, Utc};
use recoup_core::RiskLevel;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Approved,
    Denied,
    Timeout,
    Cancelled,
}

/// A pending request for approval of one risky operation.
/// Invariant: `expires_at > created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub request_id: String,
    pub operation_type: String,
    pub command: String,
    pub risk_level: RiskLevel,
    pub description: String,
    pub prompt_template: String,
    pub timeout_secs: u64,
    pub auto_deny_on_timeout: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl ConfirmationRequest {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn time_remaining_secs(&self) -> u64 {
        (self.expires_at - Utc::now()).num_seconds().max(0) as u64
    }

    /// Prompt text shown to the operator.
    pub fn prompt(&self) -> String {
        let body = self
            .prompt_template
            .replace("{command}", &self.command)
            .replace("{operation}", &self.operation_type)
            .replace("{description}", &self.description);
        format!("{} (timeout: {}s)", body, self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationResponse {
    pub request_id: String,
    pub status: ConfirmationStatus,
    pub user_input: String,
    pub confirmed: bool,
    pub response_time: f64,
    pub responded_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub medium_timeout_secs: u64,
    pub high_timeout_secs: u64,
    pub maximum_timeout_secs: u64,
    pub auto_deny_on_timeout: bool,
    /// Substring patterns that auto-approve a command without prompting.
    pub auto_confirm_patterns: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            medium_timeout_secs: 30,
            high_timeout_secs: 60,
            maximum_timeout_secs: 120,
            auto_deny_on_timeout: true,
            auto_confirm_patterns: Vec::new(),
        }
    }
}

impl GateConfig {
    pub fn timeout_for(&self, risk_level: RiskLevel) -> u64 {
        match risk_level {
            RiskLevel::Minimal | RiskLevel::Low | RiskLevel::Medium => self.medium_timeout_secs,
            RiskLevel::High => self.high_timeout_secs,
            RiskLevel::Maximum => self.maximum_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateStatus {
    pub pending_requests: usize,
    pub completed_requests: usize,
    pub handler_configured: bool,
    pub auto_confirm_patterns: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let req = ConfirmationRequest {
            request_id: "confirm_1".to_string(),
            operation_type: "command_retry".to_string(),
            command: "ls -la".to_string(),
            risk_level: RiskLevel::Medium,
            description: String::new(),
            prompt_template: "Execute: {command}? [y/N]".to_string(),
            timeout_secs: 30,
            auto_deny_on_timeout: true,
            created_at: now,
            expires_at: now + Duration::seconds(30),
            metadata: serde_json::Value::Null,
        };

        assert!(!req.is_expired());
        assert!(req.time_remaining_secs() <= 30);
        assert!(req.expires_at > req.created_at);
    }

    #[test]
    fn test_prompt_substitution() {
        let now = Utc::now();
        let req = ConfirmationRequest {
            request_id: "confirm_2".to_string(),
            operation_type: "code_fix".to_string(),
            command: "rm stale.lock".to_string(),
            risk_level: RiskLevel::High,
            description: String::new(),
            prompt_template: "Execute: {command}? [y/N]".to_string(),
            timeout_secs: 60,
            auto_deny_on_timeout: true,
            created_at: now,
            expires_at: now + Duration::seconds(60),
            metadata: serde_json::Value::Null,
        };

        let prompt = req.prompt();
        assert!(prompt.contains("rm stale.lock"));
        assert!(prompt.contains("60s"));
    }

    #[test]
    fn test_timeouts_scale_with_risk() {
        let config = GateConfig::default();
        assert!(config.timeout_for(RiskLevel::Medium) < config.timeout_for(RiskLevel::High));
        assert!(config.timeout_for(RiskLevel::High) < config.timeout_for(RiskLevel::Maximum));
    }
}
