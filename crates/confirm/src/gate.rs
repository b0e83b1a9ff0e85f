use crate::types::{
    ConfirmationRequest, ConfirmationResponse, ConfirmationStatus, GateConfig, GateStatus,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use recoup_core::{next_id, RiskLevel};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

const AFFIRMATIVE_TOKENS: &[&str] = &["y", "yes", "ok", "confirm", "1", "true"];

const COMPLETED_HISTORY_LIMIT: usize = 1000;

const DEFAULT_TEMPLATE: &str = "Execute: {command}? [y/N]";
const MAXIMUM_RISK_TEMPLATE: &str = "CRITICAL operation: {operation}. Type 'confirm' to proceed:";

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Prompt failed: {0}")]
    Prompt(String),
    #[error("Input channel closed")]
    Closed,
}

/// Interactive approval source. The gate enforces the timeout; the handler
/// only has to produce the raw operator input.
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn prompt(&self, request: &ConfirmationRequest) -> Result<String, HandlerError>;
}

/// Resolved responses, bounded to the most recent
/// `COMPLETED_HISTORY_LIMIT` entries in arrival order.
#[derive(Default)]
struct CompletedArchive {
    responses: HashMap<String, ConfirmationResponse>,
    order: VecDeque<String>,
}

impl CompletedArchive {
    fn insert(&mut self, response: ConfirmationResponse) {
        let request_id = response.request_id.clone();
        if self.responses.insert(request_id.clone(), response).is_none() {
            self.order.push_back(request_id);
        }
        while self.order.len() > COMPLETED_HISTORY_LIMIT {
            if let Some(oldest) = self.order.pop_front() {
                self.responses.remove(&oldest);
            }
        }
    }

    fn contains(&self, request_id: &str) -> bool {
        self.responses.contains_key(request_id)
    }

    fn get(&self, request_id: &str) -> Option<&ConfirmationResponse> {
        self.responses.get(request_id)
    }

    fn len(&self) -> usize {
        self.responses.len()
    }
}

/// Risk-gated approval service. Low-risk operations pass through untouched;
/// anything above gets a tracked request that resolves to exactly one
/// archived response (approve, deny, timeout, or cancel).
pub struct ConfirmationGate {
    config: GateConfig,
    handler: Option<Arc<dyn ConfirmationHandler>>,
    pending: Mutex<HashMap<String, ConfirmationRequest>>,
    completed: Mutex<CompletedArchive>,
}

impl ConfirmationGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            handler: None,
            pending: Mutex::new(HashMap::new()),
            completed: Mutex::new(CompletedArchive::default()),
        }
    }

    pub fn with_handler(config: GateConfig, handler: Arc<dyn ConfirmationHandler>) -> Self {
        Self {
            config,
            handler: Some(handler),
            pending: Mutex::new(HashMap::new()),
            completed: Mutex::new(CompletedArchive::default()),
        }
    }

    pub async fn request_confirmation(
        &self,
        operation_type: &str,
        command: &str,
        risk_level: RiskLevel,
        description: &str,
        metadata: serde_json::Value,
    ) -> ConfirmationResponse {
        if matches!(risk_level, RiskLevel::Minimal | RiskLevel::Low) {
            return auto_approved("auto-approved: low risk");
        }

        let lowered = command.to_lowercase();
        if let Some(pattern) = self
            .config
            .auto_confirm_patterns
            .iter()
            .find(|p| lowered.contains(p.as_str()))
        {
            return auto_approved(&format!("auto-approved: matched pattern '{}'", pattern));
        }

        let timeout_secs = self.config.timeout_for(risk_level);
        let now = Utc::now();
        let request = ConfirmationRequest {
            request_id: next_id("confirm"),
            operation_type: operation_type.to_string(),
            command: command.to_string(),
            risk_level,
            description: if description.is_empty() {
                format!("Execute command: {}", command)
            } else {
                description.to_string()
            },
            prompt_template: template_for(risk_level).to_string(),
            timeout_secs,
            auto_deny_on_timeout: self.config.auto_deny_on_timeout,
            created_at: now,
            expires_at: now + ChronoDuration::seconds(timeout_secs as i64),
            metadata,
        };
        let request_id = request.request_id.clone();

        tracing::info!(
            request_id = %request_id,
            operation = operation_type,
            risk = %risk_level,
            command,
            "confirmation requested"
        );

        self.pending.lock().insert(request_id.clone(), request.clone());

        let response = match &self.handler {
            Some(handler) => self.interactive_response(handler.clone(), &request).await,
            None => simulated_response(&request),
        };

        self.archive(&request_id, response)
    }

    async fn interactive_response(
        &self,
        handler: Arc<dyn ConfirmationHandler>,
        request: &ConfirmationRequest,
    ) -> ConfirmationResponse {
        let started = Instant::now();
        let deadline = Duration::from_secs(request.timeout_secs);

        match tokio::time::timeout(deadline, handler.prompt(request)).await {
            Ok(Ok(input)) => {
                let confirmed = parse_confirmation(&input, request.risk_level);
                ConfirmationResponse {
                    request_id: request.request_id.clone(),
                    status: if confirmed {
                        ConfirmationStatus::Approved
                    } else {
                        ConfirmationStatus::Denied
                    },
                    user_input: input,
                    confirmed,
                    response_time: started.elapsed().as_secs_f64(),
                    responded_at: Utc::now(),
                    reason: "operator response".to_string(),
                }
            }
            // Approval must be explicit; a broken handler denies.
            Ok(Err(e)) => ConfirmationResponse {
                request_id: request.request_id.clone(),
                status: ConfirmationStatus::Denied,
                user_input: String::new(),
                confirmed: false,
                response_time: started.elapsed().as_secs_f64(),
                responded_at: Utc::now(),
                reason: format!("confirmation handler error: {}", e),
            },
            Err(_) => ConfirmationResponse {
                request_id: request.request_id.clone(),
                status: ConfirmationStatus::Timeout,
                user_input: String::new(),
                confirmed: false,
                response_time: started.elapsed().as_secs_f64(),
                responded_at: Utc::now(),
                reason: "confirmation timed out without response".to_string(),
            },
        }
    }

    /// Moves a request from pending to completed. If a concurrent sweep
    /// already resolved it (e.g. expiry), the earlier response wins.
    fn archive(&self, request_id: &str, response: ConfirmationResponse) -> ConfirmationResponse {
        let removed = self.pending.lock().remove(request_id).is_some();
        let mut completed = self.completed.lock();
        if removed || !completed.contains(request_id) {
            tracing::info!(
                request_id,
                status = ?response.status,
                confirmed = response.confirmed,
                reason = %response.reason,
                "confirmation resolved"
            );
            completed.insert(response.clone());
            response
        } else {
            completed
                .get(request_id)
                .cloned()
                .unwrap_or(response)
        }
    }

    pub fn get_pending_requests(&self) -> Vec<ConfirmationRequest> {
        self.pending.lock().values().cloned().collect()
    }

    pub fn get_completed(&self, limit: usize) -> Vec<ConfirmationResponse> {
        let mut responses: Vec<_> = self.completed.lock().responses.values().cloned().collect();
        responses.sort_by(|a, b| b.responded_at.cmp(&a.responded_at));
        responses.truncate(limit);
        responses
    }

    pub fn cancel_request(&self, request_id: &str, reason: &str) -> bool {
        let removed = self.pending.lock().remove(request_id);
        match removed {
            Some(request) => {
                let response = ConfirmationResponse {
                    request_id: request.request_id.clone(),
                    status: ConfirmationStatus::Cancelled,
                    user_input: String::new(),
                    confirmed: false,
                    response_time: 0.0,
                    responded_at: Utc::now(),
                    reason: reason.to_string(),
                };
                self.completed.lock().insert(response);
                tracing::info!(request_id, reason, "confirmation cancelled");
                true
            }
            None => false,
        }
    }

    /// Explicit sweep, invoked by the host on a timer. Expired pending
    /// requests become TIMEOUT responses. Returns how many were swept.
    pub fn cleanup_expired(&self) -> usize {
        let expired: Vec<ConfirmationRequest> = {
            let mut pending = self.pending.lock();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, r)| r.is_expired())
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };

        let count = expired.len();
        if count > 0 {
            let mut completed = self.completed.lock();
            for request in expired {
                completed.insert(ConfirmationResponse {
                    request_id: request.request_id.clone(),
                    status: ConfirmationStatus::Timeout,
                    user_input: String::new(),
                    confirmed: false,
                    response_time: request.timeout_secs as f64,
                    responded_at: Utc::now(),
                    reason: "request expired without response".to_string(),
                });
            }
            tracing::info!(count, "expired confirmation requests swept");
        }
        count
    }

    pub fn status(&self) -> GateStatus {
        GateStatus {
            pending_requests: self.pending.lock().len(),
            completed_requests: self.completed.lock().len(),
            handler_configured: self.handler.is_some(),
            auto_confirm_patterns: self.config.auto_confirm_patterns.len(),
        }
    }
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new(GateConfig::default())
    }
}

fn template_for(risk_level: RiskLevel) -> &'static str {
    if risk_level == RiskLevel::Maximum {
        MAXIMUM_RISK_TEMPLATE
    } else {
        DEFAULT_TEMPLATE
    }
}

/// Maximum risk demands the literal token "confirm"; anything else accepts
/// the usual affirmative tokens.
fn parse_confirmation(input: &str, risk_level: RiskLevel) -> bool {
    let input = input.trim().to_lowercase();
    if input.is_empty() {
        return false;
    }
    if risk_level == RiskLevel::Maximum {
        return input == "confirm";
    }
    AFFIRMATIVE_TOKENS.contains(&input.as_str())
}

fn auto_approved(reason: &str) -> ConfirmationResponse {
    ConfirmationResponse {
        request_id: "auto".to_string(),
        status: ConfirmationStatus::Approved,
        user_input: "auto".to_string(),
        confirmed: true,
        response_time: 0.0,
        responded_at: Utc::now(),
        reason: reason.to_string(),
    }
}

/// Deterministic stand-in used when no interactive handler is configured:
/// maximum risk is denied, everything else is approved.
fn simulated_response(request: &ConfirmationRequest) -> ConfirmationResponse {
    let (confirmed, status, reason) = match request.risk_level {
        RiskLevel::Maximum => (
            false,
            ConfirmationStatus::Denied,
            "simulated denial for maximum risk operation",
        ),
        RiskLevel::High => (
            true,
            ConfirmationStatus::Approved,
            "simulated approval for high risk operation",
        ),
        _ => (
            true,
            ConfirmationStatus::Approved,
            "simulated approval for medium risk operation",
        ),
    };

    ConfirmationResponse {
        request_id: request.request_id.clone(),
        status,
        user_input: "simulated".to_string(),
        confirmed,
        response_time: 0.0,
        responded_at: Utc::now(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_affirmative_tokens() {
        assert!(parse_confirmation("y", RiskLevel::Medium));
        assert!(parse_confirmation("YES", RiskLevel::High));
        assert!(parse_confirmation(" ok ", RiskLevel::Medium));
        assert!(!parse_confirmation("nope", RiskLevel::Medium));
        assert!(!parse_confirmation("", RiskLevel::Medium));
    }

    #[test]
    fn test_maximum_requires_confirm_token() {
        assert!(!parse_confirmation("y", RiskLevel::Maximum));
        assert!(!parse_confirmation("yes", RiskLevel::Maximum));
        assert!(parse_confirmation("confirm", RiskLevel::Maximum));
        assert!(parse_confirmation("CONFIRM", RiskLevel::Maximum));
    }
}
