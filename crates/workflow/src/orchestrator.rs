use crate::corrections::corrected_command;
use crate::session::{
    select_strategy, RecoveryAttempt, RecoverySession, RecoveryStatus, RecoveryStrategy,
};
use chrono::Utc;
use parking_lot::Mutex;
use recoup_confirm::ConfirmationGate;
use recoup_core::{CodeFixApplier, CommandExecutor, ErrorAnalysis, ResearchProvider};
use recoup_safety::{OperationType, SafetyLevel, SafetyManager};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Orchestrator tuning. The per-session retry cap and wall-clock budget
/// come from the safety manager's `SafetyLimits`, not from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub max_recovery_attempts: u32,
    /// Exponential backoff base between command retries, in seconds.
    /// Zero disables the backoff sleep entirely.
    pub backoff_base_secs: f64,
    pub completed_history_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_recovery_attempts: 3,
            backoff_base_secs: 2.0,
            completed_history_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyStats {
    pub total: usize,
    pub successful: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStatistics {
    pub total_sessions: usize,
    pub successful_sessions: usize,
    pub success_rate: f64,
    pub average_time_secs: f64,
    pub active_sessions: usize,
    pub per_strategy: HashMap<String, StrategyStats>,
}

type SessionHandle = Arc<Mutex<RecoverySession>>;

/// Outcome of the safety/confirmation gauntlet run before each attempt.
enum Precheck {
    Proceed,
    /// Confirmation denied: the attempt is recorded as failed but the
    /// workflow may continue with its next step.
    Skip(String),
    /// The session reached a terminal state (abort, timeout, or safety
    /// denial); the workflow stops without contacting collaborators.
    Halt,
}

/// Top-level recovery state machine. Drives one session per call from a
/// classified error to a terminal status, consulting the safety manager
/// before every attempt and the confirmation gate when told to.
pub struct RecoveryOrchestrator {
    config: OrchestratorConfig,
    safety: Arc<SafetyManager>,
    gate: Arc<ConfirmationGate>,
    research: Arc<dyn ResearchProvider>,
    fixer: Arc<dyn CodeFixApplier>,
    executor: Arc<dyn CommandExecutor>,
    active: Mutex<HashMap<String, SessionHandle>>,
    completed: Mutex<VecDeque<RecoverySession>>,
}

impl RecoveryOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        safety: Arc<SafetyManager>,
        gate: Arc<ConfirmationGate>,
        research: Arc<dyn ResearchProvider>,
        fixer: Arc<dyn CodeFixApplier>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            config,
            safety,
            gate,
            research,
            fixer,
            executor,
            active: Mutex::new(HashMap::new()),
            completed: Mutex::new(VecDeque::new()),
        }
    }

    /// Runs one recovery session to completion. Never errors outward;
    /// every runtime failure surfaces as the session's terminal status.
    pub async fn initiate_recovery(
        &self,
        analysis: ErrorAnalysis,
        original_command: Option<String>,
        context: Option<serde_json::Value>,
    ) -> RecoverySession {
        let strategy = select_strategy(&analysis);
        let original =
            original_command.unwrap_or_else(|| analysis.context.command.clone());

        let mut session =
            RecoverySession::new(analysis, strategy, self.config.max_recovery_attempts);
        session.log(format!(
            "recovery started for error {} with strategy {}",
            session.analysis.error_id, strategy
        ));
        if let Some(ctx) = context {
            session.log(format!("caller context: {}", ctx));
        }
        session.status = RecoveryStatus::InProgress;

        let session_id = session.session_id.clone();
        tracing::info!(
            session_id = %session_id,
            strategy = %strategy,
            risk = %session.risk_level,
            "recovery session started"
        );

        let handle: SessionHandle = Arc::new(Mutex::new(session));
        self.active.lock().insert(session_id.clone(), handle.clone());
        let started = Instant::now();

        match strategy {
            RecoveryStrategy::WebResearchOnly => self.run_research_only(&handle).await,
            RecoveryStrategy::CodeFixRequired => self.run_code_fix(&handle).await,
            RecoveryStrategy::CommandRetry => self.run_command_retry(&handle).await,
            RecoveryStrategy::MultiStepRecovery => self.run_multi_step(&handle, &original).await,
            RecoveryStrategy::ManualIntervention => {
                self.run_manual_intervention(&handle).await
            }
        }

        self.finish(&session_id, &handle, started)
    }

    async fn run_research_only(&self, handle: &SessionHandle) {
        let command = { handle.lock().analysis.context.command.clone() };
        match self
            .precheck(handle, OperationType::Recovery, &command, "web research")
            .await
        {
            Precheck::Halt => return,
            Precheck::Skip(reason) => {
                self.record_denied_attempt(handle, &reason);
                handle.lock().status = RecoveryStatus::Failed;
                return;
            }
            Precheck::Proceed => {}
        }

        let usable = self.research_step(handle).await;
        handle.lock().status = if usable {
            RecoveryStatus::Success
        } else {
            RecoveryStatus::Failed
        };
    }

    async fn run_code_fix(&self, handle: &SessionHandle) {
        let command = { handle.lock().analysis.context.command.clone() };

        // Research informs the fix but its failure is not fatal here.
        match self
            .precheck(handle, OperationType::Recovery, &command, "fix research")
            .await
        {
            Precheck::Halt => return,
            Precheck::Skip(reason) => self.record_denied_attempt(handle, &reason),
            Precheck::Proceed => {
                self.research_step(handle).await;
            }
        }

        match self
            .precheck(handle, OperationType::CodeFix, &command, "code fix")
            .await
        {
            Precheck::Halt => return,
            Precheck::Skip(reason) => {
                self.record_denied_attempt(handle, &reason);
                handle.lock().status = RecoveryStatus::Failed;
                return;
            }
            Precheck::Proceed => {}
        }

        let fixed = self.fix_step(handle).await;
        handle.lock().status = if fixed {
            RecoveryStatus::Success
        } else {
            RecoveryStatus::Failed
        };
    }

    async fn run_command_retry(&self, handle: &SessionHandle) {
        for attempt in 0..self.safety.limits().max_retries_per_session {
            let corrected = {
                let session = handle.lock();
                corrected_command(&session.analysis, attempt as usize)
            };

            match self
                .precheck(
                    handle,
                    OperationType::CommandRetry,
                    &corrected,
                    &format!("command retry {}", attempt + 1),
                )
                .await
            {
                Precheck::Halt => return,
                Precheck::Skip(reason) => {
                    self.record_denied_attempt(handle, &reason);
                    continue;
                }
                Precheck::Proceed => {}
            }

            if attempt > 0 && self.config.backoff_base_secs > 0.0 {
                let delay = self.config.backoff_base_secs.powi(attempt as i32);
                handle
                    .lock()
                    .log(format!("backing off {:.1}s before retry", delay));
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            }

            if self.execute_step(handle, &corrected, attempt).await {
                handle.lock().status = RecoveryStatus::Success;
                return;
            }
        }

        let mut session = handle.lock();
        session.status = RecoveryStatus::Failed;
        session.log("all command retries exhausted");
    }

    async fn run_multi_step(&self, handle: &SessionHandle, original: &str) {
        let mut research_usable = false;
        match self
            .precheck(handle, OperationType::Recovery, original, "research step")
            .await
        {
            Precheck::Halt => return,
            Precheck::Skip(reason) => self.record_denied_attempt(handle, &reason),
            Precheck::Proceed => {
                research_usable = self.research_step(handle).await;
            }
        }

        let (requires_code_fix, requires_command_retry) = {
            let session = handle.lock();
            (
                session.analysis.requires_code_fix,
                session.analysis.requires_command_retry,
            )
        };

        if requires_code_fix {
            match self
                .precheck(handle, OperationType::CodeFix, original, "code fix step")
                .await
            {
                Precheck::Halt => return,
                Precheck::Skip(reason) => self.record_denied_attempt(handle, &reason),
                Precheck::Proceed => {
                    if !self.fix_step(handle).await {
                        handle.lock().status = RecoveryStatus::Failed;
                        return;
                    }
                }
            }

            // One retry of the original command proves the fix.
            match self
                .precheck(
                    handle,
                    OperationType::CommandRetry,
                    original,
                    "post-fix retry",
                )
                .await
            {
                Precheck::Halt => return,
                Precheck::Skip(reason) => {
                    self.record_denied_attempt(handle, &reason);
                    handle.lock().status = RecoveryStatus::Failed;
                    return;
                }
                Precheck::Proceed => {}
            }
            let retried_ok = self.execute_step(handle, original, 0).await;
            handle.lock().status = if retried_ok {
                RecoveryStatus::Success
            } else {
                RecoveryStatus::Failed
            };
            return;
        }

        if requires_command_retry {
            self.run_command_retry(handle).await;
            return;
        }

        let mut session = handle.lock();
        if research_usable {
            session.status = RecoveryStatus::Success;
        } else {
            session.status = RecoveryStatus::RequiresManual;
            session.manual_intervention_required = true;
            session.log("no automated path available, operator intervention required");
        }
    }

    async fn run_manual_intervention(&self, handle: &SessionHandle) {
        let command = { handle.lock().analysis.context.command.clone() };

        // Research is best-effort here; its output is operator guidance.
        match self
            .precheck(handle, OperationType::Recovery, &command, "guidance research")
            .await
        {
            Precheck::Halt => return,
            Precheck::Skip(reason) => self.record_denied_attempt(handle, &reason),
            Precheck::Proceed => {
                self.research_step(handle).await;
            }
        }

        let mut session = handle.lock();
        session.status = RecoveryStatus::RequiresManual;
        session.manual_intervention_required = true;
        session.log("error requires manual intervention");
    }

    /// Abort check, session budget, safety authorization, and (for
    /// restricted grants) confirmation, in that order.
    async fn precheck(
        &self,
        handle: &SessionHandle,
        operation: OperationType,
        command: &str,
        step: &str,
    ) -> Precheck {
        let (session_id, risk, status, started_at) = {
            let session = handle.lock();
            (
                session.session_id.clone(),
                session.risk_level,
                session.status,
                session.started_at,
            )
        };

        if status == RecoveryStatus::Aborted {
            handle
                .lock()
                .log(format!("abort observed before {}", step));
            return Precheck::Halt;
        }

        let elapsed = (Utc::now() - started_at).num_seconds().max(0) as u64;
        if elapsed > self.safety.limits().max_recovery_time_per_session_secs {
            let mut session = handle.lock();
            session.status = RecoveryStatus::Failed;
            session.log("recovery timeout");
            return Precheck::Halt;
        }

        let auth = self.safety.authorize(operation, &session_id, risk);
        if !auth.authorized {
            let mut session = handle.lock();
            session.status = RecoveryStatus::Failed;
            session.log(format!(
                "authorization denied before {}: {}",
                step, auth.reason
            ));
            return Precheck::Halt;
        }
        if !auth.conditions.is_empty() {
            handle
                .lock()
                .log(format!("safety conditions: {}", auth.conditions.join(", ")));
        }

        if auth.safety_level == SafetyLevel::Restricted {
            handle.lock().log(format!(
                "restricted authorization for {}, confirmation required",
                step
            ));
            let response = self
                .gate
                .request_confirmation(
                    operation.as_str(),
                    command,
                    risk,
                    "",
                    json!({ "session_id": session_id, "step": step }),
                )
                .await;
            if !response.confirmed {
                handle.lock().log(format!(
                    "confirmation denied for {}: {}",
                    step, response.reason
                ));
                return Precheck::Skip(format!("confirmation denied: {}", response.reason));
            }
            handle
                .lock()
                .log(format!("confirmation granted for {}", step));
        }

        Precheck::Proceed
    }

    /// Researches the session's query, stores the payload, and records the
    /// attempt. Returns whether the result is usable.
    async fn research_step(&self, handle: &SessionHandle) -> bool {
        let query = { handle.lock().analysis.research_query.clone() };
        handle.lock().log(format!("researching: {}", query));

        let started = Instant::now();
        let result = self.research.research(&query).await;
        let duration = started.elapsed().as_secs_f64();

        let mut session = handle.lock();
        let strategy = session.strategy;
        match result {
            Ok(outcome) => {
                let usable = outcome.success && !outcome.solutions.is_empty();
                session.log(format!(
                    "research returned {} solutions (confidence {:.2})",
                    outcome.solutions.len(),
                    outcome.confidence
                ));
                session.research_result = Some(outcome);
                session.attempts.push(RecoveryAttempt::new(
                    strategy,
                    vec!["web_research".to_string()],
                    vec!["research_provider".to_string()],
                    usable,
                    duration,
                    None,
                ));
                usable
            }
            Err(e) => {
                session.log(format!("research failed: {}", e));
                session.attempts.push(RecoveryAttempt::new(
                    strategy,
                    vec!["web_research".to_string()],
                    vec!["research_provider".to_string()],
                    false,
                    duration,
                    Some(e.to_string()),
                ));
                false
            }
        }
    }

    async fn fix_step(&self, handle: &SessionHandle) -> bool {
        let (analysis, research) = {
            let session = handle.lock();
            (session.analysis.clone(), session.research_result.clone())
        };
        handle.lock().log("applying code fix");

        let started = Instant::now();
        let result = self.fixer.apply_fix(&analysis, research.as_ref()).await;
        let duration = started.elapsed().as_secs_f64();

        let mut session = handle.lock();
        let strategy = session.strategy;
        match result {
            Ok(outcome) => {
                session.log(format!(
                    "fix applier reported success={} ({} fixes)",
                    outcome.success,
                    outcome.fixes_applied.len()
                ));
                session.fixes_applied.extend(outcome.fixes_applied.clone());
                session.attempts.push(RecoveryAttempt::new(
                    strategy,
                    vec!["code_fix".to_string()],
                    vec!["code_fix_applier".to_string()],
                    outcome.success,
                    duration,
                    None,
                ));
                outcome.success
            }
            Err(e) => {
                session.log(format!("code fix failed: {}", e));
                session.attempts.push(RecoveryAttempt::new(
                    strategy,
                    vec!["code_fix".to_string()],
                    vec!["code_fix_applier".to_string()],
                    false,
                    duration,
                    Some(e.to_string()),
                ));
                false
            }
        }
    }

    async fn execute_step(&self, handle: &SessionHandle, command: &str, attempt: u32) -> bool {
        handle
            .lock()
            .log(format!("executing retry {}: {}", attempt + 1, command));
        let parts: Vec<String> = command.split_whitespace().map(String::from).collect();

        let started = Instant::now();
        let result = self.executor.execute(&parts).await;
        let duration = started.elapsed().as_secs_f64();

        let mut session = handle.lock();
        let strategy = session.strategy;
        session.commands_retried.push(command.to_string());
        match result {
            Ok(outcome) => {
                if outcome.success {
                    session.log("command retry succeeded");
                } else {
                    session.log(format!(
                        "command retry failed with exit code {}",
                        outcome.exit_code
                    ));
                }
                let error = if outcome.success {
                    None
                } else {
                    Some(outcome.stderr.clone())
                };
                session.attempts.push(RecoveryAttempt::new(
                    strategy,
                    vec![format!("execute: {}", command)],
                    vec!["command_executor".to_string()],
                    outcome.success,
                    duration,
                    error,
                ));
                outcome.success
            }
            Err(e) => {
                session.log(format!("command execution failed: {}", e));
                session.attempts.push(RecoveryAttempt::new(
                    strategy,
                    vec![format!("execute: {}", command)],
                    vec!["command_executor".to_string()],
                    false,
                    duration,
                    Some(e.to_string()),
                ));
                false
            }
        }
    }

    fn record_denied_attempt(&self, handle: &SessionHandle, reason: &str) {
        let mut session = handle.lock();
        let strategy = session.strategy;
        session.attempts.push(RecoveryAttempt::new(
            strategy,
            vec!["confirmation".to_string()],
            vec!["confirmation_gate".to_string()],
            false,
            0.0,
            Some(reason.to_string()),
        ));
    }

    /// Terminal bookkeeping: seal the session, report completion to the
    /// safety manager exactly once, and move it to the bounded history.
    fn finish(
        &self,
        session_id: &str,
        handle: &SessionHandle,
        started: Instant,
    ) -> RecoverySession {
        let total_time = started.elapsed().as_secs_f64();
        let session = {
            let mut session = handle.lock();
            if !session.status.is_terminal() {
                session.status = RecoveryStatus::Failed;
                session.log("workflow ended without a terminal status");
            }
            session.total_time = total_time;
            let status = session.status;
            session.log(format!(
                "recovery finished with status {:?} after {:.2}s",
                status, total_time
            ));
            session.clone()
        };

        let operation = match session.strategy {
            RecoveryStrategy::CodeFixRequired => OperationType::CodeFix,
            RecoveryStrategy::CommandRetry => OperationType::CommandRetry,
            _ => OperationType::Recovery,
        };
        self.safety.register_completion(
            session_id,
            operation,
            session.status == RecoveryStatus::Success,
            total_time,
            session.fixes_applied.len() as u32,
        );
        if session.status == RecoveryStatus::RequiresManual {
            self.safety
                .record_manual_intervention(session_id, &session.analysis.primary_message);
        }

        self.active.lock().remove(session_id);
        let mut completed = self.completed.lock();
        completed.push_back(session.clone());
        if completed.len() > self.config.completed_history_limit {
            completed.pop_front();
        }
        drop(completed);

        tracing::info!(
            session_id,
            status = ?session.status,
            attempts = session.attempts.len(),
            total_time,
            "recovery session finished"
        );
        session
    }

    /// Flags a running session for abort. The workflow observes the flag
    /// before its next attempt and stops cleanly.
    pub fn abort_session(&self, session_id: &str) -> bool {
        let active = self.active.lock();
        match active.get(session_id) {
            Some(handle) => {
                let mut session = handle.lock();
                session.status = RecoveryStatus::Aborted;
                session.log("session aborted by caller");
                tracing::info!(session_id, "recovery session aborted");
                true
            }
            None => false,
        }
    }

    pub fn get_session(&self, session_id: &str) -> Option<RecoverySession> {
        if let Some(handle) = self.active.lock().get(session_id) {
            return Some(handle.lock().clone());
        }
        self.completed
            .lock()
            .iter()
            .find(|s| s.session_id == session_id)
            .cloned()
    }

    pub fn get_active_sessions(&self) -> Vec<RecoverySession> {
        self.active
            .lock()
            .values()
            .map(|handle| handle.lock().clone())
            .collect()
    }

    pub fn get_completed_sessions(&self, limit: usize) -> Vec<RecoverySession> {
        self.completed
            .lock()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get_statistics(&self) -> RecoveryStatistics {
        let completed = self.completed.lock();
        let total = completed.len();
        let successful = completed
            .iter()
            .filter(|s| s.status == RecoveryStatus::Success)
            .count();
        let total_time: f64 = completed.iter().map(|s| s.total_time).sum();

        let mut per_strategy: HashMap<String, StrategyStats> = HashMap::new();
        for session in completed.iter() {
            let entry = per_strategy
                .entry(session.strategy.as_str().to_string())
                .or_insert(StrategyStats {
                    total: 0,
                    successful: 0,
                    success_rate: 0.0,
                });
            entry.total += 1;
            if session.status == RecoveryStatus::Success {
                entry.successful += 1;
            }
        }
        for stats in per_strategy.values_mut() {
            stats.success_rate = stats.successful as f64 / stats.total as f64;
        }
        drop(completed);

        RecoveryStatistics {
            total_sessions: total,
            successful_sessions: successful,
            success_rate: if total > 0 {
                successful as f64 / total as f64
            } else {
                0.0
            },
            average_time_secs: if total > 0 {
                total_time / total as f64
            } else {
                0.0
            },
            active_sessions: self.active.lock().len(),
            per_strategy,
        }
    }
}
