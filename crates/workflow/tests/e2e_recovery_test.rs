use async_trait::async_trait;
use recoup_classify::ErrorClassifier;
use recoup_confirm::ConfirmationGate;
use recoup_core::{
    CodeFixApplier, CollaboratorError, CommandExecutor, ErrorAnalysis, ErrorCategory,
    ErrorContext, ExecutionOutcome, FixOutcome, ResearchOutcome, ResearchProvider,
};
use recoup_safety::{SafetyLimits, SafetyManager};
use recoup_workflow::{
    OrchestratorConfig, RecoveryOrchestrator, RecoveryStatus, RecoveryStrategy,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct MockResearch {
    succeed: bool,
    calls: AtomicUsize,
}

impl MockResearch {
    fn new(succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            succeed,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ResearchProvider for MockResearch {
    async fn research(&self, _query: &str) -> Result<ResearchOutcome, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResearchOutcome {
            success: self.succeed,
            solutions: if self.succeed {
                vec!["install the missing package".to_string()]
            } else {
                Vec::new()
            },
            confidence: if self.succeed { 0.9 } else { 0.0 },
        })
    }
}

struct MockFixer {
    succeed: bool,
    calls: AtomicUsize,
}

impl MockFixer {
    fn new(succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            succeed,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CodeFixApplier for MockFixer {
    async fn apply_fix(
        &self,
        _analysis: &ErrorAnalysis,
        _research: Option<&ResearchOutcome>,
    ) -> Result<FixOutcome, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FixOutcome {
            success: self.succeed,
            fixes_applied: if self.succeed {
                vec!["pip install flask".to_string()]
            } else {
                Vec::new()
            },
            modified_files: Vec::new(),
        })
    }
}

struct MockExecutor {
    succeed: bool,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockExecutor {
    fn new(succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            succeed,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    fn slow(succeed: bool, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            succeed,
            delay,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    async fn execute(
        &self,
        _command_parts: &[String],
    ) -> Result<ExecutionOutcome, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(ExecutionOutcome {
            success: self.succeed,
            stdout: String::new(),
            stderr: if self.succeed {
                String::new()
            } else {
                "still failing".to_string()
            },
            exit_code: if self.succeed { 0 } else { 1 },
        })
    }
}

fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        backoff_base_secs: 0.0,
        ..OrchestratorConfig::default()
    }
}

fn orchestrator(
    limits: SafetyLimits,
    research: Arc<MockResearch>,
    fixer: Arc<MockFixer>,
    executor: Arc<MockExecutor>,
) -> RecoveryOrchestrator {
    RecoveryOrchestrator::new(
        test_config(),
        Arc::new(SafetyManager::new(limits).unwrap()),
        Arc::new(ConfirmationGate::default()),
        research,
        fixer,
        executor,
    )
}

fn classify(command: &str, stderr: &str) -> ErrorAnalysis {
    ErrorClassifier::new().analyze(&ErrorContext::new(command, 1, "", stderr))
}

#[tokio::test]
async fn test_missing_module_recovers_through_code_fix() {
    let analysis = classify(
        "python app.py",
        "ModuleNotFoundError: No module named 'flask'",
    );
    assert_eq!(analysis.category, ErrorCategory::CodeError);
    assert!(analysis.requires_code_fix);

    let research = MockResearch::new(true);
    let fixer = MockFixer::new(true);
    let executor = MockExecutor::new(true);
    let orch = orchestrator(
        SafetyLimits::default(),
        research.clone(),
        fixer.clone(),
        executor,
    );

    let session = orch.initiate_recovery(analysis, None, None).await;

    assert_eq!(session.strategy, RecoveryStrategy::CodeFixRequired);
    assert_eq!(session.status, RecoveryStatus::Success);
    assert_eq!(fixer.calls.load(Ordering::SeqCst), 1);
    assert!(!session.fixes_applied.is_empty());
    assert!(session
        .session_log
        .iter()
        .any(|line| line.contains("recovery finished with status")));
}

#[tokio::test]
async fn test_command_retry_exhaustion_counts_every_attempt() {
    let analysis = classify("invalidcmd", "bash: invalidcmd: command not found");
    assert_eq!(analysis.category, ErrorCategory::CommandSyntax);

    let research = MockResearch::new(true);
    let fixer = MockFixer::new(true);
    let executor = MockExecutor::new(false);
    let orch = orchestrator(
        SafetyLimits::default(),
        research,
        fixer,
        executor.clone(),
    );

    let session = orch.initiate_recovery(analysis, None, None).await;

    assert_eq!(session.strategy, RecoveryStrategy::CommandRetry);
    assert_eq!(session.status, RecoveryStatus::Failed);
    assert_eq!(session.commands_retried.len(), 3);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_disk_full_requires_manual_intervention() {
    let analysis = classify("cp big.iso /mnt", "cp: No space left on device");
    assert_eq!(analysis.category, ErrorCategory::SystemError);

    let research = MockResearch::new(true);
    let fixer = MockFixer::new(true);
    let executor = MockExecutor::new(true);
    let orch = orchestrator(SafetyLimits::default(), research, fixer, executor.clone());

    let session = orch.initiate_recovery(analysis, None, None).await;

    assert_eq!(session.strategy, RecoveryStrategy::ManualIntervention);
    assert_eq!(session.status, RecoveryStatus::RequiresManual);
    assert!(session.manual_intervention_required);
    // No command execution for a manual-intervention session.
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_safety_denial_short_circuits_without_collaborators() {
    let limits = SafetyLimits {
        circuit_breaker_failure_threshold: 1,
        ..SafetyLimits::default()
    };
    let research = MockResearch::new(false);
    let fixer = MockFixer::new(true);
    let executor = MockExecutor::new(true);
    let orch = orchestrator(limits, research.clone(), fixer, executor);

    // Unknown errors with retries disabled go research-only; a failed
    // research run trips the one-strike recovery breaker.
    let mut first = classify("mystery", "something entirely unrecognizable");
    first.requires_command_retry = false;
    let done = orch.initiate_recovery(first, None, None).await;
    assert_eq!(done.status, RecoveryStatus::Failed);
    assert_eq!(research.calls.load(Ordering::SeqCst), 1);

    let mut second = classify("mystery", "something entirely unrecognizable");
    second.requires_command_retry = false;
    let denied = orch.initiate_recovery(second, None, None).await;

    assert_eq!(denied.status, RecoveryStatus::Failed);
    assert!(denied
        .session_log
        .iter()
        .any(|line| line.contains("authorization denied")));
    // The collaborator was never contacted for the denied session.
    assert_eq!(research.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_abort_stops_before_next_attempt() {
    let analysis = classify("invalidcmd", "bash: invalidcmd: command not found");

    let research = MockResearch::new(true);
    let fixer = MockFixer::new(true);
    let executor = MockExecutor::slow(false, Duration::from_millis(100));
    let orch = Arc::new(orchestrator(
        SafetyLimits::default(),
        research,
        fixer,
        executor.clone(),
    ));

    let runner = orch.clone();
    let task = tokio::spawn(async move { runner.initiate_recovery(analysis, None, None).await });

    // Let the first retry start, then abort mid-session.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let active = orch.get_active_sessions();
    assert_eq!(active.len(), 1);
    assert!(orch.abort_session(&active[0].session_id));

    let session = task.await.unwrap();
    assert_eq!(session.status, RecoveryStatus::Aborted);
    assert!(session.commands_retried.len() < 3);
    assert!(session
        .session_log
        .iter()
        .any(|line| line.contains("abort")));

    // Aborted sessions still land in the completed history.
    assert_eq!(orch.get_active_sessions().len(), 0);
    assert_eq!(orch.get_completed_sessions(10).len(), 1);
}

#[tokio::test]
async fn test_retry_cap_comes_from_safety_limits() {
    let analysis = classify("invalidcmd", "bash: invalidcmd: command not found");
    let limits = SafetyLimits {
        max_retries_per_session: 2,
        ..SafetyLimits::default()
    };
    let executor = MockExecutor::new(false);
    let orch = orchestrator(
        limits,
        MockResearch::new(true),
        MockFixer::new(true),
        executor.clone(),
    );

    let session = orch.initiate_recovery(analysis, None, None).await;

    assert_eq!(session.status, RecoveryStatus::Failed);
    assert_eq!(session.commands_retried.len(), 2);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_session_time_budget_comes_from_safety_limits() {
    let analysis = classify("invalidcmd", "bash: invalidcmd: command not found");
    let limits = SafetyLimits {
        max_recovery_time_per_session_secs: 0,
        ..SafetyLimits::default()
    };
    let executor = MockExecutor::slow(false, Duration::from_millis(1100));
    let orch = orchestrator(
        limits,
        MockResearch::new(true),
        MockFixer::new(true),
        executor.clone(),
    );

    let session = orch.initiate_recovery(analysis, None, None).await;

    assert_eq!(session.status, RecoveryStatus::Failed);
    assert!(session
        .session_log
        .iter()
        .any(|line| line.contains("recovery timeout")));
    // The budget check before the second attempt stopped the session.
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_multi_step_without_fix_or_retry_uses_research() {
    let mut analysis = classify("curl https://example.com", "curl: Connection timed out");
    assert_eq!(analysis.category, ErrorCategory::NetworkError);
    analysis.requires_command_retry = false;

    let research = MockResearch::new(true);
    let fixer = MockFixer::new(true);
    let executor = MockExecutor::new(true);
    let orch = orchestrator(SafetyLimits::default(), research, fixer, executor);

    let session = orch.initiate_recovery(analysis, None, None).await;
    assert_eq!(session.strategy, RecoveryStrategy::MultiStepRecovery);
    assert_eq!(session.status, RecoveryStatus::Success);
    assert!(session.research_result.is_some());
}

#[tokio::test]
async fn test_statistics_track_strategy_outcomes() {
    let research = MockResearch::new(true);
    let fixer = MockFixer::new(true);
    let executor = MockExecutor::new(true);
    let orch = orchestrator(
        SafetyLimits::default(),
        research,
        fixer,
        executor,
    );

    let fix_session = classify(
        "python app.py",
        "ModuleNotFoundError: No module named 'flask'",
    );
    orch.initiate_recovery(fix_session, None, None).await;

    let retry_session = classify("invalidcmd", "bash: invalidcmd: command not found");
    orch.initiate_recovery(retry_session, None, None).await;

    let stats = orch.get_statistics();
    assert_eq!(stats.total_sessions, 2);
    assert_eq!(stats.successful_sessions, 2);
    assert_eq!(stats.success_rate, 1.0);
    assert_eq!(stats.active_sessions, 0);
    assert_eq!(stats.per_strategy["code_fix_required"].successful, 1);
    assert_eq!(stats.per_strategy["command_retry"].total, 1);
}
