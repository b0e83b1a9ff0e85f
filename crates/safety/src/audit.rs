use crate::limits::ResourceUsage;
use chrono::Utc;
use parking_lot::Mutex;
use recoup_core::{next_id, RiskLevel};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_AUDIT_PATH: &str = "recovery_audit.jsonl";

#[derive(Error, Debug)]
pub enum AuditLogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    RecoveryStarted,
    RecoveryCompleted,
    RecoveryFailed,
    SafetyLimitHit,
    CircuitBreakerOpened,
    RiskyOperationBlocked,
    ResourceLimitExceeded,
    ManualInterventionRequired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub event_type: AuditEventType,
    pub timestamp: String,
    pub session_id: Option<String>,
    pub risk_level: Option<RiskLevel>,
    pub details: serde_json::Value,
    pub resource_usage: Option<ResourceUsage>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, details: serde_json::Value) -> Self {
        Self {
            event_id: next_id("audit"),
            event_type,
            timestamp: Utc::now().to_rfc3339(),
            session_id: None,
            risk_level: None,
            details,
            resource_usage: None,
        }
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn with_risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = Some(risk_level);
        self
    }

    pub fn with_usage(mut self, usage: ResourceUsage) -> Self {
        self.resource_usage = Some(usage);
        self
    }
}

/// Append-only JSONL audit trail, one event per line, synced on every write.
pub struct AuditLog {
    #[allow(dead_code)]
    log_path: PathBuf,
    file: Mutex<File>,
}

impl AuditLog {
    pub fn new<P: AsRef<Path>>(log_path: P) -> Result<Self, AuditLogError> {
        let log_path = log_path.as_ref().to_path_buf();

        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            log_path,
            file: Mutex::new(file),
        })
    }

    pub fn record(&self, event: &AuditEvent) -> Result<(), AuditLogError> {
        let json = serde_json::to_string(event)?;
        let mut file = self.file.lock();
        writeln!(file, "{}", json)?;
        file.sync_all()?;
        Ok(())
    }
}
