pub mod audit;
pub mod breaker;
pub mod limits;
pub mod manager;
pub mod monitor;

pub use audit::{AuditEvent, AuditEventType, AuditLog, AuditLogError, DEFAULT_AUDIT_PATH};
pub use breaker::{BreakerState, CircuitBreaker};
pub use limits::{LimitsError, ResourceUsage, SafetyLimits};
pub use manager::{
    Authorization, CompletionRecord, OperationType, SafetyLevel, SafetyManager, SafetyStatus,
};
pub use monitor::ResourceMonitor;
