//! Audit Log
//!
//! Fire-and-forget record of every governance action lifecycle step.
//! Logging never affects control flow: implementations swallow their own
//! failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub details: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(user_id: &str, action: AuditAction, resource_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            action,
            resource_type: action.resource_type().to_string(),
            resource_id: Some(resource_id),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // Template actions
    ProcessTemplateRegistered,

    // Initiation
    ProcessInitiated,
    ActionTypeInitiated,

    // Instance lifecycle
    ActionCreated,
    ActionReused,
    ActionSkipped,
    ActionRolledBack,
    GuardDelivered,
    ActionApproved,
    ActionClaimed,
    ActionStatusUpdated,
    ActionCompleted,

    // Action targets
    ActionTargetUpdated,
}

impl AuditAction {
    pub fn resource_type(&self) -> &'static str {
        match self {
            AuditAction::ProcessTemplateRegistered | AuditAction::ProcessInitiated => {
                "governance_action_process"
            }
            AuditAction::ActionTargetUpdated => "action_target",
            _ => "governance_action",
        }
    }
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn log(&self, entry: AuditEntry);
}

// =============================================================================
// IMPLEMENTATIONS
// =============================================================================

/// Writes audit entries to the `governance_audit` tracing target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn log(&self, entry: AuditEntry) {
        info!(
            target: "governance_audit",
            user_id = %entry.user_id,
            action = ?entry.action,
            resource_type = %entry.resource_type,
            resource_id = ?entry.resource_id,
            details = ?entry.details,
            "audit"
        );
    }
}

/// Keeps audit entries in memory so they can be queried back
pub struct MemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Get audit log entries, most recent first
    pub async fn entries(&self, resource_id: Option<Uuid>, limit: usize) -> Vec<AuditEntry> {
        let log = self.entries.read().await;

        log.iter()
            .rev()
            .filter(|e| resource_id.map(|id| e.resource_id == Some(id)).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Count entries of one action, optionally for one resource
    pub async fn count(&self, action: AuditAction, resource_id: Option<Uuid>) -> usize {
        let log = self.entries.read().await;
        log.iter()
            .filter(|e| e.action == action)
            .filter(|e| resource_id.map(|id| e.resource_id == Some(id)).unwrap_or(true))
            .count()
    }
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn log(&self, entry: AuditEntry) {
        let mut log = self.entries.write().await;
        log.push(entry);
    }
}
