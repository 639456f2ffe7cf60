//! Governance Action Sequencer
//!
//! Materializes and drives the governance action instances of a process run:
//!
//! - `initiator`: starts a run from a process or a single action type
//! - `materializer`: resolves the next action, selects or creates its instance
//! - `readiness`: applies the mandatory-guard join and approves instances
//! - `lifecycle`: claim, status updates, completion and fan-out
//! - `queries`: read access to instances and their relationships

pub mod initiator;
pub mod lifecycle;
pub mod locks;
pub mod materializer;
pub mod queries;
pub mod readiness;

#[cfg(test)]
mod tests;

pub use lifecycle::CompletionOutcome;
pub use locks::{RunGuard, RunLocks};

use crate::action::models::GovernanceAction;
use crate::audit::{AuditEntry, AuditLog};
use crate::config::SequencerConfig;
use crate::error::SequencerResult;
use crate::repository::{EntityKind, MetadataRepository};
use std::sync::Arc;
use uuid::Uuid;

/// Sequencer service.
///
/// Holds no run state of its own: every instance, guard and relationship
/// lives in the metadata repository.
pub struct GovernanceActionSequencer {
    repository: Arc<dyn MetadataRepository>,
    audit: Arc<dyn AuditLog>,
    config: SequencerConfig,
    run_locks: RunLocks,
}

impl GovernanceActionSequencer {
    pub fn new(
        repository: Arc<dyn MetadataRepository>,
        audit: Arc<dyn AuditLog>,
        config: SequencerConfig,
    ) -> Self {
        Self {
            repository,
            audit,
            config,
            run_locks: RunLocks::new(),
        }
    }

    pub fn repository(&self) -> &Arc<dyn MetadataRepository> {
        &self.repository
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    pub(crate) fn repo(&self) -> &dyn MetadataRepository {
        self.repository.as_ref()
    }

    pub(crate) async fn record(&self, entry: AuditEntry) {
        self.audit.log(entry).await;
    }

    pub(crate) async fn load_action(&self, user_id: &str, action_guid: Uuid) -> SequencerResult<GovernanceAction> {
        let entity = self
            .repository
            .get_entity(user_id, action_guid, EntityKind::GovernanceAction)
            .await?;
        GovernanceAction::from_entity(&entity)
    }

    /// Replace the stored properties of an instance with `action`
    pub(crate) async fn store_action(&self, user_id: &str, action: &GovernanceAction) -> SequencerResult<GovernanceAction> {
        let entity = self
            .repository
            .update_entity_properties(
                user_id,
                action.guid,
                EntityKind::GovernanceAction,
                action.to_properties()?,
                false,
            )
            .await?;
        GovernanceAction::from_entity(&entity)
    }

    /// Lock the (run, action type) pair an instance belongs to
    pub(crate) async fn lock_action(&self, action: &GovernanceAction) -> RunGuard<'_> {
        self.run_locks
            .lock(
                action.anchor_guid.unwrap_or(action.guid),
                action.governance_action_type_guid,
            )
            .await
    }
}
