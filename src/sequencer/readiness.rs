//! Readiness Check
//!
//! Mandatory-guard join: an instance leaves REQUESTED once every mandatory
//! guard has been delivered to it.

use super::GovernanceActionSequencer;
use crate::action::models::{GovernanceAction, NextActionLink};
use crate::action::status::GovernanceActionStatus;
use crate::audit::{AuditAction, AuditEntry};
use crate::error::SequencerResult;
use crate::repository::{Direction, RelationshipKind};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

impl GovernanceActionSequencer {
    /// Collect delivered guards and approve the instance if its join is
    /// complete. Instances past REQUESTED are returned untouched.
    pub(crate) async fn attempt_start(&self, user_id: &str, action_guid: Uuid) -> SequencerResult<GovernanceAction> {
        let mut action = self.load_action(user_id, action_guid).await?;
        if action.status != GovernanceActionStatus::Requested {
            debug!("Governance action {} is already {}", action_guid, action.status);
            return Ok(action);
        }

        let links = self
            .repo()
            .get_relationships(
                user_id,
                action_guid,
                RelationshipKind::NextGovernanceAction,
                Direction::Incoming,
            )
            .await?;

        let mut changed = false;
        for relationship in &links {
            let link = NextActionLink::from_relationship(relationship)?;
            if link.is_self_loop() {
                continue;
            }
            if let Some(guard) = link.guard {
                if !action.received_guards.contains(&guard) {
                    action.received_guards.push(guard);
                    changed = true;
                }
            }
        }

        let ready = action.guards_satisfied();
        if ready {
            action.status = GovernanceActionStatus::Approved;
            changed = true;
        } else {
            debug!(
                "Governance action {} is waiting for guards {:?}",
                action_guid,
                action.missing_guards()
            );
        }

        if !changed {
            return Ok(action);
        }

        let action = self.store_action(user_id, &action).await?;
        if ready {
            info!("Approved governance action {} ({})", action.qualified_name, action.guid);
            self.record(
                AuditEntry::new(user_id, AuditAction::ActionApproved, action.guid)
                    .with_details(json!({ "receivedGuards": action.received_guards })),
            )
            .await;
        }

        Ok(action)
    }
}
