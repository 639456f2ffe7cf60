//! Claim / status state machine
//!
//! Engines claim APPROVED instances, report progress and finally record a
//! completion, which fires the outgoing template edges its guards match.

use super::materializer::PrepareInstance;
use super::GovernanceActionSequencer;
use crate::action::models::{
    merge_action_targets, ActionTarget, ActionTargetUpdate, GovernanceAction, RequestSource,
};
use crate::action::requests::CompletionReport;
use crate::action::status::GovernanceActionStatus;
use crate::audit::{AuditAction, AuditEntry};
use crate::error::{invalid_parameter, invalid_state, validate_user_id, SequencerError, SequencerResult};
use crate::repository::{Direction, RelationshipKind};
use crate::template::graph::ProcessGraph;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

/// A completed instance and the instances its guards led to
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub action: GovernanceAction,
    pub next_action_guids: Vec<Uuid>,
}

fn unauthorized_caller(user_id: &str, action: &GovernanceAction) -> SequencerError {
    SequencerError::UnauthorizedCaller {
        caller: user_id.to_string(),
        action_guid: action.guid,
        claimant: action.processing_engine_user_id.clone(),
    }
}

impl GovernanceActionSequencer {
    /// Claim an APPROVED instance for the calling engine.
    pub async fn claim_governance_action(&self, user_id: &str, action_guid: Uuid) -> SequencerResult<GovernanceAction> {
        validate_user_id(user_id)?;

        let action = self.load_action(user_id, action_guid).await?;
        let _run_guard = self.lock_action(&action).await;
        let mut action = self.load_action(user_id, action_guid).await?;

        if let Some(claimant) = &action.processing_engine_user_id {
            return Err(invalid_state(format!(
                "Governance action {} is already claimed by {}",
                action_guid, claimant
            )));
        }
        if action.status != GovernanceActionStatus::Approved {
            return Err(invalid_state(format!(
                "Governance action {} is {} and cannot be claimed",
                action_guid, action.status
            )));
        }

        action.processing_engine_user_id = Some(user_id.to_string());
        action.claimed_time = Some(Utc::now());
        action.status = GovernanceActionStatus::Waiting;
        let action = self.store_action(user_id, &action).await?;

        info!("Governance action {} claimed by {}", action_guid, user_id);
        self.record(AuditEntry::new(user_id, AuditAction::ActionClaimed, action_guid))
            .await;
        Ok(action)
    }

    /// Move an instance through the non-terminal states.
    ///
    /// An unclaimed instance may be approved by anyone; every other change is
    /// reserved for the claimant.
    pub async fn update_governance_action_status(
        &self,
        user_id: &str,
        action_guid: Uuid,
        status: GovernanceActionStatus,
    ) -> SequencerResult<GovernanceAction> {
        validate_user_id(user_id)?;

        let action = self.load_action(user_id, action_guid).await?;
        let _run_guard = self.lock_action(&action).await;
        let mut action = self.load_action(user_id, action_guid).await?;

        let authorized = match action.processing_engine_user_id.as_deref() {
            None => status == GovernanceActionStatus::Approved,
            Some(claimant) => claimant == user_id,
        };
        if !authorized {
            return Err(unauthorized_caller(user_id, &action));
        }

        if status.is_terminal() {
            return Err(invalid_state(format!(
                "Governance action {} can only reach {} by recording its completion",
                action_guid, status
            )));
        }
        if !action.status.can_transition_to(status) {
            return Err(invalid_state(format!(
                "Governance action {} cannot move from {} to {}",
                action_guid, action.status, status
            )));
        }

        let previous = action.status;
        action.status = status;
        let action = self.store_action(user_id, &action).await?;

        info!("Governance action {} moved from {} to {}", action_guid, previous, status);
        self.record(
            AuditEntry::new(user_id, AuditAction::ActionStatusUpdated, action_guid)
                .with_details(json!({ "from": previous, "to": status })),
        )
        .await;
        Ok(action)
    }

    /// Record the outcome of a claimed instance and fire the outgoing edges
    /// its output guards match.
    pub async fn record_completion(
        &self,
        user_id: &str,
        action_guid: Uuid,
        report: CompletionReport,
    ) -> SequencerResult<CompletionOutcome> {
        validate_user_id(user_id)?;
        report.validate()?;

        let action = self.complete_action(user_id, action_guid, &report).await?;
        let next_action_guids = self.fire_next_actions(user_id, &action, &report).await?;

        Ok(CompletionOutcome {
            action,
            next_action_guids,
        })
    }

    /// Status change and target stamping, under the instance's run lock
    async fn complete_action(
        &self,
        user_id: &str,
        action_guid: Uuid,
        report: &CompletionReport,
    ) -> SequencerResult<GovernanceAction> {
        let action = self.load_action(user_id, action_guid).await?;
        let _run_guard = self.lock_action(&action).await;
        let mut action = self.load_action(user_id, action_guid).await?;

        if action.processing_engine_user_id.as_deref() != Some(user_id) {
            return Err(unauthorized_caller(user_id, &action));
        }
        if action.status.is_terminal() {
            return Err(invalid_state(format!(
                "Governance action {} has already completed as {}",
                action_guid, action.status
            )));
        }
        if !report.status.is_terminal() {
            return Err(invalid_parameter(format!(
                "Completion status must be terminal, got {}",
                report.status
            )));
        }

        let now = Utc::now();
        action.status = report.status;
        action.completion_time = Some(now);
        action.completion_guards = report.output_guards.clone();
        action.completion_message = report.completion_message.clone();
        let action = self.store_action(user_id, &action).await?;

        let targets = self
            .repo()
            .get_relationships(user_id, action_guid, RelationshipKind::TargetForAction, Direction::Outgoing)
            .await?;
        for relationship in &targets {
            let mut target = ActionTarget::from_relationship(relationship)?;
            if target.status.is_some() {
                continue;
            }
            target.status = Some(report.status);
            target.start_time.get_or_insert(action.claimed_time.unwrap_or(action.start_time));
            target.completion_time = Some(now);
            target.completion_message = report.completion_message.clone();
            self.repo()
                .update_relationship_properties(
                    user_id,
                    relationship.guid,
                    RelationshipKind::TargetForAction,
                    target.to_properties()?,
                    false,
                )
                .await?;
        }

        info!(
            "Governance action {} completed as {} with guards {:?}",
            action_guid, action.status, action.completion_guards
        );
        self.record(
            AuditEntry::new(user_id, AuditAction::ActionCompleted, action_guid).with_details(json!({
                "status": action.status,
                "outputGuards": action.completion_guards,
            })),
        )
        .await;

        Ok(action)
    }

    /// Run the resolver once per outgoing edge that fires. The first failure
    /// is returned; earlier firings stay in place.
    async fn fire_next_actions(
        &self,
        user_id: &str,
        action: &GovernanceAction,
        report: &CompletionReport,
    ) -> SequencerResult<Vec<Uuid>> {
        let graph =
            ProcessGraph::load_from_type(self.repo(), user_id, action.governance_action_type_guid).await?;
        let triggered = graph.triggered_edges(graph.root(), &report.output_guards);
        if triggered.is_empty() {
            debug!("No next actions fire for {} with {:?}", action.guid, report.output_guards);
            return Ok(Vec::new());
        }

        let request_sources: Vec<_> = self
            .repo()
            .get_relationships(
                user_id,
                action.guid,
                RelationshipKind::GovernanceActionRequestSource,
                Direction::Outgoing,
            )
            .await?
            .iter()
            .map(|r| RequestSource::from_relationship(r).map(|s| s.as_new()))
            .collect::<SequencerResult<_>>()?;

        let existing_targets: Vec<_> = self
            .repo()
            .get_relationships(user_id, action.guid, RelationshipKind::TargetForAction, Direction::Outgoing)
            .await?
            .iter()
            .map(|r| ActionTarget::from_relationship(r).map(|t| t.as_new()))
            .collect::<SequencerResult<_>>()?;
        let action_targets = merge_action_targets(existing_targets, report.new_action_targets.iter().cloned());

        let originator = action.originator();
        let anchor_guid = action.anchor_guid.unwrap_or(action.guid);

        let mut next_action_guids = Vec::new();
        for triggered_edge in triggered {
            let next = self
                .prepare_instance(
                    user_id,
                    PrepareInstance {
                        graph: &graph,
                        node: triggered_edge.target,
                        anchor_guid: Some(anchor_guid),
                        guard: triggered_edge.edge.guard.clone(),
                        mandatory_guard: triggered_edge.edge.mandatory_guard,
                        start_time: None,
                        previous_action_guid: Some(action.guid),
                        request_parameters: &report.request_parameters,
                        request_sources: &request_sources,
                        action_targets: &action_targets,
                        process_name: action.process_name.as_deref(),
                        originator: &originator,
                    },
                )
                .await?;

            if let Some(guid) = next {
                if !next_action_guids.contains(&guid) {
                    next_action_guids.push(guid);
                }
            }
        }

        Ok(next_action_guids)
    }

    /// Record an explicit status on one action target. Completion stamping
    /// leaves targets with a status alone.
    pub async fn update_action_target_status(
        &self,
        user_id: &str,
        action_target_guid: Uuid,
        update: ActionTargetUpdate,
    ) -> SequencerResult<ActionTarget> {
        validate_user_id(user_id)?;

        let relationship = self
            .repo()
            .get_relationship(user_id, action_target_guid, RelationshipKind::TargetForAction)
            .await?;
        let action = self.load_action(user_id, relationship.end1).await?;
        if action.processing_engine_user_id.as_deref() != Some(user_id) {
            return Err(unauthorized_caller(user_id, &action));
        }

        let mut target = ActionTarget::from_relationship(&relationship)?;
        target.status = Some(update.status);
        target.start_time = update.start_time.or(target.start_time);
        target.completion_time = update.completion_time.or(target.completion_time);
        target.completion_message = update.completion_message.or(target.completion_message);

        let updated = self
            .repo()
            .update_relationship_properties(
                user_id,
                action_target_guid,
                RelationshipKind::TargetForAction,
                target.to_properties()?,
                false,
            )
            .await?;

        debug!(
            "Action target {} of {} set to {}",
            target.action_target_name, action.guid, update.status
        );
        self.record(
            AuditEntry::new(user_id, AuditAction::ActionTargetUpdated, action_target_guid)
                .with_details(json!({ "actionGuid": action.guid, "status": update.status })),
        )
        .await;

        ActionTarget::from_relationship(&updated)
    }
}
