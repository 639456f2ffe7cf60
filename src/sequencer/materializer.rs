//! Next-Action Resolver and Instance Selector
//!
//! Turns one template node into a concrete governance action instance for a
//! run: reuses the pending instance a join is accumulating guards on, or
//! creates a new one and links it to its sources, targets and predecessor.

use super::GovernanceActionSequencer;
use crate::action::models::{
    merge_request_parameters, ActionTarget, GovernanceAction, NewActionTarget, NewRequestSource,
    NextActionLink, Originator, RequestParameters, RequestSource,
};
use crate::action::status::GovernanceActionStatus;
use crate::audit::{AuditAction, AuditEntry};
use crate::error::{SequencerError, SequencerResult};
use crate::repository::{encode_properties, find_visible_entities, EntityKind, Properties, RelationshipKind};
use crate::template::graph::{ActionTypeNode, Executor, ProcessGraph};
use chrono::{DateTime, Duration, Utc};
use petgraph::graph::NodeIndex;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything needed to materialize one template node for a run
pub(crate) struct PrepareInstance<'a> {
    pub graph: &'a ProcessGraph,
    pub node: NodeIndex,
    /// `None` starts a new run
    pub anchor_guid: Option<Uuid>,
    pub guard: Option<String>,
    pub mandatory_guard: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub previous_action_guid: Option<Uuid>,
    pub request_parameters: &'a RequestParameters,
    pub request_sources: &'a [NewRequestSource],
    pub action_targets: &'a [NewActionTarget],
    pub process_name: Option<&'a str>,
    pub originator: &'a Originator,
}

/// Outcome of the instance selector
#[derive(Debug)]
pub(crate) enum Selection {
    /// `ignoreMultipleTriggers` and the run's instance has already started
    Skip,
    /// The run's pending instance accumulates this delivery
    Reuse(GovernanceAction),
    Create,
}

impl GovernanceActionSequencer {
    /// Materialize `request.node` and attempt to start it.
    ///
    /// Returns `None` when the node ignores repeated triggers and the run's
    /// instance of it is no longer REQUESTED.
    pub(crate) async fn prepare_instance(
        &self,
        user_id: &str,
        request: PrepareInstance<'_>,
    ) -> SequencerResult<Option<Uuid>> {
        let node = request.graph.node(request.node);
        let executor = node
            .executor
            .as_ref()
            .ok_or_else(|| SequencerError::NoExecutor(node.qualified_name().to_string()))?;

        let start_time = request
            .start_time
            .unwrap_or_else(|| Utc::now() + Duration::minutes(i64::from(node.properties.wait_time)));
        let mandatory_guards = request.graph.mandatory_guards(request.node);

        let _run_guard = match request.anchor_guid {
            Some(anchor_guid) => Some(self.run_locks.lock(anchor_guid, node.guid).await),
            None => None,
        };

        let selection = self
            .select_instance(
                user_id,
                request.process_name,
                request.anchor_guid,
                node.guid,
                node.properties.ignore_multiple_triggers,
            )
            .await?;

        let (action_guid, created) = match selection {
            Selection::Skip => {
                debug!(
                    "Ignoring repeated trigger of {} in run {:?}",
                    node.qualified_name(),
                    request.anchor_guid
                );
                self.record(
                    AuditEntry::new(user_id, AuditAction::ActionSkipped, request.previous_action_guid.unwrap_or(node.guid))
                        .with_details(json!({
                            "actionType": node.qualified_name(),
                            "anchorGuid": request.anchor_guid,
                            "guard": request.guard,
                        })),
                )
                .await;
                return Ok(None);
            }
            Selection::Reuse(existing) => {
                debug!("Reusing pending {} for {}", existing.guid, node.qualified_name());
                self.record(AuditEntry::new(user_id, AuditAction::ActionReused, existing.guid))
                    .await;
                (existing.guid, false)
            }
            Selection::Create => {
                let action = self
                    .create_instance(user_id, &request, node, executor, start_time, mandatory_guards)
                    .await?;
                (action.guid, true)
            }
        };

        if let Some(previous_guid) = request.previous_action_guid {
            if let Err(e) = self
                .link_previous(user_id, previous_guid, action_guid, &request)
                .await
            {
                if created {
                    self.roll_back(user_id, action_guid, &e).await;
                }
                return Err(e);
            }
        }

        self.attempt_start(user_id, action_guid).await?;
        Ok(Some(action_guid))
    }

    /// Find the instance a delivery belongs to within one run
    pub(crate) async fn select_instance(
        &self,
        user_id: &str,
        process_name: Option<&str>,
        anchor_guid: Option<Uuid>,
        action_type_guid: Uuid,
        ignore_multiple_triggers: bool,
    ) -> SequencerResult<Selection> {
        let Some(anchor_guid) = anchor_guid else {
            return Ok(Selection::Create);
        };

        let mut match_properties = Properties::new();
        match_properties.insert("anchorGuid".to_string(), json!(anchor_guid));
        match_properties.insert("governanceActionTypeGuid".to_string(), json!(action_type_guid));
        if let Some(process_name) = process_name {
            match_properties.insert("processName".to_string(), json!(process_name));
        }

        let candidates = find_visible_entities(
            self.repo(),
            user_id,
            EntityKind::GovernanceAction,
            &match_properties,
            self.config.search_page_size,
        )
        .await?;

        let mut pending = Vec::new();
        for entity in &candidates {
            let action = GovernanceAction::from_entity(entity)?;
            if action.status == GovernanceActionStatus::Requested {
                pending.push(action);
            }
        }

        // A pending instance still collects guards even when repeats are ignored
        if ignore_multiple_triggers && pending.is_empty() && !candidates.is_empty() {
            return Ok(Selection::Skip);
        }

        match pending.len() {
            0 => Ok(Selection::Create),
            1 => Ok(Selection::Reuse(pending.remove(0))),
            count => Err(SequencerError::AmbiguousPendingAction {
                action_type_guid,
                anchor_guid,
                count,
            }),
        }
    }

    async fn create_instance(
        &self,
        user_id: &str,
        request: &PrepareInstance<'_>,
        node: &ActionTypeNode,
        executor: &Executor,
        start_time: DateTime<Utc>,
        mandatory_guards: Vec<String>,
    ) -> SequencerResult<GovernanceAction> {
        // A run's first instance is seeded with the entry guard; later
        // instances receive guards through their provenance links.
        let received_guards = match request.previous_action_guid {
            None => request.guard.iter().cloned().collect(),
            Some(_) => Vec::new(),
        };

        let mut action = GovernanceAction {
            guid: Uuid::nil(),
            qualified_name: format!(
                "{}{}{}",
                node.qualified_name(),
                self.config.qualified_name_separator,
                Uuid::new_v4()
            ),
            domain_identifier: node.properties.domain_identifier,
            display_name: node.properties.display_name.clone(),
            description: node.properties.description.clone(),
            status: GovernanceActionStatus::Requested,
            governance_engine_name: executor.engine_name.clone(),
            request_type: executor.request_type.clone(),
            request_parameters: merge_request_parameters(&executor.request_parameters, request.request_parameters),
            mandatory_guards,
            received_guards,
            completion_guards: Vec::new(),
            completion_message: None,
            requested_time: Utc::now(),
            start_time,
            claimed_time: None,
            completion_time: None,
            anchor_guid: request.anchor_guid,
            governance_action_type_guid: node.guid,
            process_name: request.process_name.map(str::to_string),
            originator_service_name: request.originator.service_name.clone(),
            originator_engine_name: request.originator.engine_name.clone(),
            processing_engine_user_id: None,
        };

        action.guid = self
            .repo()
            .create_entity(user_id, EntityKind::GovernanceAction, action.to_properties()?)
            .await?;

        if let Err(e) = self.link_new_instance(user_id, &mut action, request).await {
            self.roll_back(user_id, action.guid, &e).await;
            return Err(e);
        }

        info!(
            "Created governance action {} ({}) for run {:?}",
            action.qualified_name, action.guid, action.anchor_guid
        );
        self.record(
            AuditEntry::new(user_id, AuditAction::ActionCreated, action.guid).with_details(json!({
                "qualifiedName": action.qualified_name,
                "anchorGuid": action.anchor_guid,
                "mandatoryGuards": action.mandatory_guards,
            })),
        )
        .await;

        Ok(action)
    }

    /// Anchor, request sources and action targets of a new instance
    async fn link_new_instance(
        &self,
        user_id: &str,
        action: &mut GovernanceAction,
        request: &PrepareInstance<'_>,
    ) -> SequencerResult<()> {
        if action.anchor_guid.is_none() {
            action.anchor_guid = Some(action.guid);
            *action = self.store_action(user_id, action).await?;
        }

        for source in request.request_sources {
            let properties = encode_properties(&RequestSource {
                relationship_guid: Uuid::nil(),
                action_guid: action.guid,
                source_guid: source.source_guid,
                origin_name: source.origin_name.clone(),
            })?;
            self.repo()
                .create_relationship(
                    user_id,
                    RelationshipKind::GovernanceActionRequestSource,
                    action.guid,
                    source.source_guid,
                    properties,
                )
                .await?;
        }

        for target in request.action_targets {
            let properties = ActionTarget {
                relationship_guid: Uuid::nil(),
                action_guid: action.guid,
                target_guid: target.action_target_guid,
                action_target_name: target.action_target_name.clone(),
                status: None,
                start_time: None,
                completion_time: None,
                completion_message: None,
            }
            .to_properties()?;
            self.repo()
                .create_relationship(
                    user_id,
                    RelationshipKind::TargetForAction,
                    action.guid,
                    target.action_target_guid,
                    properties,
                )
                .await?;
        }

        Ok(())
    }

    /// Record which instance delivered which guard
    async fn link_previous(
        &self,
        user_id: &str,
        previous_guid: Uuid,
        action_guid: Uuid,
        request: &PrepareInstance<'_>,
    ) -> SequencerResult<()> {
        let properties = encode_properties(&NextActionLink {
            relationship_guid: Uuid::nil(),
            previous_action_guid: previous_guid,
            next_action_guid: action_guid,
            guard: request.guard.clone(),
            mandatory_guard: request.mandatory_guard,
        })?;

        self.repo()
            .create_relationship(
                user_id,
                RelationshipKind::NextGovernanceAction,
                previous_guid,
                action_guid,
                properties,
            )
            .await?;

        debug!("Delivered guard {:?} from {} to {}", request.guard, previous_guid, action_guid);
        self.record(
            AuditEntry::new(user_id, AuditAction::GuardDelivered, action_guid).with_details(json!({
                "previousActionGuid": previous_guid,
                "guard": request.guard,
                "mandatoryGuard": request.mandatory_guard,
            })),
        )
        .await;
        Ok(())
    }

    /// Delete a half-linked instance. The original failure is what the caller
    /// sees, so a failed delete is only logged.
    async fn roll_back(&self, user_id: &str, action_guid: Uuid, cause: &SequencerError) {
        warn!("Rolling back governance action {} after: {}", action_guid, cause);

        if let Err(e) = self
            .repo()
            .delete_entity(user_id, action_guid, EntityKind::GovernanceAction)
            .await
        {
            warn!("Could not delete governance action {}: {}", action_guid, e);
        }

        self.record(
            AuditEntry::new(user_id, AuditAction::ActionRolledBack, action_guid)
                .with_details(json!({ "cause": cause.to_string() })),
        )
        .await;
    }
}
