//! Read access to governance actions and their relationships

use super::GovernanceActionSequencer;
use crate::action::models::{ActionTarget, GovernanceAction, RequestSource};
use crate::action::status::GovernanceActionStatus;
use crate::error::{validate_user_id, SequencerResult};
use crate::repository::{find_visible_entities, Direction, EntityKind, Properties, RelationshipKind};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

impl GovernanceActionSequencer {
    pub async fn get_governance_action(&self, user_id: &str, action_guid: Uuid) -> SequencerResult<GovernanceAction> {
        validate_user_id(user_id)?;
        self.load_action(user_id, action_guid).await
    }

    pub async fn get_action_targets(&self, user_id: &str, action_guid: Uuid) -> SequencerResult<Vec<ActionTarget>> {
        validate_user_id(user_id)?;
        self.repo()
            .get_relationships(user_id, action_guid, RelationshipKind::TargetForAction, Direction::Outgoing)
            .await?
            .iter()
            .map(ActionTarget::from_relationship)
            .collect()
    }

    pub async fn get_request_sources(&self, user_id: &str, action_guid: Uuid) -> SequencerResult<Vec<RequestSource>> {
        validate_user_id(user_id)?;
        self.repo()
            .get_relationships(
                user_id,
                action_guid,
                RelationshipKind::GovernanceActionRequestSource,
                Direction::Outgoing,
            )
            .await?
            .iter()
            .map(RequestSource::from_relationship)
            .collect()
    }

    /// Every instance of one run, in creation order
    pub async fn get_run_actions(&self, user_id: &str, anchor_guid: Uuid) -> SequencerResult<Vec<GovernanceAction>> {
        validate_user_id(user_id)?;

        let mut match_properties = Properties::new();
        match_properties.insert("anchorGuid".to_string(), json!(anchor_guid));
        self.find_actions(user_id, &match_properties).await
    }

    /// APPROVED, unclaimed instances of one engine whose start time has passed
    pub async fn find_claimable_actions(&self, user_id: &str, engine_name: &str) -> SequencerResult<Vec<GovernanceAction>> {
        validate_user_id(user_id)?;

        let mut match_properties = Properties::new();
        match_properties.insert("status".to_string(), json!(GovernanceActionStatus::Approved));
        match_properties.insert("governanceEngineName".to_string(), json!(engine_name));

        let now = Utc::now();
        Ok(self
            .find_actions(user_id, &match_properties)
            .await?
            .into_iter()
            .filter(|a| a.processing_engine_user_id.is_none() && a.start_time <= now)
            .collect())
    }

    async fn find_actions(&self, user_id: &str, match_properties: &Properties) -> SequencerResult<Vec<GovernanceAction>> {
        find_visible_entities(
            self.repo(),
            user_id,
            EntityKind::GovernanceAction,
            match_properties,
            self.config.search_page_size,
        )
        .await?
        .iter()
        .map(GovernanceAction::from_entity)
        .collect()
    }
}
