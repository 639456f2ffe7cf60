//! Governance action data models
//!
//! Typed views over the entity and relationship property bags stored in the
//! metadata repository.

use crate::action::status::GovernanceActionStatus;
use crate::error::SequencerResult;
use crate::repository::{encode_properties, EntityDetail, Properties, Relationship};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Request parameters passed to a governance engine
pub type RequestParameters = BTreeMap<String, String>;

// =============================================================================
// GOVERNANCE ACTION
// =============================================================================

/// One executable step of a governance action process run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceAction {
    #[serde(skip)]
    pub guid: Uuid,
    /// `<action type qualified name><separator><token>`
    pub qualified_name: String,
    pub domain_identifier: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub status: GovernanceActionStatus,

    /// Executor
    pub governance_engine_name: String,
    pub request_type: String,
    #[serde(default)]
    pub request_parameters: RequestParameters,

    /// Guard join
    #[serde(default)]
    pub mandatory_guards: Vec<String>,
    #[serde(default)]
    pub received_guards: Vec<String>,

    /// Completion
    #[serde(default)]
    pub completion_guards: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_message: Option<String>,

    /// Timestamps
    pub requested_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    /// Run membership
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_guid: Option<Uuid>,
    pub governance_action_type_guid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,

    /// Originator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub originator_service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub originator_engine_name: Option<String>,

    /// Claimant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_engine_user_id: Option<String>,
}

impl GovernanceAction {
    pub fn from_entity(entity: &EntityDetail) -> SequencerResult<Self> {
        let mut action: GovernanceAction = entity.decode()?;
        action.guid = entity.guid;
        Ok(action)
    }

    pub fn to_properties(&self) -> SequencerResult<Properties> {
        encode_properties(self)
    }

    pub fn originator(&self) -> Originator {
        Originator {
            service_name: self.originator_service_name.clone(),
            engine_name: self.originator_engine_name.clone(),
        }
    }

    /// True when every mandatory guard has been received
    pub fn guards_satisfied(&self) -> bool {
        self.mandatory_guards
            .iter()
            .all(|g| self.received_guards.contains(g))
    }

    pub fn missing_guards(&self) -> Vec<&str> {
        self.mandatory_guards
            .iter()
            .filter(|g| !self.received_guards.contains(g))
            .map(String::as_str)
            .collect()
    }
}

/// Names of the services that started a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Originator {
    pub service_name: Option<String>,
    pub engine_name: Option<String>,
}

// =============================================================================
// RELATIONSHIP VIEWS
// =============================================================================

/// An element a governance action operates on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionTarget {
    #[serde(skip)]
    pub relationship_guid: Uuid,
    #[serde(skip)]
    pub action_guid: Uuid,
    #[serde(skip)]
    pub target_guid: Uuid,
    pub action_target_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<GovernanceActionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_message: Option<String>,
}

impl ActionTarget {
    pub fn from_relationship(relationship: &Relationship) -> SequencerResult<Self> {
        let mut target: ActionTarget = relationship.decode()?;
        target.relationship_guid = relationship.guid;
        target.action_guid = relationship.end1;
        target.target_guid = relationship.end2;
        Ok(target)
    }

    pub fn to_properties(&self) -> SequencerResult<Properties> {
        encode_properties(self)
    }

    pub fn as_new(&self) -> NewActionTarget {
        NewActionTarget {
            action_target_name: self.action_target_name.clone(),
            action_target_guid: self.target_guid,
        }
    }
}

/// The element that caused a governance action to be requested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSource {
    #[serde(skip)]
    pub relationship_guid: Uuid,
    #[serde(skip)]
    pub action_guid: Uuid,
    #[serde(skip)]
    pub source_guid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_name: Option<String>,
}

impl RequestSource {
    pub fn from_relationship(relationship: &Relationship) -> SequencerResult<Self> {
        let mut source: RequestSource = relationship.decode()?;
        source.relationship_guid = relationship.guid;
        source.action_guid = relationship.end1;
        source.source_guid = relationship.end2;
        Ok(source)
    }

    pub fn as_new(&self) -> NewRequestSource {
        NewRequestSource {
            source_guid: self.source_guid,
            origin_name: self.origin_name.clone(),
        }
    }
}

/// Provenance of one guard delivery between two governance actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextActionLink {
    #[serde(skip)]
    pub relationship_guid: Uuid,
    #[serde(skip)]
    pub previous_action_guid: Uuid,
    #[serde(skip)]
    pub next_action_guid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    #[serde(default)]
    pub mandatory_guard: bool,
}

impl NextActionLink {
    pub fn from_relationship(relationship: &Relationship) -> SequencerResult<Self> {
        let mut link: NextActionLink = relationship.decode()?;
        link.relationship_guid = relationship.guid;
        link.previous_action_guid = relationship.end1;
        link.next_action_guid = relationship.end2;
        Ok(link)
    }

    pub fn is_self_loop(&self) -> bool {
        self.previous_action_guid == self.next_action_guid
    }
}

// =============================================================================
// INPUT DTOS
// =============================================================================

/// Action target supplied by a caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, validator::Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewActionTarget {
    #[validate(length(min = 1, max = 255, message = "Action target name must be between 1 and 255 characters"))]
    pub action_target_name: String,
    pub action_target_guid: Uuid,
}

impl NewActionTarget {
    pub fn new(name: impl Into<String>, guid: Uuid) -> Self {
        Self {
            action_target_name: name.into(),
            action_target_guid: guid,
        }
    }
}

/// Request source supplied by a caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRequestSource {
    pub source_guid: Uuid,
    pub origin_name: Option<String>,
}

impl NewRequestSource {
    pub fn new(source_guid: Uuid) -> Self {
        Self {
            source_guid,
            origin_name: None,
        }
    }
}

/// Explicit status recorded on an action target by the running service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionTargetUpdate {
    pub status: GovernanceActionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub completion_message: Option<String>,
}

/// Combine targets, keeping the first occurrence of each (name, guid) pair
pub fn merge_action_targets(
    existing: impl IntoIterator<Item = NewActionTarget>,
    additional: impl IntoIterator<Item = NewActionTarget>,
) -> Vec<NewActionTarget> {
    let mut merged: Vec<NewActionTarget> = Vec::new();
    for target in existing.into_iter().chain(additional) {
        if !merged.contains(&target) {
            merged.push(target);
        }
    }
    merged
}

/// Template defaults overlaid by caller-supplied values
pub fn merge_request_parameters(
    defaults: &RequestParameters,
    overrides: &RequestParameters,
) -> RequestParameters {
    let mut merged = defaults.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
