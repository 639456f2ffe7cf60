//! Metadata Repository seam
//!
//! The sequencer never owns storage. Entities (processes, action types,
//! engines, governance actions) and the relationships between them live in an
//! external metadata repository reached through [`MetadataRepository`].
//! Every call carries the caller identity so the repository can apply its own
//! authorization and visibility rules.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryRepository;
#[cfg(feature = "postgres")]
pub use postgres::PostgresRepository;

use crate::error::{property_server_error, SequencerError, SequencerResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Free-form property bag stored on entities and relationships
pub type Properties = serde_json::Map<String, Value>;

// =============================================================================
// TYPE NAMES
// =============================================================================

/// Entity types the sequencer reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    GovernanceActionProcess,
    GovernanceActionType,
    GovernanceEngine,
    GovernanceAction,
    /// Any element a governance action may target or be triggered by
    Referenceable,
}

impl EntityKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            EntityKind::GovernanceActionProcess => "GovernanceActionProcess",
            EntityKind::GovernanceActionType => "GovernanceActionType",
            EntityKind::GovernanceEngine => "GovernanceEngine",
            EntityKind::GovernanceAction => "GovernanceAction",
            EntityKind::Referenceable => "Referenceable",
        }
    }

    /// Every entity kind is a referenceable, so `Referenceable` accepts all.
    pub fn accepts(&self, actual: EntityKind) -> bool {
        *self == EntityKind::Referenceable || *self == actual
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl FromStr for EntityKind {
    type Err = SequencerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GovernanceActionProcess" => Ok(EntityKind::GovernanceActionProcess),
            "GovernanceActionType" => Ok(EntityKind::GovernanceActionType),
            "GovernanceEngine" => Ok(EntityKind::GovernanceEngine),
            "GovernanceAction" => Ok(EntityKind::GovernanceAction),
            "Referenceable" => Ok(EntityKind::Referenceable),
            other => Err(property_server_error(format!("Unknown entity type '{}'", other))),
        }
    }
}

/// Relationship types the sequencer reads or writes.
///
/// `end1` is always the source of the relationship listed in the comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipKind {
    /// process -> first action type (carries the seeding guard)
    GovernanceActionProcessFlow,
    /// action type -> next action type (guard, mandatory flag)
    NextGovernanceActionType,
    /// action type -> governance engine (request type, default parameters)
    GovernanceActionTypeExecutor,
    /// previous action -> next action (provenance of a guard delivery)
    NextGovernanceAction,
    /// action -> element that triggered it
    GovernanceActionRequestSource,
    /// action -> element it operates on
    TargetForAction,
}

impl RelationshipKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            RelationshipKind::GovernanceActionProcessFlow => "GovernanceActionProcessFlow",
            RelationshipKind::NextGovernanceActionType => "NextGovernanceActionType",
            RelationshipKind::GovernanceActionTypeExecutor => "GovernanceActionTypeExecutor",
            RelationshipKind::NextGovernanceAction => "NextGovernanceAction",
            RelationshipKind::GovernanceActionRequestSource => "GovernanceActionRequestSource",
            RelationshipKind::TargetForAction => "TargetForAction",
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl FromStr for RelationshipKind {
    type Err = SequencerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GovernanceActionProcessFlow" => Ok(RelationshipKind::GovernanceActionProcessFlow),
            "NextGovernanceActionType" => Ok(RelationshipKind::NextGovernanceActionType),
            "GovernanceActionTypeExecutor" => Ok(RelationshipKind::GovernanceActionTypeExecutor),
            "NextGovernanceAction" => Ok(RelationshipKind::NextGovernanceAction),
            "GovernanceActionRequestSource" => Ok(RelationshipKind::GovernanceActionRequestSource),
            "TargetForAction" => Ok(RelationshipKind::TargetForAction),
            other => Err(property_server_error(format!(
                "Unknown relationship type '{}'",
                other
            ))),
        }
    }
}

/// Which end of a relationship the queried entity sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Entity is end1
    Outgoing,
    /// Entity is end2
    Incoming,
    Either,
}

impl Direction {
    pub fn matches(&self, entity: Uuid, relationship: &Relationship) -> bool {
        match self {
            Direction::Outgoing => relationship.end1 == entity,
            Direction::Incoming => relationship.end2 == entity,
            Direction::Either => relationship.end1 == entity || relationship.end2 == entity,
        }
    }
}

// =============================================================================
// STORED ELEMENTS
// =============================================================================

/// An entity as returned by the repository
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDetail {
    pub guid: Uuid,
    pub kind: EntityKind,
    pub properties: Properties,
    pub created_by: String,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl EntityDetail {
    pub fn string_property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }

    /// Deserialize the property bag into a typed view
    pub fn decode<T: DeserializeOwned>(&self) -> SequencerResult<T> {
        decode_properties(&self.properties)
    }
}

/// A relationship as returned by the repository
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub guid: Uuid,
    pub kind: RelationshipKind,
    pub end1: Uuid,
    pub end2: Uuid,
    pub properties: Properties,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Relationship {
    pub fn string_property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> SequencerResult<T> {
        decode_properties(&self.properties)
    }
}

/// Window into a search result set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub start_from: usize,
    pub page_size: usize,
}

impl Paging {
    pub fn first(page_size: usize) -> Self {
        Self {
            start_from: 0,
            page_size,
        }
    }

    pub fn next(&self) -> Self {
        Self {
            start_from: self.start_from + self.page_size,
            page_size: self.page_size,
        }
    }
}

/// Serialize a typed view into a property bag
pub fn encode_properties<T: Serialize>(value: &T) -> SequencerResult<Properties> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(property_server_error(format!(
            "Properties must serialize to an object, got {}",
            other
        ))),
    }
}

pub fn decode_properties<T: DeserializeOwned>(properties: &Properties) -> SequencerResult<T> {
    Ok(serde_json::from_value(Value::Object(properties.clone()))?)
}

// =============================================================================
// REPOSITORY TRAIT
// =============================================================================

/// Generic entity/relationship store the sequencer delegates to.
///
/// Implementations report unknown guids as `InvalidParameter`, type mismatches
/// as `PropertyServer` and visibility or authorization failures as
/// `UserNotAuthorized`. No call spans more than one atomic mutation.
#[async_trait]
pub trait MetadataRepository: Send + Sync {
    // ── Entities ──

    async fn create_entity(
        &self,
        user_id: &str,
        kind: EntityKind,
        properties: Properties,
    ) -> SequencerResult<Uuid>;

    async fn get_entity(
        &self,
        user_id: &str,
        guid: Uuid,
        expected: EntityKind,
    ) -> SequencerResult<EntityDetail>;

    /// Overlay (`merge = true`) or replace the entity's properties.
    async fn update_entity_properties(
        &self,
        user_id: &str,
        guid: Uuid,
        expected: EntityKind,
        properties: Properties,
        merge: bool,
    ) -> SequencerResult<EntityDetail>;

    /// Remove an entity together with every relationship attached to it.
    async fn delete_entity(&self, user_id: &str, guid: Uuid, expected: EntityKind)
        -> SequencerResult<()>;

    /// Entities of `kind` whose properties contain every pair in
    /// `match_properties`, in repository order.
    async fn find_entities(
        &self,
        user_id: &str,
        kind: EntityKind,
        match_properties: &Properties,
        paging: Paging,
    ) -> SequencerResult<Vec<Uuid>>;

    // ── Relationships ──

    async fn create_relationship(
        &self,
        user_id: &str,
        kind: RelationshipKind,
        end1: Uuid,
        end2: Uuid,
        properties: Properties,
    ) -> SequencerResult<Uuid>;

    async fn get_relationship(
        &self,
        user_id: &str,
        guid: Uuid,
        expected: RelationshipKind,
    ) -> SequencerResult<Relationship>;

    async fn update_relationship_properties(
        &self,
        user_id: &str,
        guid: Uuid,
        expected: RelationshipKind,
        properties: Properties,
        merge: bool,
    ) -> SequencerResult<Relationship>;

    /// Relationships of `kind` attached to `entity`, in creation order.
    async fn get_relationships(
        &self,
        user_id: &str,
        entity: Uuid,
        kind: RelationshipKind,
        direction: Direction,
    ) -> SequencerResult<Vec<Relationship>>;
}

/// Page through a search and load every match the caller may see.
///
/// Matches the repository refuses to show the caller are skipped and logged
/// as excluded; every other error propagates.
pub async fn find_visible_entities(
    repository: &dyn MetadataRepository,
    user_id: &str,
    kind: EntityKind,
    match_properties: &Properties,
    page_size: usize,
) -> SequencerResult<Vec<EntityDetail>> {
    let mut paging = Paging::first(page_size.max(1));
    let mut visible = Vec::new();

    loop {
        let guids = repository
            .find_entities(user_id, kind, match_properties, paging)
            .await?;

        for guid in &guids {
            match repository.get_entity(user_id, *guid, kind).await {
                Ok(entity) => visible.push(entity),
                Err(e) if e.is_not_authorized() => {
                    tracing::warn!("Excluded {} {} from search results for {}: {}", kind, guid, user_id, e);
                }
                Err(e) => return Err(e),
            }
        }

        if guids.len() < paging.page_size {
            break;
        }
        paging = paging.next();
    }

    Ok(visible)
}
