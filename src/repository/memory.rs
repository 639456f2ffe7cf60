//! In-memory metadata repository
//!
//! Thread-safe store backing the sequencer in tests and embedded hosts.
//! Supports per-entity visibility restrictions, user denial and injected
//! relationship failures so the sequencer's error paths can be exercised.

use super::{
    Direction, EntityDetail, EntityKind, MetadataRepository, Paging, Properties, Relationship,
    RelationshipKind,
};
use crate::error::{invalid_parameter, not_authorized, property_server_error, SequencerResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// In-memory entity/relationship store
pub struct InMemoryRepository {
    /// Entities by guid
    entities: RwLock<HashMap<Uuid, EntityDetail>>,

    /// Entity guids in creation order (the search iteration order)
    entity_order: RwLock<Vec<Uuid>>,

    /// Relationships in creation order
    relationships: RwLock<Vec<Relationship>>,

    /// Entity guid -> users that may not see it
    hidden: RwLock<HashMap<Uuid, HashSet<String>>>,

    /// Users refused on every call
    denied_users: RwLock<HashSet<String>>,

    /// Relationship kinds whose creation fails
    failing_relationships: RwLock<HashSet<RelationshipKind>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            entity_order: RwLock::new(Vec::new()),
            relationships: RwLock::new(Vec::new()),
            hidden: RwLock::new(HashMap::new()),
            denied_users: RwLock::new(HashSet::new()),
            failing_relationships: RwLock::new(HashSet::new()),
        }
    }

    // =========================================================================
    // ACCESS CONTROL AND FAULT INJECTION
    // =========================================================================

    /// Make an entity invisible to one user
    pub async fn hide_entity_from(&self, guid: Uuid, user_id: &str) {
        let mut hidden = self.hidden.write().await;
        hidden.entry(guid).or_default().insert(user_id.to_string());
    }

    /// Refuse every call made by `user_id`
    pub async fn deny_user(&self, user_id: &str) {
        self.denied_users.write().await.insert(user_id.to_string());
    }

    /// Make every `create_relationship` of `kind` fail with a property server error
    pub async fn fail_relationships_of(&self, kind: RelationshipKind) {
        self.failing_relationships.write().await.insert(kind);
    }

    pub async fn clear_failures(&self) {
        self.failing_relationships.write().await.clear();
    }

    /// Number of stored entities of one kind
    pub async fn count_entities(&self, kind: EntityKind) -> usize {
        let entities = self.entities.read().await;
        entities.values().filter(|e| e.kind == kind).count()
    }

    async fn check_user(&self, user_id: &str, operation: &str) -> SequencerResult<()> {
        if self.denied_users.read().await.contains(user_id) {
            return Err(not_authorized(user_id, operation));
        }
        Ok(())
    }

    async fn check_visible(&self, user_id: &str, guid: Uuid) -> SequencerResult<()> {
        let hidden = self.hidden.read().await;
        if hidden.get(&guid).map_or(false, |users| users.contains(user_id)) {
            return Err(not_authorized(user_id, format!("access entity {}", guid)));
        }
        Ok(())
    }

    async fn check_entity_exists(&self, guid: Uuid) -> SequencerResult<()> {
        if !self.entities.read().await.contains_key(&guid) {
            return Err(invalid_parameter(format!("Unknown entity guid {}", guid)));
        }
        Ok(())
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn check_kind(detail: &EntityDetail, expected: EntityKind) -> SequencerResult<()> {
    if !expected.accepts(detail.kind) {
        return Err(property_server_error(format!(
            "Entity {} is a {} and not a {}",
            detail.guid, detail.kind, expected
        )));
    }
    Ok(())
}

fn apply_properties(target: &mut Properties, properties: Properties, merge: bool) {
    if merge {
        target.extend(properties);
    } else {
        *target = properties;
    }
}

#[async_trait]
impl MetadataRepository for InMemoryRepository {
    async fn create_entity(
        &self,
        user_id: &str,
        kind: EntityKind,
        properties: Properties,
    ) -> SequencerResult<Uuid> {
        self.check_user(user_id, "create entities").await?;

        let now = Utc::now();
        let guid = Uuid::new_v4();
        let detail = EntityDetail {
            guid,
            kind,
            properties,
            created_by: user_id.to_string(),
            updated_by: None,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        self.entities.write().await.insert(guid, detail);
        self.entity_order.write().await.push(guid);

        debug!("Created {} entity {}", kind, guid);
        Ok(guid)
    }

    async fn get_entity(
        &self,
        user_id: &str,
        guid: Uuid,
        expected: EntityKind,
    ) -> SequencerResult<EntityDetail> {
        self.check_user(user_id, "read entities").await?;
        self.check_visible(user_id, guid).await?;

        let entities = self.entities.read().await;
        let detail = entities
            .get(&guid)
            .ok_or_else(|| invalid_parameter(format!("Unknown entity guid {}", guid)))?;
        check_kind(detail, expected)?;
        Ok(detail.clone())
    }

    async fn update_entity_properties(
        &self,
        user_id: &str,
        guid: Uuid,
        expected: EntityKind,
        properties: Properties,
        merge: bool,
    ) -> SequencerResult<EntityDetail> {
        self.check_user(user_id, "update entities").await?;
        self.check_visible(user_id, guid).await?;

        let mut entities = self.entities.write().await;
        let detail = entities
            .get_mut(&guid)
            .ok_or_else(|| invalid_parameter(format!("Unknown entity guid {}", guid)))?;
        check_kind(detail, expected)?;

        apply_properties(&mut detail.properties, properties, merge);
        detail.updated_by = Some(user_id.to_string());
        detail.updated_at = Utc::now();
        detail.version += 1;
        Ok(detail.clone())
    }

    async fn delete_entity(
        &self,
        user_id: &str,
        guid: Uuid,
        expected: EntityKind,
    ) -> SequencerResult<()> {
        self.check_user(user_id, "delete entities").await?;
        self.check_visible(user_id, guid).await?;

        {
            let mut entities = self.entities.write().await;
            let detail = entities
                .get(&guid)
                .ok_or_else(|| invalid_parameter(format!("Unknown entity guid {}", guid)))?;
            check_kind(detail, expected)?;
            entities.remove(&guid);
        }

        self.entity_order.write().await.retain(|g| *g != guid);
        self.relationships
            .write()
            .await
            .retain(|r| r.end1 != guid && r.end2 != guid);

        debug!("Deleted {} entity {} and its relationships", expected, guid);
        Ok(())
    }

    async fn find_entities(
        &self,
        user_id: &str,
        kind: EntityKind,
        match_properties: &Properties,
        paging: Paging,
    ) -> SequencerResult<Vec<Uuid>> {
        self.check_user(user_id, "search entities").await?;

        let entities = self.entities.read().await;
        let order = self.entity_order.read().await;

        Ok(order
            .iter()
            .filter_map(|guid| entities.get(guid))
            .filter(|e| kind.accepts(e.kind))
            .filter(|e| {
                match_properties
                    .iter()
                    .all(|(key, value)| e.properties.get(key) == Some(value))
            })
            .skip(paging.start_from)
            .take(paging.page_size)
            .map(|e| e.guid)
            .collect())
    }

    async fn create_relationship(
        &self,
        user_id: &str,
        kind: RelationshipKind,
        end1: Uuid,
        end2: Uuid,
        properties: Properties,
    ) -> SequencerResult<Uuid> {
        self.check_user(user_id, "create relationships").await?;

        if self.failing_relationships.read().await.contains(&kind) {
            return Err(property_server_error(format!(
                "Repository rejected {} relationship between {} and {}",
                kind, end1, end2
            )));
        }

        self.check_entity_exists(end1).await?;
        self.check_entity_exists(end2).await?;

        let now = Utc::now();
        let guid = Uuid::new_v4();
        self.relationships.write().await.push(Relationship {
            guid,
            kind,
            end1,
            end2,
            properties,
            created_at: now,
            updated_at: now,
            version: 1,
        });

        debug!("Created {} relationship {} ({} -> {})", kind, guid, end1, end2);
        Ok(guid)
    }

    async fn get_relationship(
        &self,
        user_id: &str,
        guid: Uuid,
        expected: RelationshipKind,
    ) -> SequencerResult<Relationship> {
        self.check_user(user_id, "read relationships").await?;

        let relationships = self.relationships.read().await;
        let relationship = relationships
            .iter()
            .find(|r| r.guid == guid)
            .ok_or_else(|| invalid_parameter(format!("Unknown relationship guid {}", guid)))?;
        if relationship.kind != expected {
            return Err(property_server_error(format!(
                "Relationship {} is a {} and not a {}",
                guid, relationship.kind, expected
            )));
        }
        Ok(relationship.clone())
    }

    async fn update_relationship_properties(
        &self,
        user_id: &str,
        guid: Uuid,
        expected: RelationshipKind,
        properties: Properties,
        merge: bool,
    ) -> SequencerResult<Relationship> {
        self.check_user(user_id, "update relationships").await?;

        let mut relationships = self.relationships.write().await;
        let relationship = relationships
            .iter_mut()
            .find(|r| r.guid == guid)
            .ok_or_else(|| invalid_parameter(format!("Unknown relationship guid {}", guid)))?;
        if relationship.kind != expected {
            return Err(property_server_error(format!(
                "Relationship {} is a {} and not a {}",
                guid, relationship.kind, expected
            )));
        }

        apply_properties(&mut relationship.properties, properties, merge);
        relationship.updated_at = Utc::now();
        relationship.version += 1;
        Ok(relationship.clone())
    }

    async fn get_relationships(
        &self,
        user_id: &str,
        entity: Uuid,
        kind: RelationshipKind,
        direction: Direction,
    ) -> SequencerResult<Vec<Relationship>> {
        self.check_user(user_id, "read relationships").await?;
        self.check_visible(user_id, entity).await?;
        self.check_entity_exists(entity).await?;

        let relationships = self.relationships.read().await;
        Ok(relationships
            .iter()
            .filter(|r| r.kind == kind && direction.matches(entity, r))
            .cloned()
            .collect())
    }
}
