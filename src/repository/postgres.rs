//! Postgres-backed metadata repository
//!
//! Entities and relationships live in two tables with JSONB property bags.
//! Searches use JSONB containment so matching properties can be indexed.

use super::{
    Direction, EntityDetail, EntityKind, MetadataRepository, Paging, Properties, Relationship,
    RelationshipKind,
};
use crate::config::DatabaseConfig;
use crate::error::{invalid_parameter, property_server_error, SequencerError, SequencerResult};
use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use serde_json::Value;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info};
use uuid::Uuid;

const ENTITY_COLUMNS: &str =
    "guid, type_name, properties, created_by, updated_by, created_at, updated_at, version";
const RELATIONSHIP_COLUMNS: &str =
    "guid, type_name, end1, end2, properties, created_at, updated_at, version";

/// Metadata repository stored in PostgreSQL
pub struct PostgresRepository {
    pool: Pool,
}

impl PostgresRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool from configuration and verify the connection
    pub async fn connect(config: &DatabaseConfig) -> SequencerResult<Self> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.user = Some(config.user.clone());
        cfg.password = Some(config.password.clone());
        cfg.dbname = Some(config.database.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(config.max_pool_size));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| property_server_error(format!("Failed to create pool: {}", e)))?;

        let client = pool.get().await?;
        client.query_one("SELECT 1 as ok", &[]).await?;

        info!(
            "Connected metadata repository to {}:{}/{}",
            config.host, config.port, config.database
        );
        Ok(Self::new(pool))
    }

    /// Create the repository tables if they don't exist
    pub async fn create_tables(&self) -> SequencerResult<()> {
        let client = self.pool.get().await?;

        client
            .execute(
                "CREATE TABLE IF NOT EXISTS metadata_entities (
                    seq BIGSERIAL,
                    guid UUID PRIMARY KEY,
                    type_name VARCHAR(100) NOT NULL,
                    properties JSONB NOT NULL DEFAULT '{}'::jsonb,
                    created_by VARCHAR(255) NOT NULL,
                    updated_by VARCHAR(255),
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL,
                    version BIGINT NOT NULL DEFAULT 1
                )",
                &[],
            )
            .await?;

        client
            .execute(
                "CREATE TABLE IF NOT EXISTS metadata_relationships (
                    seq BIGSERIAL,
                    guid UUID PRIMARY KEY,
                    type_name VARCHAR(100) NOT NULL,
                    end1 UUID NOT NULL REFERENCES metadata_entities(guid) ON DELETE CASCADE,
                    end2 UUID NOT NULL REFERENCES metadata_entities(guid) ON DELETE CASCADE,
                    properties JSONB NOT NULL DEFAULT '{}'::jsonb,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL,
                    version BIGINT NOT NULL DEFAULT 1
                )",
                &[],
            )
            .await?;

        let _ = client
            .execute(
                "CREATE INDEX IF NOT EXISTS idx_metadata_entities_properties
                 ON metadata_entities USING GIN (properties)",
                &[],
            )
            .await;
        let _ = client
            .execute(
                "CREATE INDEX IF NOT EXISTS idx_metadata_relationships_ends
                 ON metadata_relationships(type_name, end1, end2)",
                &[],
            )
            .await;

        info!("Metadata repository tables initialized");
        Ok(())
    }
}

fn entity_from_row(row: &Row) -> SequencerResult<EntityDetail> {
    let type_name: String = row.get(1);
    let version: i64 = row.get(7);
    Ok(EntityDetail {
        guid: row.get(0),
        kind: type_name.parse()?,
        properties: object_from_value(row.get(2))?,
        created_by: row.get(3),
        updated_by: row.get(4),
        created_at: row.get(5),
        updated_at: row.get(6),
        version: version as u64,
    })
}

fn relationship_from_row(row: &Row) -> SequencerResult<Relationship> {
    let type_name: String = row.get(1);
    let version: i64 = row.get(7);
    Ok(Relationship {
        guid: row.get(0),
        kind: type_name.parse()?,
        end1: row.get(2),
        end2: row.get(3),
        properties: object_from_value(row.get(4))?,
        created_at: row.get(5),
        updated_at: row.get(6),
        version: version as u64,
    })
}

fn object_from_value(value: Value) -> SequencerResult<Properties> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(property_server_error(format!(
            "Stored properties are not an object: {}",
            other
        ))),
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

fn check_relationship_kind(
    relationship: &Relationship,
    expected: RelationshipKind,
) -> SequencerResult<()> {
    if relationship.kind != expected {
        return Err(property_server_error(format!(
            "Relationship {} is a {} and not a {}",
            relationship.guid, relationship.kind, expected
        )));
    }
    Ok(())
}

fn map_foreign_key_violation(error: tokio_postgres::Error) -> SequencerError {
    if error.to_string().contains("foreign key constraint") {
        invalid_parameter(format!("Relationship end does not exist: {}", error))
    } else {
        SequencerError::Database(error)
    }
}

#[async_trait]
impl MetadataRepository for PostgresRepository {
    async fn create_entity(
        &self,
        user_id: &str,
        kind: EntityKind,
        properties: Properties,
    ) -> SequencerResult<Uuid> {
        let client = self.pool.get().await?;
        let guid = Uuid::new_v4();
        let now = Utc::now();

        client
            .execute(
                "INSERT INTO metadata_entities
                 (guid, type_name, properties, created_by, created_at, updated_at, version)
                 VALUES ($1, $2, $3, $4, $5, $6, 1)",
                &[&guid, &kind.type_name(), &Value::Object(properties), &user_id, &now, &now],
            )
            .await?;

        debug!("Created {} entity {}", kind, guid);
        Ok(guid)
    }

    async fn get_entity(
        &self,
        _user_id: &str,
        guid: Uuid,
        expected: EntityKind,
    ) -> SequencerResult<EntityDetail> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM metadata_entities WHERE guid = $1", ENTITY_COLUMNS),
                &[&guid],
            )
            .await?
            .ok_or_else(|| invalid_parameter(format!("Unknown entity guid {}", guid)))?;

        let detail = entity_from_row(&row)?;
        check_kind(&detail, expected)?;
        Ok(detail)
    }

    async fn update_entity_properties(
        &self,
        user_id: &str,
        guid: Uuid,
        expected: EntityKind,
        properties: Properties,
        merge: bool,
    ) -> SequencerResult<EntityDetail> {
        let current = self.get_entity(user_id, guid, expected).await?;

        let statement = if merge {
            format!(
                "UPDATE metadata_entities
                 SET properties = properties || $2, updated_by = $3, updated_at = $4, version = version + 1
                 WHERE guid = $1 RETURNING {}",
                ENTITY_COLUMNS
            )
        } else {
            format!(
                "UPDATE metadata_entities
                 SET properties = $2, updated_by = $3, updated_at = $4, version = version + 1
                 WHERE guid = $1 RETURNING {}",
                ENTITY_COLUMNS
            )
        };

        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &statement,
                &[&current.guid, &Value::Object(properties), &user_id, &Utc::now()],
            )
            .await?
            .ok_or_else(|| invalid_parameter(format!("Unknown entity guid {}", guid)))?;
        entity_from_row(&row)
    }

    async fn delete_entity(
        &self,
        user_id: &str,
        guid: Uuid,
        expected: EntityKind,
    ) -> SequencerResult<()> {
        self.get_entity(user_id, guid, expected).await?;

        let client = self.pool.get().await?;
        client
            .execute("DELETE FROM metadata_entities WHERE guid = $1", &[&guid])
            .await?;

        debug!("Deleted {} entity {} and its relationships", expected, guid);
        Ok(())
    }

    async fn find_entities(
        &self,
        _user_id: &str,
        kind: EntityKind,
        match_properties: &Properties,
        paging: Paging,
    ) -> SequencerResult<Vec<Uuid>> {
        let client = self.pool.get().await?;
        let filter = Value::Object(match_properties.clone());
        let offset = paging.start_from as i64;
        let limit = paging.page_size as i64;

        let rows = if kind == EntityKind::Referenceable {
            client
                .query(
                    "SELECT guid FROM metadata_entities WHERE properties @> $1
                     ORDER BY seq OFFSET $2 LIMIT $3",
                    &[&filter, &offset, &limit],
                )
                .await?
        } else {
            client
                .query(
                    "SELECT guid FROM metadata_entities WHERE type_name = $1 AND properties @> $2
                     ORDER BY seq OFFSET $3 LIMIT $4",
                    &[&kind.type_name(), &filter, &offset, &limit],
                )
                .await?
        };

        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn create_relationship(
        &self,
        _user_id: &str,
        kind: RelationshipKind,
        end1: Uuid,
        end2: Uuid,
        properties: Properties,
    ) -> SequencerResult<Uuid> {
        let client = self.pool.get().await?;
        let guid = Uuid::new_v4();
        let now = Utc::now();

        client
            .execute(
                "INSERT INTO metadata_relationships
                 (guid, type_name, end1, end2, properties, created_at, updated_at, version)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, 1)",
                &[&guid, &kind.type_name(), &end1, &end2, &Value::Object(properties), &now, &now],
            )
            .await
            .map_err(map_foreign_key_violation)?;

        debug!("Created {} relationship {} ({} -> {})", kind, guid, end1, end2);
        Ok(guid)
    }

    async fn get_relationship(
        &self,
        _user_id: &str,
        guid: Uuid,
        expected: RelationshipKind,
    ) -> SequencerResult<Relationship> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM metadata_relationships WHERE guid = $1",
                    RELATIONSHIP_COLUMNS
                ),
                &[&guid],
            )
            .await?
            .ok_or_else(|| invalid_parameter(format!("Unknown relationship guid {}", guid)))?;

        let relationship = relationship_from_row(&row)?;
        check_relationship_kind(&relationship, expected)?;
        Ok(relationship)
    }

    async fn update_relationship_properties(
        &self,
        user_id: &str,
        guid: Uuid,
        expected: RelationshipKind,
        properties: Properties,
        merge: bool,
    ) -> SequencerResult<Relationship> {
        self.get_relationship(user_id, guid, expected).await?;

        let statement = if merge {
            format!(
                "UPDATE metadata_relationships
                 SET properties = properties || $2, updated_at = $3, version = version + 1
                 WHERE guid = $1 RETURNING {}",
                RELATIONSHIP_COLUMNS
            )
        } else {
            format!(
                "UPDATE metadata_relationships
                 SET properties = $2, updated_at = $3, version = version + 1
                 WHERE guid = $1 RETURNING {}",
                RELATIONSHIP_COLUMNS
            )
        };

        let client = self.pool.get().await?;
        let row = client
            .query_opt(&statement, &[&guid, &Value::Object(properties), &Utc::now()])
            .await?
            .ok_or_else(|| invalid_parameter(format!("Unknown relationship guid {}", guid)))?;
        relationship_from_row(&row)
    }

    async fn get_relationships(
        &self,
        _user_id: &str,
        entity: Uuid,
        kind: RelationshipKind,
        direction: Direction,
    ) -> SequencerResult<Vec<Relationship>> {
        let end_clause = match direction {
            Direction::Outgoing => "end1 = $2",
            Direction::Incoming => "end2 = $2",
            Direction::Either => "(end1 = $2 OR end2 = $2)",
        };

        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM metadata_relationships WHERE type_name = $1 AND {} ORDER BY seq",
                    RELATIONSHIP_COLUMNS, end_clause
                ),
                &[&kind.type_name(), &entity],
            )
            .await?;

        rows.iter().map(relationship_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(kind: EntityKind) -> EntityDetail {
        let now = Utc::now();
        EntityDetail {
            guid: Uuid::new_v4(),
            kind,
            properties: Properties::new(),
            created_by: "u".to_string(),
            updated_by: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    #[test]
    fn test_object_from_value_accepts_only_objects() {
        let properties = object_from_value(json!({"guard": "done"})).unwrap();
        assert_eq!(properties.get("guard"), Some(&json!("done")));

        let err = object_from_value(json!(["done"])).unwrap_err();
        assert!(err.is_retryable());
        assert!(object_from_value(Value::Null).is_err());
    }

    #[test]
    fn test_check_kind() {
        let action = entity(EntityKind::GovernanceAction);
        assert!(check_kind(&action, EntityKind::GovernanceAction).is_ok());
        assert!(check_kind(&action, EntityKind::Referenceable).is_ok());

        let err = check_kind(&action, EntityKind::GovernanceEngine).unwrap_err();
        assert!(err.to_string().contains("not a GovernanceEngine"));
    }

    #[test]
    fn test_check_relationship_kind() {
        let now = Utc::now();
        let relationship = Relationship {
            guid: Uuid::new_v4(),
            kind: RelationshipKind::TargetForAction,
            end1: Uuid::new_v4(),
            end2: Uuid::new_v4(),
            properties: Properties::new(),
            created_at: now,
            updated_at: now,
            version: 1,
        };

        assert!(check_relationship_kind(&relationship, RelationshipKind::TargetForAction).is_ok());
        assert!(check_relationship_kind(&relationship, RelationshipKind::NextGovernanceAction).is_err());
    }
}
