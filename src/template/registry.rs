//! Process template registration
//!
//! Writes a validated [`ProcessTemplate`] into the metadata repository as a
//! process entity, action type entities, engine entities and the flow, next
//! and executor relationships between them.

use super::dto::ProcessTemplate;
use super::graph::qualified_name_match;
use super::properties::{
    ActionTypeProperties, EngineProperties, ExecutorProperties, NextActionTypeProperties,
    ProcessFlowProperties, ProcessProperties,
};
use crate::audit::{AuditAction, AuditEntry, AuditLog};
use crate::error::{invalid_parameter, validate_user_id, SequencerResult};
use crate::repository::{
    encode_properties, find_visible_entities, EntityKind, MetadataRepository, RelationshipKind,
};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

/// Guids created (or reused) for a registered template
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredTemplate {
    pub process_guid: Uuid,
    pub action_type_guids: BTreeMap<String, Uuid>,
    pub engine_guids: BTreeMap<String, Uuid>,
}

pub async fn register_process_template(
    repository: &dyn MetadataRepository,
    audit: &dyn AuditLog,
    user_id: &str,
    template: &ProcessTemplate,
    page_size: usize,
) -> SequencerResult<RegisteredTemplate> {
    validate_user_id(user_id)?;
    template.validate_template()?;

    if name_in_use(repository, user_id, EntityKind::GovernanceActionProcess, &template.qualified_name, page_size).await? {
        return Err(invalid_parameter(format!(
            "Governance action process '{}' is already registered",
            template.qualified_name
        )));
    }
    for action_type in &template.action_types {
        if name_in_use(repository, user_id, EntityKind::GovernanceActionType, &action_type.qualified_name, page_size).await? {
            return Err(invalid_parameter(format!(
                "Governance action type '{}' is already registered",
                action_type.qualified_name
            )));
        }
    }

    // Engines are shared between templates
    let mut engine_guids = BTreeMap::new();
    for executor in template.action_types.iter().filter_map(|t| t.executor.as_ref()) {
        if engine_guids.contains_key(&executor.governance_engine) {
            continue;
        }
        let guid = find_or_create_engine(repository, user_id, &executor.governance_engine, page_size).await?;
        engine_guids.insert(executor.governance_engine.clone(), guid);
    }

    let mut action_type_guids = BTreeMap::new();
    for action_type in &template.action_types {
        let properties = encode_properties(&ActionTypeProperties {
            qualified_name: action_type.qualified_name.clone(),
            domain_identifier: action_type.domain_identifier,
            display_name: action_type.display_name.clone(),
            description: action_type.description.clone(),
            wait_time: action_type.wait_time_minutes,
            ignore_multiple_triggers: action_type.ignore_multiple_triggers,
        })?;
        let type_guid = repository
            .create_entity(user_id, EntityKind::GovernanceActionType, properties)
            .await?;

        if let Some(executor) = &action_type.executor {
            let engine_guid = engine_guids[&executor.governance_engine];
            let properties = encode_properties(&ExecutorProperties {
                request_type: executor.request_type.clone(),
                request_parameters: executor.request_parameters.clone(),
            })?;
            repository
                .create_relationship(
                    user_id,
                    RelationshipKind::GovernanceActionTypeExecutor,
                    type_guid,
                    engine_guid,
                    properties,
                )
                .await?;
        }

        action_type_guids.insert(action_type.qualified_name.clone(), type_guid);
    }

    for next in &template.next_actions {
        let properties = encode_properties(&NextActionTypeProperties {
            guard: next.guard.clone(),
            mandatory_guard: next.mandatory_guard,
        })?;
        repository
            .create_relationship(
                user_id,
                RelationshipKind::NextGovernanceActionType,
                action_type_guids[&next.from],
                action_type_guids[&next.to],
                properties,
            )
            .await?;
    }

    let process_guid = repository
        .create_entity(
            user_id,
            EntityKind::GovernanceActionProcess,
            encode_properties(&ProcessProperties {
                qualified_name: template.qualified_name.clone(),
                domain_identifier: template.domain_identifier,
                display_name: template.display_name.clone(),
                description: template.description.clone(),
            })?,
        )
        .await?;

    repository
        .create_relationship(
            user_id,
            RelationshipKind::GovernanceActionProcessFlow,
            process_guid,
            action_type_guids[&template.entry_point.action_type],
            encode_properties(&ProcessFlowProperties {
                guard: template.entry_point.guard.clone(),
            })?,
        )
        .await?;

    info!(
        "Registered governance action process '{}' ({}) with {} action types",
        template.qualified_name,
        process_guid,
        action_type_guids.len()
    );

    audit
        .log(
            AuditEntry::new(user_id, AuditAction::ProcessTemplateRegistered, process_guid).with_details(json!({
                "qualifiedName": template.qualified_name,
                "actionTypes": action_type_guids.keys().collect::<Vec<_>>(),
            })),
        )
        .await;

    Ok(RegisteredTemplate {
        process_guid,
        action_type_guids,
        engine_guids,
    })
}

async fn name_in_use(
    repository: &dyn MetadataRepository,
    user_id: &str,
    kind: EntityKind,
    qualified_name: &str,
    page_size: usize,
) -> SequencerResult<bool> {
    let matches = find_visible_entities(repository, user_id, kind, &qualified_name_match(qualified_name), page_size).await?;
    Ok(!matches.is_empty())
}

async fn find_or_create_engine(
    repository: &dyn MetadataRepository,
    user_id: &str,
    engine_name: &str,
    page_size: usize,
) -> SequencerResult<Uuid> {
    let existing = find_visible_entities(
        repository,
        user_id,
        EntityKind::GovernanceEngine,
        &qualified_name_match(engine_name),
        page_size,
    )
    .await?;

    if let Some(engine) = existing.first() {
        return Ok(engine.guid);
    }

    repository
        .create_entity(
            user_id,
            EntityKind::GovernanceEngine,
            encode_properties(&EngineProperties {
                qualified_name: engine_name.to_string(),
            })?,
        )
        .await
}
