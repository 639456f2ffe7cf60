//! Process Initiator
//!
//! Starts a run: resolves the entry action type and materializes the run's
//! first instance, whose guid becomes the run's anchor.

use super::materializer::PrepareInstance;
use super::GovernanceActionSequencer;
use crate::action::requests::{InitiateActionTypeRequest, InitiateProcessRequest};
use crate::audit::{AuditAction, AuditEntry};
use crate::error::{property_server_error, validate_user_id, SequencerResult};
use crate::template::dto::ProcessTemplate;
use crate::template::graph::ProcessGraph;
use crate::template::registry::{register_process_template, RegisteredTemplate};
use serde_json::json;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

impl GovernanceActionSequencer {
    /// Write a process template into the repository.
    pub async fn register_process_template(
        &self,
        user_id: &str,
        template: &ProcessTemplate,
    ) -> SequencerResult<RegisteredTemplate> {
        register_process_template(
            self.repo(),
            self.audit.as_ref(),
            user_id,
            template,
            self.config.search_page_size,
        )
        .await
    }

    /// Start a run of a named process. Returns the first instance's guid.
    pub async fn initiate_process(&self, user_id: &str, request: InitiateProcessRequest) -> SequencerResult<Uuid> {
        validate_user_id(user_id)?;
        request.validate()?;

        let graph = ProcessGraph::load_process(
            self.repo(),
            user_id,
            &request.process_qualified_name,
            self.config.search_page_size,
        )
        .await?;
        let entry_guard = graph.process().and_then(|p| p.guard.clone());

        let action_guid = self
            .prepare_instance(
                user_id,
                PrepareInstance {
                    graph: &graph,
                    node: graph.root(),
                    anchor_guid: None,
                    guard: entry_guard,
                    mandatory_guard: false,
                    start_time: request.start_time,
                    previous_action_guid: None,
                    request_parameters: &request.request_parameters,
                    request_sources: &request.request_sources,
                    action_targets: &request.action_targets,
                    process_name: Some(&request.process_qualified_name),
                    originator: &request.originator,
                },
            )
            .await?
            .ok_or_else(|| {
                property_server_error(format!(
                    "No governance action was created for process '{}'",
                    request.process_qualified_name
                ))
            })?;

        info!(
            "Initiated governance action process '{}' with first action {}",
            request.process_qualified_name, action_guid
        );
        if let Some(process) = graph.process() {
            self.record(
                AuditEntry::new(user_id, AuditAction::ProcessInitiated, process.guid).with_details(json!({
                    "processName": request.process_qualified_name,
                    "firstActionGuid": action_guid,
                })),
            )
            .await;
        }

        Ok(action_guid)
    }

    /// Start a chain from a single action type, outside any process.
    pub async fn initiate_governance_action_type(
        &self,
        user_id: &str,
        request: InitiateActionTypeRequest,
    ) -> SequencerResult<Uuid> {
        validate_user_id(user_id)?;
        request.validate()?;

        let graph = ProcessGraph::load_action_type(
            self.repo(),
            user_id,
            &request.action_type_qualified_name,
            self.config.search_page_size,
        )
        .await?;

        let action_guid = self
            .prepare_instance(
                user_id,
                PrepareInstance {
                    graph: &graph,
                    node: graph.root(),
                    anchor_guid: None,
                    guard: None,
                    mandatory_guard: false,
                    start_time: request.start_time,
                    previous_action_guid: None,
                    request_parameters: &request.request_parameters,
                    request_sources: &request.request_sources,
                    action_targets: &request.action_targets,
                    process_name: None,
                    originator: &request.originator,
                },
            )
            .await?
            .ok_or_else(|| {
                property_server_error(format!(
                    "No governance action was created for action type '{}'",
                    request.action_type_qualified_name
                ))
            })?;

        info!(
            "Initiated governance action type '{}' as {}",
            request.action_type_qualified_name, action_guid
        );
        self.record(
            AuditEntry::new(user_id, AuditAction::ActionTypeInitiated, action_guid)
                .with_details(json!({ "actionType": request.action_type_qualified_name })),
        )
        .await;

        Ok(action_guid)
    }
}
