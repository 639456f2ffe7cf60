use super::*;
use crate::action::models::{ActionTargetUpdate, NewActionTarget, NewRequestSource, Originator, RequestParameters};
use crate::action::requests::{CompletionReport, InitiateActionTypeRequest, InitiateProcessRequest};
use crate::action::status::GovernanceActionStatus;
use crate::audit::{AuditAction, MemoryAuditLog};
use crate::error::{ErrorCategory, SequencerError};
use crate::repository::{InMemoryRepository, Properties, RelationshipKind};
use crate::template::dto::{ActionTypeDefinition, NextActionDefinition, ProcessTemplate};
use crate::template::registry::RegisteredTemplate;
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

const ADMIN: &str = "admin";
const ENGINE: &str = "engine-1";

// =============================================================================
// FIXTURES
// =============================================================================

struct Harness {
    sequencer: Arc<GovernanceActionSequencer>,
    repo: Arc<InMemoryRepository>,
    audit: Arc<MemoryAuditLog>,
    registered: RegisteredTemplate,
    process_name: String,
}

impl Harness {
    async fn new(template: ProcessTemplate) -> Self {
        Self::with_config(template, SequencerConfig::default()).await
    }

    async fn with_config(template: ProcessTemplate, config: SequencerConfig) -> Self {
        let repo = Arc::new(InMemoryRepository::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let sequencer = Arc::new(GovernanceActionSequencer::new(repo.clone(), audit.clone(), config));
        let registered = sequencer
            .register_process_template(ADMIN, &template)
            .await
            .unwrap();

        Self {
            sequencer,
            repo,
            audit,
            registered,
            process_name: template.qualified_name.clone(),
        }
    }

    async fn initiate(&self) -> Uuid {
        self.sequencer
            .initiate_process(ADMIN, InitiateProcessRequest::new(self.process_name.clone()))
            .await
            .unwrap()
    }

    async fn complete(&self, action_guid: Uuid, guards: &[&str]) -> CompletionOutcome {
        self.sequencer
            .claim_governance_action(ENGINE, action_guid)
            .await
            .unwrap();
        self.sequencer
            .record_completion(ENGINE, action_guid, CompletionReport::actioned(guards.iter().copied()))
            .await
            .unwrap()
    }

    async fn action(&self, action_guid: Uuid) -> GovernanceAction {
        self.sequencer
            .get_governance_action(ADMIN, action_guid)
            .await
            .unwrap()
    }

    async fn actions_of_type(&self, anchor_guid: Uuid, type_name: &str) -> Vec<GovernanceAction> {
        let type_guid = self.registered.action_type_guids[type_name];
        self.sequencer
            .get_run_actions(ADMIN, anchor_guid)
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.governance_action_type_guid == type_guid)
            .collect()
    }

    async fn referenceable(&self) -> Uuid {
        self.repo
            .create_entity(ADMIN, EntityKind::Referenceable, Properties::new())
            .await
            .unwrap()
    }
}

fn step(name: &str) -> ActionTypeDefinition {
    ActionTypeDefinition::new(name).executed_by("QualityEngine", name.to_lowercase())
}

fn linear_template(length: usize) -> ProcessTemplate {
    let names: Vec<String> = (0..length).map(|i| format!("Step{}", i)).collect();
    let mut template = ProcessTemplate::new("Linear", names[0].clone());
    for name in &names {
        template = template.with_action_type(step(name));
    }
    for pair in names.windows(2) {
        template = template.with_next(NextActionDefinition::new(pair[0].clone(), pair[1].clone(), Some("done")));
    }
    template
}

/// A fans out to B and C, which join at D
fn join_template(mandatory: bool, ignore_multiple_triggers: bool) -> ProcessTemplate {
    let mut d = step("D");
    if ignore_multiple_triggers {
        d = d.ignoring_multiple_triggers();
    }
    let mut b_to_d = NextActionDefinition::new("B", "D", Some("b-done"));
    let mut c_to_d = NextActionDefinition::new("C", "D", Some("c-done"));
    if mandatory {
        b_to_d = b_to_d.mandatory();
        c_to_d = c_to_d.mandatory();
    }

    ProcessTemplate::new("Join", "A")
        .with_action_type(step("A"))
        .with_action_type(step("B"))
        .with_action_type(step("C"))
        .with_action_type(d)
        .with_next(NextActionDefinition::new("A", "B", None))
        .with_next(NextActionDefinition::new("A", "C", None))
        .with_next(b_to_d)
        .with_next(c_to_d)
}

fn onboarding_template() -> ProcessTemplate {
    ProcessTemplate::new("Onboarding", "A")
        .with_action_type(step("A"))
        .with_action_type(step("B"))
        .with_action_type(step("C"))
        .with_next(NextActionDefinition::new("A", "B", Some("approved")).mandatory())
        .with_next(NextActionDefinition::new("A", "C", Some("rejected")))
}

/// Returns the B and C instances after A completes
async fn fan_out(h: &Harness) -> (Uuid, Uuid, Uuid) {
    let a = h.initiate().await;
    let outcome = h.complete(a, &[]).await;
    assert_eq!(outcome.next_action_guids.len(), 2);

    let b = h.actions_of_type(a, "B").await[0].guid;
    let c = h.actions_of_type(a, "C").await[0].guid;
    (a, b, c)
}

// =============================================================================
// RUN PROPERTIES
// =============================================================================

#[tokio::test]
async fn test_linear_chain_creates_one_instance_per_type() {
    let config = SequencerConfig {
        search_page_size: 2,
        ..SequencerConfig::default()
    };
    let h = Harness::with_config(linear_template(4), config).await;

    let first = h.initiate().await;
    let mut current = first;
    for _ in 0..3 {
        let outcome = h.complete(current, &["done"]).await;
        assert_eq!(outcome.next_action_guids.len(), 1);
        current = outcome.next_action_guids[0];
    }
    let last = h.complete(current, &["done"]).await;
    assert!(last.next_action_guids.is_empty());

    let run = h.sequencer.get_run_actions(ADMIN, first).await.unwrap();
    assert_eq!(run.len(), 4);
    assert!(run.iter().all(|a| a.anchor_guid == Some(first)));
    assert!(run.iter().all(|a| a.status == GovernanceActionStatus::Actioned));
    assert!(run.iter().all(|a| a.process_name.as_deref() == Some("Linear")));
}

#[tokio::test]
async fn test_first_instance_anchors_the_run() {
    let h = Harness::new(linear_template(2)).await;
    let first = h.initiate().await;

    let action = h.action(first).await;
    assert_eq!(action.anchor_guid, Some(first));
    assert_eq!(action.status, GovernanceActionStatus::Approved);
    assert_eq!(action.governance_engine_name, "QualityEngine");
    assert_eq!(action.request_type, "step0");
    assert!(action.qualified_name.starts_with("Step0::"));
    assert_eq!(h.audit.count(AuditAction::ProcessInitiated, Some(h.registered.process_guid)).await, 1);
}

#[tokio::test]
async fn test_join_approves_once_both_mandatory_guards_arrive() {
    let h = Harness::new(join_template(true, false)).await;
    let (a, b, c) = fan_out(&h).await;

    let after_b = h.complete(b, &["b-done"]).await;
    let d = after_b.next_action_guids[0];
    let pending = h.action(d).await;
    assert_eq!(pending.status, GovernanceActionStatus::Requested);
    assert_eq!(pending.mandatory_guards, vec!["b-done".to_string(), "c-done".to_string()]);
    assert_eq!(pending.received_guards, vec!["b-done".to_string()]);

    let after_c = h.complete(c, &["c-done"]).await;
    assert_eq!(after_c.next_action_guids, vec![d]);

    let joined = h.action(d).await;
    assert_eq!(joined.status, GovernanceActionStatus::Approved);
    assert_eq!(h.actions_of_type(a, "D").await.len(), 1);
    assert_eq!(h.audit.count(AuditAction::ActionApproved, Some(d)).await, 1);
}

#[tokio::test]
async fn test_ignore_multiple_triggers_keeps_one_instance_per_run() {
    let h = Harness::new(join_template(false, true)).await;
    let (a, b, c) = fan_out(&h).await;

    let after_b = h.complete(b, &["b-done"]).await;
    assert_eq!(after_b.next_action_guids.len(), 1);

    let after_c = h.complete(c, &["c-done"]).await;
    assert!(after_c.next_action_guids.is_empty());

    assert_eq!(h.actions_of_type(a, "D").await.len(), 1);
    assert_eq!(h.audit.count(AuditAction::ActionSkipped, None).await, 1);
}

#[tokio::test]
async fn test_ignore_multiple_triggers_join_still_collects_mandatory_guards() {
    let h = Harness::new(join_template(true, true)).await;
    let (a, b, c) = fan_out(&h).await;

    let after_b = h.complete(b, &["b-done"]).await;
    let d = after_b.next_action_guids[0];
    assert_eq!(h.action(d).await.status, GovernanceActionStatus::Requested);

    let after_c = h.complete(c, &["c-done"]).await;
    assert_eq!(after_c.next_action_guids, vec![d]);

    let joined = h.action(d).await;
    assert_eq!(joined.status, GovernanceActionStatus::Approved);
    assert_eq!(joined.received_guards, vec!["b-done".to_string(), "c-done".to_string()]);
    assert_eq!(h.actions_of_type(a, "D").await.len(), 1);
    assert_eq!(h.audit.count(AuditAction::ActionSkipped, None).await, 0);
    assert_eq!(h.audit.count(AuditAction::ActionReused, Some(d)).await, 1);
}

#[tokio::test]
async fn test_reused_instance_keeps_first_delivery_parameters_and_targets() {
    let h = Harness::new(join_template(true, false)).await;
    let (_, b, c) = fan_out(&h).await;
    let late_target = h.referenceable().await;

    let d = h.complete(b, &["b-done"]).await.next_action_guids[0];

    h.sequencer
        .claim_governance_action(ENGINE, c)
        .await
        .unwrap();
    let mut report = CompletionReport::actioned(["c-done"]);
    report.request_parameters = RequestParameters::from([("depth".to_string(), "9".to_string())]);
    report.new_action_targets = vec![NewActionTarget::new("late", late_target)];
    let outcome = h.sequencer.record_completion(ENGINE, c, report).await.unwrap();
    assert_eq!(outcome.next_action_guids, vec![d]);

    let joined = h.action(d).await;
    assert_eq!(joined.status, GovernanceActionStatus::Approved);
    assert!(!joined.request_parameters.contains_key("depth"));
    assert!(h.sequencer.get_action_targets(ADMIN, d).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_runs_do_not_share_instances() {
    let h = Harness::new(join_template(true, false)).await;
    let (first_run, b1, _) = fan_out(&h).await;
    let (second_run, b2, _) = fan_out(&h).await;

    h.complete(b1, &["b-done"]).await;
    h.complete(b2, &["b-done"]).await;

    assert_eq!(h.actions_of_type(first_run, "D").await.len(), 1);
    assert_eq!(h.actions_of_type(second_run, "D").await.len(), 1);
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[tokio::test]
async fn test_onboarding_follows_only_the_approved_branch() {
    let h = Harness::new(onboarding_template()).await;
    let a = h.initiate().await;

    let outcome = h.complete(a, &["approved"]).await;
    assert_eq!(outcome.next_action_guids.len(), 1);

    let b = h.action(outcome.next_action_guids[0]).await;
    assert_eq!(b.governance_action_type_guid, h.registered.action_type_guids["B"]);
    assert_eq!(b.status, GovernanceActionStatus::Approved);
    assert_eq!(b.mandatory_guards, vec!["approved".to_string()]);
    assert!(h.actions_of_type(a, "C").await.is_empty());
}

#[tokio::test]
async fn test_guarded_and_unconditional_edges_both_fire() {
    let template = ProcessTemplate::new("FanOut", "A")
        .with_action_type(step("A"))
        .with_action_type(step("X"))
        .with_action_type(step("N"))
        .with_action_type(step("Z"))
        .with_next(NextActionDefinition::new("A", "X", Some("x")))
        .with_next(NextActionDefinition::new("A", "N", None))
        .with_next(NextActionDefinition::new("A", "Z", Some("z")));
    let h = Harness::new(template).await;
    let a = h.initiate().await;

    let outcome = h.complete(a, &["x", "y"]).await;
    assert_eq!(outcome.next_action_guids.len(), 2);
    assert_eq!(h.actions_of_type(a, "X").await.len(), 1);
    assert_eq!(h.actions_of_type(a, "N").await.len(), 1);
    assert!(h.actions_of_type(a, "Z").await.is_empty());
}

#[tokio::test]
async fn test_standalone_action_type_chain() {
    let template = ProcessTemplate::new("Scanning", "Scan")
        .with_action_type(step("Scan"))
        .with_action_type(step("Report"))
        .with_next(NextActionDefinition::new("Scan", "Report", Some("scanned")));
    let h = Harness::new(template).await;

    let scan = h
        .sequencer
        .initiate_governance_action_type(ADMIN, InitiateActionTypeRequest::new("Scan"))
        .await
        .unwrap();
    let action = h.action(scan).await;
    assert_eq!(action.anchor_guid, Some(scan));
    assert_eq!(action.process_name, None);

    let outcome = h.complete(scan, &["scanned"]).await;
    let report = h.action(outcome.next_action_guids[0]).await;
    assert_eq!(report.anchor_guid, Some(scan));
    assert_eq!(report.process_name, None);
    assert_eq!(h.audit.count(AuditAction::ActionTypeInitiated, Some(scan)).await, 1);
}

#[tokio::test]
async fn test_entry_guard_seeds_first_instance() {
    let template = linear_template(2).with_entry_guard("start");
    let h = Harness::new(template).await;

    let first = h.initiate().await;
    assert_eq!(h.action(first).await.received_guards, vec!["start".to_string()]);
}

// =============================================================================
// CLAIM AND STATUS
// =============================================================================

#[tokio::test]
async fn test_second_claim_fails_and_keeps_claimant() {
    let h = Harness::new(linear_template(2)).await;
    let first = h.initiate().await;

    let claimed = h
        .sequencer
        .claim_governance_action(ENGINE, first)
        .await
        .unwrap();
    assert_eq!(claimed.status, GovernanceActionStatus::Waiting);

    for engine in ["engine-2", ENGINE] {
        let err = h
            .sequencer
            .claim_governance_action(engine, first)
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidState);
    }

    let action = h.action(first).await;
    assert_eq!(action.processing_engine_user_id.as_deref(), Some(ENGINE));
    assert_eq!(h.audit.count(AuditAction::ActionClaimed, Some(first)).await, 1);
}

#[tokio::test]
async fn test_claim_requires_approved_status() {
    let h = Harness::new(join_template(true, false)).await;
    let (_, b, _) = fan_out(&h).await;
    let d = h.complete(b, &["b-done"]).await.next_action_guids[0];

    let err = h
        .sequencer
        .claim_governance_action(ENGINE, d)
        .await
        .unwrap_err();
    assert!(matches!(err, SequencerError::InvalidState(_)));
}

#[tokio::test]
async fn test_completion_by_non_claimant_is_rejected() {
    let h = Harness::new(linear_template(2)).await;
    let first = h.initiate().await;
    h.sequencer
        .claim_governance_action(ENGINE, first)
        .await
        .unwrap();

    let err = h
        .sequencer
        .record_completion("engine-2", first, CompletionReport::actioned(["done"]))
        .await
        .unwrap_err();
    match err {
        SequencerError::UnauthorizedCaller { caller, claimant, .. } => {
            assert_eq!(caller, "engine-2");
            assert_eq!(claimant.as_deref(), Some(ENGINE));
        }
        other => panic!("unexpected error {:?}", other),
    }

    let action = h.action(first).await;
    assert_eq!(action.status, GovernanceActionStatus::Waiting);
    assert!(h.sequencer.get_run_actions(ADMIN, first).await.unwrap().len() == 1);
}

#[tokio::test]
async fn test_completion_rules() {
    let h = Harness::new(linear_template(1)).await;
    let first = h.initiate().await;

    // Unclaimed: nobody is the claimant
    let err = h
        .sequencer
        .record_completion(ENGINE, first, CompletionReport::actioned(["done"]))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::UserNotAuthorized);

    h.sequencer
        .claim_governance_action(ENGINE, first)
        .await
        .unwrap();
    let err = h
        .sequencer
        .record_completion(ENGINE, first, CompletionReport::new(GovernanceActionStatus::InProgress))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidParameter);

    let outcome = h
        .sequencer
        .record_completion(
            ENGINE,
            first,
            CompletionReport::new(GovernanceActionStatus::Failed).with_message("engine crashed"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.action.status, GovernanceActionStatus::Failed);
    assert_eq!(outcome.action.completion_message.as_deref(), Some("engine crashed"));
    assert!(outcome.action.completion_time.is_some());

    let err = h
        .sequencer
        .record_completion(ENGINE, first, CompletionReport::actioned(["done"]))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidState);
}

#[tokio::test]
async fn test_status_updates_follow_the_state_machine() {
    let h = Harness::new(join_template(true, false)).await;
    let (a, b, _) = fan_out(&h).await;
    let d = h.complete(b, &["b-done"]).await.next_action_guids[0];

    // Manual approval of an unclaimed instance is open to anyone
    let approved = h
        .sequencer
        .update_governance_action_status("steward", d, GovernanceActionStatus::Approved)
        .await
        .unwrap();
    assert_eq!(approved.status, GovernanceActionStatus::Approved);

    let err = h
        .sequencer
        .update_governance_action_status("steward", a, GovernanceActionStatus::InProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, SequencerError::UnauthorizedCaller { .. }));

    h.sequencer
        .claim_governance_action(ENGINE, d)
        .await
        .unwrap();
    let running = h
        .sequencer
        .update_governance_action_status(ENGINE, d, GovernanceActionStatus::InProgress)
        .await
        .unwrap();
    assert_eq!(running.status, GovernanceActionStatus::InProgress);

    let err = h
        .sequencer
        .update_governance_action_status(ENGINE, d, GovernanceActionStatus::Actioned)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidState);

    let err = h
        .sequencer
        .update_governance_action_status(ENGINE, d, GovernanceActionStatus::Waiting)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidState);

    let err = h
        .sequencer
        .update_governance_action_status("engine-2", d, GovernanceActionStatus::InProgress)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::UserNotAuthorized);
}

#[tokio::test]
async fn test_claimable_actions_respect_start_time() {
    let template = ProcessTemplate::new("Delayed", "Later").with_action_type(step("Later").waiting(60));
    let h = Harness::new(template).await;

    let delayed = h.initiate().await;
    let claimable = h
        .sequencer
        .find_claimable_actions(ENGINE, "QualityEngine")
        .await
        .unwrap();
    assert!(claimable.is_empty());

    let mut request = InitiateProcessRequest::new("Delayed");
    request.start_time = Some(Utc::now() - Duration::minutes(1));
    let due = h.sequencer.initiate_process(ADMIN, request).await.unwrap();

    let claimable: Vec<Uuid> = h
        .sequencer
        .find_claimable_actions(ENGINE, "QualityEngine")
        .await
        .unwrap()
        .iter()
        .map(|a| a.guid)
        .collect();
    assert_eq!(claimable, vec![due]);
    assert_ne!(due, delayed);

    h.sequencer
        .claim_governance_action(ENGINE, due)
        .await
        .unwrap();
    assert!(h
        .sequencer
        .find_claimable_actions(ENGINE, "QualityEngine")
        .await
        .unwrap()
        .is_empty());
}

// =============================================================================
// PROPAGATION
// =============================================================================

#[tokio::test]
async fn test_request_parameters_overlay_template_defaults() {
    let template = ProcessTemplate::new("Params", "A")
        .with_action_type(step("A").with_default_parameter("depth", "1"))
        .with_action_type(
            step("B")
                .with_default_parameter("depth", "1")
                .with_default_parameter("mode", "full"),
        )
        .with_next(NextActionDefinition::new("A", "B", None));
    let h = Harness::new(template).await;

    let mut request = InitiateProcessRequest::new("Params");
    request.request_parameters = RequestParameters::from([("depth".to_string(), "2".to_string())]);
    let a = h.sequencer.initiate_process(ADMIN, request).await.unwrap();
    assert_eq!(h.action(a).await.request_parameters["depth"], "2");

    h.sequencer
        .claim_governance_action(ENGINE, a)
        .await
        .unwrap();
    let mut report = CompletionReport::actioned(Vec::<String>::new());
    report.request_parameters = RequestParameters::from([("depth".to_string(), "3".to_string())]);
    let outcome = h.sequencer.record_completion(ENGINE, a, report).await.unwrap();

    let b = h.action(outcome.next_action_guids[0]).await;
    assert_eq!(b.request_parameters["depth"], "3");
    assert_eq!(b.request_parameters["mode"], "full");
}

#[tokio::test]
async fn test_sources_targets_and_originator_are_inherited() {
    let h = Harness::new(linear_template(2)).await;
    let source = h.referenceable().await;
    let asset = h.referenceable().await;
    let report_target = h.referenceable().await;

    let mut request = InitiateProcessRequest::new("Linear");
    request.request_sources = vec![NewRequestSource {
        source_guid: source,
        origin_name: Some("scanner".to_string()),
    }];
    request.action_targets = vec![NewActionTarget::new("asset", asset)];
    request.originator = Originator {
        service_name: Some("catalog".to_string()),
        engine_name: None,
    };
    let first = h.sequencer.initiate_process(ADMIN, request).await.unwrap();

    h.sequencer
        .claim_governance_action(ENGINE, first)
        .await
        .unwrap();
    let mut report = CompletionReport::actioned(["done"]);
    report.new_action_targets = vec![
        NewActionTarget::new("asset", asset),
        NewActionTarget::new("report", report_target),
    ];
    let outcome = h.sequencer.record_completion(ENGINE, first, report).await.unwrap();
    let next = outcome.next_action_guids[0];

    let sources = h.sequencer.get_request_sources(ADMIN, next).await.unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].source_guid, source);
    assert_eq!(sources[0].origin_name.as_deref(), Some("scanner"));

    let targets = h.sequencer.get_action_targets(ADMIN, next).await.unwrap();
    let names: Vec<&str> = targets.iter().map(|t| t.action_target_name.as_str()).collect();
    assert_eq!(names, vec!["asset", "report"]);
    assert!(targets.iter().all(|t| t.status.is_none()));

    assert_eq!(h.action(next).await.originator_service_name.as_deref(), Some("catalog"));
}

#[tokio::test]
async fn test_completion_stamps_only_unstamped_targets() {
    let h = Harness::new(linear_template(1)).await;
    let asset = h.referenceable().await;
    let glossary = h.referenceable().await;

    let mut request = InitiateProcessRequest::new("Linear");
    request.action_targets = vec![
        NewActionTarget::new("asset", asset),
        NewActionTarget::new("glossary", glossary),
    ];
    let first = h.sequencer.initiate_process(ADMIN, request).await.unwrap();
    h.sequencer
        .claim_governance_action(ENGINE, first)
        .await
        .unwrap();

    let targets = h.sequencer.get_action_targets(ADMIN, first).await.unwrap();
    let glossary_target = targets
        .iter()
        .find(|t| t.target_guid == glossary)
        .unwrap();

    let err = h
        .sequencer
        .update_action_target_status(
            "engine-2",
            glossary_target.relationship_guid,
            ActionTargetUpdate {
                status: GovernanceActionStatus::Failed,
                start_time: None,
                completion_time: None,
                completion_message: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SequencerError::UnauthorizedCaller { .. }));

    let updated = h
        .sequencer
        .update_action_target_status(
            ENGINE,
            glossary_target.relationship_guid,
            ActionTargetUpdate {
                status: GovernanceActionStatus::Failed,
                start_time: None,
                completion_time: Some(Utc::now()),
                completion_message: Some("term locked".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.status, Some(GovernanceActionStatus::Failed));

    h.sequencer
        .record_completion(ENGINE, first, CompletionReport::actioned(["done"]).with_message("ok"))
        .await
        .unwrap();

    let targets = h.sequencer.get_action_targets(ADMIN, first).await.unwrap();
    let asset_target = targets.iter().find(|t| t.target_guid == asset).unwrap();
    let glossary_target = targets.iter().find(|t| t.target_guid == glossary).unwrap();

    assert_eq!(asset_target.status, Some(GovernanceActionStatus::Actioned));
    assert_eq!(asset_target.completion_message.as_deref(), Some("ok"));
    assert!(asset_target.completion_time.is_some());
    assert_eq!(glossary_target.status, Some(GovernanceActionStatus::Failed));
    assert_eq!(glossary_target.completion_message.as_deref(), Some("term locked"));
}

// =============================================================================
// ERRORS AND RECOVERY
// =============================================================================

#[tokio::test]
async fn test_unknown_process_is_invalid_parameter() {
    let h = Harness::new(linear_template(1)).await;
    let err = h
        .sequencer
        .initiate_process(ADMIN, InitiateProcessRequest::new("Missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, SequencerError::UnknownProcess(_)));
    assert_eq!(err.category(), ErrorCategory::InvalidParameter);
}

#[tokio::test]
async fn test_invalid_requests_are_rejected_before_any_lookup() {
    let h = Harness::new(linear_template(1)).await;

    let err = h
        .sequencer
        .initiate_process("", InitiateProcessRequest::new("Linear"))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidParameter);

    let err = h
        .sequencer
        .initiate_process(ADMIN, InitiateProcessRequest::new(" Linear "))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidParameter);
}

#[tokio::test]
async fn test_missing_executor_fails_the_firing() {
    let template = ProcessTemplate::new("Manual", "A")
        .with_action_type(step("A"))
        .with_action_type(ActionTypeDefinition::new("Human"))
        .with_next(NextActionDefinition::new("A", "Human", None));
    let h = Harness::new(template).await;
    let a = h.initiate().await;

    h.sequencer
        .claim_governance_action(ENGINE, a)
        .await
        .unwrap();
    let err = h
        .sequencer
        .record_completion(ENGINE, a, CompletionReport::actioned(["done"]))
        .await
        .unwrap_err();
    assert!(matches!(err, SequencerError::NoExecutor(ref name) if name == "Human"));

    // The completion itself is kept
    assert_eq!(h.action(a).await.status, GovernanceActionStatus::Actioned);
    assert!(h.actions_of_type(a, "Human").await.is_empty());
}

#[tokio::test]
async fn test_failed_target_link_rolls_back_new_instance() {
    let h = Harness::new(linear_template(1)).await;
    let asset = h.referenceable().await;
    h.repo.fail_relationships_of(RelationshipKind::TargetForAction).await;

    let mut request = InitiateProcessRequest::new("Linear");
    request.action_targets = vec![NewActionTarget::new("asset", asset)];
    let err = h
        .sequencer
        .initiate_process(ADMIN, request.clone())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.repo.count_entities(EntityKind::GovernanceAction).await, 0);
    assert_eq!(h.audit.count(AuditAction::ActionRolledBack, None).await, 1);

    h.repo.clear_failures().await;
    h.sequencer.initiate_process(ADMIN, request).await.unwrap();
    assert_eq!(h.repo.count_entities(EntityKind::GovernanceAction).await, 1);
}

#[tokio::test]
async fn test_failed_provenance_link_rolls_back_downstream_instance() {
    let h = Harness::new(linear_template(2)).await;
    let first = h.initiate().await;
    h.sequencer
        .claim_governance_action(ENGINE, first)
        .await
        .unwrap();
    h.repo.fail_relationships_of(RelationshipKind::NextGovernanceAction).await;

    let err = h
        .sequencer
        .record_completion(ENGINE, first, CompletionReport::actioned(["done"]))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::PropertyServer);
    assert_eq!(h.repo.count_entities(EntityKind::GovernanceAction).await, 1);
    assert_eq!(h.action(first).await.status, GovernanceActionStatus::Actioned);
}

#[tokio::test]
async fn test_two_pending_instances_are_ambiguous() {
    let h = Harness::new(join_template(true, false)).await;
    let (a, b, c) = fan_out(&h).await;
    h.complete(b, &["b-done"]).await;

    let pending = h.actions_of_type(a, "D").await.remove(0);
    h.repo
        .create_entity(ADMIN, EntityKind::GovernanceAction, pending.to_properties().unwrap())
        .await
        .unwrap();

    h.sequencer
        .claim_governance_action(ENGINE, c)
        .await
        .unwrap();
    let err = h
        .sequencer
        .record_completion(ENGINE, c, CompletionReport::actioned(["c-done"]))
        .await
        .unwrap_err();
    assert!(matches!(err, SequencerError::AmbiguousPendingAction { count: 2, .. }));
}

#[tokio::test]
async fn test_instances_hidden_from_the_caller_are_not_reused() {
    let h = Harness::new(join_template(true, false)).await;
    let (a, b, c) = fan_out(&h).await;
    let d = h.complete(b, &["b-done"]).await.next_action_guids[0];
    h.repo.hide_entity_from(d, ENGINE).await;

    let after_c = h.complete(c, &["c-done"]).await;
    assert_eq!(after_c.next_action_guids.len(), 1);
    assert_ne!(after_c.next_action_guids[0], d);

    // Both deliveries remain partial joins
    for instance in h.actions_of_type(a, "D").await {
        assert_eq!(instance.status, GovernanceActionStatus::Requested);
    }
    assert_eq!(h.actions_of_type(a, "D").await.len(), 2);
}

#[tokio::test]
async fn test_denied_user_gets_not_authorized() {
    let h = Harness::new(linear_template(1)).await;
    h.repo.deny_user("mallory").await;

    let err = h
        .sequencer
        .initiate_process("mallory", InitiateProcessRequest::new("Linear"))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::UserNotAuthorized);
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_join_deliveries_create_one_instance() {
    for _ in 0..10 {
        let h = Harness::new(join_template(true, false)).await;
        let (a, b, c) = fan_out(&h).await;
        for guid in [b, c] {
            h.sequencer
                .claim_governance_action(ENGINE, guid)
                .await
                .unwrap();
        }

        let handles: Vec<_> = [(b, "b-done"), (c, "c-done")]
            .into_iter()
            .map(|(guid, guard)| {
                let sequencer = h.sequencer.clone();
                tokio::spawn(async move {
                    sequencer
                        .record_completion(ENGINE, guid, CompletionReport::actioned([guard]))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let joined = h.actions_of_type(a, "D").await;
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].status, GovernanceActionStatus::Approved);
        assert_eq!(h.audit.count(AuditAction::ActionApproved, Some(joined[0].guid)).await, 1);
    }
}
