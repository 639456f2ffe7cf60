//! Caller-facing request DTOs

use crate::action::models::{NewActionTarget, NewRequestSource, Originator, RequestParameters};
use crate::action::status::GovernanceActionStatus;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Names and guards: printable, no leading or trailing whitespace
static LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s\x00-\x1f](?:[^\x00-\x1f]*[^\s\x00-\x1f])?$").expect("label pattern is valid")
});

pub(crate) fn validate_qualified_name(name: &str) -> Result<(), ValidationError> {
    if !LABEL.is_match(name) {
        let mut err = ValidationError::new("invalid_qualified_name");
        err.message = Some("Qualified name must not be blank or padded with whitespace".into());
        return Err(err);
    }
    Ok(())
}

pub(crate) fn validate_guard(guard: &str) -> Result<(), ValidationError> {
    if !LABEL.is_match(guard) {
        let mut err = ValidationError::new("invalid_guard");
        err.message = Some(format!("Invalid guard '{}'", guard).into());
        return Err(err);
    }
    Ok(())
}

fn validate_guards(guards: &Vec<String>) -> Result<(), ValidationError> {
    guards.iter().try_for_each(|g| validate_guard(g))
}

/// Start a run of a named governance action process
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitiateProcessRequest {
    #[validate(length(min = 1, message = "Process qualified name is required"))]
    #[validate(custom(function = "validate_qualified_name"))]
    pub process_qualified_name: String,
    #[serde(default)]
    pub request_sources: Vec<NewRequestSource>,
    #[serde(default)]
    #[validate(nested)]
    pub action_targets: Vec<NewActionTarget>,
    #[serde(default)]
    pub request_parameters: RequestParameters,
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub originator: Originator,
}

impl InitiateProcessRequest {
    pub fn new(process_qualified_name: impl Into<String>) -> Self {
        Self {
            process_qualified_name: process_qualified_name.into(),
            ..Default::default()
        }
    }
}

/// Start a chain from a single governance action type, outside any process
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitiateActionTypeRequest {
    #[validate(length(min = 1, message = "Action type qualified name is required"))]
    #[validate(custom(function = "validate_qualified_name"))]
    pub action_type_qualified_name: String,
    #[serde(default)]
    pub request_sources: Vec<NewRequestSource>,
    #[serde(default)]
    #[validate(nested)]
    pub action_targets: Vec<NewActionTarget>,
    #[serde(default)]
    pub request_parameters: RequestParameters,
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub originator: Originator,
}

impl InitiateActionTypeRequest {
    pub fn new(action_type_qualified_name: impl Into<String>) -> Self {
        Self {
            action_type_qualified_name: action_type_qualified_name.into(),
            ..Default::default()
        }
    }
}

/// Outcome reported by the engine that ran a governance action
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReport {
    pub status: GovernanceActionStatus,
    #[serde(default)]
    #[validate(custom(function = "validate_guards"))]
    pub output_guards: Vec<String>,
    #[serde(default)]
    #[validate(nested)]
    pub new_action_targets: Vec<NewActionTarget>,
    #[serde(default)]
    pub request_parameters: RequestParameters,
    pub completion_message: Option<String>,
}

impl CompletionReport {
    pub fn new(status: GovernanceActionStatus) -> Self {
        Self {
            status,
            output_guards: Vec::new(),
            new_action_targets: Vec::new(),
            request_parameters: RequestParameters::new(),
            completion_message: None,
        }
    }

    pub fn actioned<I, S>(guards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(GovernanceActionStatus::Actioned).with_guards(guards)
    }

    pub fn with_guards<I, S>(mut self, guards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_guards = guards.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.completion_message = Some(message.into());
        self
    }
}
