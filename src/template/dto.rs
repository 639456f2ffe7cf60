//! Process template authoring DTOs

use crate::action::models::RequestParameters;
use crate::action::requests::{validate_guard, validate_qualified_name};
use crate::error::{invalid_parameter, SequencerResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use validator::Validate;

/// A complete governance action process: its action types, the edges between
/// them and the entry point.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProcessTemplate {
    #[validate(length(min = 1, message = "Process qualified name is required"))]
    #[validate(custom(function = "validate_qualified_name"))]
    pub qualified_name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub domain_identifier: i32,
    #[validate(length(min = 1, message = "A process needs at least one action type"))]
    #[validate(nested)]
    pub action_types: Vec<ActionTypeDefinition>,
    #[serde(default)]
    #[validate(nested)]
    pub next_actions: Vec<NextActionDefinition>,
    #[validate(nested)]
    pub entry_point: EntryPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ActionTypeDefinition {
    #[validate(length(min = 1, message = "Action type qualified name is required"))]
    #[validate(custom(function = "validate_qualified_name"))]
    pub qualified_name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub domain_identifier: i32,
    #[serde(default)]
    pub wait_time_minutes: u32,
    #[serde(default)]
    pub ignore_multiple_triggers: bool,
    #[validate(nested)]
    pub executor: Option<ExecutorDefinition>,
}

/// Engine and request type that run an action type
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorDefinition {
    #[validate(length(min = 1, message = "Governance engine name is required"))]
    #[validate(custom(function = "validate_qualified_name"))]
    pub governance_engine: String,
    #[validate(length(min = 1, message = "Request type is required"))]
    pub request_type: String,
    #[serde(default)]
    pub request_parameters: RequestParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NextActionDefinition {
    pub from: String,
    pub to: String,
    #[validate(custom(function = "validate_guard"))]
    pub guard: Option<String>,
    #[serde(default)]
    pub mandatory_guard: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EntryPoint {
    pub action_type: String,
    #[validate(custom(function = "validate_guard"))]
    pub guard: Option<String>,
}

impl ActionTypeDefinition {
    pub fn new(qualified_name: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            display_name: None,
            description: None,
            domain_identifier: 0,
            wait_time_minutes: 0,
            ignore_multiple_triggers: false,
            executor: None,
        }
    }

    pub fn executed_by(mut self, engine: impl Into<String>, request_type: impl Into<String>) -> Self {
        self.executor = Some(ExecutorDefinition {
            governance_engine: engine.into(),
            request_type: request_type.into(),
            request_parameters: RequestParameters::new(),
        });
        self
    }

    pub fn with_default_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(executor) = self.executor.as_mut() {
            executor.request_parameters.insert(key.into(), value.into());
        }
        self
    }

    pub fn ignoring_multiple_triggers(mut self) -> Self {
        self.ignore_multiple_triggers = true;
        self
    }

    pub fn waiting(mut self, minutes: u32) -> Self {
        self.wait_time_minutes = minutes;
        self
    }
}

impl NextActionDefinition {
    pub fn new(from: impl Into<String>, to: impl Into<String>, guard: Option<&str>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            guard: guard.map(str::to_string),
            mandatory_guard: false,
        }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory_guard = true;
        self
    }
}

impl ProcessTemplate {
    pub fn new(qualified_name: impl Into<String>, entry_action_type: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            display_name: None,
            description: None,
            domain_identifier: 0,
            action_types: Vec::new(),
            next_actions: Vec::new(),
            entry_point: EntryPoint {
                action_type: entry_action_type.into(),
                guard: None,
            },
        }
    }

    pub fn with_entry_guard(mut self, guard: impl Into<String>) -> Self {
        self.entry_point.guard = Some(guard.into());
        self
    }

    pub fn with_action_type(mut self, action_type: ActionTypeDefinition) -> Self {
        self.action_types.push(action_type);
        self
    }

    pub fn with_next(mut self, next: NextActionDefinition) -> Self {
        self.next_actions.push(next);
        self
    }

    pub fn action_type(&self, qualified_name: &str) -> Option<&ActionTypeDefinition> {
        self.action_types
            .iter()
            .find(|t| t.qualified_name == qualified_name)
    }

    /// Graph-level checks the field validators cannot express. Returns all
    /// problems found.
    pub fn structural_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut names = HashSet::new();

        for action_type in &self.action_types {
            if !names.insert(action_type.qualified_name.as_str()) {
                errors.push(format!(
                    "Duplicate action type '{}'",
                    action_type.qualified_name
                ));
            }
        }

        if !names.contains(self.entry_point.action_type.as_str()) {
            errors.push(format!(
                "Entry point references unknown action type '{}'",
                self.entry_point.action_type
            ));
        }

        for next in &self.next_actions {
            for end in [&next.from, &next.to] {
                if !names.contains(end.as_str()) {
                    errors.push(format!(
                        "Next action {} -> {} references unknown action type '{}'",
                        next.from, next.to, end
                    ));
                }
            }
            if next.mandatory_guard && next.guard.is_none() {
                errors.push(format!(
                    "Mandatory next action {} -> {} has no guard",
                    next.from, next.to
                ));
            }
        }

        errors
    }

    /// Field and structural validation
    pub fn validate_template(&self) -> SequencerResult<()> {
        self.validate()?;

        let errors = self.structural_errors();
        if !errors.is_empty() {
            return Err(invalid_parameter(format!(
                "Invalid process template '{}': {}",
                self.qualified_name,
                errors.join("; ")
            )));
        }
        Ok(())
    }
}
