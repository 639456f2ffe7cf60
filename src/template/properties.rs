//! Stored property views of template entities and relationships

use crate::action::models::RequestParameters;
use serde::{Deserialize, Serialize};

/// `GovernanceActionProcess` entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessProperties {
    pub qualified_name: String,
    #[serde(default)]
    pub domain_identifier: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `GovernanceActionType` entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionTypeProperties {
    pub qualified_name: String,
    #[serde(default)]
    pub domain_identifier: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Minutes between request and earliest start
    #[serde(default)]
    pub wait_time: u32,
    #[serde(default)]
    pub ignore_multiple_triggers: bool,
}

/// `GovernanceEngine` entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineProperties {
    pub qualified_name: String,
}

/// `GovernanceActionProcessFlow` relationship
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessFlowProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
}

/// `NextGovernanceActionType` relationship
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextActionTypeProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    #[serde(default)]
    pub mandatory_guard: bool,
}

/// `GovernanceActionTypeExecutor` relationship
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorProperties {
    pub request_type: String,
    #[serde(default)]
    pub request_parameters: RequestParameters,
}
