//! Request, configuration and result types for agent creation

use crate::error::DeployError;
use crate::store::AgentRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// When an agent runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    #[default]
    Manual,
    Event,
    Cron,
}

/// The document pinned for an agent.
///
/// Its identity is its CID. Unknown fields are rejected rather than silently
/// dropped from the pinned document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered module identifiers
    pub modules: Vec<String>,
    #[serde(default)]
    pub trigger: Trigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.name.trim().is_empty() {
            return Err(DeployError::validation("name must not be blank"));
        }
        if self.modules.is_empty() {
            return Err(DeployError::validation("modules must not be empty"));
        }
        if self.modules.iter().any(|m| m.trim().is_empty()) {
            return Err(DeployError::validation("module identifiers must not be blank"));
        }
        if self.owner.as_deref().is_some_and(|o| o.trim().is_empty()) {
            return Err(DeployError::validation("owner must not be blank"));
        }
        Ok(())
    }
}

/// Body of a create-agent request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateAgentRequest {
    pub name: Option<String>,
    pub config: Option<Value>,
    pub owner: Option<String>,
}

impl CreateAgentRequest {
    /// Resolve the request into the config that will be pinned.
    ///
    /// `name` and `owner` may come from the request or from the config; when
    /// both are given they must agree.
    pub fn into_agent_config(self) -> Result<AgentConfig, DeployError> {
        let Some(config) = self.config else {
            return Err(DeployError::validation("Missing config"));
        };
        let Value::Object(mut fields) = config else {
            return Err(DeployError::validation("config must be a JSON object"));
        };

        merge_field(&mut fields, "name", self.name)?;
        merge_field(&mut fields, "owner", self.owner)?;

        if !fields.contains_key("name") {
            return Err(DeployError::validation("Missing name"));
        }

        let config: AgentConfig = serde_json::from_value(Value::Object(fields))
            .map_err(|e| DeployError::validation(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

fn merge_field(
    fields: &mut serde_json::Map<String, Value>,
    key: &str,
    from_request: Option<String>,
) -> Result<(), DeployError> {
    let Some(value) = from_request else {
        return Ok(());
    };

    match fields.get(key) {
        None | Some(Value::Null) => {
            fields.insert(key.to_string(), Value::String(value));
            Ok(())
        }
        Some(Value::String(existing)) if *existing == value => Ok(()),
        Some(_) => Err(DeployError::validation(format!(
            "{key} does not match config.{key}"
        ))),
    }
}

/// Successful creation result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedAgent {
    pub agent: AgentRecord,
    pub tx_hash: String,
    /// Absent when the registration event could not be read
    pub agent_id: Option<u64>,
    /// Id of the enqueued initial-run job
    pub job_id: String,
}
