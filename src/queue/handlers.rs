//! Job handlers

use super::{Job, JobHandler, JobPayload};
use crate::content::ContentClient;
use crate::error::DeployError;
use crate::pipeline::AgentConfig;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

/// First execution of a newly created agent.
///
/// Dereferences the agent's CID and checks that it is a well-formed agent
/// configuration. Running the configured modules is up to downstream
/// executors; the summary returned here is stored as the job result.
#[derive(Clone)]
pub struct InitialRunHandler {
    content: ContentClient,
}

impl InitialRunHandler {
    pub fn new(content: ContentClient) -> Self {
        Self { content }
    }
}

#[async_trait]
impl JobHandler for InitialRunHandler {
    async fn handle(&self, job: &Job) -> Result<Value, DeployError> {
        let JobPayload::InitialRun(run) = &job.payload;

        let document = self.content.fetch(&run.cid).await?;
        let config: AgentConfig = serde_json::from_value(document).map_err(|e| {
            DeployError::validation(format!("{} is not an agent config: {e}", run.cid))
        })?;
        config.validate()?;

        info!(
            agent_id = run.agent_id,
            cid = %run.cid,
            modules = config.modules.len(),
            "Executing agent"
        );

        Ok(json!({
            "success": true,
            "agentId": run.agent_id,
            "cid": run.cid,
            "name": config.name,
            "trigger": config.trigger,
            "modules": config.modules,
        }))
    }
}
