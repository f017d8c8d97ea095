//! Agent creation pipeline
//!
//! One request runs `Validating → Pinning → Registering → Persisting →
//! Enqueuing → Done`. The stages run strictly in order and nothing is rolled
//! back: content pinned before a registration failure stays pinned, and a
//! registration confirmed before a persistence failure stays on chain. A
//! failure therefore carries every artifact already produced so an operator
//! can finish the job by hand. The pipeline itself is never retried.

pub mod model;

pub use model::{AgentConfig, CreateAgentRequest, CreatedAgent, Trigger};

use crate::content::{ContentClient, AGENT_CONFIG_FILENAME};
use crate::error::{sanitize_error_message, DeployError, ErrorKind};
use crate::observability::metrics;
use crate::pipeline_span;
use crate::queue::{InitialRun, JobPayload, JobQueue};
use crate::registry::{RegistrationReceipt, RegistryClient};
use crate::store::{AgentRecord, AgentStore, NewAgentRecord};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn, Instrument};

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Validating,
    Pinning,
    Registering,
    Persisting,
    Enqueuing,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validating => "validating",
            Stage::Pinning => "pinning",
            Stage::Registering => "registering",
            Stage::Persisting => "persisting",
            Stage::Enqueuing => "enqueuing",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifacts produced before a failure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialArtifacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<i64>,
}

impl PartialArtifacts {
    /// Pick up artifacts that only the failing stage knew about, such as the
    /// hash of a submitted transaction that was never confirmed
    fn absorb(&mut self, error: &DeployError) {
        if let DeployError::Chain(e) = error {
            if self.tx_hash.is_none() {
                self.tx_hash = e.tx_hash().map(str::to_string);
            }
        }
    }
}

/// A pipeline run that stopped at `stage`
#[derive(Debug, Error)]
#[error("{stage} failed: {error}")]
pub struct PipelineFailure {
    pub stage: Stage,
    pub error: DeployError,
    pub partial: PartialArtifacts,
}

impl PipelineFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn status_code(&self) -> u16 {
        self.error.status_code()
    }

    pub fn to_payload(&self) -> FailurePayload {
        FailurePayload {
            error: sanitize_error_message(&self.error.to_string()),
            stage: self.stage,
            kind: self.kind(),
            partial: self.partial.clone(),
        }
    }
}

/// JSON body for a failed creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailurePayload {
    pub error: String,
    pub stage: Stage,
    pub kind: ErrorKind,
    #[serde(flatten)]
    pub partial: PartialArtifacts,
}

/// Orchestrator states; each carries what the next stage needs
enum PipelineState {
    Validating(CreateAgentRequest),
    Pinning(AgentConfig),
    Registering {
        config: AgentConfig,
        cid: String,
    },
    Persisting {
        config: AgentConfig,
        cid: String,
        receipt: RegistrationReceipt,
    },
    Enqueuing {
        record: AgentRecord,
        receipt: RegistrationReceipt,
    },
    Done(CreatedAgent),
}

impl PipelineState {
    fn stage(&self) -> Stage {
        match self {
            PipelineState::Validating(_) => Stage::Validating,
            PipelineState::Pinning(_) => Stage::Pinning,
            PipelineState::Registering { .. } => Stage::Registering,
            PipelineState::Persisting { .. } => Stage::Persisting,
            PipelineState::Enqueuing { .. } => Stage::Enqueuing,
            PipelineState::Done(_) => Stage::Done,
        }
    }

    fn artifacts(&self) -> PartialArtifacts {
        match self {
            PipelineState::Validating(_) | PipelineState::Pinning(_) => PartialArtifacts::default(),
            PipelineState::Registering { cid, .. } => PartialArtifacts {
                cid: Some(cid.clone()),
                ..PartialArtifacts::default()
            },
            PipelineState::Persisting { cid, receipt, .. } => PartialArtifacts {
                cid: Some(cid.clone()),
                tx_hash: Some(receipt.tx_hash.clone()),
                agent_id: receipt.agent_id,
                record_id: None,
            },
            PipelineState::Enqueuing { record, receipt } => PartialArtifacts {
                cid: Some(record.cid.clone()),
                tx_hash: Some(receipt.tx_hash.clone()),
                agent_id: receipt.agent_id,
                record_id: Some(record.id),
            },
            PipelineState::Done(created) => PartialArtifacts {
                cid: Some(created.agent.cid.clone()),
                tx_hash: Some(created.tx_hash.clone()),
                agent_id: created.agent_id,
                record_id: Some(created.agent.id),
            },
        }
    }
}

/// Creates agents and looks them up
#[derive(Clone)]
pub struct AgentPipeline {
    content: ContentClient,
    registry: RegistryClient,
    store: Arc<dyn AgentStore>,
    queue: Arc<dyn JobQueue>,
}

impl AgentPipeline {
    pub fn new(
        content: ContentClient,
        registry: RegistryClient,
        store: Arc<dyn AgentStore>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            content,
            registry,
            store,
            queue,
        }
    }

    pub fn content(&self) -> &ContentClient {
        &self.content
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// Run the full pipeline for one request
    pub async fn create_agent(
        &self,
        request: CreateAgentRequest,
    ) -> Result<CreatedAgent, PipelineFailure> {
        let span = pipeline_span!(
            agent_name = request.name.as_deref().unwrap_or(""),
            owner = request.owner.as_deref().unwrap_or("")
        );
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: CreateAgentRequest) -> Result<CreatedAgent, PipelineFailure> {
        metrics().pipeline_started();
        let started = Instant::now();
        let mut state = PipelineState::Validating(request);

        loop {
            if let PipelineState::Done(created) = state {
                metrics().pipeline_completed(started.elapsed());
                info!(
                    record_id = created.agent.id,
                    cid = %created.agent.cid,
                    tx_hash = %created.tx_hash,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Agent created"
                );
                return Ok(created);
            }

            let stage = state.stage();
            let mut partial = state.artifacts();

            state = match self.advance(state).await {
                Ok(next) => next,
                Err(error) => {
                    partial.absorb(&error);
                    metrics().pipeline_failed(stage.as_str(), started.elapsed());
                    let failure = PipelineFailure {
                        stage,
                        error,
                        partial,
                    };
                    log_failure(&failure);
                    return Err(failure);
                }
            };
        }
    }

    async fn advance(&self, state: PipelineState) -> Result<PipelineState, DeployError> {
        match state {
            PipelineState::Validating(request) => {
                let config = request.into_agent_config()?;
                Ok(PipelineState::Pinning(config))
            }
            PipelineState::Pinning(config) => {
                let document = serde_json::to_value(&config)
                    .map_err(|e| DeployError::internal(format!("config not serializable: {e}")))?;
                let cid = self.content.pin(&document, AGENT_CONFIG_FILENAME).await?;
                Ok(PipelineState::Registering { config, cid })
            }
            PipelineState::Registering { config, cid } => {
                let receipt = self.registry.register(&cid).await?;
                metrics().registration_confirmed(!receipt.is_unindexed());
                Ok(PipelineState::Persisting {
                    config,
                    cid,
                    receipt,
                })
            }
            PipelineState::Persisting {
                config,
                cid,
                receipt,
            } => {
                let record = self
                    .store
                    .insert(NewAgentRecord {
                        owner: config.owner,
                        cid,
                        name: Some(config.name),
                        tx_hash: receipt.tx_hash.clone(),
                        chain_agent_id: receipt.agent_id,
                    })
                    .await?;
                Ok(PipelineState::Enqueuing { record, receipt })
            }
            PipelineState::Enqueuing { record, receipt } => {
                let job_id = self
                    .queue
                    .enqueue(JobPayload::InitialRun(InitialRun {
                        agent_id: record.id,
                        cid: record.cid.clone(),
                        owner: record.owner.clone(),
                    }))
                    .await?;
                metrics().job_enqueued();

                Ok(PipelineState::Done(CreatedAgent {
                    agent: record,
                    tx_hash: receipt.tx_hash,
                    agent_id: receipt.agent_id,
                    job_id,
                }))
            }
            done @ PipelineState::Done(_) => Ok(done),
        }
    }

    /// Point lookup of a persisted agent
    pub async fn get_agent(&self, id: i64) -> Result<AgentRecord, DeployError> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| DeployError::not_found(format!("agent {id}")))
    }

    /// Re-read the registration of a persisted agent from the chain.
    ///
    /// Records are never updated; the fresh receipt is returned to the
    /// caller, which is how an unindexed agent gets its chain id.
    pub async fn reconcile_agent(&self, id: i64) -> Result<RegistrationReceipt, DeployError> {
        let record = self.get_agent(id).await?;
        let receipt = self.registry.reconcile(&record.tx_hash).await?;

        if record.chain_agent_id.is_none() && receipt.agent_id.is_some() {
            info!(record_id = id, agent_id = ?receipt.agent_id, "Reconciled unindexed agent");
        }
        Ok(receipt)
    }
}

fn log_failure(failure: &PipelineFailure) {
    let message = sanitize_error_message(&failure.error.to_string());
    match failure.stage {
        Stage::Validating => warn!(stage = %failure.stage, error = %message, "Request rejected"),
        Stage::Pinning => error!(stage = %failure.stage, error = %message, "Agent creation failed"),
        _ => error!(
            stage = %failure.stage,
            error = %message,
            cid = ?failure.partial.cid,
            tx_hash = ?failure.partial.tx_hash,
            agent_id = ?failure.partial.agent_id,
            record_id = ?failure.partial.record_id,
            "Agent creation failed after external side effects"
        ),
    }
}
