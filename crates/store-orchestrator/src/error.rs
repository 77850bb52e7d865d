use thiserror::Error;

use crate::models::TenantId;
use crate::services::admission::AdmissionError;
use crate::services::pipeline::ProvisionError;
use crate::substrate::SubstrateError;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("Unsupported engine: {0}")]
    UnsupportedEngine(String),

    #[error("Namespace {0} already exists")]
    ConflictExists(String),

    #[error("Provisioning failed at {step}: {source}")]
    PipelineStepFailed {
        step: &'static str,
        #[source]
        source: SubstrateError,
    },

    #[error("Provisioning task ended abnormally: {0}")]
    ProvisioningAborted(String),

    #[error("Store {0} not found")]
    NotFound(TenantId),

    #[error("Store {0} is already being deleted")]
    DeletionInProgress(TenantId),

    #[error("Failed to delete store {id}: {source}")]
    DeletionFailed {
        id: TenantId,
        #[source]
        source: SubstrateError,
    },
}

impl From<ProvisionError> for OrchestratorError {
    fn from(e: ProvisionError) -> Self {
        match e {
            ProvisionError::Conflict(namespace) => OrchestratorError::ConflictExists(namespace),
            ProvisionError::StepFailed { step, source } => {
                OrchestratorError::PipelineStepFailed { step, source }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
