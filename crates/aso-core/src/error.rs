use thiserror::Error;

use crate::types::IntentStatus;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid intent id: {0}")]
    InvalidIntentId(String),
    #[error("invalid build id: {0}")]
    InvalidBuildId(String),
    #[error("unknown intent status: {0}")]
    UnknownStatus(String),
    #[error("Missing required fields")]
    MissingFields,
    #[error("invalid contract hash: {0} (expected sha256:<64 hex>)")]
    InvalidContractHash(String),
    #[error("{0} is required for this status change")]
    MissingMetadata(&'static str),
    #[error("intent cannot move from {from} to {to}")]
    InvalidTransition { from: IntentStatus, to: IntentStatus },
    #[error("serialization error: {0}")]
    Serialization(String),
}
