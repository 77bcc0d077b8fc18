use thiserror::Error;

use aso_core::id::IntentId;
use aso_core::types::IntentStatus;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("container runtime error: {0}")]
    Runtime(String),
    #[error("invalid artifact pattern: {0}")]
    Pattern(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("could not allocate a unique build directory")]
    BuildIdExhausted,
    #[error("intent not found: {0}")]
    IntentNotFound(IntentId),
    #[error("intent {id} is {status}, only approved intents can be built")]
    NotApproved { id: IntentId, status: IntentStatus },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("core error: {0}")]
    Core(#[from] aso_core::CoreError),
    #[error("ledger error: {0}")]
    Ledger(#[from] aso_ledger::LedgerError),
    #[error("vault error: {0}")]
    Vault(#[from] aso_vault::VaultError),
}
