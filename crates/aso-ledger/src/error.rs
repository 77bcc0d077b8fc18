use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(String),
    #[error("duplicate key {key} in table {table}")]
    Duplicate { table: String, key: String },
    #[error("corrupt record {key} in table {table}: {reason}")]
    Corrupt {
        table: String,
        key: String,
        reason: String,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("core error: {0}")]
    Core(#[from] aso_core::CoreError),
}
