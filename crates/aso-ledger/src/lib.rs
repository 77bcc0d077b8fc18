pub mod builds;
pub mod error;
pub mod intents;
pub mod ledger;

pub use builds::{BuildLog, BuildRecord};
pub use error::LedgerError;
pub use intents::IntentStore;
pub use ledger::Ledger;
