pub mod error;
pub mod hash;
pub mod id;
pub mod types;

pub use error::CoreError;
pub use hash::sha256_hex;
pub use id::{BuildId, IntentId};
