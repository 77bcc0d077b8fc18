use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use ulid::Ulid;

use aso_core::id::{BuildId, IntentId};
use aso_core::types::{BuildContext, BuildStatus};

use crate::ledger::{Ledger, BUILDS};
use crate::LedgerError;

/// Ledger row for one build attempt. `key` is the unique primary key;
/// `build_id` is the human-readable id shared with the work dir and vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRecord {
    pub key: Ulid,
    pub build_id: BuildId,
    pub project: String,
    pub intent_id: IntentId,
    pub status: BuildStatus,
    pub work_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_hash: Option<String>,
}

#[derive(Clone)]
pub struct BuildLog {
    ledger: Ledger,
}

impl BuildLog {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    pub fn record(&self, ctx: &BuildContext) -> Result<BuildRecord, LedgerError> {
        let now = Utc::now();
        let record = BuildRecord {
            key: Ulid::new(),
            build_id: ctx.build_id.clone(),
            project: ctx.project.clone(),
            intent_id: ctx.intent_id.clone(),
            status: ctx.status,
            work_dir: ctx.work_dir.clone(),
            created_at: now,
            updated_at: now,
            chain_hash: None,
        };
        self.ledger
            .insert_new(BUILDS, &record.key.to_string(), &record)?;
        info!(
            key = %record.key,
            build_id = %record.build_id,
            intent = %record.intent_id,
            "build recorded"
        );
        Ok(record)
    }

    pub fn get(&self, key: &Ulid) -> Result<Option<BuildRecord>, LedgerError> {
        self.ledger.get(BUILDS, &key.to_string())
    }

    pub fn set_status(
        &self,
        key: &Ulid,
        status: BuildStatus,
    ) -> Result<Option<BuildRecord>, LedgerError> {
        self.ledger
            .update(BUILDS, &key.to_string(), |record: &mut BuildRecord| {
                record.status = status;
                record.updated_at = Utc::now();
                Ok(())
            })
    }

    /// Links the sealed manifest to the record by its chain hash.
    pub fn attach_manifest(
        &self,
        key: &Ulid,
        chain_hash: &str,
    ) -> Result<Option<BuildRecord>, LedgerError> {
        self.ledger
            .update(BUILDS, &key.to_string(), |record: &mut BuildRecord| {
                record.chain_hash = Some(chain_hash.to_string());
                record.updated_at = Utc::now();
                Ok(())
            })
    }

    /// Build records, newest first, optionally only those for one intent.
    pub fn list(&self, intent: Option<&IntentId>) -> Result<Vec<BuildRecord>, LedgerError> {
        let mut records: Vec<BuildRecord> = self
            .ledger
            .scan(BUILDS)?
            .into_iter()
            .filter(|r: &BuildRecord| intent.map_or(true, |id| &r.intent_id == id))
            .collect();
        records.sort_by(|a, b| b.key.cmp(&a.key));
        Ok(records)
    }
}
