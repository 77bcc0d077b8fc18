use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::sha256_hex;
use crate::id::{BuildId, IntentId};
use crate::CoreError;

pub const MANIFEST_FILE: &str = "manifest.json";

/// One stored file: content hash, byte length, and its path relative to the
/// vault root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub hash: String,
    pub size: u64,
    pub path: String,
}

/// Tamper-evident record of a build's artifact set.
///
/// Deserializing does not check the id formats; a stored manifest may have
/// been edited, and verification reports that rather than the read failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(deserialize_with = "crate::id::lenient::build_id")]
    pub build_id: BuildId,
    pub project: String,
    #[serde(deserialize_with = "crate::id::lenient::intent_id")]
    pub intent_id: IntentId,
    pub created_at: DateTime<Utc>,
    pub files: BTreeMap<String, Artifact>,
    pub chain_hash: String,
}

/// The fields covered by the chain hash, in canonical order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChainInput<'a> {
    build_id: &'a BuildId,
    project: &'a str,
    intent_id: &'a IntentId,
    created_at: &'a DateTime<Utc>,
    files: &'a BTreeMap<String, Artifact>,
}

impl Manifest {
    /// Builds a manifest and computes its chain hash.
    pub fn seal(
        build_id: BuildId,
        project: impl Into<String>,
        intent_id: IntentId,
        created_at: DateTime<Utc>,
        files: BTreeMap<String, Artifact>,
    ) -> Result<Self, CoreError> {
        let mut manifest = Self {
            build_id,
            project: project.into(),
            intent_id,
            created_at,
            files,
            chain_hash: String::new(),
        };
        manifest.chain_hash = manifest.compute_chain_hash()?;
        Ok(manifest)
    }

    /// SHA-256 over compact JSON of `{buildId, project, intentId, createdAt,
    /// files}`. `files` is a `BTreeMap`, so entries serialize sorted by name.
    pub fn compute_chain_hash(&self) -> Result<String, CoreError> {
        let input = ChainInput {
            build_id: &self.build_id,
            project: &self.project,
            intent_id: &self.intent_id,
            created_at: &self.created_at,
            files: &self.files,
        };
        let canonical =
            serde_json::to_vec(&input).map_err(|e| CoreError::Serialization(e.to_string()))?;
        Ok(sha256_hex(&canonical))
    }

    pub fn total_size(&self) -> u64 {
        self.files.values().map(|a| a.size).sum()
    }
}

/// Outcome of an integrity check. `valid` holds iff `errors` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl IntegrityReport {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}
