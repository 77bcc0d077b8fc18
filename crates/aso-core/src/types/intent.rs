use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::is_contract_hash;
use crate::id::IntentId;
use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Approved,
    Rejected,
    InProgress,
    Completed,
    Failed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Approved => "approved",
            IntentStatus::Rejected => "rejected",
            IntentStatus::InProgress => "in_progress",
            IntentStatus::Completed => "completed",
            IntentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntentStatus::Rejected | IntentStatus::Completed | IntentStatus::Failed
        )
    }

    /// Forward-only lifecycle. Nothing ever returns to `pending`, and
    /// terminal states accept no further transition.
    pub fn can_transition_to(self, next: IntentStatus) -> bool {
        use IntentStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, InProgress)
                | (Approved, Failed)
                | (InProgress, Completed)
                | (InProgress, Failed)
        )
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(IntentStatus::Pending),
            "approved" => Ok(IntentStatus::Approved),
            "rejected" => Ok(IntentStatus::Rejected),
            "in_progress" | "in-progress" => Ok(IntentStatus::InProgress),
            "completed" => Ok(IntentStatus::Completed),
            "failed" => Ok(IntentStatus::Failed),
            _ => Err(CoreError::UnknownStatus(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub id: IntentId,
    pub project: String,
    pub author: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub out_of_scope: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_hash: Option<String>,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_reason: Option<String>,
}

/// Well-formed input for a new intent. Produced by [`IntentDraft::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIntent {
    pub project: String,
    pub author: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    pub out_of_scope: Vec<String>,
    pub contract_ref: Option<String>,
    pub contract_hash: Option<String>,
}

impl Intent {
    pub fn new(id: IntentId, input: NewIntent, now: DateTime<Utc>) -> Self {
        Self {
            id,
            project: input.project,
            author: input.author,
            description: input.description,
            acceptance_criteria: input.acceptance_criteria,
            out_of_scope: input.out_of_scope,
            contract_ref: input.contract_ref,
            contract_hash: input.contract_hash,
            status: IntentStatus::Pending,
            created_at: now,
            updated_at: now,
            approved_at: None,
            approved_by: None,
            rejected_at: None,
            rejected_reason: None,
        }
    }

    /// Applies `transition`, stamping the approval/rejection fields together
    /// with the status. Leaves `self` untouched on error.
    pub fn apply(
        &mut self,
        transition: &IntentTransition,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let next = transition.target();
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        match transition {
            IntentTransition::Approve { approved_by } => {
                if approved_by.trim().is_empty() {
                    return Err(CoreError::MissingMetadata("approvedBy"));
                }
                self.approved_by = Some(approved_by.clone());
                self.approved_at = Some(now);
            }
            IntentTransition::Reject { reason } => {
                if reason.trim().is_empty() {
                    return Err(CoreError::MissingMetadata("rejectedReason"));
                }
                self.rejected_reason = Some(reason.clone());
                self.rejected_at = Some(now);
            }
            IntentTransition::Start | IntentTransition::Complete | IntentTransition::Fail => {}
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentTransition {
    Approve { approved_by: String },
    Reject { reason: String },
    /// A build tied to the intent has begun.
    Start,
    Complete,
    Fail,
}

/// Optional metadata accompanying a status update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMetadata {
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub rejected_reason: Option<String>,
}

impl IntentTransition {
    /// Builds a transition from a target status plus metadata, the shape a
    /// status-update request arrives in.
    pub fn for_status(status: IntentStatus, metadata: StatusMetadata) -> Result<Self, CoreError> {
        match status {
            IntentStatus::Approved => metadata
                .approved_by
                .map(|approved_by| IntentTransition::Approve { approved_by })
                .ok_or(CoreError::MissingMetadata("approvedBy")),
            IntentStatus::Rejected => metadata
                .rejected_reason
                .map(|reason| IntentTransition::Reject { reason })
                .ok_or(CoreError::MissingMetadata("rejectedReason")),
            IntentStatus::InProgress => Ok(IntentTransition::Start),
            IntentStatus::Completed => Ok(IntentTransition::Complete),
            IntentStatus::Failed => Ok(IntentTransition::Fail),
            IntentStatus::Pending => Err(CoreError::InvalidTransition {
                from: IntentStatus::Pending,
                to: IntentStatus::Pending,
            }),
        }
    }

    pub fn target(&self) -> IntentStatus {
        match self {
            IntentTransition::Approve { .. } => IntentStatus::Approved,
            IntentTransition::Reject { .. } => IntentStatus::Rejected,
            IntentTransition::Start => IntentStatus::InProgress,
            IntentTransition::Complete => IntentStatus::Completed,
            IntentTransition::Fail => IntentStatus::Failed,
        }
    }
}

/// Conjunctive equality filter for listing intents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntentFilter {
    pub project: Option<String>,
    pub status: Option<IntentStatus>,
    pub author: Option<String>,
}

impl IntentFilter {
    pub fn matches(&self, intent: &Intent) -> bool {
        self.project.as_ref().map_or(true, |p| &intent.project == p)
            && self.status.map_or(true, |s| intent.status == s)
            && self.author.as_ref().map_or(true, |a| &intent.author == a)
    }
}

/// Caller-facing request body for creating an intent. Every field is optional
/// here so that missing fields can be reported instead of failing to parse.
/// `contractHash` is `sha256:` followed by 64 hex digits in either case; it is
/// stored lowercase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentDraft {
    pub project: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub acceptance_criteria: Option<Vec<String>>,
    #[serde(default)]
    pub out_of_scope: Vec<String>,
    pub contract_ref: Option<String>,
    pub contract_hash: Option<String>,
}

impl IntentDraft {
    pub fn validate(self) -> Result<NewIntent, CoreError> {
        let project = non_empty(self.project).ok_or(CoreError::MissingFields)?;
        let author = non_empty(self.author).ok_or(CoreError::MissingFields)?;
        let description = non_empty(self.description).ok_or(CoreError::MissingFields)?;
        let acceptance_criteria: Vec<String> = self
            .acceptance_criteria
            .unwrap_or_default()
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect();
        if acceptance_criteria.is_empty() {
            return Err(CoreError::MissingFields);
        }
        let contract_hash = match self.contract_hash {
            Some(hash) if !is_contract_hash(&hash) => {
                return Err(CoreError::InvalidContractHash(hash))
            }
            // Stored lowercase so equal digests compare equal.
            Some(hash) => Some(hash.to_ascii_lowercase()),
            None => None,
        };
        Ok(NewIntent {
            project,
            author,
            description,
            acceptance_criteria,
            out_of_scope: self.out_of_scope,
            contract_ref: non_empty(self.contract_ref),
            contract_hash,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
