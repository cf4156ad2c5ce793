//! Commit status DTOs

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a commit status on the hosting platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommitState::Pending => "pending",
            CommitState::Success => "success",
            CommitState::Failure => "failure",
            CommitState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Request body for posting a commit status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
    pub state: CommitState,
    /// Label distinguishing this status from others on the same commit
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

impl CommitStatus {
    pub fn new(state: CommitState, context: impl Into<String>) -> Self {
        Self {
            state,
            context: context.into(),
            description: None,
            target_url: None,
        }
    }

    /// Sets the description, truncated to the 140 characters the API accepts
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description: String = description.into();
        self.description = Some(description.chars().take(140).collect());
        self
    }
}

/// A status as stored by the hosting platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: u64,
    pub state: CommitState,
    pub context: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}
