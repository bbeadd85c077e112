//! Issue model - backlog items estimated one at a time

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Issue lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    Pending,
    Voting,
    Completed,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Pending => "pending",
            IssueStatus::Voting => "voting",
            IssueStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of incremental issue update carried on the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueAction {
    Added,
    Updated,
    Completed,
    Reset,
}

impl IssueAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueAction::Added => "added",
            IssueAction::Updated => "updated",
            IssueAction::Completed => "completed",
            IssueAction::Reset => "reset",
        }
    }
}

impl std::fmt::Display for IssueAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backlog item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: IssueStatus,
    /// Raw votes, present once completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub votes: Option<BTreeMap<String, f64>>,
    /// Rounded average, present once completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Prefix of client-minted issue ids
pub const ISSUE_ID_PREFIX: &str = "PP-";

impl Issue {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            status: IssueStatus::Pending,
            votes: None,
            result: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description.filter(|d| !d.trim().is_empty());
        self
    }

    /// Sequential id for the n-th issue of a room (1-based)
    pub fn sequential_id(n: usize) -> String {
        format!("{ISSUE_ID_PREFIX}{n}")
    }

    pub fn is_voting(&self) -> bool {
        self.status == IssueStatus::Voting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_id() {
        assert_eq!(Issue::sequential_id(1), "PP-1");
        assert_eq!(Issue::sequential_id(12), "PP-12");
    }

    #[test]
    fn test_wire_shape() {
        let issue = Issue::new("PP-1", "Login flow");
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["status"], "pending");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_blank_description_dropped() {
        let issue = Issue::new("PP-1", "x").with_description(Some("  ".into()));
        assert!(issue.description.is_none());
    }
}
