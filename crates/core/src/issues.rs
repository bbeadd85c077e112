//! Issue queue
//!
//! Ordered backlog of issues with at most one issue voting at a time. Local
//! actions return the [`IssueChange`] to broadcast; remote changes arrive as
//! full snapshots ([`IssueQueue::reconcile`]) or incremental updates
//! ([`IssueQueue::apply_update`]).
//!
//! After a reconnect the queue is marked stale. Incremental updates received
//! while stale are held back, and the next snapshot discards them since it
//! already reflects everything the authority sent before it.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::invariants::{assert_single_voting_issue, assert_unique_issue_ids};
use crate::models::{Issue, IssueAction, IssueStatus};

/// A change to broadcast to the rest of the room
#[derive(Debug, Clone, PartialEq)]
pub struct IssueChange {
    pub action: IssueAction,
    pub issue: Issue,
}

/// Outcome of an incremental update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// Duplicate add or unknown id
    Ignored,
    /// Held until the next snapshot
    Deferred,
}

#[derive(Debug, Clone, Default)]
pub struct IssueQueue {
    issues: Vec<Issue>,
    synced: bool,
    deferred: Vec<IssueChange>,
}

impl IssueQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue that is its own source of truth (the room directory's copy)
    pub fn authoritative() -> Self {
        Self {
            synced: true,
            ..Self::default()
        }
    }

    /// Seed from a local cache. The result is advisory and stays unsynced.
    pub fn from_cache(issues: Vec<Issue>) -> Self {
        Self {
            issues,
            synced: false,
            deferred: Vec::new(),
        }
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Issue> {
        self.issues.iter().find(|i| i.id == id)
    }

    pub fn current_voting(&self) -> Option<&Issue> {
        self.issues.iter().find(|i| i.is_voting())
    }

    /// 1-based position of the voting issue and the queue length
    pub fn voting_position(&self) -> Option<(usize, usize)> {
        self.issues
            .iter()
            .position(Issue::is_voting)
            .map(|i| (i + 1, self.issues.len()))
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Stop trusting incremental updates until the next snapshot
    pub fn mark_stale(&mut self) {
        self.synced = false;
    }

    /// Append a pending issue with the next sequential id
    pub fn add(&mut self, title: &str, description: Option<String>) -> Result<IssueChange> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::InvalidOperation("Issue title is empty".into()));
        }

        // count + 1, skipping past ids a snapshot may already hold
        let mut n = self.issues.len() + 1;
        while self.get(&Issue::sequential_id(n)).is_some() {
            n += 1;
        }

        let issue = Issue::new(Issue::sequential_id(n), title).with_description(description);
        self.issues.push(issue.clone());
        assert_unique_issue_ids(&self.issues);
        debug!(issue_id = %issue.id, "Issue added");

        Ok(IssueChange {
            action: IssueAction::Added,
            issue,
        })
    }

    /// Promote an issue to voting, demoting whichever issue was voting before
    pub fn start_voting(&mut self, id: &str) -> Result<IssueChange> {
        self.index_of(id)?;

        for issue in &mut self.issues {
            if issue.id == id {
                issue.status = IssueStatus::Voting;
            } else if issue.is_voting() {
                debug!(issue_id = %issue.id, "Demoting voting issue");
                issue.status = IssueStatus::Pending;
            }
        }
        assert_single_voting_issue(&self.issues);

        Ok(IssueChange {
            action: IssueAction::Updated,
            issue: self.issues[self.index_of(id)?].clone(),
        })
    }

    /// Mark an issue completed with its rounded result and raw votes
    pub fn complete_voting(
        &mut self,
        id: &str,
        result: f64,
        votes: BTreeMap<String, f64>,
    ) -> Result<IssueChange> {
        let idx = self.index_of(id)?;
        let issue = &mut self.issues[idx];
        issue.status = IssueStatus::Completed;
        issue.result = Some(result);
        issue.votes = Some(votes);

        Ok(IssueChange {
            action: IssueAction::Completed,
            issue: issue.clone(),
        })
    }

    /// Clear result and votes and return the issue to pending
    pub fn reset_for_revote(&mut self, id: &str) -> Result<IssueChange> {
        let idx = self.index_of(id)?;
        let issue = &mut self.issues[idx];
        issue.status = IssueStatus::Pending;
        issue.result = None;
        issue.votes = None;

        Ok(IssueChange {
            action: IssueAction::Reset,
            issue: issue.clone(),
        })
    }

    /// Replace the whole list from an authoritative snapshot
    pub fn reconcile(&mut self, issues: Vec<Issue>) {
        if !self.deferred.is_empty() {
            debug!(count = self.deferred.len(), "Discarding updates older than snapshot");
            self.deferred.clear();
        }
        self.issues = issues;
        self.synced = true;

        // First voting issue wins
        let mut seen_voting = false;
        for issue in &mut self.issues {
            if issue.is_voting() {
                if seen_voting {
                    warn!(issue_id = %issue.id, "Snapshot holds a second voting issue, demoting");
                    issue.status = IssueStatus::Pending;
                }
                seen_voting = true;
            }
        }
        assert_single_voting_issue(&self.issues);
    }

    /// Apply one incremental update, idempotently per id
    pub fn apply_update(&mut self, action: IssueAction, issue: Issue) -> UpdateOutcome {
        if !self.synced {
            self.deferred.push(IssueChange { action, issue });
            return UpdateOutcome::Deferred;
        }
        self.apply(action, issue)
    }

    fn apply(&mut self, action: IssueAction, issue: Issue) -> UpdateOutcome {
        let existing = self.issues.iter().position(|i| i.id == issue.id);

        let outcome = match (action, existing) {
            (IssueAction::Added, Some(_)) => UpdateOutcome::Ignored,
            (IssueAction::Added, None) => {
                if issue.is_voting() {
                    self.demote_voting();
                }
                self.issues.push(issue);
                UpdateOutcome::Applied
            }
            (_, None) => UpdateOutcome::Ignored,
            (_, Some(idx)) => {
                if issue.is_voting() {
                    self.demote_voting();
                }
                self.issues[idx] = issue;
                UpdateOutcome::Applied
            }
        };

        if outcome == UpdateOutcome::Ignored {
            debug!(action = %action, "Ignoring issue update");
        }
        assert_single_voting_issue(&self.issues);
        assert_unique_issue_ids(&self.issues);
        outcome
    }

    fn demote_voting(&mut self) {
        for other in self.issues.iter_mut().filter(|i| i.is_voting()) {
            debug!(issue_id = %other.id, "Demoting voting issue");
            other.status = IssueStatus::Pending;
        }
    }

    /// Drop everything (session teardown)
    pub fn clear(&mut self) {
        self.issues.clear();
        self.deferred.clear();
        self.synced = false;
    }

    fn index_of(&self, id: &str) -> Result<usize> {
        self.issues
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| Error::NotFound(format!("issue {id}")))
    }
}
