//! Round model - the single estimation item open for voting

use serde::{Deserialize, Serialize};

use super::{VoteResult, VoteValue};

/// What is being estimated in a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTask {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RoundTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Authoritative round state, held by the room directory.
///
/// Votes keep first-vote order; a re-vote replaces the value in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub task: RoundTask,
    pub votes: Vec<VoteResult>,
    pub revealed: bool,
}

impl Round {
    pub fn new(task: RoundTask) -> Self {
        Self {
            task,
            votes: Vec::new(),
            revealed: false,
        }
    }

    /// Record or replace a participant's vote
    pub fn record_vote(&mut self, participant: &str, value: VoteValue) {
        match self.votes.iter_mut().find(|v| v.participant == participant) {
            Some(existing) => existing.value = value,
            None => self.votes.push(VoteResult::new(participant, value)),
        }
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    /// Snapshot safe to send to any client: values are withheld until reveal
    pub fn view(&self) -> RoundView {
        RoundView {
            task: self.task.clone(),
            voted: self.votes.iter().map(|v| v.participant.clone()).collect(),
            revealed: self.revealed,
            results: if self.revealed {
                self.votes.clone()
            } else {
                Vec::new()
            },
        }
    }
}

/// Client-visible round snapshot carried by room info
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundView {
    pub task: RoundTask,
    #[serde(default)]
    pub voted: Vec<String>,
    #[serde(default)]
    pub revealed: bool,
    #[serde(default)]
    pub results: Vec<VoteResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revote_replaces_in_place() {
        let mut round = Round::new(RoundTask::new("Login flow"));
        round.record_vote("bob", VoteValue::new(5.0));
        round.record_vote("carol", VoteValue::new(8.0));
        round.record_vote("bob", VoteValue::new(3.0));

        assert_eq!(round.vote_count(), 2);
        assert_eq!(round.votes[0], VoteResult::new("bob", 3.0));
    }

    #[test]
    fn test_view_withholds_values_until_reveal() {
        let mut round = Round::new(RoundTask::new("Login flow"));
        round.record_vote("bob", VoteValue::new(5.0));

        let hidden = round.view();
        assert_eq!(hidden.voted, vec!["bob".to_string()]);
        assert!(hidden.results.is_empty());

        round.revealed = true;
        assert_eq!(round.view().results.len(), 1);
    }
}
