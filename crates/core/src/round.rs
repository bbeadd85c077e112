//! Round state machine
//!
//! Tracks the lifecycle of the single active round on a client replica:
//!
//! ```text
//! Idle --start--> Voting --reveal--> Revealed
//!                  ^  |                 |
//!                  |  +--vote (self)    +--start_new_round--> Voting
//!                  +------ reset (from Voting/Revealed) ----> Idle
//! ```
//!
//! Transitions are driven only by authoritative events. The local quorum check
//! is advisory: a reveal is honored whether or not everyone has voted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{RoundTask, RoundView, VoteResult};

/// Round lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    #[default]
    Idle,
    Voting,
    Revealed,
}

impl std::fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RoundPhase::Idle => "idle",
            RoundPhase::Voting => "voting",
            RoundPhase::Revealed => "revealed",
        };
        f.write_str(s)
    }
}

/// Replica of the active round plus per-participant vote flags
#[derive(Debug, Clone, Default)]
pub struct RoundMachine {
    phase: RoundPhase,
    task: Option<RoundTask>,
    /// hasVoted per known participant
    voted: BTreeMap<String, bool>,
    results: Vec<VoteResult>,
}

impl RoundMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn task(&self) -> Option<&RoundTask> {
        self.task.as_ref()
    }

    pub fn results(&self) -> &[VoteResult] {
        &self.results
    }

    /// Make sure every listed participant has a vote flag (false when new)
    pub fn track<'a>(&mut self, participants: impl IntoIterator<Item = &'a String>) {
        for p in participants {
            self.voted.entry(p.clone()).or_insert(false);
        }
    }

    /// Idle or Voting -> Voting. Also accepted from Revealed, where it acts as
    /// [`RoundMachine::start_new_round`].
    pub fn start(&mut self, task: RoundTask) {
        if self.phase == RoundPhase::Voting {
            debug!(title = %task.title, "Replacing active round");
        }
        self.task = Some(task);
        self.results.clear();
        self.voted.values_mut().for_each(|v| *v = false);
        self.phase = RoundPhase::Voting;
    }

    /// Revealed -> Voting, discarding the previous results
    pub fn start_new_round(&mut self, task: RoundTask) -> Result<()> {
        if self.phase != RoundPhase::Revealed {
            return Err(Error::InvalidTransition {
                from: self.phase,
                event: "start a new round",
            });
        }
        self.start(task);
        Ok(())
    }

    /// Voting -> Voting: mark a participant as having voted. The value stays
    /// unknown until reveal. After a reveal the flag is already set.
    pub fn vote(&mut self, participant: &str) -> Result<()> {
        match self.phase {
            RoundPhase::Idle => Err(Error::InvalidTransition {
                from: self.phase,
                event: "vote",
            }),
            RoundPhase::Voting | RoundPhase::Revealed => {
                self.voted.insert(participant.to_string(), true);
                Ok(())
            }
        }
    }

    /// Voting -> Revealed. Every listed participant counts as having voted,
    /// including ones this replica never saw join.
    pub fn reveal(&mut self, results: Vec<VoteResult>) -> Result<()> {
        if self.phase == RoundPhase::Idle {
            return Err(Error::InvalidTransition {
                from: self.phase,
                event: "reveal",
            });
        }
        for r in &results {
            self.voted.insert(r.participant.clone(), true);
        }
        self.results = results;
        self.phase = RoundPhase::Revealed;
        Ok(())
    }

    /// Any phase -> Idle
    pub fn reset(&mut self) {
        self.task = None;
        self.results.clear();
        self.voted.values_mut().for_each(|v| *v = false);
        self.phase = RoundPhase::Idle;
    }

    /// Forget vote flags entirely (session teardown)
    pub fn clear(&mut self) {
        self.reset();
        self.voted.clear();
    }

    /// Adopt a round snapshot from room info
    pub fn restore(&mut self, view: Option<RoundView>) {
        let Some(view) = view else {
            self.reset();
            return;
        };

        self.start(view.task);
        for p in &view.voted {
            self.voted.insert(p.clone(), true);
        }
        if view.revealed {
            // Voting phase was just entered, so reveal cannot fail
            let _ = self.reveal(view.results);
        }
    }

    pub fn has_voted(&self, participant: &str) -> bool {
        self.voted.get(participant).copied().unwrap_or(false)
    }

    pub fn voted_count(&self) -> usize {
        self.voted.values().filter(|v| **v).count()
    }

    /// Vote progress over the given participant set: (voted, total)
    pub fn progress(&self, participants: &[String]) -> (usize, usize) {
        let voted = participants.iter().filter(|p| self.has_voted(p)).count();
        (voted, participants.len())
    }

    /// Advisory: everyone known has voted and at least one vote exists
    pub fn quorum_reached(&self, participants: &[String]) -> bool {
        let (voted, total) = self.progress(participants);
        voted > 0 && voted == total
    }
}
