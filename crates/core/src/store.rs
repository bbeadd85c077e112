//! Session state store
//!
//! Per-room replica of participants, moderator, round and vote flags, plus the
//! last error and connectivity. Every `apply_*` call is synchronous and a read
//! always reflects the most recently applied event. Observers subscribe to a
//! typed [`SessionUpdate`] stream; any number of them may listen.

use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::invariants::assert_participants_include;
use crate::models::{RoomInfo, RoundTask, SessionSnapshot, VoteResult};
use crate::round::{RoundMachine, RoundPhase};

/// Observer channel capacity
const UPDATE_CAPACITY: usize = 64;

/// Error text fragments meaning the room no longer exists
const ROOM_GONE_MARKERS: &[&str] = &["not found", "expired"];

/// How the session should react to an authority error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Shown to the user; the session continues
    Advisory,
    /// The room is gone; the session must be torn down
    Terminal,
}

impl ErrorSeverity {
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if ROOM_GONE_MARKERS.iter().any(|m| lower.contains(m)) {
            ErrorSeverity::Terminal
        } else {
            ErrorSeverity::Advisory
        }
    }
}

/// Change notifications published by the store
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Participants(Vec<String>),
    RoomDetails {
        name: Option<String>,
        moderator: Option<String>,
    },
    RoundStarted(RoundTask),
    ParticipantVoted(String),
    VoteCount(usize),
    VotesRevealed(Vec<VoteResult>),
    RoundReset,
    Error {
        message: String,
        severity: ErrorSeverity,
    },
    Connectivity(bool),
}

pub struct SessionStore {
    me: String,
    room_id: Uuid,
    room_name: Option<String>,
    moderator: Option<String>,
    participants: Vec<String>,
    round: RoundMachine,
    vote_count: usize,
    last_error: Option<String>,
    invalidated: bool,
    connected: bool,
    updates: broadcast::Sender<SessionUpdate>,
}

impl SessionStore {
    pub fn new(room_id: Uuid, me: impl Into<String>) -> Self {
        let me = me.into();
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        let mut round = RoundMachine::new();
        round.track(std::iter::once(&me));

        Self {
            participants: vec![me.clone()],
            me,
            room_id,
            room_name: None,
            moderator: None,
            round,
            vote_count: 0,
            last_error: None,
            invalidated: false,
            connected: false,
            updates,
        }
    }

    /// Receive every update applied after this call
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    fn notify(&self, update: SessionUpdate) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }

    /// Replace participants with the union of `list`, self and the last known
    /// moderator. Authority order is kept; self and moderator are appended
    /// when missing.
    pub fn apply_participant_list(&mut self, list: &[String]) {
        let mut merged: Vec<String> = Vec::with_capacity(list.len() + 2);
        let extras = [Some(&self.me), self.moderator.as_ref()];
        for name in list.iter().chain(extras.into_iter().flatten()) {
            if !name.trim().is_empty() && !merged.contains(name) {
                merged.push(name.clone());
            }
        }

        assert_participants_include(&merged, &self.me);
        self.round.track(&merged);
        self.participants = merged;
        debug!(room_id = %self.room_id, count = self.participants.len(), "Participants updated");
        self.notify(SessionUpdate::Participants(self.participants.clone()));
    }

    /// Adopt room facts: name, moderator, participants and the active round
    pub fn apply_room_info(&mut self, info: RoomInfo) {
        if info.room_id != self.room_id {
            debug!(room_id = %info.room_id, "Ignoring room info for another room");
            return;
        }

        self.room_name = info.name;
        self.moderator = Some(info.moderator);
        self.notify(SessionUpdate::RoomDetails {
            name: self.room_name.clone(),
            moderator: self.moderator.clone(),
        });

        self.apply_participant_list(&info.participants);

        self.round.restore(info.current_round);
        self.vote_count = self.round.voted_count();
    }

    /// New active round: every flag back to false, prior results cleared
    pub fn apply_round_started(&mut self, task: RoundTask) {
        self.round.start(task.clone());
        self.vote_count = 0;
        self.notify(SessionUpdate::RoundStarted(task));
    }

    /// A participant voted; the value stays hidden until reveal
    pub fn apply_vote_ack(&mut self, participant: &str) {
        if let Err(e) = self.round.vote(participant) {
            debug!(participant, error = %e, "Ignoring vote ack");
            return;
        }
        self.notify(SessionUpdate::ParticipantVoted(participant.to_string()));
    }

    /// Authority's running vote count for the active round
    pub fn apply_vote_count(&mut self, count: usize) {
        self.vote_count = count;
        self.notify(SessionUpdate::VoteCount(count));
    }

    /// Votes disclosed: store results and mark every listed participant as voted
    pub fn apply_votes_revealed(&mut self, results: Vec<VoteResult>) -> Result<()> {
        self.round.reveal(results.clone())?;
        self.vote_count = results.len();
        self.notify(SessionUpdate::VotesRevealed(results));
        Ok(())
    }

    /// Round cleared, back to idle
    pub fn apply_round_reset(&mut self) {
        self.round.reset();
        self.vote_count = 0;
        self.notify(SessionUpdate::RoundReset);
    }

    /// Store the latest authority error and classify it
    pub fn record_error(&mut self, message: &str) -> ErrorSeverity {
        let severity = ErrorSeverity::classify(message);
        if severity == ErrorSeverity::Terminal {
            warn!(room_id = %self.room_id, message, "Room is gone");
            self.invalidated = true;
        }
        self.last_error = Some(message.to_string());
        self.notify(SessionUpdate::Error {
            message: message.to_string(),
            severity,
        });
        severity
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn set_connected(&mut self, connected: bool) {
        if self.connected != connected {
            self.connected = connected;
            self.notify(SessionUpdate::Connectivity(connected));
        }
    }

    /// Seed from a cached snapshot; overwritten by the next authoritative message
    pub fn restore_snapshot(&mut self, snapshot: &SessionSnapshot) {
        if snapshot.room_id != self.room_id {
            return;
        }
        if snapshot.moderator.is_some() {
            self.moderator = snapshot.moderator.clone();
        }
        self.apply_participant_list(&snapshot.participants);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            room_id: self.room_id,
            moderator: self.moderator.clone(),
            participants: self.participants.clone(),
        }
    }

    /// Drop all room state; only self remains
    pub fn teardown(&mut self) {
        self.round.clear();
        self.round.track(std::iter::once(&self.me));
        self.participants = vec![self.me.clone()];
        self.moderator = None;
        self.room_name = None;
        self.vote_count = 0;
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    pub fn room_name(&self) -> Option<&str> {
        self.room_name.as_deref()
    }

    pub fn moderator(&self) -> Option<&str> {
        self.moderator.as_deref()
    }

    pub fn is_moderator(&self) -> bool {
        self.moderator.as_deref() == Some(self.me.as_str())
    }

    pub fn participants(&self) -> &[String] {
        &self.participants
    }

    pub fn round(&self) -> &RoundMachine {
        &self.round
    }

    pub fn phase(&self) -> RoundPhase {
        self.round.phase()
    }

    pub fn has_voted(&self, participant: &str) -> bool {
        self.round.has_voted(participant)
    }

    pub fn vote_count(&self) -> usize {
        self.vote_count
    }

    /// (voted, total) over the known participants
    pub fn progress(&self) -> (usize, usize) {
        self.round.progress(&self.participants)
    }

    /// Advisory reveal gate for the moderator
    pub fn can_reveal(&self) -> bool {
        self.round.phase() == RoundPhase::Voting && self.round.quorum_reached(&self.participants)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RoundView;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn store_with_moderator() -> SessionStore {
        let room_id = Uuid::new_v4();
        let mut store = SessionStore::new(room_id, "bob");
        store.apply_room_info(RoomInfo {
            room_id,
            name: Some("R1".into()),
            moderator: "alice".into(),
            participants: names(&["alice", "bob"]),
            current_round: None,
        });
        store
    }

    #[test]
    fn test_participant_list_keeps_self_and_moderator() {
        let mut store = store_with_moderator();
        store.apply_participant_list(&names(&["carol"]));
        assert_eq!(store.participants(), names(&["carol", "bob", "alice"]).as_slice());

        store.apply_participant_list(&[]);
        assert_eq!(store.participants(), names(&["bob", "alice"]).as_slice());
    }

    #[test]
    fn test_participant_list_never_below_self() {
        let mut store = SessionStore::new(Uuid::new_v4(), "bob");
        store.apply_participant_list(&[]);
        assert_eq!(store.participants(), names(&["bob"]).as_slice());
    }

    #[test]
    fn test_duplicates_collapse() {
        let mut store = store_with_moderator();
        store.apply_participant_list(&names(&["alice", "carol", "carol", "bob"]));
        assert_eq!(store.participants(), names(&["alice", "carol", "bob"]).as_slice());
    }

    #[test]
    fn test_round_started_resets_flags() {
        let mut store = store_with_moderator();
        store.apply_round_started(RoundTask::new("A"));
        store.apply_vote_ack("bob");
        assert!(store.has_voted("bob"));

        store.apply_round_started(RoundTask::new("B"));
        assert!(!store.has_voted("bob"));
        assert_eq!(store.phase(), RoundPhase::Voting);
    }

    #[test]
    fn test_revealed_marks_late_joiner() {
        let mut store = store_with_moderator();
        store.apply_round_started(RoundTask::new("A"));
        store
            .apply_votes_revealed(vec![VoteResult::new("dave", 3.0)])
            .unwrap();
        assert!(store.has_voted("dave"));
        assert_eq!(store.phase(), RoundPhase::Revealed);
    }

    #[test]
    fn test_reveal_while_idle_is_rejected() {
        let mut store = store_with_moderator();
        assert!(store.apply_votes_revealed(vec![]).is_err());
        assert_eq!(store.phase(), RoundPhase::Idle);
    }

    #[test]
    fn test_round_reset() {
        let mut store = store_with_moderator();
        store.apply_round_started(RoundTask::new("A"));
        store.apply_vote_ack("alice");
        store.apply_round_reset();
        assert_eq!(store.phase(), RoundPhase::Idle);
        assert_eq!(store.progress(), (0, 2));
    }

    #[test]
    fn test_error_classification() {
        let mut store = store_with_moderator();
        assert_eq!(store.record_error("Only the moderator can reveal"), ErrorSeverity::Advisory);
        assert!(!store.is_invalidated());

        assert_eq!(store.record_error("Room not found"), ErrorSeverity::Terminal);
        assert!(store.is_invalidated());
        assert_eq!(store.last_error(), Some("Room not found"));

        assert_eq!(ErrorSeverity::classify("Session EXPIRED"), ErrorSeverity::Terminal);
    }

    #[test]
    fn test_room_info_restores_round() {
        let room_id = Uuid::new_v4();
        let mut store = SessionStore::new(room_id, "bob");
        store.apply_room_info(RoomInfo {
            room_id,
            name: None,
            moderator: "alice".into(),
            participants: names(&["alice", "bob", "carol"]),
            current_round: Some(RoundView {
                task: RoundTask::new("A"),
                voted: names(&["carol"]),
                revealed: false,
                results: vec![],
            }),
        });
        assert_eq!(store.phase(), RoundPhase::Voting);
        assert_eq!(store.progress(), (1, 3));
        assert!(!store.is_moderator());
    }

    #[test]
    fn test_can_reveal_is_advisory_gate() {
        let mut store = store_with_moderator();
        store.apply_round_started(RoundTask::new("A"));
        store.apply_vote_ack("alice");
        assert!(!store.can_reveal());
        store.apply_vote_ack("bob");
        assert!(store.can_reveal());
    }

    #[test]
    fn test_snapshot_roundtrip_is_advisory() {
        let store = store_with_moderator();
        let snapshot = store.snapshot();

        let mut fresh = SessionStore::new(store.room_id(), "bob");
        fresh.restore_snapshot(&snapshot);
        assert_eq!(fresh.moderator(), Some("alice"));
        assert_eq!(fresh.participants(), store.participants());
    }

    #[test]
    fn test_subscribers_see_updates_in_order() {
        let mut store = store_with_moderator();
        let mut rx = store.subscribe();

        store.apply_round_started(RoundTask::new("A"));
        store.apply_vote_ack("bob");

        assert_eq!(rx.try_recv().unwrap(), SessionUpdate::RoundStarted(RoundTask::new("A")));
        assert_eq!(rx.try_recv().unwrap(), SessionUpdate::ParticipantVoted("bob".into()));
    }

    #[test]
    fn test_teardown_leaves_only_self() {
        let mut store = store_with_moderator();
        store.apply_round_started(RoundTask::new("A"));
        store.teardown();
        assert_eq!(store.participants(), names(&["bob"]).as_slice());
        assert_eq!(store.phase(), RoundPhase::Idle);
        assert!(store.moderator().is_none());
    }
}
