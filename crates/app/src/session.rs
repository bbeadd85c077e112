//! Session context for one joined room
//!
//! Created at join, torn down on leave, end or when the room disappears.
//! [`SessionContext::handle`] applies one server message and
//! [`SessionContext::execute`] applies one local command. Both return the
//! requests that should go out next, so the caller can keep inbound events
//! and user actions on a single timeline.

use std::collections::BTreeMap;

use estima_core::{
    tally, Card, DeckConfig, Error, ErrorSeverity, Issue, IssueChange, IssueQueue, Result,
    RoundPhase, RoundTask, SessionCache, SessionSnapshot, SessionStore, SessionUpdate, Tally,
    UserRole, VoteResult, VoteValue,
};
use estima_net::{ClientMessage, ServerMessage};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why a session stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The moderator ended the room
    RoomEnded,
    /// The server no longer knows the room
    RoomGone(String),
    /// We left
    Left,
    /// We ended the room ourselves
    Ended,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::RoomEnded => write!(f, "the moderator ended the room"),
            CloseReason::RoomGone(message) => write!(f, "room is gone: {message}"),
            CloseReason::Left => write!(f, "left the room"),
            CloseReason::Ended => write!(f, "room ended"),
        }
    }
}

/// User actions
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Cast the card with this label
    Vote(String),
    StartRound {
        title: String,
        description: Option<String>,
    },
    Reveal,
    NextRound,
    AddIssue {
        title: String,
        description: Option<String>,
    },
    StartVoting(String),
    VoteAgain(String),
    Leave,
    End,
}

/// Read-only picture of the session for display
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionView {
    pub room_id: Uuid,
    pub room_name: Option<String>,
    pub me: String,
    pub moderator: Option<String>,
    pub participants: Vec<String>,
    /// Participants who voted in the active round
    pub voted: Vec<String>,
    pub phase: RoundPhase,
    pub task: Option<RoundTask>,
    pub my_vote: Option<VoteValue>,
    pub progress: (usize, usize),
    pub can_reveal: bool,
    pub results: Vec<VoteResult>,
    pub tally: Option<Tally>,
    pub issues: Vec<Issue>,
    pub issue_position: Option<(usize, usize)>,
    pub cards: Vec<Card>,
    pub last_error: Option<String>,
    pub connected: bool,
    pub closed: Option<CloseReason>,
}

pub struct SessionContext<C: SessionCache> {
    role: UserRole,
    store: SessionStore,
    issues: IssueQueue,
    deck: DeckConfig,
    my_vote: Option<VoteValue>,
    cache: C,
    closed: Option<CloseReason>,
}

impl<C: SessionCache> SessionContext<C> {
    /// Build a context, seeding it from whatever the cache holds for the room
    pub fn new(room_id: Uuid, me: impl Into<String>, role: UserRole, cache: C) -> Self {
        let me = me.into();
        let mut store = SessionStore::new(room_id, me.clone());

        match cache.load_snapshot(room_id) {
            Ok(Some(snapshot)) => store.restore_snapshot(&snapshot),
            Ok(None) if role == UserRole::Moderator => {
                store.restore_snapshot(&SessionSnapshot {
                    room_id,
                    moderator: Some(me.clone()),
                    participants: vec![me.clone()],
                });
            }
            Ok(None) => {}
            Err(e) => warn!(room_id = %room_id, error = %e, "Failed to load cached snapshot"),
        }

        let cached_issues = cache.load_issues(room_id).unwrap_or_else(|e| {
            warn!(room_id = %room_id, error = %e, "Failed to load cached issues");
            Vec::new()
        });

        let deck = match cache.load_deck(room_id) {
            Ok(deck) => deck.unwrap_or_default(),
            Err(e) => {
                warn!(room_id = %room_id, error = %e, "Failed to load deck");
                DeckConfig::default()
            }
        };

        debug!(room_id = %room_id, me = %me, role = role.as_str(), "Session created");

        Self {
            role,
            store,
            issues: IssueQueue::from_cache(cached_issues),
            deck,
            my_vote: None,
            cache,
            closed: None,
        }
    }

    /// Use and remember a deck for this room
    pub fn with_deck(mut self, deck: DeckConfig) -> Self {
        if let Err(e) = self.cache.save_deck(self.room_id(), &deck) {
            warn!(room_id = %self.room_id(), error = %e, "Failed to save deck");
        }
        self.deck = deck;
        self
    }

    pub fn room_id(&self) -> Uuid {
        self.store.room_id()
    }

    pub fn me(&self) -> &str {
        self.store.me()
    }

    pub fn role(&self) -> UserRole {
        self.role
    }

    pub fn is_moderator(&self) -> bool {
        self.store.is_moderator()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn issues(&self) -> &IssueQueue {
        &self.issues
    }

    pub fn deck(&self) -> &DeckConfig {
        &self.deck
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn closed(&self) -> Option<&CloseReason> {
        self.closed.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.store.subscribe()
    }

    /// Connection (re)established: resync everything from the server
    pub fn on_connected(&mut self) -> Vec<ClientMessage> {
        if self.is_closed() {
            return Vec::new();
        }

        self.store.set_connected(true);
        self.store.clear_error();
        self.issues.mark_stale();

        let room_id = self.room_id();
        vec![
            ClientMessage::GetRoomInfo { room_id },
            ClientMessage::JoinRoom {
                room_id,
                participant: self.me().to_string(),
            },
        ]
    }

    pub fn on_disconnected(&mut self) {
        self.store.set_connected(false);
    }

    /// Apply one message from the server
    pub fn handle(&mut self, msg: ServerMessage) -> Vec<ClientMessage> {
        if self.is_closed() {
            debug!(room_id = %self.room_id(), "Session closed, dropping message");
            return Vec::new();
        }

        match msg {
            ServerMessage::RoomCreated(room) => {
                self.store.apply_room_info(room.info());
                self.persist_snapshot();
            }
            ServerMessage::ParticipantJoined { participants } => {
                self.store.apply_participant_list(&participants);
                self.persist_snapshot();
            }
            ServerMessage::RoomInfo(info) => {
                self.store.apply_room_info(info);
                self.persist_snapshot();
            }
            ServerMessage::RoundStarted(task) => {
                self.my_vote = None;
                self.store.apply_round_started(task);
            }
            ServerMessage::ParticipantVoted { participant } => {
                self.store.apply_vote_ack(&participant);
            }
            ServerMessage::VoteReceived { count } => {
                self.store.apply_vote_count(count);
            }
            ServerMessage::VotesRevealed { results } => {
                if let Err(e) = self.store.apply_votes_revealed(results.clone()) {
                    warn!(room_id = %self.room_id(), error = %e, "Ignoring reveal");
                    return Vec::new();
                }
                return self.complete_current_issue(&results);
            }
            ServerMessage::RoundReset => {
                self.my_vote = None;
                self.store.apply_round_reset();
            }
            ServerMessage::RoomEnded => {
                self.teardown(CloseReason::RoomEnded);
            }
            ServerMessage::IssueUpdate { action, issue } => {
                let outcome = self.issues.apply_update(action, issue);
                debug!(action = %action, ?outcome, "Issue update");
                self.persist_issues();
            }
            ServerMessage::SyncIssues { issues } => {
                self.issues.reconcile(issues);
                self.persist_issues();
            }
            ServerMessage::Error { message } => {
                if self.store.record_error(&message) == ErrorSeverity::Terminal {
                    self.teardown(CloseReason::RoomGone(message));
                }
            }
            ServerMessage::Pong => {}
        }

        Vec::new()
    }

    /// Apply one local command
    pub fn execute(&mut self, cmd: SessionCommand) -> Result<Vec<ClientMessage>> {
        match cmd {
            SessionCommand::Vote(label) => self.vote(&label),
            SessionCommand::StartRound { title, description } => {
                self.start_round(&title, description)
            }
            SessionCommand::Reveal => self.reveal(),
            SessionCommand::NextRound => self.next_round(),
            SessionCommand::AddIssue { title, description } => self.add_issue(&title, description),
            SessionCommand::StartVoting(id) => self.start_voting(&id),
            SessionCommand::VoteAgain(id) => self.vote_again(&id),
            SessionCommand::Leave => self.leave(),
            SessionCommand::End => self.end(),
        }
    }

    /// Cast the card labelled `label` in the active round
    pub fn vote(&mut self, label: &str) -> Result<Vec<ClientMessage>> {
        self.ensure_open()?;
        let value = self
            .deck
            .find(label)
            .ok_or_else(|| Error::InvalidOperation(format!("No card labelled {label}")))?;
        if self.store.phase() != RoundPhase::Voting {
            return Err(Error::InvalidOperation("No active round".into()));
        }

        self.my_vote = Some(value);
        Ok(vec![ClientMessage::Vote {
            room_id: self.room_id(),
            participant: self.me().to_string(),
            value,
        }])
    }

    pub fn start_round(
        &mut self,
        title: &str,
        description: Option<String>,
    ) -> Result<Vec<ClientMessage>> {
        self.require_moderator("start a round")?;
        if title.trim().is_empty() {
            return Err(Error::InvalidOperation("Round title is empty".into()));
        }

        Ok(vec![ClientMessage::StartRound {
            room_id: self.room_id(),
            title: title.trim().to_string(),
            description,
        }])
    }

    pub fn reveal(&mut self) -> Result<Vec<ClientMessage>> {
        self.require_moderator("reveal votes")?;
        if self.store.phase() != RoundPhase::Voting {
            return Err(Error::InvalidOperation("No active round".into()));
        }
        Ok(vec![ClientMessage::RevealVotes {
            room_id: self.room_id(),
        }])
    }

    pub fn next_round(&mut self) -> Result<Vec<ClientMessage>> {
        self.require_moderator("start the next round")?;
        Ok(vec![ClientMessage::NextRound {
            room_id: self.room_id(),
        }])
    }

    pub fn add_issue(
        &mut self,
        title: &str,
        description: Option<String>,
    ) -> Result<Vec<ClientMessage>> {
        self.ensure_open()?;
        let change = self.issues.add(title, description)?;
        self.persist_issues();
        Ok(vec![self.issue_message(change)])
    }

    /// Put an issue up for voting and open a round for it
    pub fn start_voting(&mut self, id: &str) -> Result<Vec<ClientMessage>> {
        self.require_moderator("start voting")?;
        let change = self.issues.start_voting(id)?;
        self.persist_issues();

        let round = self.round_for(&change.issue);
        Ok(vec![self.issue_message(change), round])
    }

    /// Clear an issue's result and vote on it again
    pub fn vote_again(&mut self, id: &str) -> Result<Vec<ClientMessage>> {
        self.require_moderator("restart voting")?;
        let reset = self.issues.reset_for_revote(id)?;
        let started = self.issues.start_voting(id)?;
        self.persist_issues();

        let round = self.round_for(&started.issue);
        Ok(vec![
            self.issue_message(reset),
            self.issue_message(started),
            round,
        ])
    }

    pub fn leave(&mut self) -> Result<Vec<ClientMessage>> {
        self.ensure_open()?;
        let msg = ClientMessage::LeaveRoom {
            room_id: self.room_id(),
            participant: self.me().to_string(),
        };
        self.teardown(CloseReason::Left);
        Ok(vec![msg])
    }

    pub fn end(&mut self) -> Result<Vec<ClientMessage>> {
        self.require_moderator("end the room")?;
        let msg = ClientMessage::EndRoom {
            room_id: self.room_id(),
        };
        self.teardown(CloseReason::Ended);
        Ok(vec![msg])
    }

    /// Votes cast over known participants
    pub fn progress(&self) -> (usize, usize) {
        self.store.progress()
    }

    pub fn can_reveal(&self) -> bool {
        self.store.can_reveal()
    }

    /// One-based position of the voting issue
    pub fn issue_position(&self) -> Option<(usize, usize)> {
        self.issues.voting_position()
    }

    /// Statistics of the revealed round
    pub fn tally(&self) -> Option<Tally> {
        (self.store.phase() == RoundPhase::Revealed)
            .then(|| Tally::compute(self.store.round().results()))
    }

    pub fn view(&self) -> SessionView {
        let round = self.store.round();
        SessionView {
            room_id: self.room_id(),
            room_name: self.store.room_name().map(str::to_string),
            me: self.me().to_string(),
            moderator: self.store.moderator().map(str::to_string),
            participants: self.store.participants().to_vec(),
            voted: self
                .store
                .participants()
                .iter()
                .filter(|p| self.store.has_voted(p))
                .cloned()
                .collect(),
            phase: self.store.phase(),
            task: round.task().cloned(),
            my_vote: self.my_vote,
            progress: self.progress(),
            can_reveal: self.can_reveal(),
            results: round.results().to_vec(),
            tally: self.tally(),
            issues: self.issues.issues().to_vec(),
            issue_position: self.issue_position(),
            cards: self.deck.cards(),
            last_error: self.store.last_error().map(str::to_string),
            connected: self.store.is_connected(),
            closed: self.closed.clone(),
        }
    }

    /// Record the revealed outcome on the voting issue. The moderator
    /// announces the completion to everyone else.
    fn complete_current_issue(&mut self, results: &[VoteResult]) -> Vec<ClientMessage> {
        let Some(id) = self.issues.current_voting().map(|i| i.id.clone()) else {
            return Vec::new();
        };

        let votes: BTreeMap<String, f64> = results
            .iter()
            .map(|r| (r.participant.clone(), r.value.value()))
            .collect();

        let change = match self
            .issues
            .complete_voting(&id, tally::rounded_result(results), votes)
        {
            Ok(change) => change,
            Err(e) => {
                warn!(issue_id = %id, error = %e, "Failed to complete issue");
                return Vec::new();
            }
        };
        self.persist_issues();
        info!(issue_id = %id, result = ?change.issue.result, "Issue completed");

        if self.is_moderator() {
            vec![self.issue_message(change)]
        } else {
            Vec::new()
        }
    }

    fn issue_message(&self, change: IssueChange) -> ClientMessage {
        ClientMessage::IssueUpdate {
            room_id: self.room_id(),
            action: change.action,
            issue: change.issue,
        }
    }

    fn round_for(&self, issue: &Issue) -> ClientMessage {
        ClientMessage::StartRound {
            room_id: self.room_id(),
            title: issue.title.clone(),
            description: issue.description.clone(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match &self.closed {
            Some(reason) => Err(Error::InvalidOperation(format!("Session closed: {reason}"))),
            None => Ok(()),
        }
    }

    fn require_moderator(&self, action: &str) -> Result<()> {
        self.ensure_open()?;
        if !self.is_moderator() {
            return Err(Error::InvalidOperation(format!(
                "Only the moderator can {action}"
            )));
        }
        Ok(())
    }

    fn persist_snapshot(&self) {
        if let Err(e) = self.cache.save_snapshot(&self.store.snapshot()) {
            warn!(room_id = %self.room_id(), error = %e, "Failed to cache snapshot");
        }
    }

    fn persist_issues(&self) {
        if let Err(e) = self.cache.save_issues(self.room_id(), self.issues.issues()) {
            warn!(room_id = %self.room_id(), error = %e, "Failed to cache issues");
        }
    }

    /// Forget everything about the room, locally and in the cache
    fn teardown(&mut self, reason: CloseReason) {
        let room_id = self.room_id();
        if let Err(e) = self.cache.clear_room(room_id) {
            warn!(room_id = %room_id, error = %e, "Failed to clear room cache");
        }
        self.store.teardown();
        self.issues.clear();
        self.deck = DeckConfig::default();
        self.my_vote = None;
        info!(room_id = %room_id, reason = %reason, "Session closed");
        self.closed = Some(reason);
    }
}
