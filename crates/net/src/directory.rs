//! Room directory
//!
//! Authoritative state for every room the server hosts. The directory is pure:
//! it maps one client request to the messages that must go out and to whom,
//! and leaves delivery to the server. Recipients are resolved here because a
//! request such as `endRoom` removes the very room it broadcasts to.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use estima_core::invariants::assert_room_invariants;
use estima_core::{IssueQueue, Room, Round, RoundTask, UpdateOutcome};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, ServerMessage};

/// Identifies one client connection
pub type ConnId = u64;

/// Answer to any request naming a room the directory does not hold
pub const ROOM_NOT_FOUND: &str = "Room not found";

/// A message and the connections it goes to
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub recipients: Vec<ConnId>,
    pub message: ServerMessage,
}

struct RoomEntry {
    room: Room,
    issues: IssueQueue,
    connections: HashSet<ConnId>,
    /// Set when the last connection went away
    idle_since: Option<DateTime<Utc>>,
}

impl RoomEntry {
    fn recipients(&self) -> Vec<ConnId> {
        let mut conns: Vec<ConnId> = self.connections.iter().copied().collect();
        conns.sort_unstable();
        conns
    }

    fn recipients_except(&self, conn: ConnId) -> Vec<ConnId> {
        let mut conns = self.recipients();
        conns.retain(|c| *c != conn);
        conns
    }

    fn detach(&mut self, conn: ConnId, now: DateTime<Utc>) {
        self.connections.remove(&conn);
        if self.connections.is_empty() {
            self.idle_since = Some(now);
        }
    }
}

/// Which room and identity a connection speaks for
#[derive(Debug, Clone)]
struct Binding {
    room_id: Uuid,
    participant: String,
}

#[derive(Default)]
pub struct RoomDirectory {
    rooms: HashMap<Uuid, RoomEntry>,
    bindings: HashMap<ConnId, Binding>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room(&self, room_id: Uuid) -> Option<&Room> {
        self.rooms.get(&room_id).map(|e| &e.room)
    }

    pub fn issues(&self, room_id: Uuid) -> Option<&IssueQueue> {
        self.rooms.get(&room_id).map(|e| &e.issues)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Process one request. Rejections become an `error` reply to the sender.
    pub fn handle(&mut self, conn: ConnId, msg: ClientMessage, now: DateTime<Utc>) -> Vec<Outbound> {
        let result = msg.validate().and_then(|_| self.dispatch(conn, msg, now));
        match result {
            Ok(out) => out,
            Err(e) => {
                let message = match e {
                    Error::Rejected(reason) => reason,
                    other => other.to_string(),
                };
                debug!(conn, %message, "Request rejected");
                vec![reply(conn, ServerMessage::error(message))]
            }
        }
    }

    fn dispatch(&mut self, conn: ConnId, msg: ClientMessage, now: DateTime<Utc>) -> Result<Vec<Outbound>> {
        match msg {
            ClientMessage::CreateRoom {
                moderator,
                room_name,
            } => Ok(self.create_room(conn, moderator, room_name, now)),
            ClientMessage::JoinRoom {
                room_id,
                participant,
            } => self.join_room(conn, room_id, participant, now),
            ClientMessage::GetRoomInfo { room_id } => {
                let entry = self.entry(room_id)?;
                Ok(vec![reply(conn, ServerMessage::RoomInfo(entry.room.info()))])
            }
            ClientMessage::StartRound {
                room_id,
                title,
                description,
            } => {
                self.require_moderator(conn, room_id, "start a round")?;
                let task = RoundTask { title, description };
                let entry = self.entry_mut(room_id)?;
                entry.room.current_round = Some(Round::new(task.clone()));
                info!(%room_id, title = %task.title, "Round started");
                Ok(vec![Outbound {
                    recipients: entry.recipients(),
                    message: ServerMessage::RoundStarted(task),
                }])
            }
            ClientMessage::Vote {
                room_id,
                participant,
                value,
            } => {
                self.entry(room_id)?;
                if !self.speaks_for(conn, room_id, &participant) {
                    return Err(Error::Rejected(format!("Cannot vote as {participant}")));
                }
                let entry = self.entry_mut(room_id)?;
                if !entry.room.has_participant(&participant) {
                    return Err(Error::Rejected(format!("{participant} is not in this room")));
                }
                let round = match entry.room.current_round.as_mut() {
                    Some(round) if !round.revealed => round,
                    Some(_) => return Err(Error::Rejected("Votes are already revealed".into())),
                    None => return Err(Error::Rejected("No active round".into())),
                };
                round.record_vote(&participant, value);
                let count = round.vote_count();
                let recipients = entry.recipients();
                Ok(vec![
                    Outbound {
                        recipients: recipients.clone(),
                        message: ServerMessage::ParticipantVoted { participant },
                    },
                    Outbound {
                        recipients,
                        message: ServerMessage::VoteReceived { count },
                    },
                ])
            }
            ClientMessage::RevealVotes { room_id } => {
                self.require_moderator(conn, room_id, "reveal votes")?;
                let entry = self.entry_mut(room_id)?;
                let round = entry
                    .room
                    .current_round
                    .as_mut()
                    .ok_or_else(|| Error::Rejected("No active round".into()))?;
                round.revealed = true;
                let results = round.votes.clone();
                info!(%room_id, votes = results.len(), "Votes revealed");
                Ok(vec![Outbound {
                    recipients: entry.recipients(),
                    message: ServerMessage::VotesRevealed { results },
                }])
            }
            ClientMessage::NextRound { room_id } => {
                self.require_moderator(conn, room_id, "start the next round")?;
                let entry = self.entry_mut(room_id)?;
                entry.room.current_round = None;
                Ok(vec![Outbound {
                    recipients: entry.recipients(),
                    message: ServerMessage::RoundReset,
                }])
            }
            ClientMessage::EndRoom { room_id } => {
                self.require_moderator(conn, room_id, "end the room")?;
                let entry = self
                    .rooms
                    .remove(&room_id)
                    .ok_or_else(|| Error::Rejected(ROOM_NOT_FOUND.into()))?;
                self.bindings.retain(|_, b| b.room_id != room_id);
                info!(%room_id, "Room ended");
                Ok(vec![Outbound {
                    recipients: entry.recipients(),
                    message: ServerMessage::RoomEnded,
                }])
            }
            ClientMessage::LeaveRoom {
                room_id,
                participant,
            } => self.leave_room(conn, room_id, participant, now),
            ClientMessage::IssueUpdate {
                room_id,
                action,
                issue,
            } => {
                let entry = self.entry_mut(room_id)?;
                match entry.issues.apply_update(action, issue.clone()) {
                    UpdateOutcome::Applied => Ok(vec![Outbound {
                        recipients: entry.recipients_except(conn),
                        message: ServerMessage::IssueUpdate { action, issue },
                    }]),
                    outcome => {
                        debug!(%room_id, issue_id = %issue.id, ?outcome, "Issue update not relayed");
                        Ok(Vec::new())
                    }
                }
            }
            ClientMessage::Ping => Ok(vec![reply(conn, ServerMessage::Pong)]),
        }
    }

    fn create_room(
        &mut self,
        conn: ConnId,
        moderator: String,
        room_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Vec<Outbound> {
        let room = Room::new(moderator.trim(), room_name);
        assert_room_invariants(&room);
        let room_id = room.id;
        info!(%room_id, moderator = %room.moderator, "Room created");

        self.bind(conn, room_id, room.moderator.clone(), now);
        let entry = RoomEntry {
            room: room.clone(),
            issues: IssueQueue::authoritative(),
            connections: HashSet::from([conn]),
            idle_since: None,
        };
        self.rooms.insert(room_id, entry);

        vec![reply(conn, ServerMessage::RoomCreated(room))]
    }

    fn join_room(
        &mut self,
        conn: ConnId,
        room_id: Uuid,
        participant: String,
        now: DateTime<Utc>,
    ) -> Result<Vec<Outbound>> {
        let participant = participant.trim().to_string();
        self.entry(room_id)?;
        self.bind(conn, room_id, participant.clone(), now);

        let entry = self.entry_mut(room_id)?;
        if entry.room.add_participant(&participant) {
            info!(%room_id, %participant, "Participant joined");
        }
        entry.connections.insert(conn);
        entry.idle_since = None;

        Ok(vec![
            Outbound {
                recipients: entry.recipients(),
                message: ServerMessage::ParticipantJoined {
                    participants: entry.room.participants.clone(),
                },
            },
            reply(
                conn,
                ServerMessage::SyncIssues {
                    issues: entry.issues.issues().to_vec(),
                },
            ),
        ])
    }

    fn leave_room(
        &mut self,
        conn: ConnId,
        room_id: Uuid,
        participant: String,
        now: DateTime<Utc>,
    ) -> Result<Vec<Outbound>> {
        let entry = self
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| Error::Rejected(ROOM_NOT_FOUND.into()))?;

        if entry.room.remove_participant(&participant) {
            info!(%room_id, %participant, "Participant left");
        }
        entry.detach(conn, now);
        let out = Outbound {
            recipients: entry.recipients(),
            message: ServerMessage::ParticipantJoined {
                participants: entry.room.participants.clone(),
            },
        };

        if self.bindings.get(&conn).is_some_and(|b| b.room_id == room_id) {
            self.bindings.remove(&conn);
        }
        Ok(vec![out])
    }

    /// Speak for `participant` in `room_id`, leaving any previous room
    fn bind(&mut self, conn: ConnId, room_id: Uuid, participant: String, now: DateTime<Utc>) {
        let previous = self.bindings.insert(
            conn,
            Binding {
                room_id,
                participant,
            },
        );
        if let Some(prev) = previous.filter(|p| p.room_id != room_id) {
            if let Some(entry) = self.rooms.get_mut(&prev.room_id) {
                entry.detach(conn, now);
            }
        }
    }

    /// Forget a closed connection. Its participant stays in the room so a
    /// reconnect can pick up where it left off.
    pub fn disconnect(&mut self, conn: ConnId, now: DateTime<Utc>) {
        if let Some(binding) = self.bindings.remove(&conn) {
            if let Some(entry) = self.rooms.get_mut(&binding.room_id) {
                entry.detach(conn, now);
                debug!(room_id = %binding.room_id, participant = %binding.participant, "Connection detached");
            }
        }
    }

    /// Drop rooms that have had no connection for at least `ttl`
    pub fn expire_idle(&mut self, now: DateTime<Utc>, ttl: Duration) -> Vec<Uuid> {
        let expired: Vec<Uuid> = self
            .rooms
            .iter()
            .filter_map(|(id, entry)| {
                let since = entry.idle_since?;
                let idle = (now - since).to_std().ok()?;
                (idle >= ttl).then_some(*id)
            })
            .collect();

        for id in &expired {
            self.rooms.remove(id);
            info!(room_id = %id, "Room expired");
        }
        self.bindings.retain(|_, b| !expired.contains(&b.room_id));
        expired
    }

    fn entry(&self, room_id: Uuid) -> Result<&RoomEntry> {
        self.rooms
            .get(&room_id)
            .ok_or_else(|| Error::Rejected(ROOM_NOT_FOUND.into()))
    }

    fn entry_mut(&mut self, room_id: Uuid) -> Result<&mut RoomEntry> {
        self.rooms
            .get_mut(&room_id)
            .ok_or_else(|| Error::Rejected(ROOM_NOT_FOUND.into()))
    }

    fn speaks_for(&self, conn: ConnId, room_id: Uuid, participant: &str) -> bool {
        self.bindings
            .get(&conn)
            .is_some_and(|b| b.room_id == room_id && b.participant == participant)
    }

    fn require_moderator(&self, conn: ConnId, room_id: Uuid, action: &str) -> Result<()> {
        let entry = self.entry(room_id)?;
        let is_moderator = self
            .bindings
            .get(&conn)
            .is_some_and(|b| b.room_id == room_id && entry.room.is_moderator(&b.participant));
        if !is_moderator {
            return Err(Error::Rejected(format!("Only the moderator can {action}")));
        }
        Ok(())
    }
}

fn reply(conn: ConnId, message: ServerMessage) -> Outbound {
    Outbound {
        recipients: vec![conn],
        message,
    }
}
