//! Network protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire. Every
//! message carries a `type` tag naming the event, with camelCase fields.

use estima_core::{Issue, IssueAction, Room, RoomInfo, RoundTask, VoteResult, VoteValue};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Requests a client sends to the room directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    CreateRoom {
        moderator: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_name: Option<String>,
    },

    JoinRoom {
        room_id: Uuid,
        participant: String,
    },

    GetRoomInfo {
        room_id: Uuid,
    },

    /// Moderator only
    StartRound {
        room_id: Uuid,
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },

    Vote {
        room_id: Uuid,
        participant: String,
        value: VoteValue,
    },

    /// Moderator only
    RevealVotes {
        room_id: Uuid,
    },

    /// Moderator only
    NextRound {
        room_id: Uuid,
    },

    /// Moderator only
    EndRoom {
        room_id: Uuid,
    },

    LeaveRoom {
        room_id: Uuid,
        participant: String,
    },

    IssueUpdate {
        room_id: Uuid,
        action: IssueAction,
        issue: Issue,
    },

    /// Keepalive
    Ping,
}

impl ClientMessage {
    /// Room the request targets, if any
    pub fn room_id(&self) -> Option<Uuid> {
        match self {
            ClientMessage::CreateRoom { .. } | ClientMessage::Ping => None,
            ClientMessage::JoinRoom { room_id, .. }
            | ClientMessage::GetRoomInfo { room_id }
            | ClientMessage::StartRound { room_id, .. }
            | ClientMessage::Vote { room_id, .. }
            | ClientMessage::RevealVotes { room_id }
            | ClientMessage::NextRound { room_id }
            | ClientMessage::EndRoom { room_id }
            | ClientMessage::LeaveRoom { room_id, .. }
            | ClientMessage::IssueUpdate { room_id, .. } => Some(*room_id),
        }
    }

    /// Reject payloads that decode but make no sense
    pub fn validate(&self) -> Result<()> {
        match self {
            ClientMessage::CreateRoom { moderator, .. } => non_blank("moderator", moderator),
            ClientMessage::JoinRoom { participant, .. }
            | ClientMessage::LeaveRoom { participant, .. } => non_blank("participant", participant),
            ClientMessage::StartRound { title, .. } => non_blank("title", title),
            ClientMessage::Vote {
                participant, value, ..
            } => {
                non_blank("participant", participant)?;
                if !value.is_valid() {
                    return Err(Error::Protocol(format!("Invalid vote value {}", value.value())));
                }
                Ok(())
            }
            ClientMessage::IssueUpdate { issue, .. } => {
                non_blank("issue id", &issue.id)?;
                non_blank("issue title", &issue.title)
            }
            ClientMessage::GetRoomInfo { .. }
            | ClientMessage::RevealVotes { .. }
            | ClientMessage::NextRound { .. }
            | ClientMessage::EndRoom { .. }
            | ClientMessage::Ping => Ok(()),
        }
    }
}

fn non_blank(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Protocol(format!("Missing {}", field)));
    }
    Ok(())
}

/// Events the room directory sends to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Reply to `createRoom`
    RoomCreated(Room),

    /// Full participant list, broadcast on join and leave
    ParticipantJoined { participants: Vec<String> },

    RoomInfo(RoomInfo),

    RoundStarted(RoundTask),

    /// Someone voted; the value is withheld
    ParticipantVoted { participant: String },

    VoteReceived { count: usize },

    /// Results in first-vote order
    VotesRevealed { results: Vec<VoteResult> },

    RoundReset,

    RoomEnded,

    /// Incremental issue change from another client
    IssueUpdate { action: IssueAction, issue: Issue },

    /// Full issue list, sent on (re)join
    SyncIssues { issues: Vec<Issue> },

    Error { message: String },

    Pong,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_wire_shape() {
        let room_id = Uuid::new_v4();
        let msg = ClientMessage::Vote {
            room_id,
            participant: "bob".into(),
            value: VoteValue::new(5.0),
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "vote", "roomId": room_id, "participant": "bob", "value": 5.0})
        );
    }

    #[test]
    fn test_server_message_newtype_inlines_fields() {
        let msg = ServerMessage::RoundStarted(RoundTask::new("Login flow"));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "roundStarted");
        assert_eq!(value["title"], "Login flow");

        let decoded: ServerMessage = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_create_room_without_name() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "createRoom", "moderator": "alice"})).unwrap();
        assert_eq!(
            msg,
            ClientMessage::CreateRoom {
                moderator: "alice".into(),
                room_name: None
            }
        );
        assert!(msg.room_id().is_none());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result: std::result::Result<ClientMessage, _> =
            serde_json::from_value(json!({"type": "kickParticipant", "roomId": Uuid::nil()}));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate() {
        let room_id = Uuid::new_v4();
        assert!(ClientMessage::JoinRoom {
            room_id,
            participant: "  ".into()
        }
        .validate()
        .is_err());

        assert!(ClientMessage::Vote {
            room_id,
            participant: "bob".into(),
            value: VoteValue::new(-1.0)
        }
        .validate()
        .is_err());

        assert!(ClientMessage::Vote {
            room_id,
            participant: "bob".into(),
            value: VoteValue::UNKNOWN
        }
        .validate()
        .is_ok());

        assert!(ClientMessage::IssueUpdate {
            room_id,
            action: IssueAction::Added,
            issue: Issue::new("", "A")
        }
        .validate()
        .is_err());
    }
}
