//! Room model - the collaborative estimation session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Round, RoundView};

/// A room owned by the directory. Participants are keyed by display name and
/// kept in join order; the moderator is always one of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub moderator: String,
    pub participants: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_round: Option<Round>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn new(moderator: impl Into<String>, name: Option<String>) -> Self {
        let moderator = moderator.into();
        Self {
            id: Uuid::new_v4(),
            name: name.filter(|n| !n.trim().is_empty()),
            participants: vec![moderator.clone()],
            moderator,
            current_round: None,
            created_at: Utc::now(),
        }
    }

    /// Add a participant. Returns false if the name was already present.
    pub fn add_participant(&mut self, name: &str) -> bool {
        if self.has_participant(name) {
            return false;
        }
        self.participants.push(name.to_string());
        true
    }

    /// Remove a participant. The moderator cannot be removed.
    pub fn remove_participant(&mut self, name: &str) -> bool {
        if name == self.moderator {
            return false;
        }
        let before = self.participants.len();
        self.participants.retain(|p| p != name);
        self.participants.len() != before
    }

    pub fn has_participant(&self, name: &str) -> bool {
        self.participants.iter().any(|p| p == name)
    }

    pub fn is_moderator(&self, name: &str) -> bool {
        self.moderator == name
    }

    /// Display title, falling back to a shortened id
    pub fn title(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => default_title(self.id),
        }
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.id,
            name: self.name.clone(),
            moderator: self.moderator.clone(),
            participants: self.participants.clone(),
            current_round: self.current_round.as_ref().map(Round::view),
        }
    }
}

/// Fallback room title: "Room " plus the first eight id characters
pub fn default_title(id: Uuid) -> String {
    let id = id.to_string();
    format!("Room {}...", &id[..8])
}

/// Room facts sent to a client on request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub moderator: String,
    pub participants: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_round: Option<RoundView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moderator_is_participant() {
        let room = Room::new("alice", Some("R1".into()));
        assert!(room.has_participant("alice"));
        assert!(room.is_moderator("alice"));
        assert_eq!(room.title(), "R1");
    }

    #[test]
    fn test_add_participant_idempotent() {
        let mut room = Room::new("alice", None);
        assert!(room.add_participant("bob"));
        assert!(!room.add_participant("bob"));
        assert_eq!(room.participants, vec!["alice", "bob"]);
    }

    #[test]
    fn test_moderator_cannot_be_removed() {
        let mut room = Room::new("alice", None);
        room.add_participant("bob");
        assert!(!room.remove_participant("alice"));
        assert!(room.remove_participant("bob"));
        assert!(!room.remove_participant("bob"));
    }

    #[test]
    fn test_blank_name_falls_back() {
        let room = Room::new("alice", Some("   ".into()));
        assert!(room.name.is_none());
        assert!(room.title().starts_with("Room "));
    }

    #[test]
    fn test_info_is_camel_case() {
        let room = Room::new("alice", None);
        let json = serde_json::to_value(room.info()).unwrap();
        assert!(json.get("roomId").is_some());
        assert!(json.get("currentRound").is_none());
    }
}
