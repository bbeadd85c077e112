//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use crate::models::{Issue, Room};

/// At most one issue may be voting room-wide
pub fn assert_single_voting_issue(issues: &[Issue]) {
    let voting = issues.iter().filter(|i| i.is_voting()).count();
    debug_assert!(
        voting <= 1,
        "{} issues are voting, expected at most 1",
        voting
    );
}

/// Issue ids must be unique within a queue
pub fn assert_unique_issue_ids(issues: &[Issue]) {
    for (i, issue) in issues.iter().enumerate() {
        debug_assert!(
            !issues[..i].iter().any(|other| other.id == issue.id),
            "Duplicate issue id {}",
            issue.id
        );
    }
}

/// A room's moderator is always one of its participants
pub fn assert_room_invariants(room: &Room) {
    debug_assert!(
        room.has_participant(&room.moderator),
        "Room {} moderator {} is not a participant",
        room.id,
        room.moderator
    );

    debug_assert!(
        !room.moderator.trim().is_empty(),
        "Room {} has empty moderator",
        room.id
    );
}

/// A replica's participant list always contains the local participant
pub fn assert_participants_include(participants: &[String], name: &str) {
    debug_assert!(
        participants.iter().any(|p| p == name),
        "Participant list {:?} is missing {}",
        participants,
        name
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IssueStatus;

    #[test]
    fn test_valid_room() {
        let room = Room::new("alice", None);
        assert_room_invariants(&room);
    }

    #[test]
    fn test_single_voting_ok() {
        let mut a = Issue::new("PP-1", "A");
        a.status = IssueStatus::Voting;
        assert_single_voting_issue(&[a, Issue::new("PP-2", "B")]);
    }

    #[test]
    #[should_panic(expected = "expected at most 1")]
    fn test_two_voting_issues() {
        let mut a = Issue::new("PP-1", "A");
        a.status = IssueStatus::Voting;
        let mut b = Issue::new("PP-2", "B");
        b.status = IssueStatus::Voting;
        assert_single_voting_issue(&[a, b]);
    }

    #[test]
    #[should_panic(expected = "Duplicate issue id")]
    fn test_duplicate_ids() {
        assert_unique_issue_ids(&[Issue::new("PP-1", "A"), Issue::new("PP-1", "B")]);
    }

    #[test]
    #[should_panic(expected = "is missing")]
    fn test_participants_missing_self() {
        assert_participants_include(&["bob".to_string()], "alice");
    }
}
