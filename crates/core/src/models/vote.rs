//! Vote values and revealed results

use serde::{Deserialize, Serialize};

/// A single estimate cast by a participant.
///
/// Two sentinel values carry non-numeric intent: [`VoteValue::UNKNOWN`] ("?")
/// and [`VoteValue::BREAK`] ("☕"). Both count toward quorum but are excluded
/// from every statistic.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteValue(pub f64);

impl VoteValue {
    /// "I don't know"
    pub const UNKNOWN: VoteValue = VoteValue(999.0);
    /// "I need a break"
    pub const BREAK: VoteValue = VoteValue(1000.0);

    /// Values at or above this are never aggregated
    pub const SENTINEL_FLOOR: f64 = 900.0;

    pub fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn is_sentinel(self) -> bool {
        self.0 >= Self::SENTINEL_FLOOR
    }

    /// A vote usable on the wire: finite and not negative
    pub fn is_valid(self) -> bool {
        self.0.is_finite() && self.0 >= 0.0
    }
}

impl From<f64> for VoteValue {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for VoteValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Self::UNKNOWN {
            write!(f, "?")
        } else if *self == Self::BREAK {
            write!(f, "☕")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A participant's revealed vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteResult {
    pub participant: String,
    pub value: VoteValue,
}

impl VoteResult {
    pub fn new(participant: impl Into<String>, value: impl Into<VoteValue>) -> Self {
        Self {
            participant: participant.into(),
            value: value.into(),
        }
    }
}
