//! Card decks offered to voters

use serde::{Deserialize, Serialize};

use super::VoteValue;

/// Built-in voting systems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VotingSystem {
    #[default]
    Fibonacci,
    ModifiedFibonacci,
    #[serde(rename = "t-shirts")]
    TShirts,
    #[serde(rename = "powers-of-2")]
    PowersOfTwo,
}

impl VotingSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            VotingSystem::Fibonacci => "fibonacci",
            VotingSystem::ModifiedFibonacci => "modified-fibonacci",
            VotingSystem::TShirts => "t-shirts",
            VotingSystem::PowersOfTwo => "powers-of-2",
        }
    }

    /// Parse a system name; unknown names fall back to Fibonacci
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "modified-fibonacci" => VotingSystem::ModifiedFibonacci,
            "t-shirts" => VotingSystem::TShirts,
            "powers-of-2" => VotingSystem::PowersOfTwo,
            _ => VotingSystem::Fibonacci,
        }
    }

    pub fn cards(&self) -> Vec<Card> {
        let labels: &[&str] = match self {
            VotingSystem::Fibonacci => &[
                "0", "1", "2", "3", "5", "8", "13", "21", "34", "55", "89",
            ],
            VotingSystem::ModifiedFibonacci => &[
                "0", "½", "1", "2", "3", "5", "8", "13", "20", "40", "100",
            ],
            VotingSystem::TShirts => &["XS", "S", "M", "L", "XL"],
            VotingSystem::PowersOfTwo => &["0", "1", "2", "4", "8", "16", "32", "64"],
        };

        labels
            .iter()
            .chain(["?", "☕"].iter())
            .map(|label| Card::from_label(label))
            .collect()
    }
}

impl std::fmt::Display for VotingSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A votable card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub value: VoteValue,
    pub label: String,
}

impl Card {
    pub fn from_label(label: &str) -> Self {
        Self {
            value: card_value(label),
            label: label.to_string(),
        }
    }
}

/// Numeric value of a card label. Unparseable labels count as zero.
pub fn card_value(label: &str) -> VoteValue {
    match label {
        "?" => VoteValue::UNKNOWN,
        "☕" => VoteValue::BREAK,
        "½" => VoteValue(0.5),
        "XS" => VoteValue(1.0),
        "S" => VoteValue(2.0),
        "M" => VoteValue(3.0),
        "L" => VoteValue(5.0),
        "XL" => VoteValue(8.0),
        other => VoteValue(other.parse::<f64>().unwrap_or(0.0)),
    }
}

/// Per-room deck choice, cached locally
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
    #[serde(default)]
    pub voting_system: VotingSystem,
    /// Comma-separated custom labels; overrides the voting system when non-empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_cards: Option<String>,
}

impl DeckConfig {
    pub fn custom_labels(&self) -> Vec<String> {
        self.custom_cards
            .as_deref()
            .map(|cards| {
                cards
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn cards(&self) -> Vec<Card> {
        let custom = self.custom_labels();
        if custom.is_empty() {
            self.voting_system.cards()
        } else {
            custom.iter().map(|label| Card::from_label(label)).collect()
        }
    }

    /// Value of the card with this label, if the deck has one
    pub fn find(&self, label: &str) -> Option<VoteValue> {
        self.cards()
            .into_iter()
            .find(|c| c.label == label)
            .map(|c| c.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_deck_ends_with_sentinels() {
        for system in [
            VotingSystem::Fibonacci,
            VotingSystem::ModifiedFibonacci,
            VotingSystem::TShirts,
            VotingSystem::PowersOfTwo,
        ] {
            let cards = system.cards();
            let n = cards.len();
            assert_eq!(cards[n - 2].value, VoteValue::UNKNOWN);
            assert_eq!(cards[n - 1].value, VoteValue::BREAK);
        }
    }

    #[test]
    fn test_tshirt_values() {
        let values: Vec<f64> = VotingSystem::TShirts
            .cards()
            .iter()
            .map(|c| c.value.value())
            .collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 5.0, 8.0, 999.0, 1000.0]);
    }

    #[test]
    fn test_unknown_system_falls_back() {
        assert_eq!(VotingSystem::from_name("tarot"), VotingSystem::Fibonacci);
        assert_eq!(
            VotingSystem::from_name("powers-of-2"),
            VotingSystem::PowersOfTwo
        );
    }

    #[test]
    fn test_custom_deck_overrides() {
        let config = DeckConfig {
            custom_cards: Some(" 1, 2 ,, ½, ?, huge ".into()),
            ..Default::default()
        };
        let cards = config.cards();
        assert_eq!(cards.len(), 5);
        assert_eq!(cards[2].value, VoteValue(0.5));
        assert_eq!(cards[3].value, VoteValue::UNKNOWN);
        assert_eq!(cards[4].value, VoteValue(0.0));
        assert_eq!(config.find("2"), Some(VoteValue(2.0)));
        assert_eq!(config.find("13"), None);
    }

    #[test]
    fn test_system_serde_names() {
        let json = serde_json::to_string(&VotingSystem::PowersOfTwo).unwrap();
        assert_eq!(json, "\"powers-of-2\"");
        let json = serde_json::to_string(&VotingSystem::ModifiedFibonacci).unwrap();
        assert_eq!(json, "\"modified-fibonacci\"");
    }
}
