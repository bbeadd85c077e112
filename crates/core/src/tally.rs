//! Vote aggregation
//!
//! Statistics over revealed votes. Sentinel votes (see [`VoteValue::is_sentinel`])
//! are dropped before any computation; a result set holding only sentinels
//! yields no data rather than zero.

use serde::{Deserialize, Serialize};

use crate::models::{VoteResult, VoteValue};

/// How closely the numeric votes agree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consensus {
    /// Fewer than two numeric votes
    Undetermined,
    Perfect,
    Good,
    Fair,
    Poor,
}

impl Consensus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Consensus::Undetermined => "undetermined",
            Consensus::Perfect => "perfect",
            Consensus::Good => "good",
            Consensus::Fair => "fair",
            Consensus::Poor => "poor",
        }
    }
}

impl std::fmt::Display for Consensus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric values eligible for aggregation
fn eligible(results: &[VoteResult]) -> Vec<f64> {
    results
        .iter()
        .map(|r| r.value)
        .filter(|v| !v.is_sentinel())
        .map(VoteValue::value)
        .collect()
}

/// Mean of the numeric votes, `None` when there are none
pub fn average(results: &[VoteResult]) -> Option<f64> {
    let values = eligible(results);
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median of the numeric votes; the mean of the two middle values for even counts
pub fn median(results: &[VoteResult]) -> Option<f64> {
    let mut values = eligible(results);
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);

    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Agreement level from the max/min ratio of the numeric votes
pub fn consensus(results: &[VoteResult]) -> Consensus {
    let values = eligible(results);
    if values.len() < 2 {
        return Consensus::Undetermined;
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if min == max {
        return Consensus::Perfect;
    }
    // A zero next to any positive estimate is as far apart as votes get
    if min == 0.0 {
        return Consensus::Poor;
    }

    let ratio = max / min;
    if ratio <= 2.0 {
        Consensus::Good
    } else if ratio <= 4.0 {
        Consensus::Fair
    } else {
        Consensus::Poor
    }
}

/// Result recorded on a completed issue: the rounded average, zero without data
pub fn rounded_result(results: &[VoteResult]) -> f64 {
    average(results).map(round_half_up).unwrap_or(0.0)
}

fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

/// Full summary of a revealed round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    /// Votes cast, sentinels included
    pub votes: usize,
    /// Votes that entered the statistics
    pub eligible: usize,
    pub average: Option<f64>,
    pub median: Option<f64>,
    pub consensus: Consensus,
}

impl Tally {
    pub fn compute(results: &[VoteResult]) -> Self {
        Self {
            votes: results.len(),
            eligible: eligible(results).len(),
            average: average(results),
            median: median(results),
            consensus: consensus(results),
        }
    }

    /// Average formatted to one decimal, "N/A" without data
    pub fn average_label(&self) -> String {
        match self.average {
            Some(avg) => format!("{avg:.1}"),
            None => "N/A".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn votes(values: &[f64]) -> Vec<VoteResult> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| VoteResult::new(format!("p{i}"), *v))
            .collect()
    }

    #[test]
    fn test_average_ignores_sentinels() {
        assert_eq!(average(&votes(&[5.0, 8.0, 999.0])), Some(6.5));
        assert_eq!(average(&votes(&[5.0, 8.0])), Some(6.5));
    }

    #[test]
    fn test_average_no_data() {
        assert_eq!(average(&votes(&[999.0, 1000.0])), None);
        assert_eq!(average(&[]), None);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&votes(&[8.0, 1.0, 3.0])), Some(3.0));
        assert_eq!(median(&votes(&[8.0, 1.0, 3.0, 5.0, 1000.0])), Some(4.0));
        assert_eq!(median(&votes(&[999.0])), None);
    }

    #[test]
    fn test_consensus_levels() {
        assert_eq!(consensus(&votes(&[5.0, 5.0, 5.0])), Consensus::Perfect);
        assert_eq!(consensus(&votes(&[5.0, 10.0])), Consensus::Good);
        assert_eq!(consensus(&votes(&[2.0, 8.0])), Consensus::Fair);
        assert_eq!(consensus(&votes(&[5.0, 21.0])), Consensus::Poor);
    }

    #[test]
    fn test_consensus_with_zero() {
        assert_eq!(consensus(&votes(&[0.0, 0.0])), Consensus::Perfect);
        assert_eq!(consensus(&votes(&[0.0, 5.0])), Consensus::Poor);
    }

    #[test]
    fn test_consensus_undetermined() {
        assert_eq!(consensus(&votes(&[5.0])), Consensus::Undetermined);
        assert_eq!(consensus(&votes(&[5.0, 999.0, 1000.0])), Consensus::Undetermined);
    }

    #[test]
    fn test_order_independent() {
        let a = votes(&[13.0, 2.0, 5.0, 999.0]);
        let mut b = a.clone();
        b.reverse();
        assert_eq!(Tally::compute(&a), Tally::compute(&b));
    }

    #[test]
    fn test_rounded_result() {
        assert_eq!(rounded_result(&votes(&[5.0, 8.0])), 7.0);
        assert_eq!(rounded_result(&votes(&[1.0, 2.0, 2.0])), 2.0);
        assert_eq!(rounded_result(&votes(&[999.0])), 0.0);
    }

    #[test]
    fn test_tally_summary() {
        let tally = Tally::compute(&votes(&[5.0, 8.0, 1000.0]));
        assert_eq!(tally.votes, 3);
        assert_eq!(tally.eligible, 2);
        assert_eq!(tally.average_label(), "6.5");
        assert_eq!(tally.consensus, Consensus::Good);
        assert_eq!(Tally::compute(&votes(&[999.0])).average_label(), "N/A");
    }
}
