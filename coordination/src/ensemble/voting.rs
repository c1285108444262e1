//! Merge policies for multi-worker proposals
//!
//! `Majority` treats each proposal as one vote for its own whitespace-normalised
//! text. Ties go to the proposal from the lowest worker index so the outcome
//! does not depend on completion order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// How pair/team proposals are combined into one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Ask the merge collaborator; fall back to the first proposal on failure
    #[default]
    Delegate,
    /// Take the first well-formed proposal
    First,
    /// Most frequent proposal after whitespace normalisation
    Majority,
}

impl std::fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delegate => write!(f, "delegate"),
            Self::First => write!(f, "first"),
            Self::Majority => write!(f, "majority"),
        }
    }
}

impl std::str::FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "delegate" => Ok(Self::Delegate),
            "first" => Ok(Self::First),
            "majority" => Ok(Self::Majority),
            other => Err(format!(
                "unknown merge policy '{other}' (expected delegate, first or majority)"
            )),
        }
    }
}

/// Outcome of a majority vote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOutcome {
    /// Position of the winning proposal in the input slice
    pub winner: usize,
    /// Proposals identical (after normalisation) to the winner
    pub votes: usize,
    /// Number of proposals that voted
    pub total: usize,
}

impl VoteOutcome {
    pub fn is_unanimous(&self) -> bool {
        self.votes == self.total
    }
}

/// Collapse every whitespace run to a single space and trim the ends
pub fn normalize_whitespace(code: &str) -> String {
    code.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pick the most frequent proposal. `None` when there are no proposals.
pub fn majority_vote(proposals: &[String]) -> Option<VoteOutcome> {
    if proposals.is_empty() {
        return None;
    }

    // normalised text → (first index, count)
    let mut tally: HashMap<String, (usize, usize)> = HashMap::new();
    for (i, proposal) in proposals.iter().enumerate() {
        tally
            .entry(normalize_whitespace(proposal))
            .and_modify(|(_, count)| *count += 1)
            .or_insert((i, 1));
    }

    let (winner, votes) = tally
        .into_values()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))?;

    debug!(winner, votes, total = proposals.len(), "Majority vote");
    Some(VoteOutcome {
        winner,
        votes,
        total: proposals.len(),
    })
}
