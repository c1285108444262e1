//! Tier Policy — difficulty → initial tier, tier → next tier
//!
//! Pure and deterministic. The difficulty domain is the Fibonacci story-point
//! scale; values outside it are rejected when a [`DifficultyScore`] is built,
//! so every function here is total.

use serde::{Deserialize, Serialize};

/// Errors from building or validating a tier policy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("difficulty {0} is outside the story-point domain {{1, 2, 3, 5, 8}}")]
    DifficultyOutOfDomain(i64),

    #[error("team size {size} for tier {tier} must be between 1 and 3")]
    TeamSizeOutOfRange { tier: Tier, size: usize },

    #[error("medium threshold {medium} is above large threshold {large}")]
    ThresholdsOutOfOrder {
        medium: DifficultyScore,
        large: DifficultyScore,
    },
}

/// Story-point difficulty estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum DifficultyScore {
    /// Obvious implementation, minimal edge cases
    Trivial,
    /// Straightforward, a few edge cases
    Small,
    /// Careful handling, moderate edge cases
    Medium,
    /// Non-trivial approach, multiple edge cases
    Challenging,
    /// Difficult algorithm or design, high uncertainty
    Hard,
}

impl DifficultyScore {
    /// Every value in ascending order
    pub const ALL: [DifficultyScore; 5] = [
        Self::Trivial,
        Self::Small,
        Self::Medium,
        Self::Challenging,
        Self::Hard,
    ];

    /// Story-point value
    pub fn points(self) -> u8 {
        match self {
            Self::Trivial => 1,
            Self::Small => 2,
            Self::Medium => 3,
            Self::Challenging => 5,
            Self::Hard => 8,
        }
    }
}

impl TryFrom<i64> for DifficultyScore {
    type Error = PolicyError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Trivial),
            2 => Ok(Self::Small),
            3 => Ok(Self::Medium),
            5 => Ok(Self::Challenging),
            8 => Ok(Self::Hard),
            other => Err(PolicyError::DifficultyOutOfDomain(other)),
        }
    }
}

impl From<DifficultyScore> for i64 {
    fn from(score: DifficultyScore) -> Self {
        i64::from(score.points())
    }
}

impl std::fmt::Display for DifficultyScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.points())
    }
}

/// Resource tier. Ordering is significant: escalation only moves up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    /// Small — cheap, fast worker
    S,
    /// Medium
    M,
    /// Large — most capable worker
    L,
}

impl Tier {
    /// Every tier in ascending order
    pub const ALL: [Tier; 3] = [Self::S, Self::M, Self::L];

    /// The next-higher tier, `None` at the top
    pub fn next(self) -> Option<Tier> {
        match self {
            Self::S => Some(Self::M),
            Self::M => Some(Self::L),
            Self::L => None,
        }
    }

    pub fn is_highest(self) -> bool {
        self.next().is_none()
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::S => write!(f, "S"),
            Self::M => write!(f, "M"),
            Self::L => write!(f, "L"),
        }
    }
}

/// Collaboration mode implied by a team size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamMode {
    Solo,
    Pair,
    Team,
}

impl TeamMode {
    pub fn from_size(size: usize) -> Self {
        match size {
            0 | 1 => Self::Solo,
            2 => Self::Pair,
            _ => Self::Team,
        }
    }
}

impl std::fmt::Display for TeamMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Solo => write!(f, "solo"),
            Self::Pair => write!(f, "pair"),
            Self::Team => write!(f, "team"),
        }
    }
}

/// Workers dispatched per tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamSizes {
    pub small: usize,
    pub medium: usize,
    pub large: usize,
}

impl Default for TeamSizes {
    fn default() -> Self {
        Self {
            small: 1,
            medium: 2,
            large: 3,
        }
    }
}

/// Read-only routing configuration shared by every run.
///
/// Difficulty is routed by thresholds rather than a free-form table so the
/// mapping is monotonic by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierPolicy {
    /// Lowest difficulty routed to `M`
    pub medium_from: DifficultyScore,
    /// Lowest difficulty routed to `L`
    pub large_from: DifficultyScore,
    /// Team size per tier
    pub team_sizes: TeamSizes,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            medium_from: DifficultyScore::Medium,
            large_from: DifficultyScore::Hard,
            team_sizes: TeamSizes::default(),
        }
    }
}

impl TierPolicy {
    /// Check thresholds and team sizes
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.medium_from > self.large_from {
            return Err(PolicyError::ThresholdsOutOfOrder {
                medium: self.medium_from,
                large: self.large_from,
            });
        }
        for tier in Tier::ALL {
            let size = self.team_size(tier);
            if !(1..=3).contains(&size) {
                return Err(PolicyError::TeamSizeOutOfRange { tier, size });
            }
        }
        Ok(())
    }

    /// Initial tier for a difficulty estimate
    pub fn initial_tier(&self, difficulty: DifficultyScore) -> Tier {
        if difficulty >= self.large_from {
            Tier::L
        } else if difficulty >= self.medium_from {
            Tier::M
        } else {
            Tier::S
        }
    }

    /// Tier to retry at after a failed validation, `None` when already maximal
    pub fn next_tier(&self, current: Tier) -> Option<Tier> {
        current.next()
    }

    /// Number of workers dispatched at a tier
    pub fn team_size(&self, tier: Tier) -> usize {
        match tier {
            Tier::S => self.team_sizes.small,
            Tier::M => self.team_sizes.medium,
            Tier::L => self.team_sizes.large,
        }
    }

    pub fn team_mode(&self, tier: Tier) -> TeamMode {
        TeamMode::from_size(self.team_size(tier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mapping() {
        let policy = TierPolicy::default();
        assert_eq!(policy.initial_tier(DifficultyScore::Trivial), Tier::S);
        assert_eq!(policy.initial_tier(DifficultyScore::Small), Tier::S);
        assert_eq!(policy.initial_tier(DifficultyScore::Medium), Tier::M);
        assert_eq!(policy.initial_tier(DifficultyScore::Challenging), Tier::M);
        assert_eq!(policy.initial_tier(DifficultyScore::Hard), Tier::L);
    }

    #[test]
    fn test_initial_tier_monotonic_for_every_threshold_pair() {
        for medium in DifficultyScore::ALL {
            for large in DifficultyScore::ALL.into_iter().filter(|l| *l >= medium) {
                let policy = TierPolicy {
                    medium_from: medium,
                    large_from: large,
                    ..Default::default()
                };
                let tiers: Vec<Tier> = DifficultyScore::ALL
                    .iter()
                    .map(|d| policy.initial_tier(*d))
                    .collect();
                assert!(
                    tiers.windows(2).all(|w| w[0] <= w[1]),
                    "non-monotonic for medium={medium} large={large}: {tiers:?}"
                );
            }
        }
    }

    #[test]
    fn test_next_tier_strictly_increasing_and_stops() {
        let policy = TierPolicy::default();
        for tier in Tier::ALL {
            match policy.next_tier(tier) {
                Some(next) => assert!(next > tier),
                None => assert_eq!(tier, Tier::L),
            }
        }
        assert_eq!(policy.next_tier(Tier::L), None);
    }

    #[test]
    fn test_difficulty_domain() {
        for value in [1, 2, 3, 5, 8] {
            let score = DifficultyScore::try_from(value).unwrap();
            assert_eq!(i64::from(score), value);
        }
        for value in [0, 4, 6, 7, 9, -1, 13] {
            assert_eq!(
                DifficultyScore::try_from(value),
                Err(PolicyError::DifficultyOutOfDomain(value))
            );
        }
    }

    #[test]
    fn test_difficulty_serde_roundtrip_rejects_out_of_domain() {
        let score: DifficultyScore = serde_json::from_str("5").unwrap();
        assert_eq!(score, DifficultyScore::Challenging);
        assert!(serde_json::from_str::<DifficultyScore>("4").is_err());
    }

    #[test]
    fn test_team_modes() {
        let policy = TierPolicy::default();
        assert_eq!(policy.team_mode(Tier::S), TeamMode::Solo);
        assert_eq!(policy.team_mode(Tier::M), TeamMode::Pair);
        assert_eq!(policy.team_mode(Tier::L), TeamMode::Team);
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        let policy = TierPolicy {
            medium_from: DifficultyScore::Hard,
            large_from: DifficultyScore::Small,
            ..Default::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(PolicyError::ThresholdsOutOfOrder { .. })
        ));

        let policy = TierPolicy {
            team_sizes: TeamSizes {
                small: 1,
                medium: 4,
                large: 3,
            },
            ..Default::default()
        };
        assert_eq!(
            policy.validate(),
            Err(PolicyError::TeamSizeOutOfRange {
                tier: Tier::M,
                size: 4
            })
        );
        assert!(TierPolicy::default().validate().is_ok());
    }
}
