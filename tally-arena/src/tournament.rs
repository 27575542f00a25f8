use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tally_store::WeekKey;

use crate::{
    config::ArenaConfig,
    error::{ArenaError, ArenaResult},
};

/// Identifier of one weekly cycle, derived deterministically from
/// `(iso year, iso week)` so duplicate creation is naturally idempotent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TournamentId(String);

impl TournamentId {
    pub fn for_week(week: WeekKey) -> Self {
        Self(format!("weekly-{}", week.label()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TournamentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tournament lifecycle states. The lifecycle is monotonic:
/// upcoming → active → ended, with cancelled reachable only while open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TournamentStatus {
    Upcoming,
    Active,
    Ended,
    Cancelled,
}

impl TournamentStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Upcoming | Self::Active)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Ended | Self::Cancelled)
    }

    pub fn valid_transitions(&self) -> Vec<TournamentStatus> {
        match self {
            Self::Upcoming => vec![Self::Active, Self::Cancelled],
            Self::Active => vec![Self::Ended, Self::Cancelled],
            Self::Ended => vec![],
            Self::Cancelled => vec![],
        }
    }

    pub fn can_transition_to(&self, target: TournamentStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// Ordering used by the current-tournament lookup: active before
    /// upcoming, finished states last.
    pub(crate) fn priority(&self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Upcoming => 1,
            Self::Ended => 2,
            Self::Cancelled => 3,
        }
    }
}

/// One reward band of the prize pool, ranks inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrizeTier {
    pub rank_start: u32,
    pub rank_end: u32,
    pub coins: u64,
    pub gems: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrizePool {
    pub tiers: Vec<PrizeTier>,
}

impl PrizePool {
    /// The standard weekly distribution: 1st, 2nd, 3rd, top 10, top 50.
    pub fn weekly_default() -> Self {
        Self {
            tiers: vec![
                PrizeTier { rank_start: 1, rank_end: 1, coins: 5000, gems: 100 },
                PrizeTier { rank_start: 2, rank_end: 2, coins: 2500, gems: 50 },
                PrizeTier { rank_start: 3, rank_end: 3, coins: 1000, gems: 25 },
                PrizeTier { rank_start: 4, rank_end: 10, coins: 500, gems: 10 },
                PrizeTier { rank_start: 11, rank_end: 50, coins: 100, gems: 0 },
            ],
        }
    }

    pub fn prize_for(&self, rank: u32) -> Option<&PrizeTier> {
        self.tiers
            .iter()
            .find(|t| t.rank_start <= rank && rank <= t.rank_end)
    }

    /// Coins committed if every rewarded rank is filled.
    pub fn total_coins(&self) -> u64 {
        self.tiers
            .iter()
            .map(|t| t.coins * u64::from(t.rank_end - t.rank_start + 1))
            .sum()
    }

    pub fn total_gems(&self) -> u64 {
        self.tiers
            .iter()
            .map(|t| t.gems * u64::from(t.rank_end - t.rank_start + 1))
            .sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tournament {
    pub id: TournamentId,
    pub name: String,
    pub status: TournamentStatus,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub registration_opens_at: DateTime<Utc>,
    pub prize_pool: PrizePool,
    pub max_participants: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Tournament {
    /// The weekly cycle owning `week`, running Monday 00:00 UTC through the
    /// next Monday, registration opening one day before the start.
    pub fn weekly(week: WeekKey, config: &ArenaConfig) -> Self {
        Self {
            id: TournamentId::for_week(week),
            name: format!("Weekly Tournament {}", week.label()),
            status: TournamentStatus::Upcoming,
            start_at: week.start(),
            end_at: week.end(),
            registration_opens_at: week.start()
                - Duration::days(config.registration_lead_days),
            prize_pool: config.prize_pool.clone(),
            max_participants: config.max_participants,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn transition_to(
        &mut self,
        target: TournamentStatus,
        now: DateTime<Utc>,
    ) -> ArenaResult<()> {
        if !self.status.can_transition_to(target) {
            return Err(ArenaError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }

        if target == TournamentStatus::Ended {
            self.ended_at = Some(now);
        }

        self.status = target;

        Ok(())
    }

    /// Whether `at` falls inside `[start_at, end_at)`.
    pub fn window_contains(&self, at: DateTime<Utc>) -> bool {
        self.start_at <= at && at < self.end_at
    }
}
