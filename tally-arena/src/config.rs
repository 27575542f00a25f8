//! Configuration defaults for tournament cycles.

use crate::tournament::PrizePool;

/// Days before the cycle start that registration opens.
pub const REGISTRATION_LEAD_DAYS: i64 = 1;

/// Participant cap per weekly tournament.
pub const MAX_PARTICIPANTS: u32 = 10_000;

#[derive(Debug, Clone)]
pub struct ArenaConfig {
    pub registration_lead_days: i64,
    pub max_participants: Option<u32>,
    pub prize_pool: PrizePool,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            registration_lead_days: REGISTRATION_LEAD_DAYS,
            max_participants: Some(MAX_PARTICIPANTS),
            prize_pool: PrizePool::weekly_default(),
        }
    }
}

impl ArenaConfig {
    pub fn registration_lead_days(mut self, value: i64) -> Self {
        self.registration_lead_days = value;
        self
    }

    pub fn max_participants(mut self, value: Option<u32>) -> Self {
        self.max_participants = value;
        self
    }

    pub fn prize_pool(mut self, value: PrizePool) -> Self {
        self.prize_pool = value;
        self
    }
}
