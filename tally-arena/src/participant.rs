use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tournament::TournamentId;

/// One user's standing in one tournament, unique per
/// `(tournament_id, user_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub tournament_id: TournamentId,
    pub user_id: String,
    pub best_score: i64,
    pub total_games: u32,
    pub last_attempt_at: DateTime<Utc>,
    pub final_rank: Option<u32>,
    pub prize_won: u64,
}

impl Participant {
    pub fn new(
        tournament_id: TournamentId,
        user_id: impl Into<String>,
        score: i64,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            tournament_id,
            user_id: user_id.into(),
            best_score: score,
            total_games: 1,
            last_attempt_at: at,
            final_rank: None,
            prize_won: 0,
        }
    }

    /// Folds one finished game. `best_score` is monotonically non-decreasing;
    /// the caller folds each game exactly once via its cursor.
    pub fn record_score(&mut self, score: i64, at: DateTime<Utc>) {
        self.best_score = self.best_score.max(score);
        self.total_games += 1;
        self.last_attempt_at = self.last_attempt_at.max(at);
    }
}
