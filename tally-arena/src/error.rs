use uuid::Uuid;

use crate::tournament::{TournamentId, TournamentStatus};

#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    #[error("tournament `{0}` not found")]
    TournamentNotFound(TournamentId),

    #[error("invalid status transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: TournamentStatus,
        to: TournamentStatus,
    },

    #[error("tournament `{0}` has not ended")]
    NotEnded(TournamentId),

    #[error("tournament `{0}` is full (max {1} participants)")]
    TournamentFull(TournamentId, u32),

    #[error("prize `{0}` not found")]
    PrizeNotFound(Uuid),

    #[error("prize `{0}` belongs to another user")]
    Forbidden(Uuid),
}

pub type ArenaResult<T> = std::result::Result<T, ArenaError>;
