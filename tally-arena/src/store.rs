use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::{
    error::{ArenaError, ArenaResult},
    participant::Participant,
    tournament::{Tournament, TournamentId},
};

/// In-memory arena state shared by the lifecycle manager and the
/// tournament-board aggregator. Tournaments and prizes have a single writer
/// (the lifecycle manager); participants are upserted by the aggregator.
#[derive(Clone, Default)]
pub struct ArenaStore(Arc<RwLock<Inner>>);

#[derive(Default)]
struct Inner {
    tournaments: BTreeMap<TournamentId, Tournament>,
    participants: BTreeMap<(TournamentId, String), Participant>,
}

impl ArenaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the tournament already exists; creation by
    /// deterministic id is naturally idempotent.
    pub fn insert_if_absent(&self, tournament: Tournament) -> bool {
        let mut inner = self.0.write();

        if inner.tournaments.contains_key(&tournament.id) {
            return false;
        }

        inner.tournaments.insert(tournament.id.clone(), tournament);

        true
    }

    pub fn get(&self, id: &TournamentId) -> Option<Tournament> {
        self.0.read().tournaments.get(id).cloned()
    }

    pub fn tournaments(&self) -> Vec<Tournament> {
        self.0.read().tournaments.values().cloned().collect()
    }

    pub fn open_tournaments(&self) -> Vec<Tournament> {
        self.0
            .read()
            .tournaments
            .values()
            .filter(|t| t.status.is_open())
            .cloned()
            .collect()
    }

    /// The single "current tournament" lookup: active first, then upcoming,
    /// earliest start first.
    pub fn current_tournament(&self) -> Option<Tournament> {
        let mut open = self.open_tournaments();

        open.sort_by_key(|t| (t.status.priority(), t.start_at));

        open.into_iter().next()
    }

    pub(crate) fn update<R>(
        &self,
        id: &TournamentId,
        f: impl FnOnce(&mut Tournament) -> ArenaResult<R>,
    ) -> ArenaResult<R> {
        let mut inner = self.0.write();

        let tournament = inner
            .tournaments
            .get_mut(id)
            .ok_or_else(|| ArenaError::TournamentNotFound(id.clone()))?;

        f(tournament)
    }

    /// Upserts the participant row for one finished game. A first game from a
    /// new user while the tournament is full is rejected; existing
    /// participants keep scoring.
    pub fn record_score(
        &self,
        id: &TournamentId,
        user_id: &str,
        score: i64,
        at: DateTime<Utc>,
    ) -> ArenaResult<Participant> {
        let mut inner = self.0.write();

        let tournament = inner
            .tournaments
            .get(id)
            .ok_or_else(|| ArenaError::TournamentNotFound(id.clone()))?;
        let max_participants = tournament.max_participants;

        let key = (id.clone(), user_id.to_owned());

        if !inner.participants.contains_key(&key) {
            if let Some(max) = max_participants {
                let count = inner
                    .participants
                    .range((id.clone(), String::new())..)
                    .take_while(|((tid, _), _)| tid == id)
                    .count();

                if count as u32 >= max {
                    return Err(ArenaError::TournamentFull(id.clone(), max));
                }
            }
        }

        let participant = inner
            .participants
            .entry(key)
            .and_modify(|p| p.record_score(score, at))
            .or_insert_with(|| Participant::new(id.clone(), user_id, score, at));

        Ok(participant.clone())
    }

    pub fn participant(&self, id: &TournamentId, user_id: &str) -> Option<Participant> {
        self.0
            .read()
            .participants
            .get(&(id.clone(), user_id.to_owned()))
            .cloned()
    }

    pub fn participants_of(&self, id: &TournamentId) -> Vec<Participant> {
        self.0
            .read()
            .participants
            .range((id.clone(), String::new())..)
            .take_while(|((tid, _), _)| tid == id)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Sets `final_rank` and the prize value exactly once. Returns false when
    /// the participant was already ranked, so prize computation can re-run
    /// without awarding twice.
    pub(crate) fn set_final(
        &self,
        id: &TournamentId,
        user_id: &str,
        rank: u32,
        prize_won: u64,
    ) -> bool {
        let mut inner = self.0.write();

        let Some(participant) = inner
            .participants
            .get_mut(&(id.clone(), user_id.to_owned()))
        else {
            return false;
        };

        if participant.final_rank.is_some() {
            return false;
        }

        participant.final_rank = Some(rank);
        participant.prize_won = prize_won;

        true
    }
}
