mod common;

use anyhow::Result;
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use uuid::Uuid;

use tally_arena::{ArenaStore, LifecycleManager, PrizeLedger, TournamentStatus};
use tally_jobs::{
    rollup_retention, AnalyticsJob, CampaignRoiJob, CohortJob, CohortStore, Job,
    LeaderboardJob, LeaderboardStore, MetricsStore, PartitionMaintenanceJob, RoiStore,
    SnapshotJob, SnapshotViews, SpendImport, SpendRecord, Staleness, TournamentBoardJob,
    TournamentLifecycleJob,
};
use tally_store::PartitionManager;

use common::*;

#[tokio::test]
async fn leaderboard_high_score_is_max_over_history() -> Result<()> {
    let events = store().await?;
    let board = LeaderboardStore::new();
    let job = LeaderboardJob::new(&events, &board);

    // Out-of-order arrival: the 80 was played before the 50 landed.
    events.append(game("user-a", "endless", 50, now() + Duration::minutes(10))).await?;
    events.append(game("user-a", "endless", 80, now())).await?;
    events.append(game("user-a", "endless", 30, now() + Duration::minutes(20))).await?;
    events.append(game("user-b", "endless", 70, now())).await?;
    // Tournament games never touch the endless board.
    events.append(game("user-a", "tournament", 999, now())).await?;

    let report = job.run(Utc::now()).await?;
    assert_eq!(report.applied, 4);

    let a = board.get("user-a").unwrap();
    assert_eq!(a.high_score, 80);
    assert_eq!(a.total_games, 3);
    assert_eq!(a.total_playtime_secs, 180);
    assert_eq!(a.last_played_at, now() + Duration::minutes(20));

    let top = board.top(10);
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].user_id, "user-a");

    // Everything marked processed: a second cycle applies nothing.
    let report = job.run(Utc::now()).await?;
    assert_eq!(report.applied, 0);
    assert_eq!(board.get("user-a").unwrap().total_games, 3);

    Ok(())
}

#[tokio::test]
async fn leaderboard_replay_cannot_double_count() -> Result<()> {
    let board = LeaderboardStore::new();
    let event_id = Uuid::new_v4();

    assert!(board.apply(event_id, "user-a", 50, 60, now()));
    // The same event replayed after a crash between apply and mark.
    assert!(!board.apply(event_id, "user-a", 50, 60, now()));

    let row = board.get("user-a").unwrap();
    assert_eq!(row.total_games, 1);
    assert_eq!(row.total_playtime_secs, 60);

    Ok(())
}

#[tokio::test]
async fn tournament_runs_end_to_end_through_the_jobs() -> Result<()> {
    let events = store().await?;
    let arena = ArenaStore::new();
    let ledger = PrizeLedger::new();
    let manager = LifecycleManager::new(&arena, &ledger);

    let board_job = TournamentBoardJob::new(&events, &arena);
    let lifecycle_job = TournamentLifecycleJob::new(manager.clone());

    // Created the Thursday before, active once the window opens.
    let created_at = now() - Duration::weeks(1);
    lifecycle_job.run(created_at).await?;
    let id = manager.current_tournament().unwrap().id;
    assert_eq!(id.as_str(), "weekly-2026w32");

    let tuesday = now() - Duration::days(2);
    lifecycle_job.run(tuesday).await?;
    assert_eq!(arena.get(&id).unwrap().status, TournamentStatus::Active);

    // User A scores 50 on Tuesday and 80 on Thursday; B ties late.
    events.append(game("user-a", "tournament", 50, tuesday)).await?;
    events.append(game("user-a", "tournament", 80, now())).await?;
    events.append(game("user-b", "tournament", 80, now() + Duration::hours(1))).await?;
    // Outside every open window: played before the tournament started.
    events.append(game("user-c", "tournament", 500, now() - Duration::weeks(2))).await?;
    // Endless games stay off the tournament board.
    events.append(game("user-d", "endless", 700, now())).await?;

    board_job.run(Utc::now()).await?;

    let a = arena.participant(&id, "user-a").unwrap();
    assert_eq!(a.best_score, 80);
    assert_eq!(a.total_games, 2);
    assert!(arena.participant(&id, "user-c").is_none());
    assert!(arena.participant(&id, "user-d").is_none());

    // The cursor does not re-fold anything on the next cycle.
    board_job.run(Utc::now()).await?;
    assert_eq!(arena.participant(&id, "user-a").unwrap().total_games, 2);

    // Past the end the lifecycle tick closes it and prizes are written once.
    let after_end = arena.get(&id).unwrap().end_at + Duration::minutes(1);
    lifecycle_job.run(after_end).await?;
    lifecycle_job.run(after_end + Duration::minutes(2)).await?;

    assert_eq!(arena.get(&id).unwrap().status, TournamentStatus::Ended);

    let a = arena.participant(&id, "user-a").unwrap();
    assert_eq!(a.final_rank, Some(1));

    let prizes = ledger.prizes_of_tournament(&id);
    assert_eq!(prizes.len(), 2);
    assert_eq!(prizes.iter().filter(|p| p.user_id == "user-a").count(), 1);
    assert_eq!(ledger.list_pending("user-a").len(), 1);

    Ok(())
}

#[tokio::test]
async fn analytics_counts_users_not_events() -> Result<()> {
    let events = store().await?;
    let metrics = MetricsStore::new();
    let job = AnalyticsJob::new(&events, &metrics);

    let day1 = now();
    let day20 = now() + Duration::days(19);

    // Three sessions from one user are one DAU.
    for i in 0..3 {
        events.append(session("user-a", day1 + Duration::hours(i))).await?;
    }
    events.append(session("user-b", day1)).await?;

    // The same funnel step five times in a day counts once.
    for i in 0..5 {
        events.append(tutorial("user-a", "level_1_cleared", day1 + Duration::minutes(i))).await?;
    }
    events.append(tutorial("user-b", "level_1_cleared", day1)).await?;

    // Installs dedup per user.
    events.append(install("user-a", "ads-spring", "ios", day1)).await?;
    events.append(install("user-a", "ads-spring", "ios", day1 + Duration::hours(1))).await?;

    events.append(purchase("user-b", dec!(9.99), day1)).await?;
    events.append(crash("user-b", day1)).await?;
    events.append(session("user-c", day20)).await?;

    job.run(Utc::now()).await?;

    let d1 = metrics.daily_row(day1.date_naive());
    assert_eq!(d1.dau, 2);
    assert_eq!(d1.sessions, 4);
    assert_eq!(d1.new_users, 1);
    assert_eq!(d1.revenue, dec!(9.99));
    assert_eq!(d1.crashes, 1);
    assert_eq!(metrics.funnel_count(day1.date_naive(), "level_1_cleared"), 2);

    // MAU is a rolling 30-day union, so it can only exceed the day's DAU.
    let d20 = metrics.daily_row(day20.date_naive());
    assert_eq!(d20.dau, 1);
    assert_eq!(d20.mau, 3);
    for row in metrics.daily_rows() {
        assert!(row.mau >= row.dau);
    }

    // Per-user totals fold the same history.
    let b = metrics.user("user-b").unwrap();
    assert_eq!(b.sessions, 1);
    assert_eq!(b.revenue, dec!(9.99));

    // Second cycle: the flag is set, nothing doubles.
    job.run(Utc::now()).await?;
    assert_eq!(metrics.daily_row(day1.date_naive()).sessions, 4);

    Ok(())
}

#[tokio::test]
async fn retention_rolls_up_ratios_not_percentages() {
    let cohorts = CohortStore::new();
    let day0 = now().date_naive();
    let day1 = day0 + Duration::days(1);

    // Cohort C1: 100 installs, 20 back the next day.
    for i in 0..100 {
        let user = format!("c1-{i:03}");
        cohorts.record_install(&user, day0, "ads-a".into(), "ios".into());
        cohorts.record_activity(&user, day0);

        if i < 20 {
            cohorts.record_activity(&user, day1);
        }
    }

    // Cohort C2: 10 installs, 8 back the next day.
    for i in 0..10 {
        let user = format!("c2-{i:02}");
        cohorts.record_install(&user, day0, "ads-b".into(), "android".into());

        if i < 8 {
            cohorts.record_activity(&user, day1);
        }
    }

    cohorts.recompute(day0 + Duration::days(2));
    let rows = cohorts.rows();
    assert_eq!(rows.len(), 2);

    // 28/110, never the 50% that averaging 20% and 80% would give.
    let d1 = rollup_retention(rows.iter(), 1).unwrap();
    assert_eq!(d1.retained, 28);
    assert_eq!(d1.size, 110);
    assert!((d1.fraction() - 28.0 / 110.0).abs() < 1e-9);

    // No cohort is old enough for day-7 yet: excluded, not retained=0.
    assert!(rollup_retention(rows.iter(), 7).is_none());
}

#[tokio::test]
async fn cohorts_report_horizons_only_once_mature() -> Result<()> {
    let events = store().await?;
    let cohorts = CohortStore::new();
    let job = CohortJob::new(&events, &cohorts);

    let install_day = now() - Duration::days(7);

    events.append(install("user-a", "ads-a", "ios", install_day)).await?;
    events.append(install("user-b", "ads-a", "ios", install_day)).await?;
    events.append(session("user-a", install_day + Duration::days(1))).await?;
    events.append(session("user-a", install_day + Duration::days(7))).await?;

    job.run(now()).await?;

    let key = cohorts.cohort_of("user-a").unwrap();
    assert_eq!(key.campaign, "ads-a");

    let row = cohorts.row(&key).unwrap();
    assert_eq!(row.size, 2);
    assert_eq!(row.retained.get(&1), Some(&1));
    assert_eq!(row.retained.get(&7), Some(&1));
    // A week-old cohort has no day-30 figure at all.
    assert_eq!(row.retained.get(&30), None);

    Ok(())
}

#[derive(Clone)]
struct StaticSpend(Vec<SpendRecord>);

#[async_trait::async_trait]
impl SpendImport for StaticSpend {
    async fn fetch(&self) -> anyhow::Result<Vec<SpendRecord>> {
        Ok(self.0.clone())
    }
}

#[derive(Clone)]
struct BrokenSpend;

#[async_trait::async_trait]
impl SpendImport for BrokenSpend {
    async fn fetch(&self) -> anyhow::Result<Vec<SpendRecord>> {
        Err(anyhow::anyhow!("ad platform timed out"))
    }
}

#[tokio::test]
async fn roi_is_undefined_not_zero_on_empty_denominators() -> Result<()> {
    let events = store().await?;
    let roi = RoiStore::new();

    let day = now().date_naive();
    let spend = vec![
        SpendRecord { date: day, campaign: "ads-a".into(), cost: dec!(60) },
        SpendRecord { date: day + Duration::days(1), campaign: "ads-a".into(), cost: dec!(40) },
        SpendRecord { date: day, campaign: "ads-ghost".into(), cost: dec!(25) },
    ];
    let job = CampaignRoiJob::new(&events, &roi, StaticSpend(spend));

    for i in 0..4 {
        events.append(install(&format!("user-{i}"), "ads-a", "ios", now())).await?;
    }
    events.append(purchase("user-0", dec!(150), now() + Duration::hours(1))).await?;
    events.append(install("user-free", "organic", "ios", now())).await?;

    job.run(Utc::now()).await?;

    // cost 100, 4 installs, revenue 150.
    let a = roi.row("ads-a").unwrap();
    assert_eq!(a.cpi, Some(dec!(25)));
    assert_eq!(a.roi_percent, Some(dec!(50)));

    // Spend but no installs: CPI undefined, ROI fully negative.
    let ghost = roi.row("ads-ghost").unwrap();
    assert_eq!(ghost.installs, 0);
    assert_eq!(ghost.cpi, None);
    assert_eq!(ghost.roi_percent, Some(dec!(-100)));

    // No spend: ROI undefined rather than zero.
    let organic = roi.row("organic").unwrap();
    assert!(organic.cost.is_zero());
    assert_eq!(organic.roi_percent, None);

    Ok(())
}

#[tokio::test]
async fn failed_spend_import_skips_the_cycle_without_losing_events() -> Result<()> {
    let events = store().await?;
    let roi = RoiStore::new();

    events.append(install("user-a", "ads-a", "ios", now())).await?;

    let broken = CampaignRoiJob::new(&events, &roi, BrokenSpend);
    let err = broken.run(Utc::now()).await.unwrap_err();
    assert!(err.to_string().contains("spend-import"));
    assert!(roi.row("ads-a").is_none());

    // A healthy import afterwards still sees the install: the cursor was
    // never advanced by the failed cycle.
    let healthy = CampaignRoiJob::new(&events, &roi, StaticSpend(vec![]));
    healthy.run(Utc::now()).await?;
    assert_eq!(roi.row("ads-a").unwrap().installs, 1);

    Ok(())
}

#[tokio::test]
async fn snapshot_swaps_whole_versions() -> Result<()> {
    let events = store().await?;
    let board = LeaderboardStore::new();
    let metrics = MetricsStore::new();
    let cohorts = CohortStore::new();
    let roi = RoiStore::new();
    let views = SnapshotViews::new();

    let snapshot_job = SnapshotJob::new(&views, &board, &metrics, &cohorts, &roi);

    // Before the first rebuild readers get the empty snapshot, not an error.
    let (initial, staleness) = views.read();
    assert_eq!(initial.version, 0);
    assert_eq!(staleness, Staleness::Fresh);

    events.append(game("user-a", "endless", 80, now())).await?;
    LeaderboardJob::new(&events, &board).run(Utc::now()).await?;

    snapshot_job.run(Utc::now()).await?;
    let (first, staleness) = views.read();
    assert_eq!(staleness, Staleness::Fresh);
    assert_eq!(first.version, 1);
    assert_eq!(first.top_players[0].user_id, "user-a");

    // Another rebuild publishes a strictly newer version; the old Arc the
    // reader holds is untouched.
    snapshot_job.run(Utc::now()).await?;
    let (second, _) = views.read();
    assert_eq!(second.version, 2);
    assert_eq!(first.version, 1);

    Ok(())
}

#[tokio::test]
async fn partition_maintenance_keeps_the_horizon_ready() -> Result<()> {
    let events = tally_store::EventStore::in_memory();
    let job = PartitionMaintenanceJob::new(&events);

    job.run(now()).await?;

    let partitions = PartitionManager::new(&events).partitions().await?;
    let horizon = events.store_config().partition_horizon_weeks as usize;
    assert_eq!(partitions.len(), horizon + 1);

    // Re-running is a no-op until the clock moves a week forward.
    job.run(now()).await?;
    assert_eq!(
        PartitionManager::new(&events).partitions().await?.len(),
        horizon + 1
    );

    job.run(now() + Duration::weeks(1)).await?;
    assert_eq!(
        PartitionManager::new(&events).partitions().await?.len(),
        horizon + 2
    );

    Ok(())
}
