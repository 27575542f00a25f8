use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing_test::traced_test;

use tally_jobs::{Job, JobReport, Result, Scheduler};

#[derive(Clone, Default)]
struct CountingJob {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Job for CountingJob {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn cadence(&self) -> Duration {
        Duration::from_millis(50)
    }

    async fn run(&self, _now: DateTime<Utc>) -> Result<JobReport> {
        self.runs.fetch_add(1, Ordering::SeqCst);

        Ok(JobReport::default())
    }
}

#[derive(Clone, Default)]
struct SlowJob {
    running: Arc<AtomicBool>,
    overlapped: Arc<AtomicBool>,
}

#[async_trait]
impl Job for SlowJob {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn cadence(&self) -> Duration {
        Duration::from_millis(30)
    }

    async fn run(&self, _now: DateTime<Utc>) -> Result<JobReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }

        sleep(Duration::from_millis(150)).await;
        self.running.store(false, Ordering::SeqCst);

        Ok(JobReport::default())
    }
}

#[derive(Clone, Default)]
struct FailingJob;

#[async_trait]
impl Job for FailingJob {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn cadence(&self) -> Duration {
        Duration::from_millis(50)
    }

    async fn run(&self, _now: DateTime<Utc>) -> Result<JobReport> {
        Err(anyhow::anyhow!("target store is sulking").into())
    }
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn jobs_run_on_their_cadence() {
    let job = CountingJob::default();
    let scheduler = Scheduler::new().job(job.clone());

    scheduler.start().await;
    sleep(Duration::from_millis(300)).await;

    assert!(job.runs.load(Ordering::SeqCst) >= 3);

    let states = scheduler.states().await;
    let state = states.iter().find(|s| s.name == "counting").unwrap();
    assert!(state.runs >= 3);
    assert!(state.last_run_at.is_some());
    assert!(state.next_run_at.is_some());
    assert_eq!(state.last_error, None);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn same_job_never_overlaps_itself() {
    let job = SlowJob::default();
    let scheduler = Scheduler::new().job(job.clone());

    scheduler.start().await;
    sleep(Duration::from_millis(500)).await;

    assert!(!job.overlapped.load(Ordering::SeqCst));

    let states = scheduler.states().await;
    let state = states.iter().find(|s| s.name == "slow").unwrap();
    assert!(state.skipped >= 1);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn failures_are_recorded_and_do_not_block_other_jobs() {
    let counting = CountingJob::default();
    let scheduler = Scheduler::new().job(FailingJob).job(counting.clone());

    scheduler.start().await;
    sleep(Duration::from_millis(300)).await;

    let states = scheduler.states().await;
    let failing = states.iter().find(|s| s.name == "failing").unwrap();
    assert!(failing.failures >= 1);
    assert!(failing
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("sulking"));

    // The broken job never stopped the healthy one.
    assert!(counting.runs.load(Ordering::SeqCst) >= 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_all_forces_an_immediate_run() {
    let job = CountingJob::default();
    let scheduler = Scheduler::new().job(job.clone());

    // Without started loops, only the forced runs count.
    scheduler.refresh_all().await;
    scheduler.refresh_all().await;

    assert_eq!(job.runs.load(Ordering::SeqCst), 2);

    assert!(scheduler.run_now("counting").await);
    assert!(!scheduler.run_now("missing").await);
    assert_eq!(job.runs.load(Ordering::SeqCst), 3);
}
