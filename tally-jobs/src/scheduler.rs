use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dyn_clone::DynClone;
use futures_util::future::join_all;
use tokio::{
    sync::RwLock,
    time::{interval_at, Instant},
};
use tracing::{debug, error, info};

use crate::error::Result;

/// Outcome of one job run.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobReport {
    /// Units of work applied to the job's target store.
    pub applied: usize,
    /// Events or records that failed and will be retried.
    pub failed: usize,
}

/// One independently scheduled aggregation task. Jobs share no in-process
/// state; they coordinate only through the event store's processed flag,
/// their own cursors and their exclusively-owned target stores.
#[async_trait]
pub trait Job: DynClone + Send + Sync {
    fn name(&self) -> &'static str;

    /// Time between scheduled runs.
    fn cadence(&self) -> Duration;

    async fn run(&self, now: DateTime<Utc>) -> Result<JobReport>;
}

dyn_clone::clone_trait_object!(Job);

/// Bookkeeping row for one named job, observable via [`Scheduler::states`].
#[derive(Debug, Clone)]
pub struct JobState {
    pub name: &'static str,
    pub running: bool,
    pub runs: u64,
    pub failures: u64,
    /// Triggers dropped because the previous run was still executing.
    pub skipped: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl JobState {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            running: false,
            runs: 0,
            failures: 0,
            skipped: 0,
            last_run_at: None,
            next_run_at: None,
            last_error: None,
        }
    }
}

type States = Arc<RwLock<HashMap<&'static str, JobState>>>;

/// Runs every registered job on its own cadence, one spawned loop per job.
/// Runs of the same job are serialized by a single-flight lock keyed by job
/// name: a trigger firing while the previous run still executes is skipped
/// and counted, never run concurrently. One job's failure never blocks
/// another's loop.
#[derive(Clone, Default)]
pub struct Scheduler {
    jobs: Vec<Box<dyn Job>>,
    states: States,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job<J: Job + 'static>(mut self, job: J) -> Self {
        self.jobs.push(Box::new(job));

        self
    }

    /// Spawns one loop per job and returns. Loops run until the process
    /// exits.
    pub async fn start(&self) {
        {
            let mut states = self.states.write().await;

            for job in self.jobs.iter() {
                states
                    .entry(job.name())
                    .or_insert_with(|| JobState::new(job.name()));
            }
        }

        for job in self.jobs.iter() {
            self.spawn(job.clone());
        }
    }

    fn spawn(&self, job: Box<dyn Job>) {
        let states = self.states.clone();

        tokio::spawn(async move {
            info!("{} started", job.name());

            let mut interval = interval_at(Instant::now(), job.cadence());

            loop {
                interval.tick().await;

                // Each trigger runs detached so a slow run cannot stall the
                // tick; the single-flight check decides whether it executes.
                let states = states.clone();
                let job = job.clone();

                tokio::spawn(async move {
                    Self::trigger(&states, job.as_ref()).await;
                });
            }
        });
    }

    async fn trigger(states: &States, job: &dyn Job) {
        let now = Utc::now();

        {
            let mut states = states.write().await;
            let state = states
                .entry(job.name())
                .or_insert_with(|| JobState::new(job.name()));

            if state.running {
                state.skipped += 1;
                debug!("{} still running, trigger skipped", job.name());

                return;
            }

            state.running = true;
        }

        let result = job.run(now).await;

        let mut states = states.write().await;
        let state = states
            .entry(job.name())
            .or_insert_with(|| JobState::new(job.name()));

        state.running = false;
        state.runs += 1;
        state.last_run_at = Some(now);
        state.next_run_at = chrono::Duration::from_std(job.cadence())
            .ok()
            .map(|cadence| now + cadence);

        match result {
            Ok(report) => {
                state.last_error = None;
                debug!(
                    "{}: {} applied, {} failed",
                    job.name(),
                    report.applied,
                    report.failed
                );
            }
            Err(e) => {
                state.failures += 1;
                state.last_error = Some(e.to_string());
                error!("{} failed: {e}", job.name());
            }
        }
    }

    /// Forces an immediate out-of-band run of every job, for operators who
    /// need fresh aggregates before the next scheduled cycle.
    pub async fn refresh_all(&self) {
        let futures = self
            .jobs
            .iter()
            .map(|job| Self::trigger(&self.states, job.as_ref()));

        join_all(futures).await;
    }

    /// Forces one job by name. Returns false when no such job is registered.
    pub async fn run_now(&self, name: &str) -> bool {
        let Some(job) = self.jobs.iter().find(|j| j.name() == name) else {
            return false;
        };

        Self::trigger(&self.states, job.as_ref()).await;

        true
    }

    pub async fn states(&self) -> Vec<JobState> {
        let mut states = self
            .states
            .read()
            .await
            .values()
            .cloned()
            .collect::<Vec<JobState>>();

        states.sort_by_key(|s| s.name);

        states
    }
}
