//! Background retrain scheduler: fires the retraining job once per weekly slot.
//!
//! The thread sleeps in short slices so shutdown stays responsive. A slot
//! that falls while a run is in progress is skipped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::job::{RetrainJob, RetrainOutcome};
use super::schedule::WeeklySchedule;
use crate::models::RetrainTrigger;

/// Sleep granularity for shutdown responsiveness (5 seconds).
const SLEEP_GRANULARITY_SECS: u64 = 5;

/// Handle for the background scheduler thread.
///
/// Supports graceful shutdown via `shutdown()` or automatic cleanup on `Drop`.
pub struct RetrainSchedulerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl RetrainSchedulerHandle {
    /// Request graceful shutdown. A run already in progress completes.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Shut down and join the thread from async code without stalling a
    /// runtime worker.
    pub async fn stop(self) {
        self.shutdown();
        if let Err(e) = tokio::task::spawn_blocking(move || drop(self)).await {
            tracing::error!("Retrain scheduler join failed: {e}");
        }
    }
}

impl Drop for RetrainSchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Tracks the next due slot.
#[derive(Debug, Clone, Copy)]
struct SlotClock {
    schedule: WeeklySchedule,
    next_due: DateTime<Utc>,
}

impl SlotClock {
    fn starting_at(schedule: WeeklySchedule, now: DateTime<Utc>) -> Self {
        Self {
            schedule,
            next_due: schedule.next_after(now),
        }
    }

    /// True once per slot. Slots missed while asleep collapse into one firing.
    fn poll(&mut self, now: DateTime<Utc>) -> bool {
        if now < self.next_due {
            return false;
        }
        self.next_due = self.schedule.next_after(now);
        true
    }
}

pub fn start_retrain_scheduler(
    job: Arc<RetrainJob>,
    schedule: WeeklySchedule,
) -> RetrainSchedulerHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    let handle = std::thread::spawn(move || {
        let clock = SlotClock::starting_at(schedule, Utc::now());
        tracing::info!(
            schedule = %schedule,
            next_run = %clock.next_due,
            "Retrain scheduler started"
        );
        scheduler_loop(&job, clock, &flag);
    });

    RetrainSchedulerHandle {
        shutdown,
        handle: Some(handle),
    }
}

fn scheduler_loop(job: &Arc<RetrainJob>, mut clock: SlotClock, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_secs(SLEEP_GRANULARITY_SECS));
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        if clock.poll(Utc::now()) {
            run_scheduled(job);
            tracing::info!(next_run = %clock.next_due, "Next scheduled retrain");
        }
    }
    tracing::info!("Retrain scheduler shutting down");
}

fn run_scheduled(job: &Arc<RetrainJob>) {
    match job.trigger(RetrainTrigger::Scheduled) {
        RetrainOutcome::Skipped => {
            tracing::info!("Scheduled retrain skipped: a run is already in progress")
        }
        outcome => {
            if let Some(run) = outcome.run() {
                tracing::info!(run_id = %run.id, status = %run.status, "Scheduled retrain finished");
            }
        }
    }
}
