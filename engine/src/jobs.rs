//! Periodic background sweeps.
//!
//! One task per sweep, each on its own interval. A tick that finds the
//! previous run still going is skipped; the next run picks up whatever is
//! left because every sweep selects by the current time.

use crate::config::JobSchedule;
use crate::engine::Engine;
use crate::error::Result;
use crate::sweeps::SweepReport;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

type SweepFn = fn(Engine) -> BoxFuture<'static, Result<SweepReport>>;

/// Running background jobs
#[derive(Debug)]
pub struct JobHandles {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl JobHandles {
    /// Number of running job tasks
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no job is running
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signals every job and waits for the current runs to finish.
    pub async fn stop(self) {
        // Receivers may already be gone if every task exited.
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(error) = task.await {
                tracing::warn!(%error, "Background job ended abnormally");
            }
        }
        tracing::info!("Background jobs stopped");
    }
}

/// Starts the no-show, completion, discount-summary, and reminder sweeps.
#[must_use]
pub fn spawn_background_jobs(engine: &Engine, schedule: &JobSchedule) -> JobHandles {
    let (shutdown, signal) = watch::channel(false);

    let jobs: [(&'static str, Duration, SweepFn); 4] = [
        ("mark_no_shows", schedule.no_show_interval, |engine| {
            Box::pin(async move { engine.mark_no_shows().await })
        }),
        ("mark_classes_completed", schedule.completion_interval, |engine| {
            Box::pin(async move { engine.mark_classes_completed().await })
        }),
        ("rebuild_discount_summary", schedule.discount_summary_interval, |engine| {
            Box::pin(async move { engine.rebuild_discount_summary().await })
        }),
        ("dispatch_due_reminders", schedule.reminder_dispatch_interval, |engine| {
            Box::pin(async move { engine.dispatch_due_reminders().await })
        }),
    ];

    let tasks = jobs
        .into_iter()
        .map(|(name, every, run)| {
            tokio::spawn(run_job(name, every, run, engine.clone(), signal.clone()))
        })
        .collect();

    tracing::info!(?schedule, "Background jobs started");
    JobHandles { shutdown, tasks }
}

async fn run_job(
    name: &'static str,
    every: Duration,
    run: SweepFn,
    engine: Engine,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(error) = run(engine.clone()).await {
                    tracing::warn!(job = name, %error, "Background job failed");
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::debug!(job = name, "Background job stopping");
                    return;
                }
            },
        }
    }
}
