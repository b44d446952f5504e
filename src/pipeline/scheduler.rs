//! Scheduler
//!
//! Owns the pipeline's timers: one generation timer per reviewer
//! cadence, the fixed-interval reconciliation timer and a housekeeping
//! timer. Every tick body is caught and logged at the timer boundary so
//! one failing job can never take down the process or starve the other
//! timers, and each job type carries a single-flight guard: a tick that
//! fires while the previous run is still active is skipped.

use chrono::Duration as ChronoDuration;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::error::AppError;
use crate::pipeline::gate::{TestRunner, VerificationGate};
use crate::pipeline::generator::CandidateGenerator;
use crate::pipeline::publisher::{
    ChangeHost, CommandChangeHost, GitPublisher, ReferenceChangeHost,
};
use crate::state::SharedState;

pub struct Scheduler {
    state: SharedState,
}

impl Scheduler {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Spawn all pipeline timers. Handles are returned for shutdown.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let state = self.state;
        let mut handles = Vec::new();

        let generator = Arc::new(CandidateGenerator::new(
            state.proposals.clone(),
            state.mirror.clone(),
            state.events.clone(),
        ));

        for spec in state.reviewers.iter().cloned() {
            let generator = generator.clone();
            let name = format!("generator:{}", spec.kind);
            info!(job = %name, cadence_secs = spec.cadence.as_secs(), "Scheduling reviewer cycle");
            handles.push(spawn_job(name, spec.cadence, move || {
                let generator = generator.clone();
                let spec = spec.clone();
                async move { generator.run_cycle(&spec).await.map(|_| ()) }
            }));
        }

        let host: Arc<dyn ChangeHost> = match &state.settings.gate.publish_command {
            Some(command) => Arc::new(CommandChangeHost::new(command.clone())),
            None => Arc::new(ReferenceChangeHost::new(state.settings.mirror.remote.clone())),
        };
        let gate = Arc::new(VerificationGate::new(
            state.proposals.clone(),
            state.mirror.clone(),
            TestRunner::new(
                state.settings.gate.test_command.clone(),
                Duration::from_secs(state.settings.gate.runner_timeout_secs),
            ),
            Arc::new(GitPublisher::new(state.mirror.clone(), host)),
            state.events.clone(),
            state.learning.clone(),
        ));

        let reconcile_every = Duration::from_secs(state.settings.scheduler.reconcile_interval_secs);
        info!(interval_secs = reconcile_every.as_secs(), "Scheduling reconciliation pass");
        handles.push(spawn_job("reconcile".to_string(), reconcile_every, {
            let gate = gate.clone();
            move || {
                let gate = gate.clone();
                async move { gate.reconcile().await.map(|_| ()) }
            }
        }));

        let housekeeping_every =
            Duration::from_secs(state.settings.scheduler.housekeeping_interval_secs);
        let retention = ChronoDuration::hours(state.settings.scheduler.retention_hours);
        let store = state.proposals.clone();
        handles.push(spawn_job(
            "housekeeping".to_string(),
            housekeeping_every,
            move || {
                let store = store.clone();
                async move {
                    let pruned = store.prune_terminal(retention).await;
                    if pruned > 0 {
                        info!(pruned, "🧹 Pruned terminal proposals");
                    }
                    Ok(())
                }
            },
        ));

        handles
    }
}

/// Spawn a recurring job with a single-flight guard and a logging
/// boundary. The job body runs in its own task so a panic kills only
/// that run, never the timer loop.
pub(crate) fn spawn_job<F, Fut>(name: String, period: Duration, job: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    tokio::spawn(async move {
        let guard = Arc::new(Mutex::new(()));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let permit = match guard.clone().try_lock_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(job = %name, "Previous run still active, skipping tick");
                    continue;
                }
            };

            let fut = job();
            let run = tokio::spawn(async move {
                let _permit = permit;
                fut.await
            });

            let job_name = name.clone();
            tokio::spawn(async move {
                match run.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(job = %job_name, error = %e, "Job failed"),
                    Err(e) if e.is_panic() => error!(job = %job_name, "Job panicked"),
                    Err(_) => {}
                }
            });
        }
    })
}
