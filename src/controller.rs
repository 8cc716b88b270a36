//! Controller Loop: a single cooperative worker that wakes on a fixed
//! tick, lists deployments cluster-wide, and pipelines them through the
//! three judges in order. Grounded in `original_source/pkg/service/app.go`
//! and, for the tick/cancellation shape, the teacher's `tokio`-based
//! async runtime conventions.
use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cleanup_judge::CleanUpJudge;
use crate::config::Config;
use crate::executioner::Executioner;
use crate::failure_judge::FailureJudge;
use crate::orchestrator::OrchestratorClient;
use crate::Error;

pub struct Controller<C: OrchestratorClient> {
    client: C,
    failure_judge: FailureJudge,
    cleanup_judge: CleanUpJudge,
    executioner: Executioner,
    tick_rate: std::time::Duration,
    armed: bool,
}

impl<C: OrchestratorClient> Controller<C> {
    pub fn new(
        client: C,
        config: &Config,
        failure_judge: FailureJudge,
        cleanup_judge: CleanUpJudge,
        executioner: Executioner,
    ) -> Self {
        Self {
            client,
            failure_judge,
            cleanup_judge,
            executioner,
            tick_rate: config.tick_rate,
            armed: config.armed,
        }
    }

    /// Runs ticks until `cancel` fires. A slow tick delays the next —
    /// there is no concurrent-tick support, per spec.md §4.5/§5.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_rate);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("controller loop shutting down");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("fatal invariant violation, orchestrator contract broken: {e}");
                        std::process::exit(1);
                    }
                }
            }
        }
    }

    /// One pass of `List(Deployments) -> FailureJudge.Failing ->
    /// CleanupJudge.Judge -> Executioner.Kill`. Returns `Err` only for the
    /// fatal [`Error::InvariantViolation`] case; every other failure is
    /// logged and contained within the judges/executioner themselves.
    async fn tick(&self) -> crate::Result<()> {
        let deployments = match self.client.list_deployments().await {
            Ok(d) => d,
            Err(e) => {
                error!("failed to list deployments this tick: {e}");
                return Ok(());
            }
        };

        let failing = self.failure_judge.failing(&self.client, deployments).await;
        let eligible = self.cleanup_judge.judge(failing);

        match self.executioner.kill(&self.client, eligible, self.armed).await {
            Ok(()) => Ok(()),
            Err(e @ Error::InvariantViolation(_)) => Err(e),
            Err(e) => {
                error!("executioner failed this tick: {e}");
                Ok(())
            }
        }
    }
}

/// Shares the judges/executioner/client across the HTTP server and the
/// tick loop.
pub fn spawn<C: OrchestratorClient>(
    controller: Arc<Controller<C>>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { controller.run(cancel).await })
}
