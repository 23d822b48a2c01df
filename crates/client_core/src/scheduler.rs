use std::{sync::Arc, time::Duration};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::reconciler::OutputStateReconciler;

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);
/// Faster polling made the controls flicker; 15 s is enough for drift.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(15);
pub const MIN_RECONCILE_INTERVAL: Duration = Duration::from_millis(1);
pub const MAX_RECONCILE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy)]
pub struct ScheduleSettings {
    /// Delay before the first reconcile after start-up.
    pub initial_delay: Duration,
    pub interval: Duration,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileTrigger {
    /// The panel became visible again after being hidden.
    VisibilityRegained,
    Manual,
    Shutdown,
}

pub struct ReconcileHandle {
    triggers: mpsc::UnboundedSender<ReconcileTrigger>,
    task: JoinHandle<()>,
}

impl ReconcileHandle {
    pub fn visibility_regained(&self) {
        let _ = self.triggers.send(ReconcileTrigger::VisibilityRegained);
    }

    pub fn request_reconcile(&self) {
        let _ = self.triggers.send(ReconcileTrigger::Manual);
    }

    pub async fn shutdown(self) {
        let _ = self.triggers.send(ReconcileTrigger::Shutdown);
        let _ = self.task.await;
    }
}

/// Spawns the reconcile loop: once after `initial_delay`, then every
/// `interval` (clamped to `MIN_RECONCILE_INTERVAL..=MAX_RECONCILE_INTERVAL`),
/// and immediately on each trigger.
pub fn spawn_reconcile_loop(
    reconciler: Arc<OutputStateReconciler>,
    settings: ScheduleSettings,
) -> ReconcileHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        tokio::time::sleep(settings.initial_delay).await;
        reconcile_once(&reconciler, "initial").await;

        let period = settings
            .interval
            .clamp(MIN_RECONCILE_INTERVAL, MAX_RECONCILE_INTERVAL);
        if period != settings.interval {
            warn!(
                "scheduler: reconcile interval {:?} out of range, using {period:?}",
                settings.interval
            );
        }
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => reconcile_once(&reconciler, "periodic").await,
                trigger = rx.recv() => match trigger {
                    Some(ReconcileTrigger::VisibilityRegained) => {
                        reconcile_once(&reconciler, "visibility").await;
                    }
                    Some(ReconcileTrigger::Manual) => reconcile_once(&reconciler, "manual").await,
                    Some(ReconcileTrigger::Shutdown) | None => break,
                },
            }
        }
        info!("scheduler: reconcile loop stopped");
    });

    ReconcileHandle { triggers: tx, task }
}

async fn reconcile_once(reconciler: &OutputStateReconciler, reason: &str) {
    match reconciler.poll_and_reconcile().await {
        Ok(report) if report.is_noop() => debug!("scheduler: {reason} reconcile, no changes"),
        Ok(report) => info!(
            "scheduler: {reason} reconcile corrected={:?} stop_issued={}",
            report.corrected, report.stop_issued
        ),
        Err(err) => debug!("scheduler: {reason} reconcile skipped: {err}"),
    }
}

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod tests;
