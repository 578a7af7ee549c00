//! Scheduler module for running checks and driving incidents.
//!
//! Each tick snapshots the target list and checks every target in its own
//! task. A per-target lock keeps results for one target strictly ordered:
//! a target whose previous check is still running is skipped, never run
//! twice at once. Every result goes Store first, then the incident
//! tracker, then notifications.

mod incident;

pub use incident::*;

use crate::context::MonitorContext;
use crate::db::{CheckResult, StoreError, Target, TickSummary};
use crate::probe::ProbeError;

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, OwnedMutexGuard, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

/// SSL alerts fire when a certificate first has this many days left or fewer.
pub const SSL_EXPIRY_ALERT_DAYS: i64 = 30;

/// Errors from a manual check.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Drives periodic checks of all targets.
pub struct Scheduler {
    ctx: Arc<MonitorContext>,
    target_locks: std::sync::Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
    semaphore: Arc<Semaphore>,
    last_summary: RwLock<Option<TickSummary>>,
    stop_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(ctx: Arc<MonitorContext>) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        let semaphore = Arc::new(Semaphore::new(ctx.config.max_concurrent_checks.max(1)));

        Self {
            ctx,
            target_locks: std::sync::Mutex::new(HashMap::new()),
            semaphore,
            last_summary: RwLock::new(None),
            stop_tx,
        }
    }

    pub fn context(&self) -> &Arc<MonitorContext> {
        &self.ctx
    }

    /// Start the tick loop. The first tick runs immediately.
    ///
    /// A stop signal also cancels a tick in progress. Checks of that tick
    /// which have not been recorded yet are dropped.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        let mut stop_rx = self.stop_tx.subscribe();

        tracing::info!(
            "Scheduler: starting, interval {:?}, {} concurrent checks",
            self.ctx.config.check_interval,
            self.ctx.config.max_concurrent_checks
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.ctx.config.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::info!("Scheduler: stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        tokio::select! {
                            res = this.run_tick() => {
                                if let Err(e) = res {
                                    tracing::error!("Scheduler: tick failed: {}", e);
                                }
                            }
                            _ = stop_rx.recv() => {
                                tracing::info!("Scheduler: stopped during a tick");
                                break;
                            }
                        }
                    }
                }
            }
        })
    }

    /// Signal the tick loop to exit.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }

    /// Summary of the most recent completed tick.
    pub async fn last_summary(&self) -> Option<TickSummary> {
        self.last_summary.read().await.clone()
    }

    /// Check every target once and publish the tick summary.
    ///
    /// All checks of a tick share one deadline, `tick_timeout` from its
    /// start. Checks still running or still queued for a permit at the
    /// deadline are recorded as timed out.
    ///
    /// Fails only when the target list cannot be read. Per-target failures
    /// are logged and the tick carries on.
    pub async fn run_tick(self: &Arc<Self>) -> Result<TickSummary, StoreError> {
        let targets = self.ctx.targets.targets()?;
        self.prune_locks(&targets);

        let deadline = Instant::now() + self.ctx.config.tick_timeout;
        let mut tasks = JoinSet::new();

        for target in targets {
            let guard = match self.target_lock(target.id).try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::warn!(
                        "Scheduler: skipping {}, previous check still running",
                        target.name
                    );
                    continue;
                }
            };

            let this = self.clone();
            let permits = self.semaphore.clone();
            tasks.spawn(async move {
                let result = this.check_locked(&target, guard, deadline, Some(permits)).await;
                result.ok().map(|r| r.is_up)
            });
        }

        let mut summary = TickSummary {
            timestamp: Utc::now(),
            targets_checked: 0,
            up_count: 0,
            down_count: 0,
        };

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(is_up)) => {
                    summary.targets_checked += 1;
                    if is_up {
                        summary.up_count += 1;
                    } else {
                        summary.down_count += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::error!("Scheduler: check task failed: {}", e),
            }
        }

        summary.timestamp = Utc::now();
        tracing::info!(
            "Scheduler: tick done, {} checked, {} up, {} down",
            summary.targets_checked,
            summary.up_count,
            summary.down_count
        );

        *self.last_summary.write().await = Some(summary.clone());
        if let Some(path) = &self.ctx.config.summary_path {
            write_summary(path, &summary).await;
        }

        Ok(summary)
    }

    /// Check one target now, waiting for any running check of it to finish.
    pub async fn check_now(&self, target_id: i64) -> Result<CheckResult, CheckError> {
        let target = self.ctx.targets.target(target_id)?;
        let guard = self.target_lock(target_id).lock_owned().await;
        let deadline = Instant::now() + self.ctx.config.tick_timeout;
        self.check_locked(&target, guard, deadline, None).await
    }

    fn target_lock(&self, target_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.target_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(target_id).or_default().clone()
    }

    /// Forget locks of deleted targets that nobody holds.
    fn prune_locks(&self, targets: &[Target]) {
        let live: HashSet<i64> = targets.iter().map(|t| t.id).collect();
        let mut locks = self.target_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|id, lock| live.contains(id) || Arc::strong_count(lock) > 1);
    }

    /// Probe, persist, track and notify while holding the target's lock.
    ///
    /// Waiting for a permit counts against `deadline`.
    async fn check_locked(
        &self,
        target: &Target,
        _guard: OwnedMutexGuard<()>,
        deadline: Instant,
        permits: Option<Arc<Semaphore>>,
    ) -> Result<CheckResult, CheckError> {
        let started = Utc::now();
        let probe = async {
            let _permit = match permits {
                Some(permits) => permits.acquire_owned().await.ok(),
                None => None,
            };
            self.ctx.prober.check(target).await
        };

        let result = match tokio::time::timeout_at(deadline, probe).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!("Scheduler: cannot check {}: {}", target.name, e);
                return Err(e.into());
            }
            Err(_) => {
                tracing::warn!(
                    "Scheduler: check of {} missed its {:?} deadline",
                    target.name,
                    self.ctx.config.tick_timeout
                );
                CheckResult::timed_out(target.id, started)
            }
        };

        self.record(target, &result).await;
        Ok(result)
    }

    async fn record(&self, target: &Target, result: &CheckResult) {
        let previous = match self.ctx.store.latest_check_result(target.id) {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!("Scheduler: cannot read previous result for {}: {}", target.name, e);
                None
            }
        };

        if let Err(e) = self.ctx.store.append_check_result(result) {
            tracing::error!("Scheduler: failed to store result for {}: {}", target.name, e);
            return;
        }

        let transition = match self.ctx.incidents.update(result) {
            Ok(transition) => transition,
            Err(e) => {
                tracing::error!("Scheduler: failed to update incidents for {}: {}", target.name, e);
                None
            }
        };

        if !target.alerts.enabled {
            return;
        }

        let notifier = &self.ctx.notifier;
        let sent = match transition {
            Some(IncidentTransition::Opened(_)) => Some(
                notifier
                    .notify_down(target, result.status_code, result.response_time_ms)
                    .await,
            ),
            Some(IncidentTransition::Resolved(incident)) => Some(
                notifier
                    .notify_recovered(target, incident.duration_seconds.unwrap_or_default())
                    .await,
            ),
            None => None,
        };
        if let Some(Err(e)) = sent {
            tracing::warn!("Scheduler: notification for {} incomplete: {}", target.name, e);
        }

        if let Some(days) = result.ssl_days_remaining {
            let already_alerted = previous
                .and_then(|p| p.ssl_days_remaining)
                .is_some_and(|d| d <= SSL_EXPIRY_ALERT_DAYS);
            if days <= SSL_EXPIRY_ALERT_DAYS && !already_alerted {
                if let Err(e) = notifier.notify_ssl_expiring(target, days).await {
                    tracing::warn!("Scheduler: SSL alert for {} incomplete: {}", target.name, e);
                }
            }
        }
    }
}

async fn write_summary(path: &Path, summary: &TickSummary) {
    let written = match serde_json::to_vec_pretty(summary) {
        Ok(bytes) => tokio::fs::write(path, bytes).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    if let Err(e) = written {
        tracing::warn!("Scheduler: failed to write summary to {}: {}", path.display(), e);
    }
}
