//! Scheduler implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{plan_mode, ActiveRun, SchedulerStatus, TriggerOutcome};
use crate::config::SchedulerConfig;
use crate::sync::{SyncError, SyncEvent, SyncMode, SyncReport, Synchronizer};

/// How long `stop` waits for an in-flight run to reach a batch boundary.
const STOP_GRACE: Duration = Duration::from_secs(30);

/// Handle to a spawned sync run.
///
/// Dropping the handle does not cancel the run.
pub struct SyncHandle {
    pub run_id: String,
    pub mode: SyncMode,
    /// Events published by the synchronizer from before this run started.
    pub events: broadcast::Receiver<SyncEvent>,
    task: JoinHandle<Result<SyncReport, SyncError>>,
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("run_id", &self.run_id)
            .field("mode", &self.mode)
            .finish()
    }
}

impl SyncHandle {
    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<SyncReport, SyncError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(run_id = %self.run_id, "Sync task ended abnormally: {}", e);
                Err(SyncError::Cancelled)
            }
        }
    }
}

/// State shared with spawned runs and the interval loop.
struct Shared {
    synchronizer: Arc<Synchronizer>,
    config: SchedulerConfig,
    syncing: AtomicBool,
    active: Mutex<Option<ActiveRun>>,
    last_report: RwLock<Option<SyncReport>>,
    last_error: RwLock<Option<String>>,
}

/// Clears the sync flag when a run ends, including by panic.
struct SyncingGuard(Arc<Shared>);

impl Drop for SyncingGuard {
    fn drop(&mut self) {
        *self.0.active.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.0.syncing.store(false, Ordering::SeqCst);
    }
}

impl Shared {
    fn active_run(&self) -> Option<ActiveRun> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Decide full vs incremental from the store and checkpoint.
    fn plan(&self) -> SyncMode {
        let store = self.synchronizer.store();
        match (store.count(), store.load_cursor()) {
            (Ok(count), Ok(cursor)) => {
                plan_mode(count, &cursor, self.config.stale_after(), Utc::now())
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to read catalog state for sync planning: {}", e);
                SyncMode::Full
            }
        }
    }

    fn trigger(self: &Arc<Self>, mode: SyncMode) -> TriggerOutcome {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let active = self.active_run().unwrap_or_else(|| ActiveRun {
                run_id: String::new(),
                mode,
                started_at: Utc::now(),
            });
            info!(
                requested = %mode,
                active_run = %active.run_id,
                active_mode = %active.mode,
                "Sync already in progress, dropping trigger"
            );
            return TriggerOutcome::AlreadyRunning(active);
        }

        let run = ActiveRun {
            run_id: Uuid::new_v4().to_string(),
            mode,
            started_at: Utc::now(),
        };
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(run.clone());

        // Subscribe before spawning so the caller sees the Started event.
        let events = self.synchronizer.events().subscribe();
        let guard = SyncingGuard(Arc::clone(self));
        let shared = Arc::clone(self);
        let run_id = run.run_id.clone();

        let task = tokio::spawn(async move {
            let _guard = guard;
            let result = shared.synchronizer.run_with_id(mode, run_id).await;
            match &result {
                Ok(report) => {
                    *shared.last_report.write().await = Some(report.clone());
                    *shared.last_error.write().await = None;
                }
                Err(e) => {
                    *shared.last_error.write().await = Some(e.to_string());
                }
            }
            result
        });

        TriggerOutcome::Started(SyncHandle {
            run_id: run.run_id,
            mode,
            events,
            task,
        })
    }
}

/// Drives scheduled and manual syncs; at most one runs at a time.
pub struct SyncScheduler {
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SyncScheduler {
    pub fn new(synchronizer: Arc<Synchronizer>, config: SchedulerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shared: Arc::new(Shared {
                synchronizer,
                config,
                syncing: AtomicBool::new(false),
                active: Mutex::new(None),
                last_report: RwLock::new(None),
                last_error: RwLock::new(None),
            }),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Start the interval loop. The first tick fires immediately and runs the
    /// start-up sync.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Sync scheduler already running");
            return;
        }

        if !self.shared.config.enabled {
            info!("Scheduled syncs disabled, only manual triggers will run");
            return;
        }

        info!(
            interval_secs = self.shared.config.interval_secs,
            stale_after_secs = self.shared.config.stale_after_secs,
            "Starting sync scheduler"
        );
        self.spawn_loop();
    }

    /// Stop the loop and cancel any in-flight run at its next batch boundary.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Sync scheduler not running");
        }

        info!("Stopping sync scheduler");
        let _ = self.shutdown_tx.send(());
        self.shared.synchronizer.cancel();

        let deadline = Instant::now() + STOP_GRACE;
        while self.shared.syncing.load(Ordering::SeqCst) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if self.shared.syncing.load(Ordering::SeqCst) {
            warn!("Sync still running after shutdown grace period");
        }

        info!("Sync scheduler stopped");
    }

    /// Start a sync now, unless one is already running.
    pub fn trigger(&self, mode: SyncMode) -> TriggerOutcome {
        self.shared.trigger(mode)
    }

    /// Start whichever mode the catalog state calls for.
    pub fn trigger_planned(&self) -> TriggerOutcome {
        let mode = self.shared.plan();
        self.shared.trigger(mode)
    }

    /// The mode a scheduled run would use right now.
    pub fn plan(&self) -> SyncMode {
        self.shared.plan()
    }

    pub fn is_syncing(&self) -> bool {
        self.shared.syncing.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub async fn last_report(&self) -> Option<SyncReport> {
        self.shared.last_report.read().await.clone()
    }

    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.shared.synchronizer
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.is_running(),
            enabled: self.shared.config.enabled,
            interval_secs: self.shared.config.interval_secs,
            active_run: self.shared.active_run(),
            last_report: self.shared.last_report.read().await.clone(),
            last_error: self.shared.last_error.read().await.clone(),
            upstream: self.shared.synchronizer.upstream_status().await,
        }
    }

    fn spawn_loop(&self) {
        let shared = Arc::clone(&self.shared);
        let running = Arc::clone(&self.running);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = shared.config.interval().max(Duration::from_secs(1));

        tokio::spawn(async move {
            info!("Sync scheduler loop started");
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Sync scheduler loop received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        let mode = shared.plan();
                        debug!(mode = %mode, "Scheduled sync tick");
                        // A dropped trigger is logged inside; the next tick re-evaluates.
                        let _ = shared.trigger(mode);
                    }
                }
            }
            info!("Sync scheduler loop stopped");
        });
    }
}
