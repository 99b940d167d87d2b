//! Per-connection prefetch scheduler.
//!
//! Each started connection gets one tokio task that collects immediately and
//! then once per interval. A trigger wakes the task early. Runs for the same
//! connection are serialized, whether they come from the task or from an
//! inline trigger. Stopping aborts the task but keeps its counters so a later
//! start continues them.

pub mod collector;

pub use collector::{CollectError, CollectedSnapshot, Collector, HistoryCollector};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::PrefetchConfig;

/// Rejected scheduler requests.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("interval_secs must be at least {min_secs}")]
    IntervalTooShort { min_secs: u64 },
}

/// Status of one connection's prefetch task.
#[derive(Debug, Clone, Serialize)]
pub struct PrefetchStatus {
    pub connection_id: String,
    pub active: bool,
    pub interval_secs: u64,
    pub run_count: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct RunStats {
    last_run_at: Option<DateTime<Utc>>,
    next_run_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// State shared between a task and the scheduler.
#[derive(Debug, Default)]
struct TaskShared {
    run_count: AtomicU64,
    stats: parking_lot::Mutex<RunStats>,
    wake: Notify,
    /// Held for the duration of one collection.
    running: Mutex<()>,
}

#[derive(Debug)]
struct TaskEntry {
    interval: Duration,
    shared: Arc<TaskShared>,
    handle: Option<JoinHandle<()>>,
}

impl TaskEntry {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            shared: Arc::new(TaskShared::default()),
            handle: None,
        }
    }

    fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn status(&self, connection_id: &str) -> PrefetchStatus {
        let stats = self.shared.stats.lock();
        let active = self.is_active();
        PrefetchStatus {
            connection_id: connection_id.to_string(),
            active,
            interval_secs: self.interval.as_secs(),
            run_count: self.shared.run_count.load(Ordering::Relaxed),
            last_run_at: stats.last_run_at,
            next_run_at: if active { stats.next_run_at } else { None },
            last_error: stats.last_error.clone(),
        }
    }
}

/// Starts, stops and triggers per-connection collection tasks.
#[derive(Clone)]
pub struct PrefetchScheduler {
    collector: Arc<dyn Collector>,
    tasks: Arc<Mutex<HashMap<String, TaskEntry>>>,
    default_interval: Duration,
    min_interval: Duration,
}

impl std::fmt::Debug for PrefetchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchScheduler")
            .field("default_interval", &self.default_interval)
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}

impl PrefetchScheduler {
    #[must_use]
    pub fn new(collector: Arc<dyn Collector>, config: &PrefetchConfig) -> Self {
        Self {
            collector,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            default_interval: Duration::from_secs(config.default_interval_secs),
            min_interval: Duration::from_secs(config.min_interval_secs),
        }
    }

    fn checked_interval(&self, interval_secs: Option<u64>) -> Result<Duration, SchedulerError> {
        let interval = interval_secs.map_or(self.default_interval, Duration::from_secs);
        if interval < self.min_interval || interval.is_zero() {
            return Err(SchedulerError::IntervalTooShort {
                min_secs: self.min_interval.as_secs().max(1),
            });
        }
        Ok(interval)
    }

    /// Start collecting for `connection_id`. Starting an active task is a
    /// no-op. Without an explicit interval the last configured one is used.
    pub async fn start(
        &self,
        connection_id: &str,
        interval_secs: Option<u64>,
    ) -> Result<PrefetchStatus, SchedulerError> {
        let requested = interval_secs.map(|s| self.checked_interval(Some(s))).transpose()?;
        let mut tasks = self.tasks.lock().await;

        let entry = tasks
            .entry(connection_id.to_string())
            .or_insert_with(|| TaskEntry::new(self.default_interval));
        if entry.is_active() {
            tracing::debug!("Prefetch already running - connection_id={}", connection_id);
            return Ok(entry.status(connection_id));
        }

        if let Some(interval) = requested {
            entry.interval = interval;
        }
        entry.handle = Some(self.spawn(connection_id, entry));
        tracing::info!(
            "▶️  Prefetch started - connection_id={}, interval_secs={}",
            connection_id,
            entry.interval.as_secs()
        );
        Ok(entry.status(connection_id))
    }

    fn spawn(&self, connection_id: &str, entry: &TaskEntry) -> JoinHandle<()> {
        let id = connection_id.to_string();
        let collector = Arc::clone(&self.collector);
        let shared = Arc::clone(&entry.shared);
        let interval = entry.interval;
        tokio::spawn(async move {
            Self::collect_loop(id, collector, shared, interval).await;
        })
    }

    async fn collect_loop(
        connection_id: String,
        collector: Arc<dyn Collector>,
        shared: Arc<TaskShared>,
        interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = shared.wake.notified() => {
                    tracing::debug!("Prefetch triggered - connection_id={}", connection_id);
                }
            }
            run_once(&connection_id, collector.as_ref(), &shared).await;
            // Count the next period from the end of this run, early or not.
            ticker.reset();
            shared.stats.lock().next_run_at = chrono::Duration::from_std(interval)
                .ok()
                .map(|d| Utc::now() + d);
        }
    }

    /// Stop collecting. Returns false when no task was running.
    pub async fn stop(&self, connection_id: &str) -> bool {
        let mut tasks = self.tasks.lock().await;
        let Some(handle) = tasks.get_mut(connection_id).and_then(|e| e.handle.take()) else {
            return false;
        };
        let was_running = !handle.is_finished();
        handle.abort();
        if was_running {
            tracing::info!("⏹️  Prefetch stopped - connection_id={}", connection_id);
        }
        was_running
    }

    /// Run a collection now. Wakes an active task, or collects inline when
    /// the connection has no running task.
    pub async fn trigger(&self, connection_id: &str) -> PrefetchStatus {
        let shared = {
            let mut tasks = self.tasks.lock().await;
            let entry = tasks
                .entry(connection_id.to_string())
                .or_insert_with(|| TaskEntry::new(self.default_interval));
            if entry.is_active() {
                entry.shared.wake.notify_one();
                return entry.status(connection_id);
            }
            Arc::clone(&entry.shared)
        };

        run_once(connection_id, self.collector.as_ref(), &shared).await;

        let tasks = self.tasks.lock().await;
        match tasks.get(connection_id) {
            Some(entry) => entry.status(connection_id),
            None => TaskEntry::new(self.default_interval).status(connection_id),
        }
    }

    /// Change the interval. A running task is restarted only when the value
    /// actually changed; returns whether it was.
    pub async fn update_config(
        &self,
        connection_id: &str,
        interval_secs: u64,
    ) -> Result<bool, SchedulerError> {
        let interval = self.checked_interval(Some(interval_secs))?;
        let mut tasks = self.tasks.lock().await;
        let entry = tasks
            .entry(connection_id.to_string())
            .or_insert_with(|| TaskEntry::new(self.default_interval));

        if entry.interval == interval {
            return Ok(false);
        }
        entry.interval = interval;
        tracing::info!(
            "✅ Prefetch interval updated - connection_id={}, interval_secs={}",
            connection_id,
            interval_secs
        );

        if !entry.is_active() {
            return Ok(false);
        }
        if let Some(handle) = entry.handle.take() {
            handle.abort();
        }
        entry.handle = Some(self.spawn(connection_id, entry));
        Ok(true)
    }

    /// Abort the task and drop everything known about `connection_id`.
    /// Returns false when nothing was tracked.
    pub async fn forget(&self, connection_id: &str) -> bool {
        let mut tasks = self.tasks.lock().await;
        let Some(mut entry) = tasks.remove(connection_id) else {
            return false;
        };
        if let Some(handle) = entry.handle.take() {
            handle.abort();
        }
        tracing::info!("🗑️  Prefetch task removed - connection_id={}", connection_id);
        true
    }

    pub async fn status(&self, connection_id: &str) -> Option<PrefetchStatus> {
        let tasks = self.tasks.lock().await;
        tasks.get(connection_id).map(|e| e.status(connection_id))
    }

    /// Every known task, ordered by connection id.
    pub async fn list(&self) -> Vec<PrefetchStatus> {
        let tasks = self.tasks.lock().await;
        let mut all: Vec<_> = tasks.iter().map(|(id, e)| e.status(id)).collect();
        all.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        all
    }

    /// Abort every task.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for entry in tasks.values_mut() {
            if let Some(handle) = entry.handle.take() {
                handle.abort();
            }
        }
    }
}

async fn run_once(connection_id: &str, collector: &dyn Collector, shared: &TaskShared) {
    let _running = shared.running.lock().await;
    let result = collector.collect(connection_id).await;
    shared.run_count.fetch_add(1, Ordering::Relaxed);

    let mut stats = shared.stats.lock();
    stats.last_run_at = Some(Utc::now());
    match result {
        Ok(rows) => {
            tracing::debug!("Prefetch collected - connection_id={}, rows={}", connection_id, rows);
            stats.last_error = None;
        }
        Err(e) => {
            tracing::warn!("⚠️  Prefetch failed - connection_id={}, error={:#}", connection_id, e);
            stats.last_error = Some(format!("{e:#}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingCollector {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Collector for CountingCollector {
        async fn collect(&self, _connection_id: &str) -> anyhow::Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("ORA-12541: TNS:no listener");
            }
            Ok(3)
        }
    }

    fn scheduler(collector: Arc<CountingCollector>) -> PrefetchScheduler {
        PrefetchScheduler::new(
            collector,
            &PrefetchConfig {
                default_interval_secs: 60,
                min_interval_secs: 10,
                autostart_default: false,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_collects_immediately_then_per_interval() {
        let collector = Arc::new(CountingCollector::default());
        let scheduler = scheduler(Arc::clone(&collector));

        let status = scheduler.start("c1", None).await.unwrap();
        assert!(status.active);
        assert_eq!(status.interval_secs, 60);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(collector.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(collector.calls.load(Ordering::SeqCst), 2);

        let status = scheduler.status("c1").await.unwrap();
        assert_eq!(status.run_count, 2);
        assert!(status.last_run_at.is_some());
        assert!(status.next_run_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let collector = Arc::new(CountingCollector::default());
        let scheduler = scheduler(Arc::clone(&collector));

        scheduler.start("c1", None).await.unwrap();
        scheduler.start("c1", Some(30)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(collector.calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.list().await.len(), 1);
        assert_eq!(scheduler.status("c1").await.unwrap().interval_secs, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_collection() {
        let collector = Arc::new(CountingCollector::default());
        let scheduler = scheduler(Arc::clone(&collector));

        assert!(!scheduler.stop("c1").await);

        scheduler.start("c1", None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(scheduler.stop("c1").await);
        assert!(!scheduler.stop("c1").await);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(collector.calls.load(Ordering::SeqCst), 1);

        let status = scheduler.status("c1").await.unwrap();
        assert!(!status.active);
        assert_eq!(status.run_count, 1);
        assert!(status.next_run_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_inactive_runs_inline() {
        let collector = Arc::new(CountingCollector::default());
        let scheduler = scheduler(Arc::clone(&collector));

        let status = scheduler.trigger("c1").await;
        assert_eq!(collector.calls.load(Ordering::SeqCst), 1);
        assert!(!status.active);
        assert_eq!(status.run_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_wakes_active_task() {
        let collector = Arc::new(CountingCollector::default());
        let scheduler = scheduler(Arc::clone(&collector));

        scheduler.start("c1", None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(collector.calls.load(Ordering::SeqCst), 1);

        scheduler.trigger("c1").await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(collector.calls.load(Ordering::SeqCst), 2);
    }

    /// Takes five seconds per run and remembers the most runs seen at once.
    #[derive(Default)]
    struct SlowCollector {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Collector for SlowCollector {
        async fn collect(&self, _connection_id: &str) -> anyhow::Result<usize> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
    }

    fn slow_scheduler(collector: Arc<SlowCollector>) -> PrefetchScheduler {
        PrefetchScheduler::new(
            collector,
            &PrefetchConfig {
                default_interval_secs: 60,
                min_interval_secs: 10,
                autostart_default: false,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_triggers_never_overlap() {
        let collector = Arc::new(SlowCollector::default());
        let scheduler = slow_scheduler(Arc::clone(&collector));

        let (a, b) = tokio::join!(scheduler.trigger("c1"), scheduler.trigger("c1"));
        assert_eq!(collector.calls.load(Ordering::SeqCst), 2);
        assert_eq!(collector.peak.load(Ordering::SeqCst), 1);
        assert_eq!(a.run_count.max(b.run_count), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_and_start_never_overlap() {
        let collector = Arc::new(SlowCollector::default());
        let scheduler = slow_scheduler(Arc::clone(&collector));

        let (_, started) = tokio::join!(scheduler.trigger("c1"), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            scheduler.start("c1", None).await
        });
        assert!(started.unwrap().active);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(collector.calls.load(Ordering::SeqCst), 2);
        assert_eq!(collector.peak.load(Ordering::SeqCst), 1);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_moves_next_run() {
        let collector = Arc::new(CountingCollector::default());
        let scheduler = scheduler(Arc::clone(&collector));

        scheduler.start("c1", None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        scheduler.trigger("c1").await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(collector.calls.load(Ordering::SeqCst), 2);

        // The old deadline at 60s no longer fires; the next run is 60s after the trigger.
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(collector.calls.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(collector.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_removes_task() {
        let collector = Arc::new(CountingCollector::default());
        let scheduler = scheduler(Arc::clone(&collector));

        assert!(!scheduler.forget("c1").await);
        scheduler.start("c1", None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(scheduler.forget("c1").await);
        assert!(scheduler.status("c1").await.is_none());
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(collector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_recorded() {
        let collector = Arc::new(CountingCollector {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let scheduler = scheduler(Arc::clone(&collector));

        let status = scheduler.trigger("c1").await;
        assert!(status.last_error.unwrap().contains("ORA-12541"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_validation() {
        let scheduler = scheduler(Arc::new(CountingCollector::default()));

        assert!(matches!(
            scheduler.start("c1", Some(5)).await,
            Err(SchedulerError::IntervalTooShort { min_secs: 10 })
        ));
        assert!(scheduler.update_config("c1", 9).await.is_err());
        assert!(scheduler.list().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_config_restarts_only_on_change() {
        let collector = Arc::new(CountingCollector::default());
        let scheduler = scheduler(Arc::clone(&collector));

        // Inactive: the interval is remembered for the next start.
        assert!(!scheduler.update_config("c1", 30).await.unwrap());
        let status = scheduler.start("c1", None).await.unwrap();
        assert_eq!(status.interval_secs, 30);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!scheduler.update_config("c1", 30).await.unwrap());
        assert!(scheduler.update_config("c1", 120).await.unwrap());

        // The restarted task collects immediately.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(collector.calls.load(Ordering::SeqCst), 2);

        let status = scheduler.status("c1").await.unwrap();
        assert!(status.active);
        assert_eq!(status.interval_secs, 120);
    }
}
