//! Deferred, best-effort deletion of stored assets.
//!
//! A fixed pool of workers drains a bounded queue of [`PendingDeletion`]s. Each
//! worker waits until the item's deadline on an injectable [`Clock`], calls
//! [`AssetStore::delete`] once and moves on. Nothing is persisted: deletions that
//! are still queued or waiting when the process exits are lost, and the asset
//! stays in the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::store::AssetStore;

pub const DEFAULT_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of time for the scheduler.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Resolve once `now() >= deadline`.
    async fn sleep_until(&self, deadline: Instant);
}

/// Wall-clock time via the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait::async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

/// Clock that only moves when told to. Sleepers wake on [`ManualClock::advance`].
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: watch::Sender<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        let (elapsed, _) = watch::channel(Duration::ZERO);
        Self {
            origin: Instant::now(),
            elapsed,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.elapsed.send_modify(|elapsed| *elapsed += by);
    }
}

#[async_trait::async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.borrow()
    }

    async fn sleep_until(&self, deadline: Instant) {
        let mut changes = self.elapsed.subscribe();
        while self.now() < deadline {
            if changes.changed().await.is_err() {
                return;
            }
        }
    }
}

/// A deletion waiting for its deadline. Exists only in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeletion {
    pub asset_id: String,
    pub fire_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("deletion queue is full ({capacity} pending)")]
    Saturated { capacity: usize },
    #[error("deletion workers have stopped")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub delay: Duration,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Upper bound on a single store delete call. An elapsed call counts as failed.
    pub delete_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            delete_timeout: DEFAULT_DELETE_TIMEOUT,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    scheduled: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

/// Handle for enqueueing deletions. Cheap to clone; the workers stop once every
/// handle is dropped and the queue has drained.
#[derive(Clone)]
pub struct DeletionScheduler {
    sender: mpsc::Sender<PendingDeletion>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    counters: Arc<Counters>,
}

impl DeletionScheduler {
    /// Spawn the worker pool on the current tokio runtime.
    pub fn start(store: Arc<dyn AssetStore>, clock: Arc<dyn Clock>, config: SchedulerConfig) -> Self {
        let workers = config.workers.max(1);
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(Counters::default());

        for worker in 0..workers {
            let receiver = Arc::clone(&receiver);
            let store = Arc::clone(&store);
            let clock = Arc::clone(&clock);
            let counters = Arc::clone(&counters);
            let delete_timeout = config.delete_timeout;
            tokio::spawn(async move {
                run_worker(worker, receiver, store, clock, delete_timeout, counters).await;
            });
        }
        info!(
            workers,
            queue_capacity = config.queue_capacity,
            delay_secs = config.delay.as_secs(),
            "deletion scheduler started"
        );

        Self {
            sender,
            clock,
            config,
            counters,
        }
    }

    /// Queue `asset_id` for deletion after the configured delay.
    ///
    /// Never waits: a full queue is reported as [`SchedulerError::Saturated`].
    /// There is no way to cancel a deletion once it is queued.
    pub fn schedule_delete(&self, asset_id: impl Into<String>) -> Result<(), SchedulerError> {
        let pending = PendingDeletion {
            asset_id: asset_id.into(),
            fire_at: self.clock.now() + self.config.delay,
        };
        match self.sender.try_send(pending) {
            Ok(()) => {
                self.counters.scheduled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(pending)) => {
                warn!(asset_id = %pending.asset_id, "deletion queue full, dropping deletion");
                Err(SchedulerError::Saturated {
                    capacity: self.config.queue_capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SchedulerError::Closed),
        }
    }

    pub fn delay(&self) -> Duration {
        self.config.delay
    }

    /// Deletions accepted so far.
    pub fn scheduled(&self) -> usize {
        self.counters.scheduled.load(Ordering::SeqCst)
    }

    /// Deletions that have fired, successful or not.
    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::SeqCst)
    }

    /// Fired deletions whose store call failed.
    pub fn failed(&self) -> usize {
        self.counters.failed.load(Ordering::SeqCst)
    }

    /// Accepted but not yet fired.
    pub fn pending(&self) -> usize {
        self.scheduled().saturating_sub(self.completed())
    }
}

async fn run_worker(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<PendingDeletion>>>,
    store: Arc<dyn AssetStore>,
    clock: Arc<dyn Clock>,
    delete_timeout: Duration,
    counters: Arc<Counters>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(pending) = next else {
            debug!(worker, "deletion queue closed, worker exiting");
            return;
        };

        clock.sleep_until(pending.fire_at).await;
        match tokio::time::timeout(delete_timeout, store.delete(&pending.asset_id)).await {
            Ok(Ok(())) => info!(worker, asset_id = %pending.asset_id, "deleted temporary asset"),
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(worker, asset_id = %pending.asset_id, error = %e, "failed to delete temporary asset");
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(worker, asset_id = %pending.asset_id, timeout = ?delete_timeout, "deleting temporary asset timed out");
            }
        }
        counters.completed.fetch_add(1, Ordering::SeqCst);
    }
}
