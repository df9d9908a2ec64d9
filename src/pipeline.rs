// Delivery pipeline - buffers data points and delivers batches to backends
//
// # Architecture
// - Points are appended to a shared buffer under a short-lived lock
// - A flush swaps the buffer for an empty one and delivers the captured batch
//   outside the lock, so producers keep appending during slow writes
// - Flushes are triggered by the batch-size threshold (tracked spawned task)
//   and by a fixed-interval timer (background task); stop waits for both
// - Each backend gets bounded retries; one failing backend never stops
//   delivery to the others

use futures_util::future::join_all;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::config::GlobalConfig;
use crate::error::PipelineError;
use crate::point::DataPoint;

const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Batching and retry settings for a [`DeliveryPipeline`]
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Buffered points that trigger an immediate flush
    pub batch_size: usize,

    /// Cadence of the background flush
    pub flush_interval: Duration,

    /// Write attempts per backend per flush
    pub retry_attempts: u32,

    /// Pause between attempts
    pub retry_delay: Duration,

    /// Bound for a flush triggered by the batch-size threshold
    pub flush_timeout: Duration,

    /// Bound on stop for in-flight flushes plus the drain, and separately for
    /// closing backends
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    /// Replaces zero values with the defaults
    pub fn with_defaults(mut self) -> Self {
        let defaults = Self::default();
        if self.batch_size == 0 {
            self.batch_size = defaults.batch_size;
        }
        if self.flush_interval.is_zero() {
            self.flush_interval = defaults.flush_interval;
        }
        if self.retry_attempts == 0 {
            self.retry_attempts = defaults.retry_attempts;
        }
        if self.retry_delay.is_zero() {
            self.retry_delay = defaults.retry_delay;
        }
        if self.flush_timeout.is_zero() {
            self.flush_timeout = defaults.flush_timeout;
        }
        if self.shutdown_timeout.is_zero() {
            self.shutdown_timeout = defaults.shutdown_timeout;
        }
        self
    }
}

impl From<&GlobalConfig> for PipelineConfig {
    fn from(global: &GlobalConfig) -> Self {
        Self {
            batch_size: global.batch_size,
            flush_interval: global.effective_flush_interval(),
            retry_attempts: global.retry_attempts,
            retry_delay: global.retry_delay,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            shutdown_timeout: global.shutdown_timeout,
        }
        .with_defaults()
    }
}

/// State shared with the background and threshold-triggered flush tasks
struct Shared {
    /// Delivery order for a flush; fixed at construction
    backends: Vec<Arc<dyn Backend>>,
    config: PipelineConfig,
    buffer: Mutex<Vec<DataPoint>>,
}

struct FlushWorker {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Buffers data points and delivers them to every registered backend
pub struct DeliveryPipeline {
    shared: Arc<Shared>,
    worker: Mutex<Option<FlushWorker>>,
    /// Threshold-triggered flushes still in flight
    flushes: TaskTracker,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl DeliveryPipeline {
    /// Creates a pipeline delivering to `backends` in the given order
    pub fn new(config: PipelineConfig, backends: Vec<Arc<dyn Backend>>) -> Self {
        let config = config.with_defaults();
        let buffer = Vec::with_capacity(config.batch_size);
        DeliveryPipeline {
            shared: Arc::new(Shared {
                backends,
                config,
                buffer: Mutex::new(buffer),
            }),
            worker: Mutex::new(None),
            flushes: TaskTracker::new(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    pub fn backend_count(&self) -> usize {
        self.shared.backends.len()
    }

    /// Number of points waiting for the next flush
    pub fn buffer_len(&self) -> usize {
        self.shared.lock_buffer().len()
    }

    /// Initializes every backend in order and launches the periodic flush
    ///
    /// # Errors
    /// The first initialization failure aborts the start. Backends initialized
    /// before it are closed again, so the pipeline never runs half-started.
    /// A pipeline whose start failed cannot be started again.
    pub async fn start(&self, scope: &CancellationToken) -> Result<(), PipelineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyStarted);
        }

        for (index, backend) in self.shared.backends.iter().enumerate() {
            if let Err(source) = backend.initialize(scope).await {
                error!(backend = backend.name(), error = %source, "backend initialization failed");
                self.close_initialized(&self.shared.backends[..index]).await;
                return Err(PipelineError::Initialize {
                    backend: backend.name().to_string(),
                    source,
                });
            }
            info!(backend = backend.name(), "backend initialized");
        }

        let stop = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.shared).flush_loop(scope.clone(), stop.clone()));
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(FlushWorker { stop, handle });

        info!(
            backends = self.backend_count(),
            batch_size = self.shared.config.batch_size,
            flush_interval = ?self.shared.config.flush_interval,
            "pipeline started"
        );
        Ok(())
    }

    async fn close_initialized(&self, backends: &[Arc<dyn Backend>]) {
        for backend in backends {
            match timeout(self.shared.config.shutdown_timeout, backend.close()).await {
                Ok(Ok(())) => debug!(backend = backend.name(), "closed after failed start"),
                Ok(Err(e)) => warn!(backend = backend.name(), error = %e, "close after failed start failed"),
                Err(_) => warn!(backend = backend.name(), "close after failed start timed out"),
            }
        }
    }

    /// Stops the periodic flush, drains the buffer and closes every backend
    ///
    /// Threshold-triggered flushes already in flight are awaited before the
    /// drain, so no write overlaps a close. Waiting for them plus the drain
    /// flush share one `shutdown_timeout` deadline; the close phase gets its
    /// own. Close errors are collected; the last one is returned. Calling
    /// `stop` again is a no-op.
    pub async fn stop(&self) -> Result<(), PipelineError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            worker.stop.cancel();
            if let Err(e) = worker.handle.await {
                error!(error = %e, "flush task panicked");
            }
        }

        let budget = self.shared.config.shutdown_timeout;
        let mut last_error = None;
        let drain_deadline = Instant::now() + budget;

        self.flushes.close();
        if timeout_at(drain_deadline, self.flushes.wait()).await.is_err() {
            error!(
                pending = self.flushes.len(),
                timeout = ?budget,
                "in-flight batch flushes did not finish"
            );
            last_error = Some(PipelineError::DrainTimedOut(budget));
        }

        let drain = CancellationToken::new();
        match timeout_at(drain_deadline, self.shared.flush(&drain)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "final flush failed"),
            Err(_) => {
                drain.cancel();
                error!(timeout = ?budget, "final flush timed out");
                last_error = Some(PipelineError::DrainTimedOut(budget));
            }
        }

        let deadline = Instant::now() + budget;
        for backend in &self.shared.backends {
            match timeout_at(deadline, backend.close()).await {
                Ok(Ok(())) => debug!(backend = backend.name(), "backend closed"),
                Ok(Err(source)) => {
                    error!(backend = backend.name(), error = %source, "backend close failed");
                    last_error = Some(PipelineError::Close {
                        backend: backend.name().to_string(),
                        source,
                    });
                }
                Err(_) => {
                    error!(backend = backend.name(), "backend close timed out");
                    last_error = Some(PipelineError::CloseTimedOut {
                        backend: backend.name().to_string(),
                        timeout: budget,
                    });
                }
            }
        }

        info!("pipeline stopped");
        last_error.map_or(Ok(()), Err)
    }

    /// Adds a point to the buffer
    ///
    /// Invalid points are dropped and logged. Reaching the batch size spawns a
    /// flush with its own deadline; the caller never waits on delivery. Outside
    /// a Tokio runtime the threshold flush is skipped and the periodic flush
    /// picks the points up instead.
    pub fn push(&self, point: DataPoint) {
        if let Err(e) = point.validate() {
            warn!(error = %e, "invalid data point dropped");
            return;
        }

        let should_flush = {
            let mut buffer = self.shared.lock_buffer();
            buffer.push(point);
            buffer.len() >= self.shared.config.batch_size
        };

        if !should_flush {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime available, leaving batch for the periodic flush");
            return;
        };

        let shared = Arc::clone(&self.shared);
        runtime.spawn(self.flushes.track_future(async move {
            let scope = CancellationToken::new();
            match timeout(shared.config.flush_timeout, shared.flush(&scope)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "batch flush failed"),
                Err(_) => {
                    scope.cancel();
                    error!(timeout = ?shared.config.flush_timeout, "batch flush timed out");
                }
            }
        }));
    }

    /// Delivers everything buffered so far to all backends
    ///
    /// Returns immediately when the buffer is empty. Unhealthy backends are
    /// skipped without spending retries. Every backend is attempted even after
    /// another fails; the last failure is returned.
    pub async fn flush(&self, scope: &CancellationToken) -> Result<(), PipelineError> {
        self.shared.flush(scope).await
    }

    /// Writes a batch to one backend, retrying up to `retry_attempts` times
    ///
    /// Cancelling `scope` during the pause between attempts returns
    /// [`PipelineError::Cancelled`] immediately.
    pub async fn write_with_retry(
        &self,
        backend: &dyn Backend,
        batch: &[DataPoint],
        scope: &CancellationToken,
    ) -> Result<(), PipelineError> {
        self.shared.write_with_retry(backend, batch, scope).await
    }
}

impl Shared {
    fn lock_buffer(&self) -> std::sync::MutexGuard<'_, Vec<DataPoint>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn flush(&self, scope: &CancellationToken) -> Result<(), PipelineError> {
        let batch = {
            let mut buffer = self.lock_buffer();
            if buffer.is_empty() {
                return Ok(());
            }
            mem::replace(&mut *buffer, Vec::with_capacity(self.config.batch_size))
        };

        debug!(count = batch.len(), "flushing data points");

        let batch = batch.as_slice();
        let results = join_all(self.backends.iter().map(|backend| async move {
            if !backend.is_healthy() {
                warn!(backend = backend.name(), "skipping unhealthy backend");
                return Ok(());
            }
            self.write_with_retry(backend.as_ref(), batch, scope).await
        }))
        .await;

        let mut last_error = None;
        for (backend, result) in self.backends.iter().zip(results) {
            if let Err(e) = result {
                error!(backend = backend.name(), error = %e, "backend write failed");
                last_error = Some(e);
            }
        }

        last_error.map_or(Ok(()), Err)
    }

    async fn write_with_retry(
        &self,
        backend: &dyn Backend,
        batch: &[DataPoint],
        scope: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let attempts = self.config.retry_attempts.max(1);
        let mut attempt = 1;

        loop {
            match backend.write(scope, batch).await {
                Ok(()) => {
                    if attempt > 1 {
                        info!(backend = backend.name(), attempt, "write succeeded after retry");
                    }
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        backend = backend.name(),
                        attempt,
                        error = %e,
                        "write failed, retrying"
                    );
                    tokio::select! {
                        _ = scope.cancelled() => return Err(PipelineError::Cancelled),
                        _ = sleep(self.config.retry_delay) => {}
                    }
                    attempt += 1;
                }
                Err(source) => {
                    return Err(PipelineError::Write {
                        backend: backend.name().to_string(),
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }

    async fn flush_loop(self: Arc<Self>, scope: CancellationToken, stop: CancellationToken) {
        let period = self.config.flush_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = scope.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.flush(&scope).await {
                        error!(error = %e, "periodic flush failed");
                    }
                }
            }
        }

        debug!("periodic flush stopped");
    }
}
