// Runtime controller - drives the poll loop and the delivery pipeline lifecycle
//
// # Lifecycle
// Idle -> Starting -> Running -> Draining -> Stopped
//
// - Starting: backends are initialized, a failure aborts the run
// - Running: polls on every tick, reloads configuration on request
// - Draining: one bounded final poll, then the pipeline is stopped
// - Run-once mode goes straight from the first poll to Draining

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::time::{interval_at, timeout, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, EchoBackend};
use crate::collector::Collector;
use crate::config::{ConfigError, ConfigSource, FileConfigSource, MonitorConfig};
use crate::error::MonitorError;
use crate::logging::LogHandle;
use crate::pipeline::{DeliveryPipeline, PipelineConfig};
use crate::signal::ReloadHandle;
use crate::stats::{PollStats, StatsTracker};

/// Lifecycle state of a [`Monitor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Idle,
    Starting,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeState::Idle => "idle",
            RuntimeState::Starting => "starting",
            RuntimeState::Running => "running",
            RuntimeState::Draining => "draining",
            RuntimeState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// A monitoring daemon: one collector, a set of backends and a poll loop
///
/// # Example
/// ```no_run
/// use metrics_runtime::{collector_fn, BoxError, DataPoint, Monitor};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let monitor = Monitor::builder("office", collector_fn(|_scope| async {
///     Ok::<_, BoxError>(vec![DataPoint::new("temperature").field("celsius", 22.5)])
/// }))
/// .echo(true)
/// .run_once(true)
/// .build()?;
///
/// monitor.run(CancellationToken::new()).await?;
/// # Ok(())
/// # }
/// ```
pub struct Monitor {
    name: String,
    collector: Arc<dyn Collector>,
    config: RwLock<MonitorConfig>,
    backends: Vec<Arc<dyn Backend>>,
    run_once: bool,
    config_source: Option<Arc<dyn ConfigSource>>,
    log_handle: Option<LogHandle>,
    reload: ReloadHandle,
    stats: StatsTracker,
    state: Mutex<RuntimeState>,
}

/// Step-by-step construction of a [`Monitor`]
pub struct MonitorBuilder {
    name: String,
    collector: Arc<dyn Collector>,
    config: Option<MonitorConfig>,
    config_file: Option<PathBuf>,
    backends: Vec<Arc<dyn Backend>>,
    echo: bool,
    run_once: bool,
    config_source: Option<Arc<dyn ConfigSource>>,
    log_handle: Option<LogHandle>,
}

impl MonitorBuilder {
    /// Uses an in-memory configuration
    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Loads configuration from a TOML file at build time
    ///
    /// Takes precedence over [`config`](Self::config). Unless another source is
    /// set, the same file is re-read on every reload.
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Registers a delivery backend; backends receive batches in registration order
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Also prints every batch to stdout
    pub fn echo(mut self, enabled: bool) -> Self {
        self.echo = enabled;
        self
    }

    /// Polls exactly once, flushes and returns
    pub fn run_once(mut self, enabled: bool) -> Self {
        self.run_once = enabled;
        self
    }

    /// Where fresh configuration comes from on reload
    pub fn config_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.config_source = Some(source);
        self
    }

    /// Lets reloads change the log level
    pub fn log_handle(mut self, handle: LogHandle) -> Self {
        self.log_handle = Some(handle);
        self
    }

    /// Validates the configuration and assembles the monitor
    ///
    /// # Errors
    /// Returns [`MonitorError::Config`] when the configuration file cannot be
    /// read or any configuration fails validation.
    pub fn build(self) -> Result<Monitor, MonitorError> {
        let mut config_source = self.config_source;

        let config = match self.config_file {
            Some(path) => {
                let config = MonitorConfig::from_file(&path)?;
                if config_source.is_none() {
                    config_source = Some(Arc::new(FileConfigSource::new(path)));
                }
                config
            }
            None => {
                let config = self.config.unwrap_or_default();
                config.validate().map_err(ConfigError::from)?;
                config
            }
        };

        let mut backends = self.backends;
        if self.echo {
            backends.push(Arc::new(EchoBackend::stdout()));
        }

        Ok(Monitor {
            name: self.name,
            collector: self.collector,
            config: RwLock::new(config),
            backends,
            run_once: self.run_once,
            config_source,
            log_handle: self.log_handle,
            reload: ReloadHandle::new(),
            stats: StatsTracker::new(),
            state: Mutex::new(RuntimeState::Idle),
        })
    }
}

impl Monitor {
    /// Starts building a monitor around `collector`
    pub fn builder(name: impl Into<String>, collector: impl Collector + 'static) -> MonitorBuilder {
        MonitorBuilder {
            name: name.into(),
            collector: Arc::new(collector),
            config: None,
            config_file: None,
            backends: Vec::new(),
            echo: false,
            run_once: false,
            config_source: None,
            log_handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the poll counters
    pub fn stats(&self) -> PollStats {
        self.stats.snapshot()
    }

    pub fn state(&self) -> RuntimeState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle that requests a configuration reload while running
    pub fn reload_handle(&self) -> ReloadHandle {
        self.reload.clone()
    }

    /// Configuration in effect
    ///
    /// A reload only changes `poll_interval` and `log_level` here; other
    /// settings keep their startup values until the process restarts.
    pub fn config(&self) -> MonitorConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, next: RuntimeState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = *state;
        debug!(monitor = %self.name, from = %previous, to = %next, "state transition");
        *state = next;
    }

    /// Runs the monitor until `cancel` fires (or after one poll in run-once mode)
    ///
    /// # Errors
    /// - [`MonitorError::AlreadyRunning`] when called a second time
    /// - [`MonitorError::NoBackends`] before any polling when nothing can receive data
    /// - [`MonitorError::Start`] when a backend fails to initialize
    ///
    /// Collector failures, delivery failures and reload failures are logged and
    /// counted; they never end the run.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), MonitorError> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != RuntimeState::Idle {
                return Err(MonitorError::AlreadyRunning);
            }
            *state = RuntimeState::Starting;
        }

        if self.backends.is_empty() {
            self.set_state(RuntimeState::Stopped);
            return Err(MonitorError::NoBackends);
        }

        let config = self.config();
        let pipeline = DeliveryPipeline::new(PipelineConfig::from(&config.global), self.backends.clone());

        if let Err(e) = pipeline.start(&cancel).await {
            error!(monitor = %self.name, error = %e, "failed to start pipeline");
            self.set_state(RuntimeState::Stopped);
            return Err(MonitorError::Start(e));
        }

        info!(
            monitor = %self.name,
            backends = pipeline.backend_count(),
            poll_interval = ?config.global.poll_interval,
            run_once = self.run_once,
            "monitor started"
        );

        self.poll(&pipeline, &cancel, None).await;

        if self.run_once {
            self.set_state(RuntimeState::Draining);
        } else {
            self.set_state(RuntimeState::Running);
            self.poll_loop(&pipeline, &cancel, config.global.poll_interval).await;
        }

        if let Err(e) = pipeline.stop().await {
            error!(monitor = %self.name, error = %e, "pipeline stopped with errors");
        }
        self.set_state(RuntimeState::Stopped);

        let stats = self.stats();
        info!(
            monitor = %self.name,
            total_polls = stats.total_polls,
            successful_polls = stats.successful_polls,
            failed_polls = stats.failed_polls,
            total_points = stats.total_points,
            "monitor stopped"
        );
        Ok(())
    }

    async fn poll_loop(&self, pipeline: &DeliveryPipeline, cancel: &CancellationToken, period: Duration) {
        let mut ticker = poll_ticker(period);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(monitor = %self.name, "shutdown requested, draining");
                    self.set_state(RuntimeState::Draining);

                    let limit = self.config().global.shutdown_timeout;
                    self.poll(pipeline, &CancellationToken::new(), Some(limit)).await;
                    break;
                }
                _ = self.reload.requested() => {
                    self.reload_config(&mut ticker).await;
                }
                _ = ticker.tick() => {
                    self.poll(pipeline, cancel, None).await;
                }
            }
        }
    }

    /// Invokes the collector once and records the outcome
    ///
    /// With `limit`, a collection that outlives it has its scope cancelled and
    /// counts as a failed poll.
    async fn poll(&self, pipeline: &DeliveryPipeline, scope: &CancellationToken, limit: Option<Duration>) {
        let started = Instant::now();

        let result = match limit {
            Some(limit) => match timeout(limit, self.collector.collect(scope)).await {
                Ok(result) => result,
                Err(_) => {
                    scope.cancel();
                    Err(format!("collection did not finish within {:?}", limit).into())
                }
            },
            None => self.collector.collect(scope).await,
        };

        let elapsed = started.elapsed();

        match result {
            Ok(points) => {
                self.stats.record(true, points.len(), elapsed);
                debug!(monitor = %self.name, count = points.len(), duration = ?elapsed, "poll completed");
                for point in points {
                    pipeline.push(point);
                }
            }
            Err(e) => {
                self.stats.record(false, 0, elapsed);
                error!(monitor = %self.name, error = %e, "collection failed");
            }
        }
    }

    /// Re-reads the configuration and applies the hot-reloadable settings
    async fn reload_config(&self, ticker: &mut Interval) {
        let Some(source) = &self.config_source else {
            warn!(monitor = %self.name, "reload requested but no configuration source is set, ignoring");
            return;
        };

        let next = match source.load().await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    monitor = %self.name,
                    source = %source.describe(),
                    error = %e,
                    "configuration reload failed, keeping current settings"
                );
                return;
            }
        };

        let current = self.config();

        if next.global.poll_interval != current.global.poll_interval {
            *ticker = poll_ticker(next.global.poll_interval);
            info!(
                monitor = %self.name,
                from = ?current.global.poll_interval,
                to = ?next.global.poll_interval,
                "poll interval updated"
            );
        }

        if next.global.log_level != current.global.log_level {
            match &self.log_handle {
                Some(handle) => match handle.set_level(next.global.log_level) {
                    Ok(()) => info!(monitor = %self.name, level = %next.global.log_level, "log level updated"),
                    Err(e) => warn!(monitor = %self.name, error = %e, "failed to update log level"),
                },
                None => debug!(monitor = %self.name, "no log handle, log level change ignored"),
            }
        }

        if needs_restart(&current, &next) {
            warn!(
                monitor = %self.name,
                "batching, retry or MongoDB settings changed; restart to apply them"
            );
        }

        let mut applied = current;
        applied.global.poll_interval = next.global.poll_interval;
        applied.global.log_level = next.global.log_level;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = applied;
        info!(monitor = %self.name, source = %source.describe(), "configuration reloaded");
    }
}

/// Ticker for the poll loop; the first tick is one period away
fn poll_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Whether settings outside the hot-reloadable set differ
fn needs_restart(current: &MonitorConfig, next: &MonitorConfig) -> bool {
    let (a, b) = (&current.global, &next.global);
    a.batch_size != b.batch_size
        || a.flush_interval != b.flush_interval
        || a.retry_attempts != b.retry_attempts
        || a.retry_delay != b.retry_delay
        || a.shutdown_timeout != b.shutdown_timeout
        || current.mongodb != next.mongodb
}
