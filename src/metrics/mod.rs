// Host metrics - built-in sources and the collector that polls them
//
// Each source reads one aspect of the host (memory, load, disks, containers)
// and returns data points tagged with the node identifier. `SystemCollector`
// bundles a set of sources into a single `Collector` for the monitor.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::collector::Collector;
use crate::error::BoxError;
use crate::point::DataPoint;

pub mod disk;
pub mod docker;
pub mod load_average;
pub mod memory;

pub use disk::DiskSource;
pub use docker::DockerSource;
pub use load_average::LoadAverageSource;
pub use memory::MemorySource;

/// One kind of host measurement
///
/// # Design Philosophy
/// - **Async-first**: reading the host never blocks the runtime for long
/// - **Point-oriented**: sources emit data points, delivery happens elsewhere
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Short identifier used in logs, e.g. "memory"
    fn name(&self) -> &str;

    /// Reads the current values
    ///
    /// # Arguments
    /// * `node_id` - Node identifier attached to every point as the `node` tag
    async fn collect(&self, node_id: &str) -> Result<Vec<DataPoint>, BoxError>;
}

/// Instantiates every built-in source
///
/// Docker is optional: when disabled, or when the daemon cannot be reached,
/// the remaining sources still run.
pub fn create_all_sources(include_docker: bool) -> Vec<Box<dyn MetricSource>> {
    let mut sources: Vec<Box<dyn MetricSource>> = vec![
        Box::new(LoadAverageSource::new()),
        Box::new(MemorySource::new()),
        Box::new(DiskSource::new()),
    ];

    if include_docker {
        match DockerSource::connect() {
            Ok(docker) => sources.push(Box::new(docker)),
            Err(e) => warn!(error = %e, "docker unavailable, container metrics disabled"),
        }
    }

    sources
}

/// Collector polling a fixed set of host metric sources
pub struct SystemCollector {
    node_id: String,
    sources: Vec<Box<dyn MetricSource>>,
}

impl SystemCollector {
    pub fn new(node_id: impl Into<String>, sources: Vec<Box<dyn MetricSource>>) -> Self {
        SystemCollector {
            node_id: node_id.into(),
            sources,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl Collector for SystemCollector {
    /// Runs every source in turn
    ///
    /// A failing source is logged and skipped; the poll only fails when every
    /// source failed, or when `scope` is cancelled mid-way.
    async fn collect(&self, scope: &CancellationToken) -> Result<Vec<DataPoint>, BoxError> {
        let mut points = Vec::new();
        let mut failures = 0;
        let mut last_error = None;

        for source in &self.sources {
            let result = tokio::select! {
                biased;
                _ = scope.cancelled() => return Err("host collection cancelled".into()),
                result = source.collect(&self.node_id) => result,
            };

            match result {
                Ok(mut collected) => {
                    debug!(source = source.name(), count = collected.len(), "source collected");
                    points.append(&mut collected);
                }
                Err(e) => {
                    error!(source = source.name(), error = %e, "failed to collect metric source");
                    if source.name() == docker::SOURCE_NAME {
                        warn!(
                            "Docker may not be running or accessible. \
                             Ensure Docker daemon is running and this process has permission \
                             to access the Docker socket."
                        );
                    }
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if failures == self.sources.len() => Err(e),
            _ => Ok(points),
        }
    }
}

/// Share of `total` taken by `used`, in percent (0.0 - 100.0)
pub(crate) fn percentage(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64) * 100.0
    }
}
