// Load average metric source
//
// Collects system load average metrics (1min, 5min, 15min). These values
// indicate the average number of processes in the run queue or waiting for
// disk I/O over the given periods.

use async_trait::async_trait;
use sysinfo::System;
use tracing::debug;

use super::MetricSource;
use crate::error::BoxError;
use crate::point::DataPoint;

/// Load average metric source
///
/// # Interpretation
/// - Values below the number of CPU cores = system not overloaded
/// - Values above the number of CPU cores = system under high load
///
/// # Platform Support
/// - Linux: Full support via /proc/loadavg
/// - macOS: Full support via sysctl
/// - Windows: Not available (reports 0.0)
pub struct LoadAverageSource;

impl LoadAverageSource {
    pub fn new() -> Self {
        LoadAverageSource
    }
}

#[async_trait]
impl MetricSource for LoadAverageSource {
    fn name(&self) -> &str {
        "load_average"
    }

    async fn collect(&self, node_id: &str) -> Result<Vec<DataPoint>, BoxError> {
        debug!("Collecting load average metrics");

        let load_avg = System::load_average();
        let cpu_count = num_cpus::get();

        let point = DataPoint::new("load_average")
            .tag("node", node_id)
            .field("load_1min", load_avg.one)
            .field("load_5min", load_avg.five)
            .field("load_15min", load_avg.fifteen)
            // Context for judging whether the load is high
            .field("cpu_cores", cpu_count as i64);

        debug!(
            "Load average: 1min={:.2}, 5min={:.2}, 15min={:.2} (CPUs: {})",
            load_avg.one, load_avg.five, load_avg.fifteen, cpu_count
        );

        Ok(vec![point])
    }
}

impl Default for LoadAverageSource {
    fn default() -> Self {
        Self::new()
    }
}
