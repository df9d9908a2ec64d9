// Memory metric source
//
// Collects system memory usage metrics including RAM and swap

use async_trait::async_trait;
use sysinfo::System;
use tracing::debug;

use super::{percentage, MetricSource};
use crate::error::BoxError;
use crate::point::DataPoint;

/// Memory usage metric source
///
/// Emits one `memory` point per poll with:
/// - Total, used, available and free physical RAM
/// - Swap space (total, used, free)
/// - Usage percentages for both
///
/// # Platform Support
/// - Linux: Full support via /proc/meminfo
/// - macOS: Full support via vm_stat
/// - Windows: Full support via GlobalMemoryStatusEx
pub struct MemorySource;

impl MemorySource {
    pub fn new() -> Self {
        MemorySource
    }

    /// Converts bytes to megabytes for more readable storage
    fn bytes_to_mb(bytes: u64) -> i64 {
        (bytes / (1024 * 1024)) as i64
    }
}

#[async_trait]
impl MetricSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    /// Collects current memory usage
    ///
    /// # Point Layout
    /// ```text
    /// memory,node=1111-1111 available_mb=8192i,free_mb=4096i,swap_free_mb=7168i,
    ///     swap_total_mb=8192i,swap_used_mb=1024i,swap_used_percent=12.5,
    ///     total_mb=16384i,used_mb=8192i,used_percent=50 1705314600000000000
    /// ```
    async fn collect(&self, node_id: &str) -> Result<Vec<DataPoint>, BoxError> {
        debug!("Collecting memory metrics");

        // A fresh System per poll keeps the numbers current
        let mut sys = System::new();
        sys.refresh_memory();

        let total_memory = sys.total_memory();
        let used_memory = sys.used_memory();
        let total_swap = sys.total_swap();
        let used_swap = sys.used_swap();

        let used_percent = percentage(used_memory, total_memory);
        let swap_used_percent = percentage(used_swap, total_swap);

        let point = DataPoint::new("memory")
            .tag("node", node_id)
            .field("total_mb", Self::bytes_to_mb(total_memory))
            .field("used_mb", Self::bytes_to_mb(used_memory))
            // Includes reclaimable cache, so usually above free_mb on Linux
            .field("available_mb", Self::bytes_to_mb(sys.available_memory()))
            .field("free_mb", Self::bytes_to_mb(sys.free_memory()))
            .field("used_percent", used_percent)
            .field("swap_total_mb", Self::bytes_to_mb(total_swap))
            .field("swap_used_mb", Self::bytes_to_mb(used_swap))
            .field("swap_free_mb", Self::bytes_to_mb(sys.free_swap()))
            .field("swap_used_percent", swap_used_percent);

        debug!(
            "Memory: {}/{} MB ({:.1}%), Swap: {}/{} MB ({:.1}%)",
            Self::bytes_to_mb(used_memory),
            Self::bytes_to_mb(total_memory),
            used_percent,
            Self::bytes_to_mb(used_swap),
            Self::bytes_to_mb(total_swap),
            swap_used_percent
        );

        Ok(vec![point])
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}
