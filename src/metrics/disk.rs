// Disk space metric source
//
// Collects disk usage for every mounted filesystem, one point per mount

use async_trait::async_trait;
use sysinfo::Disks;
use tracing::debug;

use super::{percentage, MetricSource};
use crate::error::BoxError;
use crate::point::DataPoint;

/// Disk space metric source
///
/// Each mounted filesystem becomes a `disk` point tagged with its mount
/// point and filesystem type.
///
/// # Platform Support
/// - Linux: Full support via statvfs
/// - macOS: Full support
/// - Windows: Full support (drive letters)
pub struct DiskSource;

impl DiskSource {
    pub fn new() -> Self {
        DiskSource
    }

    /// Converts bytes to gigabytes
    fn bytes_to_gb(bytes: u64) -> f64 {
        bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }

    fn disk_point(
        node_id: &str,
        mount_point: &str,
        filesystem: &str,
        total_space: u64,
        available_space: u64,
    ) -> DataPoint {
        let used_space = total_space.saturating_sub(available_space);

        DataPoint::new("disk")
            .tag("node", node_id)
            .tag("mount_point", mount_point)
            .tag("filesystem", filesystem)
            .field("total_gb", Self::bytes_to_gb(total_space))
            .field("used_gb", Self::bytes_to_gb(used_space))
            // May be less than total - used because of reserved blocks
            .field("available_gb", Self::bytes_to_gb(available_space))
            .field("used_percent", percentage(used_space, total_space))
    }
}

#[async_trait]
impl MetricSource for DiskSource {
    fn name(&self) -> &str {
        "disk"
    }

    async fn collect(&self, node_id: &str) -> Result<Vec<DataPoint>, BoxError> {
        debug!("Collecting disk space metrics");

        let disks = Disks::new_with_refreshed_list();

        let points: Vec<DataPoint> = disks
            .list()
            .iter()
            .map(|disk| {
                let mount_point = disk.mount_point().to_string_lossy();
                let filesystem = disk.file_system().to_string_lossy();
                debug!(
                    "Disk {}: {:.1} GB available of {:.1} GB",
                    mount_point,
                    Self::bytes_to_gb(disk.available_space()),
                    Self::bytes_to_gb(disk.total_space())
                );
                Self::disk_point(
                    node_id,
                    &mount_point,
                    &filesystem,
                    disk.total_space(),
                    disk.available_space(),
                )
            })
            .collect();

        debug!("Collected information for {} disk(s)", points.len());
        Ok(points)
    }
}

impl Default for DiskSource {
    fn default() -> Self {
        Self::new()
    }
}
