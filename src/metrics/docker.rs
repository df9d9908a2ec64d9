// Docker stats metric source
//
// Collects resource usage for every running Docker container, one point per
// container, focused on CPU and memory consumption

use async_trait::async_trait;
use bollard::container::{Stats, StatsOptions};
use bollard::Docker;
use futures_util::stream::StreamExt;
use tracing::{debug, warn};

use super::{percentage, MetricSource};
use crate::error::BoxError;
use crate::point::DataPoint;

pub(crate) const SOURCE_NAME: &str = "docker";

/// Docker container stats source
///
/// For each running container:
/// - CPU usage percentage
/// - Memory usage (current, limit, percentage)
/// - Network I/O (bytes sent/received)
/// - Block I/O (bytes read/written)
///
/// # Requirements
/// - Docker daemon must be running
/// - The process must have permission to access the Docker socket
/// - Default socket: unix:///var/run/docker.sock (Linux/macOS)
/// - Default socket: npipe:////./pipe/docker_engine (Windows)
pub struct DockerSource {
    docker: Docker,
}

impl DockerSource {
    /// Connects to the Docker daemon
    ///
    /// Tries the default socket first, then falls back to the environment
    /// (DOCKER_HOST, DOCKER_CERT_PATH, DOCKER_TLS_VERIFY).
    pub fn connect() -> Result<Self, bollard::errors::Error> {
        let docker = match Docker::connect_with_socket_defaults() {
            Ok(docker) => docker,
            Err(_) => Docker::connect_with_local_defaults()?,
        };
        Ok(DockerSource { docker })
    }

    fn bytes_to_mb(bytes: u64) -> f64 {
        bytes as f64 / (1024.0 * 1024.0)
    }

    /// Calculates CPU usage percentage from Docker stats
    ///
    /// Docker reports cumulative CPU time, so usage is derived from the delta
    /// against the previous sample.
    ///
    /// # Formula
    /// cpu_percent = (cpu_delta / system_cpu_delta) * num_cpus * 100.0
    fn calculate_cpu_percent(stats: &Stats) -> f64 {
        let cpu_total = stats.cpu_stats.cpu_usage.total_usage as f64;
        let precpu_total = stats.precpu_stats.cpu_usage.total_usage as f64;

        let system_cpu = stats.cpu_stats.system_cpu_usage.unwrap_or(0) as f64;
        let presystem_cpu = stats.precpu_stats.system_cpu_usage.unwrap_or(0) as f64;

        let cpu_delta = cpu_total - precpu_total;
        let system_delta = system_cpu - presystem_cpu;

        if system_delta <= 0.0 || cpu_delta <= 0.0 {
            return 0.0;
        }

        let num_cpus = stats
            .cpu_stats
            .online_cpus
            .unwrap_or_else(|| num_cpus::get() as u64) as f64;

        (cpu_delta / system_delta) * num_cpus * 100.0
    }

    fn container_point(node_id: &str, container_id: &str, container_name: &str, stats: &Stats) -> DataPoint {
        let cpu_percent = Self::calculate_cpu_percent(stats);

        let memory_used = stats.memory_stats.usage.unwrap_or(0);
        let memory_limit = stats.memory_stats.limit.unwrap_or(0);

        // Summed over all interfaces
        let (network_rx, network_tx) = stats
            .networks
            .as_ref()
            .map(|networks| {
                networks
                    .values()
                    .fold((0u64, 0u64), |(rx, tx), net| (rx + net.rx_bytes, tx + net.tx_bytes))
            })
            .unwrap_or((0, 0));

        let (block_read, block_write) = stats
            .blkio_stats
            .io_service_bytes_recursive
            .as_ref()
            .map(|io_stats| {
                io_stats.iter().fold((0u64, 0u64), |(read, write), stat| {
                    match stat.op.as_str() {
                        "read" | "Read" => (read + stat.value, write),
                        "write" | "Write" => (read, write + stat.value),
                        _ => (read, write),
                    }
                })
            })
            .unwrap_or((0, 0));

        debug!(
            "Container {}: CPU={:.1}%, Mem={:.1}/{:.1}MB",
            container_name,
            cpu_percent,
            Self::bytes_to_mb(memory_used),
            Self::bytes_to_mb(memory_limit)
        );

        DataPoint::new("docker_container")
            .tag("node", node_id)
            .tag("container_id", short_id(container_id))
            .tag("container_name", container_name)
            .field("cpu_percent", cpu_percent)
            .field("memory_used_mb", Self::bytes_to_mb(memory_used))
            .field("memory_limit_mb", Self::bytes_to_mb(memory_limit))
            .field("memory_percent", percentage(memory_used, memory_limit))
            .field("network_rx_mb", Self::bytes_to_mb(network_rx))
            .field("network_tx_mb", Self::bytes_to_mb(network_tx))
            .field("block_read_mb", Self::bytes_to_mb(block_read))
            .field("block_write_mb", Self::bytes_to_mb(block_write))
    }
}

/// Short container id as shown by `docker ps`
fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

#[async_trait]
impl MetricSource for DockerSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    /// Collects a stats snapshot for every running container
    ///
    /// # Errors
    /// Fails when containers cannot be listed (daemon down, permission
    /// denied). A container whose stats cannot be read is skipped.
    async fn collect(&self, node_id: &str) -> Result<Vec<DataPoint>, BoxError> {
        debug!("Collecting Docker container statistics");

        let containers = self.docker.list_containers::<String>(None).await?;
        debug!("Found {} running container(s)", containers.len());

        let mut points = Vec::with_capacity(containers.len());

        for container in containers {
            let container_id = container.id.unwrap_or_default();
            let container_name = container
                .names
                .and_then(|names| names.first().map(|n| n.trim_start_matches('/').to_string()))
                .unwrap_or_else(|| "unknown".to_string());

            // One snapshot, not a continuous stream
            let options = StatsOptions {
                stream: false,
                ..Default::default()
            };
            let mut stats_stream = self.docker.stats(&container_id, Some(options));

            match stats_stream.next().await {
                Some(Ok(stats)) => {
                    points.push(Self::container_point(
                        node_id,
                        &container_id,
                        &container_name,
                        &stats,
                    ));
                }
                Some(Err(e)) => {
                    warn!("Failed to get stats for container {}: {}", container_name, e);
                }
                None => {
                    warn!("No stats returned for container {}", container_name);
                }
            }
        }

        debug!("Collected stats for {} container(s)", points.len());
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef0123"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id(""), "");
    }

    #[test]
    fn test_bytes_to_mb() {
        assert_eq!(DockerSource::bytes_to_mb(512 * 1024 * 1024), 512.0);
    }
}
