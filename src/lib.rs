// Metrics Runtime - a runtime for monitoring daemons
//
// Repeatedly invokes a collector, batches the resulting data points and
// delivers the batches to one or more backends, with periodic polling,
// graceful shutdown and live configuration reload.
//
// # Modules
// - point: the DataPoint record and its line protocol encoding
// - pipeline: buffering, batching and retrying delivery to backends
// - monitor: the poll loop and lifecycle state machine
// - backend: the Backend trait plus echo, fan-out and MongoDB backends
// - metrics: built-in host metric sources (memory, load, disk, docker)

pub mod backend;
pub mod collector;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod pipeline;
pub mod point;
pub mod signal;
pub mod stats;

#[cfg(test)]
mod testing;

pub use backend::{Backend, EchoBackend, EchoFormat, MongoBackend, MultiBackend};
pub use collector::{collector_fn, Collector, FnCollector};
pub use config::{
    ConfigError, ConfigSource, FileConfigSource, GlobalConfig, MongoConfig, MongoConfigSource,
    MonitorConfig,
};
pub use error::{BoxError, MonitorError, PipelineError};
pub use logging::{init_logging, LogHandle, LogLevel, LoggingError};
pub use metrics::{create_all_sources, MetricSource, SystemCollector};
pub use monitor::{Monitor, MonitorBuilder, RuntimeState};
pub use pipeline::{DeliveryPipeline, PipelineConfig};
pub use point::{DataPoint, FieldValue, ValidationError};
pub use signal::{spawn_signal_handler, ReloadHandle};
pub use stats::{PollStats, StatsTracker};
