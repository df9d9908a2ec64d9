// Echo backend - writes every data point to a text sink
//
// Used for debugging and for `--echo` mode: each point becomes one line,
// either in line protocol or as a JSON object.

use async_trait::async_trait;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Backend;
use crate::error::BoxError;
use crate::point::DataPoint;

/// Output format for echoed points
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EchoFormat {
    #[default]
    LineProtocol,
    Json,
}

/// Debug backend that prints points to any writer
pub struct EchoBackend {
    writer: Mutex<Box<dyn Write + Send>>,
    format: EchoFormat,
    healthy: AtomicBool,
}

impl EchoBackend {
    /// Creates an echo backend writing line protocol to `writer`
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        EchoBackend {
            writer: Mutex::new(Box::new(writer)),
            format: EchoFormat::LineProtocol,
            healthy: AtomicBool::new(true),
        }
    }

    /// Creates an echo backend on stdout
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn with_format(mut self, format: EchoFormat) -> Self {
        self.format = format;
        self
    }

    fn render(&self, point: &DataPoint) -> Result<String, BoxError> {
        match self.format {
            EchoFormat::LineProtocol => Ok(point.to_line_protocol()),
            EchoFormat::Json => Ok(serde_json::to_string(point)?),
        }
    }
}

#[async_trait]
impl Backend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    async fn initialize(&self, _scope: &CancellationToken) -> Result<(), BoxError> {
        self.healthy.store(true, Ordering::SeqCst);
        info!("echo backend initialized");
        Ok(())
    }

    async fn write(&self, _scope: &CancellationToken, batch: &[DataPoint]) -> Result<(), BoxError> {
        let lines = batch
            .iter()
            .map(|point| self.render(point))
            .collect::<Result<Vec<_>, _>>()?;

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        for line in &lines {
            writeln!(writer, "{}", line)?;
        }
        writer.flush()?;

        debug!(count = batch.len(), "echoed data points");
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.healthy.store(false, Ordering::SeqCst);
        info!("echo backend closed");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
