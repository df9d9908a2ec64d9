// Backend module - the delivery capability every target implements
//
// The pipeline only ever talks to `dyn Backend`. Concrete targets (a debug sink,
// a fan-out composite, a document store) live in the submodules; external
// adapters implement the same trait.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::BoxError;
use crate::point::DataPoint;

pub mod echo;
pub mod mongo;
pub mod multi;

pub use echo::{EchoBackend, EchoFormat};
pub use mongo::MongoBackend;
pub use multi::MultiBackend;

/// Delivery target for batches of data points
///
/// # Contract
/// - `initialize` is called once, before any `write`
/// - `write` may run concurrently with `is_healthy`
/// - `close` is called at most once; `is_healthy` returns false afterwards
/// - the pipeline may retry a failed `write` with the same batch, so
///   delivery is at-least-once
#[async_trait]
pub trait Backend: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Sets up connections; a failure aborts pipeline start
    async fn initialize(&self, scope: &CancellationToken) -> Result<(), BoxError>;

    /// Delivers one batch
    async fn write(&self, scope: &CancellationToken, batch: &[DataPoint]) -> Result<(), BoxError>;

    /// Releases resources
    async fn close(&self) -> Result<(), BoxError>;

    /// Returns false when writes should be skipped
    fn is_healthy(&self) -> bool;
}
