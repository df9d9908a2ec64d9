// Fan-out backend - presents several backends as one

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::Backend;
use crate::error::BoxError;
use crate::point::DataPoint;

/// Writes every batch to all wrapped backends
///
/// Initialization stops at the first failure. Writes and closes are attempted
/// on every member and report the last error seen.
pub struct MultiBackend {
    name: String,
    backends: Vec<Arc<dyn Backend>>,
}

impl MultiBackend {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        MultiBackend {
            name: "multi".to_string(),
            backends,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[async_trait]
impl Backend for MultiBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, scope: &CancellationToken) -> Result<(), BoxError> {
        for backend in &self.backends {
            backend.initialize(scope).await?;
        }
        Ok(())
    }

    async fn write(&self, scope: &CancellationToken, batch: &[DataPoint]) -> Result<(), BoxError> {
        let mut last_error = None;
        for backend in &self.backends {
            if let Err(e) = backend.write(scope, batch).await {
                last_error = Some(e);
            }
        }
        last_error.map_or(Ok(()), Err)
    }

    async fn close(&self) -> Result<(), BoxError> {
        let mut last_error = None;
        for backend in &self.backends {
            if let Err(e) = backend.close().await {
                last_error = Some(e);
            }
        }
        last_error.map_or(Ok(()), Err)
    }

    fn is_healthy(&self) -> bool {
        self.backends.iter().all(|b| b.is_healthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    fn members(mocks: &[Arc<MockBackend>]) -> Vec<Arc<dyn Backend>> {
        mocks
            .iter()
            .map(|m| Arc::clone(m) as Arc<dyn Backend>)
            .collect()
    }

    #[tokio::test]
    async fn test_write_reaches_all_members_and_keeps_last_error() {
        let failing = Arc::new(MockBackend::new("a").failing_writes(usize::MAX));
        let ok = Arc::new(MockBackend::new("b"));
        let multi = MultiBackend::new(members(&[failing.clone(), ok.clone()]));
        let scope = CancellationToken::new();

        let batch = vec![DataPoint::new("cpu").field("v", 1i64)];
        assert!(multi.write(&scope, &batch).await.is_err());
        assert_eq!(failing.write_calls(), 1);
        assert_eq!(ok.write_calls(), 1);
    }

    #[tokio::test]
    async fn test_initialize_stops_at_first_failure() {
        let failing = Arc::new(MockBackend::new("a").failing_init());
        let later = Arc::new(MockBackend::new("b"));
        let multi = MultiBackend::new(members(&[failing, later.clone()]));

        assert!(multi.initialize(&CancellationToken::new()).await.is_err());
        assert!(!later.initialized());
    }

    #[tokio::test]
    async fn test_health_requires_every_member() {
        let healthy = Arc::new(MockBackend::new("a"));
        let sick = Arc::new(MockBackend::new("b").unhealthy());
        let multi = MultiBackend::new(members(&[healthy.clone(), sick])).with_name("pair");

        assert_eq!(multi.name(), "pair");
        assert_eq!(multi.len(), 2);
        assert!(!multi.is_healthy());
        assert!(MultiBackend::new(members(&[healthy])).is_healthy());
    }

    #[tokio::test]
    async fn test_close_attempts_every_member() {
        let failing = Arc::new(MockBackend::new("a").failing_close());
        let ok = Arc::new(MockBackend::new("b"));
        let multi = MultiBackend::new(members(&[failing.clone(), ok.clone()]));

        assert!(multi.close().await.is_err());
        assert!(failing.closed());
        assert!(ok.closed());
    }
}
