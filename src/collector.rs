// Collector contract - the user-supplied routine invoked once per poll

use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::BoxError;
use crate::point::DataPoint;

/// Produces the data points for one poll
///
/// Called repeatedly by the monitor. Long-running collection should watch
/// `scope` and return early once it is cancelled.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self, scope: &CancellationToken) -> Result<Vec<DataPoint>, BoxError>;
}

/// Adapter turning an async closure into a [`Collector`]
pub struct FnCollector<F> {
    f: F,
}

/// Wraps a closure as a collector
///
/// # Example
/// ```
/// use metrics_runtime::{collector_fn, BoxError, DataPoint};
///
/// let collector = collector_fn(|_scope| async {
///     Ok::<_, BoxError>(vec![DataPoint::new("up").field("value", 1i64)])
/// });
/// # let _ = collector;
/// ```
pub fn collector_fn<F, Fut>(f: F) -> FnCollector<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<DataPoint>, BoxError>> + Send + 'static,
{
    FnCollector { f }
}

#[async_trait]
impl<F, Fut> Collector for FnCollector<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<DataPoint>, BoxError>> + Send + 'static,
{
    async fn collect(&self, scope: &CancellationToken) -> Result<Vec<DataPoint>, BoxError> {
        (self.f)(scope.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closure_receives_scope() {
        let collector = collector_fn(|scope: CancellationToken| async move {
            if scope.is_cancelled() {
                return Err::<Vec<DataPoint>, BoxError>("cancelled".into());
            }
            Ok(vec![DataPoint::new("up").field("value", 1i64)])
        });

        let scope = CancellationToken::new();
        assert_eq!(collector.collect(&scope).await.unwrap().len(), 1);

        scope.cancel();
        assert!(collector.collect(&scope).await.is_err());
    }
}
