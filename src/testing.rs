// Test doubles shared by the unit tests

use async_trait::async_trait;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::error::BoxError;
use crate::point::DataPoint;

/// Scriptable backend that records every call
pub(crate) struct MockBackend {
    name: String,
    healthy: AtomicBool,
    failures_left: AtomicUsize,
    fail_init: bool,
    fail_close: bool,
    hang_close: bool,
    gate: Option<Arc<Notify>>,
    writes_after_close: AtomicUsize,
    initialized: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    batches: Mutex<Vec<Vec<DataPoint>>>,
    write_times: Mutex<Vec<Instant>>,
}

impl MockBackend {
    pub(crate) fn new(name: &str) -> Self {
        MockBackend {
            name: name.to_string(),
            healthy: AtomicBool::new(true),
            failures_left: AtomicUsize::new(0),
            fail_init: false,
            fail_close: false,
            hang_close: false,
            gate: None,
            writes_after_close: AtomicUsize::new(0),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
            write_times: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn unhealthy(self) -> Self {
        self.healthy.store(false, Ordering::SeqCst);
        self
    }

    /// The first `n` writes fail; `usize::MAX` fails forever
    pub(crate) fn failing_writes(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub(crate) fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub(crate) fn hanging_close(mut self) -> Self {
        self.hang_close = true;
        self
    }

    /// Every write blocks until `gate` hands out a permit
    pub(crate) fn gated_writes(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn as_backend(self: &Arc<Self>) -> Arc<dyn Backend> {
        Arc::clone(self) as Arc<dyn Backend>
    }

    pub(crate) fn write_calls(&self) -> usize {
        self.write_times.lock().unwrap().len()
    }

    pub(crate) fn write_times(&self) -> Vec<Instant> {
        self.write_times.lock().unwrap().clone()
    }

    /// Batches from writes that succeeded
    pub(crate) fn batches(&self) -> Vec<Vec<DataPoint>> {
        self.batches.lock().unwrap().clone()
    }

    pub(crate) fn initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Writes that completed after `close` had already been called
    pub(crate) fn writes_after_close(&self) -> usize {
        self.writes_after_close.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, _scope: &CancellationToken) -> Result<(), BoxError> {
        if self.fail_init {
            return Err(format!("{}: connection refused", self.name).into());
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&self, _scope: &CancellationToken, batch: &[DataPoint]) -> Result<(), BoxError> {
        self.write_times.lock().unwrap().push(Instant::now());

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.closed.load(Ordering::SeqCst) {
            self.writes_after_close.fetch_add(1, Ordering::SeqCst);
        }

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok();

        if failed {
            return Err(format!("{}: transient write error", self.name).into());
        }

        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.healthy.store(false, Ordering::SeqCst);

        if self.hang_close {
            std::future::pending::<()>().await;
        }
        if self.fail_close {
            return Err(format!("{}: close failed", self.name).into());
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Cloneable in-memory writer
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
