// Process signal handling - maps OS signals onto shutdown and reload requests
//
// SIGTERM / SIGINT cancel the monitor's token, SIGHUP requests a configuration
// reload. On non-unix platforms only Ctrl-C is watched.

use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Requests a configuration reload from a running monitor
///
/// Requests that arrive while one is already pending collapse into a single
/// reload.
#[derive(Debug, Clone, Default)]
pub struct ReloadHandle {
    notify: Arc<Notify>,
}

impl ReloadHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the monitor to reload its configuration
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    /// Resolves once a reload has been requested
    pub(crate) async fn requested(&self) {
        self.notify.notified().await;
    }
}

/// Spawns the task translating OS signals into monitor requests
///
/// The task ends after a termination signal, or as soon as `cancel` is
/// cancelled by anyone else.
///
/// # Arguments
/// * `cancel` - Token cancelled on SIGTERM / SIGINT
/// * `reload` - Handle triggered on SIGHUP
pub fn spawn_signal_handler(cancel: CancellationToken, reload: ReloadHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        watch_unix(cancel, reload).await;

        #[cfg(not(unix))]
        {
            drop(reload);
            watch_ctrl_c(cancel).await;
        }
    })
}

#[cfg(unix)]
async fn watch_unix(cancel: CancellationToken, reload: ReloadHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let streams = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::hangup()),
    );

    let (mut terminate, mut interrupt, mut hangup) = match streams {
        (Ok(terminate), Ok(interrupt), Ok(hangup)) => (terminate, interrupt, hangup),
        (terminate, interrupt, hangup) => {
            for e in [terminate.err(), interrupt.err(), hangup.err()].into_iter().flatten() {
                error!(error = %e, "failed to install signal handler");
            }
            cancel.cancelled().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = terminate.recv() => {
                info!("received SIGTERM, shutting down");
                cancel.cancel();
                break;
            }
            _ = interrupt.recv() => {
                info!("received SIGINT, shutting down");
                cancel.cancel();
                break;
            }
            _ = hangup.recv() => {
                info!("received SIGHUP, reloading configuration");
                reload.trigger();
            }
        }
    }
}

#[cfg(not(unix))]
async fn watch_ctrl_c(cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => {
                info!("received Ctrl-C, shutting down");
                cancel.cancel();
            }
            Err(e) => {
                error!(error = %e, "failed to listen for Ctrl-C");
                cancel.cancelled().await;
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_reload_requests_coalesce() {
        let handle = ReloadHandle::new();
        handle.trigger();
        handle.clone().trigger();

        timeout(Duration::from_millis(100), handle.requested())
            .await
            .expect("pending reload should be observed");

        // Both triggers arrived before anyone waited, so only one reload is pending
        assert!(timeout(Duration::from_millis(50), handle.requested())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_handler_exits_on_cancel() {
        let cancel = CancellationToken::new();
        let task = spawn_signal_handler(cancel.clone(), ReloadHandle::new());

        cancel.cancel();
        timeout(Duration::from_secs(1), task)
            .await
            .expect("handler should stop")
            .unwrap();
    }
}
