//! Background task helpers.

use std::{
    any::Any,
    future::{pending, Future},
    panic::AssertUnwindSafe,
    pin::Pin,
};

use futures::FutureExt as _;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{error, info_span, Instrument as _};

/// A shutdown signal for a background task.
///
/// Resolves once the paired [`ShutdownHandle`] is triggered or dropped.
pub struct ProcessShutdown {
    shutdown: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
}

/// A handle to trigger shutdown of a background task.
pub struct ShutdownHandle {
    shutdown_tx: oneshot::Sender<()>,
}

impl ProcessShutdown {
    /// Creates a new `ProcessShutdown` and `ShutdownHandle` pair.
    ///
    /// When `ShutdownHandle` is triggered, or dropped, `ProcessShutdown` will resolve.
    pub fn paired() -> (Self, ShutdownHandle) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = ShutdownHandle { shutdown_tx };

        let process_shutdown = Self {
            shutdown: Some(Box::pin(async move {
                let _ = shutdown_rx.await;
            })),
        };

        (process_shutdown, handle)
    }

    /// Creates a new `ProcessShutdown` that never resolves.
    pub fn noop() -> Self {
        Self {
            shutdown: Some(Box::pin(pending())),
        }
    }

    /// Waits for the shutdown signal to be received.
    ///
    /// Returns immediately if the signal was already received by an earlier call.
    pub async fn wait_for_shutdown(&mut self) {
        if let Some(shutdown_rx) = self.shutdown.take() {
            shutdown_rx.await;
        }
    }
}

impl ShutdownHandle {
    /// Triggers shutdown.
    pub fn trigger(self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Spawns a named task whose panics are caught and logged instead of being propagated.
///
/// The task runs within a `tracing` span carrying its name. A panicking task simply ends: the returned handle
/// resolves successfully and the rest of the process keeps running.
pub fn spawn_guarded<F>(name: &'static str, future: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let span = info_span!("task", task_name = name);
    tokio::spawn(
        async move {
            if let Err(panic) = AssertUnwindSafe(future).catch_unwind().await {
                error!(
                    task_name = name,
                    reason = panic_reason(panic.as_ref()),
                    "Task panicked. Continuing without it."
                );
            }
        }
        .instrument(span),
    )
}

fn panic_reason(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown"
    }
}
