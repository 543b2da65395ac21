//! Process-wide runtime that executes every request.
//!
//! The runtime is created on first use and lives until [`shutdown`]. Requests
//! still pending when it is shut down fail with `HttpError::ServiceClosed`.
//! A later [`handle`] call starts a fresh runtime.

use std::num::NonZeroUsize;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::HttpError;

const THREAD_NAME: &str = "relay-http-worker";

/// How long [`shutdown`] waits for workers outside an async context
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

static POOL: Mutex<Option<Runtime>> = Mutex::new(None);

/// Handle to the worker pool, starting it if needed.
///
/// # Errors
/// Returns `HttpError::Config` if the runtime cannot be started (for example
/// when the OS refuses to spawn threads).
pub fn handle() -> Result<Handle, HttpError> {
    let mut pool = POOL.lock();
    if let Some(runtime) = pool.as_ref() {
        return Ok(runtime.handle().clone());
    }

    let workers = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
    let runtime = Builder::new_multi_thread()
        .worker_threads(workers)
        .thread_name(THREAD_NAME)
        .enable_all()
        .build()
        .map_err(|e| HttpError::Config(format!("failed to start worker pool: {e}")))?;
    tracing::debug!(workers, "worker pool started");

    let handle = runtime.handle().clone();
    *pool = Some(runtime);
    Ok(handle)
}

/// Whether the pool is currently running
#[must_use]
pub fn is_running() -> bool {
    POOL.lock().is_some()
}

/// Stop the worker pool.
///
/// Outside an async context this joins the workers (bounded by a timeout).
/// Inside one, blocking is not allowed, so the runtime is shut down in the
/// background instead. Does nothing when the pool is not running.
pub fn shutdown() {
    let Some(runtime) = POOL.lock().take() else {
        return;
    };
    if Handle::try_current().is_ok() {
        tracing::debug!("worker pool shutting down in background");
        runtime.shutdown_background();
    } else {
        tracing::debug!("worker pool shutting down");
        runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    }
}
