//! Deadlines for backend calls.
//!
//! Backend traits are blocking and offer no cancellation, so a call with a deadline runs on a
//! worker thread and the caller stops waiting once the deadline passes. The worker is left to
//! finish on its own and its result is discarded. A write abandoned this way may still land;
//! reconciliation collects any blob it leaves behind.
//!
//! Each call gets its own thread. At most [`MAX_LIVE_WORKERS`] of them may be alive across the
//! process, counting workers still stuck on a stalled backend after their caller gave up. Past
//! that cap a call is refused up front as `Unavailable` without touching the backend.

use crate::error::{BackendError, BackendResult, StudyError};
use crate::stores::{BlobStore, MetadataStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Process-wide cap on live deadline workers.
pub(crate) const MAX_LIVE_WORKERS: usize = 64;

static SHARED_WORKERS: OnceLock<Arc<WorkerLimit>> = OnceLock::new();

/// Counts live worker threads against a fixed cap.
#[derive(Debug)]
pub(crate) struct WorkerLimit {
    live: AtomicUsize,
    max: usize,
}

impl WorkerLimit {
    pub(crate) fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            live: AtomicUsize::new(0),
            max,
        })
    }

    /// The limit shared by every store wrapper in the process.
    pub(crate) fn shared() -> Arc<Self> {
        Arc::clone(SHARED_WORKERS.get_or_init(|| Self::new(MAX_LIVE_WORKERS)))
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    fn acquire(self: &Arc<Self>) -> Option<WorkerSlot> {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.max).then_some(live + 1)
            })
            .ok()
            .map(|_| WorkerSlot(Arc::clone(self)))
    }
}

/// Held by a worker thread until it finishes, panics included.
struct WorkerSlot(Arc<WorkerLimit>);

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
pub(crate) enum CallFailure {
    TimedOut {
        operation: &'static str,
        after: Duration,
    },
    Backend(BackendError),
}

impl CallFailure {
    /// Converts into the operation's typed error; timeouts stay timeouts.
    pub(crate) fn into_study_error(self, map: impl FnOnce(BackendError) -> StudyError) -> StudyError {
        match self {
            CallFailure::TimedOut { operation, after } => StudyError::Timeout { operation, after },
            CallFailure::Backend(err) => map(err),
        }
    }
}

/// Runs `call`, giving up after `timeout`. `None` runs it inline with no deadline.
pub(crate) fn call_with_timeout<T, F>(
    operation: &'static str,
    timeout: Option<Duration>,
    workers: &Arc<WorkerLimit>,
    call: F,
) -> Result<T, CallFailure>
where
    T: Send + 'static,
    F: FnOnce() -> BackendResult<T> + Send + 'static,
{
    let Some(timeout) = timeout else {
        return call().map_err(CallFailure::Backend);
    };

    let Some(slot) = workers.acquire() else {
        tracing::warn!(operation, live = workers.live(), "too many backend calls still running");
        return Err(CallFailure::Backend(BackendError::Unavailable(format!(
            "cannot start {operation}: too many backend calls still running"
        ))));
    };

    let (tx, rx) = mpsc::sync_channel(1);
    std::thread::Builder::new()
        .name(format!("study-{}", operation.replace(' ', "-")))
        .spawn(move || {
            let _slot = slot;
            // The receiver is gone once the caller has timed out.
            let _ = tx.send(call());
        })
        .map_err(|e| {
            CallFailure::Backend(BackendError::Unavailable(format!(
                "cannot start {operation}: {e}"
            )))
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result.map_err(CallFailure::Backend),
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(operation, timeout_ms = timeout.as_millis() as u64, "backend call timed out");
            Err(CallFailure::TimedOut {
                operation,
                after: timeout,
            })
        }
        Err(RecvTimeoutError::Disconnected) => Err(CallFailure::Backend(BackendError::Unavailable(
            format!("{operation} aborted before returning"),
        ))),
    }
}

/// Both backends plus the deadline applied to each call made through them.
#[derive(Clone)]
pub(crate) struct GuardedStores {
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) metadata: Arc<dyn MetadataStore>,
    pub(crate) call_timeout: Option<Duration>,
    workers: Arc<WorkerLimit>,
}

impl GuardedStores {
    pub(crate) fn new(
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            blobs,
            metadata,
            call_timeout,
            workers: WorkerLimit::shared(),
        }
    }

    pub(crate) fn on_blobs<T, F>(&self, operation: &'static str, call: F) -> Result<T, CallFailure>
    where
        T: Send + 'static,
        F: FnOnce(&dyn BlobStore) -> BackendResult<T> + Send + 'static,
    {
        let blobs = Arc::clone(&self.blobs);
        call_with_timeout(operation, self.call_timeout, &self.workers, move || {
            call(blobs.as_ref())
        })
    }

    pub(crate) fn on_metadata<T, F>(
        &self,
        operation: &'static str,
        call: F,
    ) -> Result<T, CallFailure>
    where
        T: Send + 'static,
        F: FnOnce(&dyn MetadataStore) -> BackendResult<T> + Send + 'static,
    {
        let metadata = Arc::clone(&self.metadata);
        call_with_timeout(operation, self.call_timeout, &self.workers, move || {
            call(metadata.as_ref())
        })
    }
}
