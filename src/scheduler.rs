//! Lifecycle scheduler
//!
//! Serializes open/close/flush of one disk cache onto a single worker
//! thread and reports each completion to the registered event handler.
//!
//! Delayed flushes are coalesced: while one delayed flush is pending,
//! further delayed-flush requests are dropped. The pending flag is cleared
//! when that flush starts executing, so a request arriving during its
//! execution schedules a new one. Immediate flushes are never coalesced.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

use disk_cache_api::{CacheIoError, CacheIoResult, DiskCache};
use thiserror::Error;

use crate::event::{EventHandler, HandlerSlot};
use crate::operation::{LifecycleOperation, TaskState, TaskStateCell};
use crate::worker::{Worker, WorkerHandle};

/// Default name of the worker thread.
pub const DEFAULT_WORKER_NAME: &str = "disk-cache-worker";

/// Failure observed through a [`LifecycleTicket`].
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{operation} failed: {source}")]
    Io {
        operation: LifecycleOperation,
        #[source]
        source: CacheIoError,
    },

    #[error("{0} was abandoned before it ran")]
    Abandoned(LifecycleOperation),

    #[error("timed out waiting for {0}")]
    TimedOut(LifecycleOperation),

    #[error("cannot wait for {0} on the worker thread that runs it")]
    WaitOnWorkerThread(LifecycleOperation),
}

/// State shared between the scheduler and the jobs it hands to the worker.
struct Shared {
    cache: Arc<dyn DiskCache>,
    /// Entry access holds the read side; lifecycle execution the write side.
    gate: RwLock<()>,
    handler: HandlerSlot,
    flush_scheduled_with_delay: AtomicBool,
}

/// One scheduled or queued lifecycle operation.
struct PendingTask {
    operation: LifecycleOperation,
    delayed: bool,
    state: TaskStateCell,
    completion: SyncSender<CacheIoResult<()>>,
}

impl PendingTask {
    fn new(
        operation: LifecycleOperation,
        delayed: bool,
        worker_thread: ThreadId,
    ) -> (Self, LifecycleTicket) {
        let initial = if delayed {
            TaskState::Scheduled
        } else {
            TaskState::Queued
        };
        let state = TaskStateCell::new(initial);
        let (completion, receiver) = mpsc::sync_channel(1);

        let task = Self {
            operation,
            delayed,
            state: state.clone(),
            completion,
        };
        let ticket = LifecycleTicket {
            operation,
            state,
            worker_thread,
            receiver,
        };
        (task, ticket)
    }

    fn run(self, shared: &Shared) {
        self.state.advance(TaskState::Executing);
        if self.delayed && self.operation == LifecycleOperation::Flush {
            shared.flush_scheduled_with_delay.store(false, Ordering::SeqCst);
        }

        let result = {
            let _exclusive = shared.gate.write().unwrap_or_else(PoisonError::into_inner);
            match self.operation {
                LifecycleOperation::Init => shared.cache.open(),
                LifecycleOperation::Close => shared.cache.close(),
                LifecycleOperation::Flush => shared.cache.flush(),
            }
        };

        match &result {
            Ok(()) => tracing::debug!(operation = %self.operation, "lifecycle operation completed"),
            Err(e) => tracing::warn!(operation = %self.operation, error = %e, "lifecycle operation failed"),
        }

        shared.handler.dispatch(self.operation);
        self.state.advance(TaskState::Completed);
        // The ticket may have been dropped; nobody is waiting then.
        let _ = self.completion.send(result);
    }
}

/// Handle on one submitted operation.
///
/// Dropping a ticket does not cancel the operation.
#[derive(Debug)]
pub struct LifecycleTicket {
    operation: LifecycleOperation,
    state: TaskStateCell,
    worker_thread: ThreadId,
    receiver: Receiver<CacheIoResult<()>>,
}

impl LifecycleTicket {
    pub fn operation(&self) -> LifecycleOperation {
        self.operation
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    /// Block until the operation has executed and its event was dispatched.
    ///
    /// Event handlers run on the worker thread, which is the thread that
    /// executes the operation. Waiting there would never return, so it fails
    /// with [`LifecycleError::WaitOnWorkerThread`] instead.
    pub fn wait(self) -> Result<(), LifecycleError> {
        self.check_not_worker_thread()?;
        match self.receiver.recv() {
            Ok(result) => self.into_outcome(result),
            Err(_) => Err(LifecycleError::Abandoned(self.operation)),
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> Result<(), LifecycleError> {
        self.check_not_worker_thread()?;
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => self.into_outcome(result),
            Err(RecvTimeoutError::Timeout) => Err(LifecycleError::TimedOut(self.operation)),
            Err(RecvTimeoutError::Disconnected) => Err(LifecycleError::Abandoned(self.operation)),
        }
    }

    fn check_not_worker_thread(&self) -> Result<(), LifecycleError> {
        if thread::current().id() == self.worker_thread {
            return Err(LifecycleError::WaitOnWorkerThread(self.operation));
        }
        Ok(())
    }

    fn into_outcome(self, result: CacheIoResult<()>) -> Result<(), LifecycleError> {
        result.map_err(|source| LifecycleError::Io {
            operation: self.operation,
            source,
        })
    }
}

/// Runs lifecycle operations for one disk cache on an owned worker.
pub struct LifecycleScheduler {
    worker: Worker,
    shared: Arc<Shared>,
}

impl LifecycleScheduler {
    /// Create a scheduler with its own worker thread.
    pub fn new(cache: Arc<dyn DiskCache>) -> io::Result<Self> {
        Ok(Self::with_worker(cache, Worker::new(DEFAULT_WORKER_NAME)?))
    }

    /// Create a scheduler over an explicitly constructed worker.
    pub fn with_worker(cache: Arc<dyn DiskCache>, worker: Worker) -> Self {
        Self {
            worker,
            shared: Arc::new(Shared {
                cache,
                gate: RwLock::new(()),
                handler: HandlerSlot::default(),
                flush_scheduled_with_delay: AtomicBool::new(false),
            }),
        }
    }

    pub fn disk_cache(&self) -> &Arc<dyn DiskCache> {
        &self.shared.cache
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// Queue `operation` for execution after everything already queued.
    ///
    /// Failures are only visible through the returned ticket and the logs.
    pub fn submit_now(&self, operation: LifecycleOperation) -> LifecycleTicket {
        let (task, ticket) = PendingTask::new(operation, false, self.worker.thread_id());
        tracing::debug!(%operation, "submitting lifecycle operation");
        enqueue(&self.worker.handle(), &self.shared, task);
        ticket
    }

    /// Submit `operation` once `delay` has elapsed.
    ///
    /// Returns `None` when a delayed flush is already pending and this
    /// request was folded into it. Delays longer than
    /// [`MAX_TIMER_DELAY`](crate::worker::MAX_TIMER_DELAY) are clamped.
    pub fn submit_after(
        &self,
        operation: LifecycleOperation,
        delay: Duration,
    ) -> Option<LifecycleTicket> {
        if operation == LifecycleOperation::Flush
            && self.shared.flush_scheduled_with_delay.swap(true, Ordering::SeqCst)
        {
            tracing::debug!("delayed flush already pending; request coalesced");
            return None;
        }

        let (task, ticket) = PendingTask::new(operation, true, self.worker.thread_id());
        tracing::debug!(%operation, delay_ms = delay.as_millis() as u64, "scheduling delayed lifecycle operation");

        let handle = self.worker.handle();
        let shared = Arc::clone(&self.shared);
        let timer_handle = handle.clone();
        let armed = handle.execute_after(delay, move || {
            task.state.advance(TaskState::Queued);
            enqueue(&timer_handle, &shared, task);
        });
        if !armed {
            tracing::warn!(%operation, "worker is shut down; delayed operation dropped");
            if operation == LifecycleOperation::Flush {
                self.shared
                    .flush_scheduled_with_delay
                    .store(false, Ordering::SeqCst);
            }
        }
        Some(ticket)
    }

    /// True while a delayed flush is waiting to start.
    pub fn is_delayed_flush_pending(&self) -> bool {
        self.shared.flush_scheduled_with_delay.load(Ordering::SeqCst)
    }

    /// Replace the completion handler.
    ///
    /// The handler runs on the worker thread; waiting on a ticket from
    /// inside it fails with [`LifecycleError::WaitOnWorkerThread`].
    pub fn set_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.shared.handler.set(handler);
    }

    pub fn clear_event_handler(&self) {
        self.shared.handler.clear();
    }

    pub fn has_event_handler(&self) -> bool {
        self.shared.handler.is_set()
    }

    /// Shared access for per-entry reads and writes. Waits while a
    /// lifecycle operation is executing.
    pub fn entry_access(&self) -> RwLockReadGuard<'_, ()> {
        self.shared.gate.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drain queued operations, abandon pending timers and stop the worker.
    pub fn shutdown(&self) {
        self.worker.shutdown();
        self.shared
            .flush_scheduled_with_delay
            .store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for LifecycleScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleScheduler")
            .field("worker", &self.worker)
            .field("delayed_flush_pending", &self.is_delayed_flush_pending())
            .finish()
    }
}

fn enqueue(handle: &WorkerHandle, shared: &Arc<Shared>, task: PendingTask) {
    let operation = task.operation;
    let shared = Arc::clone(shared);
    if !handle.execute(move || task.run(&shared)) {
        tracing::warn!(%operation, "worker is shut down; lifecycle operation dropped");
    }
}
