//! Single-thread background worker
//!
//! One named thread drains a FIFO queue of jobs. Delayed jobs wait in a
//! timer heap owned by the same thread and run on it once due. Shutting
//! down drains jobs already queued and abandons timers that have not fired.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// A unit of work run on the worker thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Longest delay a timer honours (about 100 years).
pub const MAX_TIMER_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

enum Message {
    Run(Job),
    RunAfter(Instant, Job),
    Shutdown,
}

struct Timer {
    deadline: Instant,
    seq: u64,
    job: Job,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    // Reversed so the max-heap yields the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Cloneable submission side of a [`Worker`].
#[derive(Clone)]
pub struct WorkerHandle {
    sender: Sender<Message>,
    closed: Arc<AtomicBool>,
}

impl WorkerHandle {
    /// Queue `job` behind everything already queued.
    ///
    /// Returns false if the worker has shut down; the job is dropped.
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Message::Run(Box::new(job)))
    }

    /// Run `job` on the worker thread once `delay` has elapsed.
    ///
    /// Delays past [`MAX_TIMER_DELAY`] are clamped to it. Returns false if
    /// the worker has shut down; the job is dropped.
    pub fn execute_after<F>(&self, delay: Duration, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let now = Instant::now();
        let deadline = match now.checked_add(delay.min(MAX_TIMER_DELAY)) {
            Some(deadline) => deadline,
            None => {
                tracing::warn!(delay_ms = delay.as_millis() as u64, "timer deadline out of range; dropping job");
                return false;
            }
        };
        self.send(Message::RunAfter(deadline, Box::new(job)))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn send(&self, message: Message) -> bool {
        if self.is_closed() {
            tracing::debug!("worker is shut down; dropping job");
            return false;
        }
        self.sender.send(message).is_ok()
    }
}

/// Owned single-thread worker. Dropping it shuts the thread down.
pub struct Worker {
    name: String,
    handle: WorkerHandle,
    thread_id: ThreadId,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Spawn the worker thread.
    pub fn new(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(receiver))?;

        Ok(Self {
            name,
            thread_id: join.thread().id(),
            handle: WorkerHandle {
                sender,
                closed: Arc::new(AtomicBool::new(false)),
            },
            join: Mutex::new(Some(join)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.execute(job)
    }

    pub fn execute_after<F>(&self, delay: Duration, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.execute_after(delay, job)
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// True when called from the worker thread itself.
    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stop accepting jobs, let queued jobs finish and abandon pending
    /// timers. Blocks until the thread exits unless called from it.
    pub fn shutdown(&self) {
        if self.handle.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.handle.sender.send(Message::Shutdown);

        let join = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(join) = join {
            if self.is_worker_thread() {
                // Joining ourselves would deadlock; the loop exits on its own.
                return;
            }
            if join.join().is_err() {
                tracing::error!(worker = %self.name, "worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("closed", &self.handle.is_closed())
            .finish()
    }
}

fn run_loop(receiver: Receiver<Message>) {
    let mut timers: BinaryHeap<Timer> = BinaryHeap::new();
    let mut next_seq: u64 = 0;

    loop {
        let now = Instant::now();
        while timers.peek().is_some_and(|t| t.deadline <= now) {
            if let Some(timer) = timers.pop() {
                run_job(timer.job);
            }
        }

        let message = match timers.peek() {
            Some(timer) => {
                let wait = timer.deadline.saturating_duration_since(Instant::now());
                match receiver.recv_timeout(wait) {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match receiver.recv() {
                Ok(message) => message,
                Err(_) => break,
            },
        };

        match message {
            Message::Run(job) => run_job(job),
            Message::RunAfter(deadline, job) => {
                timers.push(Timer {
                    deadline,
                    seq: next_seq,
                    job,
                });
                next_seq += 1;
            }
            Message::Shutdown => break,
        }
    }

    if !timers.is_empty() {
        tracing::debug!(abandoned = timers.len(), "worker stopped with pending timers");
    }
}

fn run_job(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        tracing::error!("worker job panicked");
    }
}
