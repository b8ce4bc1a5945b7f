//! Lifecycle operations and the per-task state machine
//!
//! Task states: SCHEDULED → QUEUED → EXECUTING → COMPLETED
//! Immediate submissions start at QUEUED.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Task code for opening the disk cache.
pub const TASK_INIT_CACHE: u8 = 1;

/// Task code for closing the disk cache.
pub const TASK_CLOSE_CACHE: u8 = 2;

/// Task code for flushing the disk cache.
pub const TASK_FLUSH_CACHE: u8 = 3;

/// A cache-wide lifecycle operation executed on the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleOperation {
    /// Open the backing storage
    Init,
    /// Release the backing storage
    Close,
    /// Durably persist pending writes
    Flush,
}

impl LifecycleOperation {
    pub const ALL: [LifecycleOperation; 3] = [Self::Init, Self::Close, Self::Flush];

    /// Stable numeric task code.
    pub fn code(self) -> u8 {
        match self {
            Self::Init => TASK_INIT_CACHE,
            Self::Close => TASK_CLOSE_CACHE,
            Self::Flush => TASK_FLUSH_CACHE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Close => "CLOSE",
            Self::Flush => "FLUSH",
        }
    }
}

impl fmt::Display for LifecycleOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown lifecycle task code {0}")]
pub struct UnknownTaskCode(pub u8);

impl TryFrom<u8> for LifecycleOperation {
    type Error = UnknownTaskCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            TASK_INIT_CACHE => Ok(Self::Init),
            TASK_CLOSE_CACHE => Ok(Self::Close),
            TASK_FLUSH_CACHE => Ok(Self::Flush),
            other => Err(UnknownTaskCode(other)),
        }
    }
}

/// Where a submitted task is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum TaskState {
    /// Waiting for its delay timer
    Scheduled = 0,
    /// In the worker queue
    Queued = 1,
    /// Running against the disk cache
    Executing = 2,
    /// Executed and its completion event dispatched
    Completed = 3,
}

impl TaskState {
    pub fn can_transition_to(&self, target: TaskState) -> bool {
        matches!(
            (self, target),
            (TaskState::Scheduled, TaskState::Queued)
                | (TaskState::Queued, TaskState::Executing)
                | (TaskState::Executing, TaskState::Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Scheduled,
            1 => TaskState::Queued,
            2 => TaskState::Executing,
            _ => TaskState::Completed,
        }
    }
}

/// Task state shared between the worker and a ticket holder.
#[derive(Debug, Clone)]
pub(crate) struct TaskStateCell(Arc<AtomicU8>);

impl TaskStateCell {
    pub(crate) fn new(initial: TaskState) -> Self {
        Self(Arc::new(AtomicU8::new(initial as u8)))
    }

    pub(crate) fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Only the worker (or the timer on its thread) advances a task, so a
    /// plain load/store pair is enough.
    pub(crate) fn advance(&self, target: TaskState) {
        let current = self.get();
        debug_assert!(
            current.can_transition_to(target),
            "invalid task transition {current:?} -> {target:?}"
        );
        self.0.store(target as u8, Ordering::SeqCst);
    }
}
