//! Completion events
//!
//! A single handler slot: registering a handler replaces the previous one.
//! Handlers run on the worker thread after the operation has executed,
//! whether it succeeded or not.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use crate::operation::LifecycleOperation;

/// Receives one call per completed lifecycle operation.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, operation: LifecycleOperation);
}

impl<F> EventHandler for F
where
    F: Fn(LifecycleOperation) + Send + Sync,
{
    fn on_event(&self, operation: LifecycleOperation) {
        self(operation)
    }
}

/// Last-writer-wins holder for the active handler.
#[derive(Default)]
pub(crate) struct HandlerSlot {
    handler: RwLock<Option<Arc<dyn EventHandler>>>,
}

impl HandlerSlot {
    pub(crate) fn set(&self, handler: Arc<dyn EventHandler>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub(crate) fn clear(&self) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub(crate) fn is_set(&self) -> bool {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Invoke the current handler, if any.
    ///
    /// The slot lock is released before the call so a handler may replace
    /// itself. A panicking handler is logged and swallowed.
    pub(crate) fn dispatch(&self, operation: LifecycleOperation) {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if let Some(handler) = handler {
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler.on_event(operation)));
            if result.is_err() {
                tracing::error!(%operation, "event handler panicked");
            }
        }
    }
}
