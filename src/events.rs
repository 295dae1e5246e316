//! Lifecycle events published by sessions and servers.

use crate::error::Error;
use crate::server::Session;
use crate::types::Root;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::error;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Synchronous fan-out of events to registered listeners.
///
/// Listeners run on the emitting task and must not block. A listener that panics is
/// logged and skipped; delivery to the remaining listeners continues.
pub struct EventEmitter<E> {
    listeners: RwLock<Vec<Listener<E>>>,
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl<E> EventEmitter<E> {
    pub fn on<F>(&self, listener: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.push(Arc::new(listener));
    }

    pub fn emit(&self, event: &E) {
        // Snapshot so listeners may register further listeners without deadlocking.
        let snapshot: Vec<Listener<E>> = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!("[Events] Listener panicked; continuing with the next one");
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Events emitted by a single [`Session`].
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Negotiation finished and the session is serving requests.
    Connect,
    /// The session closed, either explicitly or because its transport ended.
    Disconnect,
    /// The client's roots were refetched after a change notification.
    RootsChanged { roots: Vec<Root> },
    /// A background failure, such as a missed liveness ping.
    Error { error: Arc<Error> },
}

/// Events emitted by a [`crate::Server`].
pub enum ServerEvent<A> {
    Connect { session: Session<A> },
    Disconnect { session: Session<A> },
}
