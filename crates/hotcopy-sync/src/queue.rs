//! FIFO job queue between the event source and the dispatcher.
//!
//! One producer appends from the watcher callback thread (never blocks on
//! I/O), one consumer pops. Unbounded, no reordering, no coalescing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use hotcopy_core::ChangeEvent;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct State {
    jobs: VecDeque<ChangeEvent>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    available: Notify,
}

/// Cloneable handle; all clones share one queue.
#[derive(Debug, Clone, Default)]
pub struct JobQueue {
    shared: Arc<Shared>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail. Returns false once the queue is closed.
    pub fn push(&self, event: ChangeEvent) -> bool {
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.jobs.push_back(event);
        }
        self.shared.available.notify_one();
        true
    }

    /// Remove the head without waiting.
    pub fn try_pop(&self) -> Option<ChangeEvent> {
        self.lock().jobs.pop_front()
    }

    /// Wait until an event is available and remove it.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<ChangeEvent> {
        loop {
            // Register before checking so a push in between is not missed
            let notified = self.shared.available.notified();
            {
                let mut state = self.lock();
                if let Some(event) = state.jobs.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stop accepting new events; queued ones can still be popped.
    pub fn close(&self) {
        self.lock().closed = true;
        self.shared.available.notify_waiters();
        self.shared.available.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().jobs.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.shared.state.lock().expect("job queue lock poisoned")
    }
}
