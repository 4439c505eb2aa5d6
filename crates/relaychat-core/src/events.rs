//! Change-notification plumbing shared by sessions and the session manager.
//!
//! Subscribers register a callback and receive every event synchronously, in
//! subscription order, immediately after the mutation that caused it. A
//! `Subscription` unsubscribes on drop.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Session-level change events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The message list (or a message in it) changed
    MessagesChanged,
}

/// Manager-level change events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerEvent {
    /// The session collection changed (create/remove/load/clean)
    SessionsChanged,
    /// The active session selection changed (or was re-announced)
    ActiveSessionChanged,
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct ListenerList<E> {
    next_id: u64,
    entries: Vec<(u64, Callback<E>)>,
}

/// A list of subscribers for one event type.
pub struct Listeners<E> {
    inner: Arc<Mutex<ListenerList<E>>>,
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ListenerList {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a callback; it stays subscribed until the returned
    /// `Subscription` is dropped.
    pub fn subscribe(&self, f: impl Fn(&E) + Send + Sync + 'static) -> Subscription<E> {
        let mut list = self.inner.lock();
        let id = list.next_id;
        list.next_id += 1;
        list.entries.push((id, Arc::new(f)));
        Subscription {
            list: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Invoke every subscriber with the event, in subscription order.
    ///
    /// Callbacks run outside the listener lock, so a subscriber may itself
    /// subscribe, unsubscribe, or emit without deadlocking.
    pub fn emit(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(_, f)| Arc::clone(f))
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for one registered callback; unsubscribes on drop.
pub struct Subscription<E> {
    list: Weak<Mutex<ListenerList<E>>>,
    id: u64,
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(list) = self.list.upgrade() {
            list.lock().entries.retain(|(id, _)| *id != self.id);
        }
    }
}
