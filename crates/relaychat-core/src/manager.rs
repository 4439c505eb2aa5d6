//! Session manager: the ordered session collection and its persistence.
//!
//! Owns every session, tracks which one is active, and persists the whole
//! collection as one blob in a [`KeyValueStore`]. Two invariants hold at all
//! times: the collection is never empty, and exactly one session is active.
//! Only manager methods mutate the collection; callers get cheap session
//! handles and go through the manager for lifecycle changes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::{Listeners, ManagerEvent, SessionEvent, Subscription};
use crate::session::{SavedSession, Session};
use crate::storage::KeyValueStore;

/// Persisted form of the whole collection.
#[derive(Serialize, Deserialize)]
struct SavedHistory {
    sessions: Vec<SavedSession>,
    #[serde(rename = "activeSession", default)]
    active_session: String,
}

struct SessionEntry {
    session: Session,
    /// Auto-save hook; dropped with the entry
    _watch: Subscription<SessionEvent>,
}

struct ManagerState {
    /// Insertion order is significant: the first session is the fallback
    /// whenever the active one goes away
    sessions: Vec<SessionEntry>,
    /// Name of the active session
    active: String,
}

struct ManagerInner {
    store: Arc<dyn KeyValueStore>,
    storage_key: String,
    state: Mutex<ManagerState>,
    /// Saves are gated until the first load attempt so a fresh manager
    /// cannot clobber stored history with its default session
    loaded: AtomicBool,
    listeners: Listeners<ManagerEvent>,
}

impl ManagerInner {
    fn save(&self) {
        if !self.loaded.load(Ordering::SeqCst) {
            return;
        }
        let blob = {
            let state = self.state.lock();
            SavedHistory {
                sessions: state
                    .sessions
                    .iter()
                    .map(|entry| entry.session.to_saved())
                    .collect(),
                active_session: state.active.clone(),
            }
        };
        match serde_json::to_string(&blob) {
            Ok(json) => {
                if let Err(err) = self.store.set(&self.storage_key, &json) {
                    warn!("Failed to persist history: {err}");
                }
            }
            Err(err) => warn!("Failed to serialize history: {err}"),
        }
    }
}

/// Persist whenever a session's messages change.
fn watch_session(inner: &Arc<ManagerInner>, session: &Session) -> Subscription<SessionEvent> {
    let weak = Arc::downgrade(inner);
    session.subscribe(move |_| {
        if let Some(inner) = weak.upgrade() {
            inner.save();
        }
    })
}

/// Owns the session collection. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    /// Create a manager with one fresh default session.
    ///
    /// Nothing is persisted until [`load`](Self::load) has been attempted.
    pub fn new(store: Arc<dyn KeyValueStore>, storage_key: impl Into<String>) -> Self {
        let manager = Self {
            inner: Arc::new(ManagerInner {
                store,
                storage_key: storage_key.into(),
                state: Mutex::new(ManagerState {
                    sessions: Vec::new(),
                    active: String::new(),
                }),
                loaded: AtomicBool::new(false),
                listeners: Listeners::new(),
            }),
        };
        manager.create_session();
        manager
    }

    /// Register a listener for collection- and active-change events.
    pub fn subscribe(
        &self,
        f: impl Fn(&ManagerEvent) + Send + Sync + 'static,
    ) -> Subscription<ManagerEvent> {
        self.inner.listeners.subscribe(f)
    }

    /// Create and activate a session under the lowest unused default name.
    pub fn create_session(&self) -> Session {
        let session = {
            let mut state = self.inner.state.lock();
            let mut n = 0usize;
            let name = loop {
                let candidate = format!("Session {n}");
                if !state
                    .sessions
                    .iter()
                    .any(|entry| entry.session.name() == candidate)
                {
                    break candidate;
                }
                n += 1;
            };
            info!("Creating new session: {name}");
            let session = Session::new("", name);
            state.sessions.push(SessionEntry {
                _watch: watch_session(&self.inner, &session),
                session: session.clone(),
            });
            state.active = session.name().to_string();
            session
        };
        self.inner.save();
        self.inner.listeners.emit(&ManagerEvent::SessionsChanged);
        self.inner
            .listeners
            .emit(&ManagerEvent::ActiveSessionChanged);
        session
    }

    /// Remove a session by name.
    ///
    /// Removing the last remaining session is an invariant violation and
    /// fails with [`Error::LastSession`]. Unknown names are ignored. If the
    /// removed session was active, the first remaining one takes over.
    pub fn remove_session(&self, name: &str) -> Result<()> {
        let removed = {
            let mut state = self.inner.state.lock();
            if state.sessions.len() <= 1 {
                return Err(Error::LastSession);
            }
            let Some(pos) = state
                .sessions
                .iter()
                .position(|entry| entry.session.name() == name)
            else {
                debug!("remove_session: no session named {name:?}");
                return Ok(());
            };
            let entry = state.sessions.remove(pos);
            if state.active == name {
                state.active = state.sessions[0].session.name().to_string();
            }
            entry.session
        };
        removed.cancel_pending();
        info!("Removed session: {name}");
        self.inner.save();
        self.inner.listeners.emit(&ManagerEvent::SessionsChanged);
        Ok(())
    }

    /// Switch the active session.
    ///
    /// An unknown name leaves the selection unchanged but still fires the
    /// active-change notification; existing subscribers depend on that
    /// forced refresh, so the quirk is kept even though it looks like a bug.
    pub fn set_active_session(&self, name: &str) {
        {
            let mut state = self.inner.state.lock();
            if state
                .sessions
                .iter()
                .any(|entry| entry.session.name() == name)
            {
                state.active = name.to_string();
            } else {
                debug!("set_active_session: no session named {name:?}");
            }
        }
        self.inner.save();
        self.inner
            .listeners
            .emit(&ManagerEvent::ActiveSessionChanged);
    }

    /// The active session.
    pub fn active_session(&self) -> Session {
        let state = self.inner.state.lock();
        state
            .sessions
            .iter()
            .find(|entry| entry.session.name() == state.active)
            .or_else(|| state.sessions.first())
            .map(|entry| entry.session.clone())
            .expect("session collection is never empty")
    }

    /// Look up a session by name.
    pub fn session(&self, name: &str) -> Option<Session> {
        self.inner
            .state
            .lock()
            .sessions
            .iter()
            .find(|entry| entry.session.name() == name)
            .map(|entry| entry.session.clone())
    }

    /// All sessions, in insertion order.
    pub fn sessions(&self) -> Vec<Session> {
        self.inner
            .state
            .lock()
            .sessions
            .iter()
            .map(|entry| entry.session.clone())
            .collect()
    }

    /// Session names, in insertion order.
    pub fn session_names(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .sessions
            .iter()
            .map(|entry| entry.session.name().to_string())
            .collect()
    }

    /// Persist the collection and the active-session name as one blob.
    pub fn save(&self) {
        self.inner.save();
    }

    /// Restore the collection from storage.
    ///
    /// Missing history is a hard failure; the caller keeps the freshly
    /// constructed manager (which already owns one default session) as the
    /// fallback. Either way, saves are enabled from this point on.
    pub fn load(&self) -> Result<()> {
        self.inner.loaded.store(true, Ordering::SeqCst);

        let Some(json) = self.inner.store.get(&self.inner.storage_key) else {
            // Announce the default collection so subscribers still render it
            self.inner.listeners.emit(&ManagerEvent::SessionsChanged);
            self.inner
                .listeners
                .emit(&ManagerEvent::ActiveSessionChanged);
            return Err(Error::EmptyHistory);
        };
        let saved: SavedHistory = serde_json::from_str(&json)?;
        let saved_active = saved.active_session;

        let restored_any = {
            let mut state = self.inner.state.lock();
            state.sessions = saved
                .sessions
                .into_iter()
                .map(|s| {
                    let session = Session::from_saved(s);
                    SessionEntry {
                        _watch: watch_session(&self.inner, &session),
                        session,
                    }
                })
                .collect();
            if let Some(first) = state.sessions.first() {
                state.active = first.session.name().to_string();
                true
            } else {
                false
            }
        };

        if restored_any {
            self.set_active_session(&saved_active);
        } else {
            self.create_session();
        }
        self.inner.listeners.emit(&ManagerEvent::SessionsChanged);
        info!("Loaded {} session(s) from storage", self.sessions().len());
        Ok(())
    }

    /// Drop every session and start over with one fresh default session.
    pub fn clean(&self) {
        {
            let mut state = self.inner.state.lock();
            for entry in &state.sessions {
                entry.session.cancel_pending();
            }
            state.sessions.clear();
            state.active.clear();
        }
        self.create_session();
    }
}
