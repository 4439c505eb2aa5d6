//! Chat sessions: an ordered message list plus the single-flight request slot.
//!
//! A `Session` is a cheap-clone handle; all state lives behind one shared
//! inner. At most one streaming request is in flight per session: starting a
//! new turn cancels the previous one, and a per-session generation counter
//! keeps a superseded stream's late frames from touching the new turn.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::events::{Listeners, SessionEvent, Subscription};
use crate::message::Message;
use crate::protocol::{ChatClient, ReferenceItem};

/// Content shown when a turn is attempted while signed out.
pub const SIGN_IN_PROMPT: &str = "Please sign in to start chatting.";

/// One conversation with the assistant.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    /// Unique human-readable key within the owning manager; immutable
    name: String,
    /// Server-assigned conversation id; empty until the first exchange and
    /// reassignable mid-conversation
    id: Mutex<String>,
    messages: Mutex<Vec<Message>>,
    /// Generation of the current turn; bumped whenever a turn claims the slot
    generation: AtomicU64,
    /// Cancellation token of the in-flight request, if any
    pending: Mutex<Option<CancellationToken>>,
    listeners: Listeners<SessionEvent>,
}

impl Session {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                name: name.into(),
                id: Mutex::new(id.into()),
                messages: Mutex::new(Vec::new()),
                generation: AtomicU64::new(0),
                pending: Mutex::new(None),
                listeners: Listeners::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn id(&self) -> String {
        self.inner.id.lock().clone()
    }

    /// Snapshot of the message list.
    pub fn messages(&self) -> Vec<Message> {
        self.inner.messages.lock().clone()
    }

    /// Register a listener for message changes.
    pub fn subscribe(
        &self,
        f: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> Subscription<SessionEvent> {
        self.inner.listeners.subscribe(f)
    }

    /// Send one prompt and drive the bot reply to completion.
    ///
    /// Appends a user message and a waiting bot placeholder, then delegates
    /// to the streaming client (or the single request/response fallback when
    /// `streaming` is false). A send that is already in flight for this
    /// session is cancelled first.
    ///
    /// Never fails: network and protocol errors end up as bot message
    /// content, and the placeholder always leaves the waiting state.
    pub async fn send_message(&self, client: &ChatClient, prompt: &str, streaming: bool) {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return;
        }

        let bot_index = self.append_turn(prompt);

        if !client.auth().is_signed_in() {
            {
                let mut messages = self.inner.messages.lock();
                if let Some(message) = messages.get_mut(bot_index) {
                    message.content = SIGN_IN_PROMPT.to_string();
                    message.is_waiting = false;
                }
            }
            self.notify();
            return;
        }

        let (turn, cancel) = self.claim_turn(bot_index);
        let generation = turn.generation;
        if streaming {
            client.stream(&turn, prompt, &cancel).await;
        } else {
            client.send_once(&turn, prompt).await;
        }
        self.release_turn(generation);
    }

    /// Clear all messages.
    pub fn clean(&self) {
        self.inner.messages.lock().clear();
        self.notify();
    }

    /// Cancel the in-flight request, if any. Idempotent.
    pub fn cancel_pending(&self) {
        if let Some(token) = self.inner.pending.lock().take() {
            token.cancel();
        }
    }

    /// Append the user message and the waiting bot placeholder for a new
    /// turn; returns the placeholder's index.
    pub(crate) fn append_turn(&self, prompt: &str) -> usize {
        let bot_index = {
            let mut messages = self.inner.messages.lock();
            let next_id = messages.len() as u64;
            messages.push(Message::user(next_id, prompt));
            messages.push(Message::bot(next_id + 1));
            messages.len() - 1
        };
        self.notify();
        bot_index
    }

    /// Claim the request slot for a new turn, cancelling any previous one.
    pub(crate) fn claim_turn(&self, bot_index: usize) -> (TurnHandle, CancellationToken) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        if let Some(previous) = self.inner.pending.lock().replace(cancel.clone()) {
            // No-op if that turn already finished
            previous.cancel();
        }
        let turn = TurnHandle {
            session: Arc::clone(&self.inner),
            index: bot_index,
            generation,
        };
        (turn, cancel)
    }

    /// Release the request slot, unless a newer turn has claimed it.
    pub(crate) fn release_turn(&self, generation: u64) {
        let mut pending = self.inner.pending.lock();
        if self.inner.generation.load(Ordering::SeqCst) == generation {
            *pending = None;
        }
    }

    pub fn to_saved(&self) -> SavedSession {
        SavedSession {
            id: self.id(),
            name: self.inner.name.clone(),
            messages: self.messages(),
        }
    }

    pub fn from_saved(saved: SavedSession) -> Self {
        let session = Self::new(saved.id, saved.name);
        *session.inner.messages.lock() = saved.messages;
        session
    }

    fn notify(&self) {
        self.inner.listeners.emit(&SessionEvent::MessagesChanged);
    }
}

/// Persisted form of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedSession {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Generation-guarded writer for the bot message of one turn.
///
/// Handed to the protocol client so it can apply decoded events. Content
/// mutations are dropped once a newer turn claims the session, which is what
/// makes abort-and-replace safe: a superseded stream's late frames cannot
/// touch the replacement turn's message.
pub(crate) struct TurnHandle {
    session: Arc<SessionInner>,
    index: usize,
    pub(crate) generation: u64,
}

impl TurnHandle {
    fn is_current(&self) -> bool {
        self.session.generation.load(Ordering::SeqCst) == self.generation
    }

    pub(crate) fn session_id(&self) -> String {
        self.session.id.lock().clone()
    }

    /// Adopt a server-assigned session id for all future requests.
    pub(crate) fn adopt_session_id(&self, id: &str) {
        if !self.is_current() {
            return;
        }
        let mut current = self.session.id.lock();
        if *current != id {
            debug!(
                session = %self.session.name,
                old = %current,
                new = %id,
                "adopting reassigned session id"
            );
            *current = id.to_string();
        }
    }

    pub(crate) fn set_content(&self, content: &str) {
        self.mutate(|message| message.content = content.to_string());
    }

    pub(crate) fn set_thought(&self, thought: &str) {
        self.mutate(|message| message.thought = Some(thought.to_string()));
    }

    pub(crate) fn set_references(&self, references: Vec<ReferenceItem>) {
        self.mutate(|message| message.references = references);
    }

    fn mutate(&self, f: impl FnOnce(&mut Message)) {
        if !self.is_current() {
            return;
        }
        {
            let mut messages = self.session.messages.lock();
            match messages.get_mut(self.index) {
                Some(message) => f(message),
                None => return,
            }
        }
        self.session.listeners.emit(&SessionEvent::MessagesChanged);
    }

    /// Clear the waiting flag and notify, once.
    ///
    /// Runs on every exit path of a turn and deliberately skips the
    /// generation check: a superseded turn's message must still stop
    /// spinning, it just may not change content anymore.
    pub(crate) fn finish(&self) {
        {
            let mut messages = self.session.messages.lock();
            match messages.get_mut(self.index) {
                Some(message) if message.is_waiting => message.is_waiting = false,
                _ => return,
            }
        }
        self.session.listeners.emit(&SessionEvent::MessagesChanged);
    }
}
