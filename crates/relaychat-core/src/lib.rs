//! Relaychat Core - client library for a streaming AI chat service
//!
//! This crate provides the client-side core of the Relaychat assistant:
//! - Conversation model: messages, sessions, and the session manager
//! - Streaming protocol client with single-flight request cancellation,
//!   mid-stream session-id renegotiation, and heartbeat-tolerant long-lived
//!   connections
//! - Auth and key-value storage contracts implemented by host applications
//! - Configuration loading
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use relaychat_core::{ChatClient, ClientConfig, SessionManager, StaticAuth};
//! use relaychat_core::storage::FileStore;
//!
//! let config = ClientConfig::default();
//! let client = ChatClient::new(config.clone(), Arc::new(StaticAuth::new(token)))?;
//! let manager = SessionManager::new(Arc::new(FileStore::new(FileStore::default_dir())), &config.storage_key);
//! if manager.load().is_err() {
//!     // nothing stored yet; keep the fresh default session
//! }
//!
//! let session = manager.active_session();
//! session.send_message(&client, "Hello!", true).await;
//! for message in session.messages() {
//!     println!("{}", message.content);
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod message;
pub mod protocol;
pub mod session;
pub mod storage;

pub use auth::{AnonymousAuth, AuthProvider, StaticAuth};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use events::{ManagerEvent, SessionEvent, Subscription};
pub use manager::SessionManager;
pub use message::{Author, Message};
pub use protocol::{CONNECTION_ERROR, ChatClient, ReferenceItem};
pub use session::{SIGN_IN_PROMPT, SavedSession, Session};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
