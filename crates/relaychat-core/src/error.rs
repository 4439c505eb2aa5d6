//! Error types for Relaychat Core

use thiserror::Error;

/// Result type alias using the Relaychat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Relaychat error types
///
/// Network and protocol failures inside a chat turn never surface through
/// this type to callers of `Session::send_message`; they are converted into
/// message content at the client boundary. What does surface here are
/// invariant violations (removing the last session, loading empty history)
/// and infrastructure failures callers can act on.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Cannot remove the only session")]
    LastSession,

    #[error("History storage is empty")]
    EmptyHistory,

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server returned status {0}")]
    Status(u16),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
