//! Client configuration: service endpoints and storage location.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for the chat client and session persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Streaming chat endpoint (server-sent event frames)
    pub stream_endpoint: String,
    /// Single request/response fallback endpoint
    pub chat_endpoint: String,
    /// Storage key the session history blob is persisted under
    pub storage_key: String,
    /// Connect timeout for chat requests, in seconds. Reads have no timeout;
    /// long-lived streams are kept open and heartbeats are the liveness
    /// signal.
    pub connect_timeout_secs: u64,
}

fn default_stream_endpoint() -> String {
    "http://localhost:3000/api/chatsse".to_string()
}

fn default_chat_endpoint() -> String {
    "http://localhost:3000/api/chat".to_string()
}

fn default_storage_key() -> String {
    "relaychat_histories".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            stream_endpoint: default_stream_endpoint(),
            chat_endpoint: default_chat_endpoint(),
            storage_key: default_storage_key(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {:?}: {}", path, e)))
    }

    /// Derive both endpoints from a service base URL.
    pub fn for_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            stream_endpoint: format!("{base}/api/chatsse"),
            chat_endpoint: format!("{base}/api/chat"),
            ..Self::default()
        }
    }
}
