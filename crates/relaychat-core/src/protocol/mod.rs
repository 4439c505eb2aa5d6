//! Wire protocol: event types, frame decoder, and the streaming client.
//!
//! The transport is a POST request yielding a chunked text response of
//! `data:`-prefixed JSON frames separated by blank lines. [`FrameDecoder`]
//! reassembles frames across chunk boundaries, [`Event`] gives them a typed
//! shape, and [`ChatClient`] drives one cancellable exchange end to end.

mod client;
mod decoder;
mod types;

pub use client::{CONNECTION_ERROR, ChatClient};
pub use decoder::FrameDecoder;
pub use types::{
    ChatRequest, ChatResponse, Event, ReferenceItem, ReferencePayload, ReplyPayload,
    StreamRequest, ThoughtDebugging, ThoughtPayload, ThoughtProcedure, ThoughtStatus,
    TokenStatPayload, TokenStatProcedure,
};
