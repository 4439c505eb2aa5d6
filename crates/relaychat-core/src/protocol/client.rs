//! Streaming protocol client: one cancellable exchange per call.
//!
//! Drives a single request/response over the chat service, decodes the
//! framed event stream, and applies each event to the turn's bot message.
//! Every failure mode is converted into message content at this boundary;
//! callers never see a rejected turn.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::auth::AuthProvider;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::decoder::FrameDecoder;
use crate::protocol::types::{ChatRequest, ChatResponse, DATA_PREFIX, Event, StreamRequest};
use crate::session::TurnHandle;

/// Bot message content for a turn that failed before completing.
pub const CONNECTION_ERROR: &str = "Connection error, please try again later.";

enum FrameOutcome {
    Continue,
    /// Terminal event seen; stop reading the stream
    Stop,
}

/// HTTP client for the chat service.
pub struct ChatClient {
    http: reqwest::Client,
    config: ClientConfig,
    auth: Arc<dyn AuthProvider>,
}

impl ChatClient {
    pub fn new(config: ClientConfig, auth: Arc<dyn AuthProvider>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(Self { http, config, auth })
    }

    pub fn auth(&self) -> &dyn AuthProvider {
        self.auth.as_ref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Drive one streaming exchange, mutating the turn's bot message as
    /// events arrive. Resolves on every path; the waiting flag is cleared in
    /// the guaranteed cleanup below regardless of how the stream ended.
    pub(crate) async fn stream(&self, turn: &TurnHandle, prompt: &str, cancel: &CancellationToken) {
        if let Err(err) = self.stream_inner(turn, prompt, cancel).await {
            debug!("stream request failed: {err}");
            turn.set_content(CONNECTION_ERROR);
        }
        turn.finish();
    }

    async fn stream_inner(
        &self,
        turn: &TurnHandle,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let session_id = self.ensure_session_id(turn);
        let body = StreamRequest {
            session_id: &session_id,
            promo: prompt,
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            response = self.post_with_reauth(&self.config.stream_endpoint, &body) => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status(status.as_u16()));
        }

        self.consume_frames(turn, cancel, Box::pin(response.bytes_stream()))
            .await
    }

    /// Read chunks until end-of-stream, cancellation, or a terminal event,
    /// applying each complete frame in wire order.
    async fn consume_frames<S, E>(
        &self,
        turn: &TurnHandle,
        cancel: &CancellationToken,
        mut body: S,
    ) -> Result<()>
    where
        S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
        E: Into<Error>,
    {
        let mut frames = FrameDecoder::new();
        loop {
            tokio::select! {
                // Cancellation must win over a simultaneously-ready chunk;
                // teardown cancels have no generation guard backing them up
                biased;
                _ = cancel.cancelled() => {
                    trace!("stream superseded; dropping connection");
                    return Ok(());
                }
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        frames.push(&bytes);
                        while let Some(frame) = frames.next_frame() {
                            if let FrameOutcome::Stop = self.apply_frame(turn, &frame) {
                                return Ok(());
                            }
                        }
                    }
                    Some(Err(err)) => return Err(err.into()),
                    None => return Ok(()),
                },
            }
        }
    }

    /// Apply one frame to the turn. Malformed frames are logged and skipped;
    /// a single bad frame never aborts the stream.
    fn apply_frame(&self, turn: &TurnHandle, frame: &str) -> FrameOutcome {
        let Some(body) = frame.strip_prefix(DATA_PREFIX) else {
            // Protocol anomaly: surface the raw frame as a server error if
            // it parses as one.
            warn!("frame without data prefix: {frame}");
            match serde_json::from_str::<serde_json::Value>(frame) {
                Ok(value) => {
                    let message = error_message(&value)
                        .unwrap_or_else(|| format!("Error happened: {frame}"));
                    turn.set_content(&message);
                }
                Err(err) => warn!("unparseable frame: {err}"),
            }
            return FrameOutcome::Continue;
        };
        let body = body.trim_start();

        match Event::parse(body) {
            Ok(Event::Reply(payload)) => {
                if !payload.is_from_self && !payload.content.is_empty() {
                    turn.set_content(&payload.content);
                }
                if !payload.session_id.is_empty() {
                    turn.adopt_session_id(&payload.session_id);
                }
                FrameOutcome::Continue
            }
            Ok(Event::Thought(payload)) => {
                if let Some(first) = payload.procedures.first() {
                    let content = first
                        .debugging
                        .as_ref()
                        .map(|d| d.content.as_str())
                        .unwrap_or("");
                    turn.set_thought(content);
                }
                FrameOutcome::Continue
            }
            Ok(Event::Reference(payload)) => {
                turn.set_references(payload.references);
                FrameOutcome::Continue
            }
            Ok(Event::TokenStat { heartbeat, .. }) => {
                // Informational only; heartbeats exist to keep the
                // connection alive and require no client action.
                if heartbeat {
                    trace!("heartbeat");
                }
                FrameOutcome::Continue
            }
            Ok(Event::Unauthorize(payload)) => {
                if payload.content.is_empty() {
                    turn.set_content(CONNECTION_ERROR);
                } else {
                    turn.set_content(&payload.content);
                }
                FrameOutcome::Stop
            }
            Ok(Event::Unknown { kind }) => {
                warn!("unrecognized event type: {kind}");
                FrameOutcome::Continue
            }
            Err(err) => {
                // The server reports failures as prefixed but typeless
                // frames, e.g. `data: {"error": "..."}`. Surface those as
                // content rather than dropping them and ending the turn
                // silently empty.
                match serde_json::from_str::<serde_json::Value>(body) {
                    Ok(value) => match error_message(&value) {
                        Some(message) => turn.set_content(&message),
                        None => warn!("malformed frame: {err}"),
                    },
                    Err(_) => warn!("malformed frame: {err}"),
                }
                FrameOutcome::Continue
            }
        }
    }

    /// Single request/response fallback. Converges on the same final message
    /// state as the streaming path.
    pub(crate) async fn send_once(&self, turn: &TurnHandle, prompt: &str) {
        if let Err(err) = self.send_once_inner(turn, prompt).await {
            debug!("chat request failed: {err}");
            turn.set_content(CONNECTION_ERROR);
        }
        turn.finish();
    }

    async fn send_once_inner(&self, turn: &TurnHandle, prompt: &str) -> Result<()> {
        let session_id = self.ensure_session_id(turn);
        let body = ChatRequest {
            session: &session_id,
            message: prompt,
        };

        let response = self
            .post_with_reauth(&self.config.chat_endpoint, &body)
            .await?
            .error_for_status()?;
        let reply: ChatResponse = response.json().await?;

        turn.set_content(&reply.data);
        if !reply.session_id.is_empty() {
            turn.adopt_session_id(&reply.session_id);
        }
        Ok(())
    }

    /// The session id to send: the current one, or a locally synthesized id
    /// adopted before the first exchange.
    fn ensure_session_id(&self, turn: &TurnHandle) -> String {
        let id = turn.session_id();
        if !id.is_empty() {
            return id;
        }
        let id = Uuid::new_v4().to_string();
        debug!("synthesized local session id {id}");
        turn.adopt_session_id(&id);
        id
    }

    /// POST with bearer auth; on an unauthorized response, run one
    /// interactive sign-in and retry once. The only condition that retries.
    async fn post_with_reauth<T: Serialize>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        let response = self.post_json(url, body).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        warn!("unauthorized response; attempting interactive sign-in");
        self.auth.sign_in().await?;
        self.post_json(url, body).await
    }

    async fn post_json<T: Serialize>(&self, url: &str, body: &T) -> Result<reqwest::Response> {
        let mut request = self.http.post(url).json(body);
        if let Some(token) = self.auth.access_token() {
            request = request.bearer_auth(token);
        }
        Ok(request.send().await?)
    }
}

/// The error text of a server failure object, if the value carries one.
fn error_message(value: &serde_json::Value) -> Option<String> {
    value
        .get("error")
        .or_else(|| value.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuth;
    use crate::session::Session;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn client() -> ChatClient {
        ChatClient::new(ClientConfig::default(), Arc::new(StaticAuth::new("token"))).unwrap()
    }

    fn chunks(parts: &[&str]) -> impl Stream<Item = std::result::Result<Bytes, Error>> + Unpin + use<> {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from(p.to_string())))
                .collect::<Vec<_>>(),
        )
    }

    fn reply_frame(content: &str, session_id: &str) -> String {
        format!(
            "data:{{\"type\":\"reply\",\"message_id\":\"m\",\"payload\":{{\"content\":\"{content}\",\"session_id\":\"{session_id}\",\"is_from_self\":false}}}}\n\n"
        )
    }

    fn watch_changes(session: &Session) -> (Arc<AtomicUsize>, crate::events::Subscription<crate::events::SessionEvent>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = session.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    #[tokio::test]
    async fn test_last_reply_wins_and_session_id_adopted() {
        let session = Session::new("S1", "Session 0");
        let (turn, cancel) = session.claim_turn(session.append_turn("hi"));

        let body = chunks(&[&reply_frame("first", "S2"), &reply_frame("second", "S2")]);
        client()
            .consume_frames(&turn, &cancel, body)
            .await
            .unwrap();

        assert_eq!(session.messages()[1].content, "second");
        assert_eq!(session.id(), "S2");
    }

    #[tokio::test]
    async fn test_empty_frame_yields_exactly_two_events() {
        let session = Session::new("S1", "Session 0");
        let index = session.append_turn("hi");
        let (turn, cancel) = session.claim_turn(index);
        let (count, _sub) = watch_changes(&session);

        // An entirely empty frame sits between the two real ones
        let chunk = format!("{}\n\n{}", reply_frame("one", "S1"), reply_frame("two", "S1"));
        client()
            .consume_frames(&turn, &cancel, chunks(&[&chunk]))
            .await
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(session.messages()[index].content, "two");
    }

    #[tokio::test]
    async fn test_frame_split_across_chunk_boundary() {
        let session = Session::new("S1", "Session 0");
        let index = session.append_turn("hi");
        let (turn, cancel) = session.claim_turn(index);

        let body = chunks(&[
            "data:{\"type\":\"reply\",\"paylo",
            "ad\":{\"content\":\"hi\",\"is_from_self\":false}}\n\n",
        ]);
        client()
            .consume_frames(&turn, &cancel, body)
            .await
            .unwrap();

        assert_eq!(session.messages()[index].content, "hi");
    }

    #[tokio::test]
    async fn test_heartbeat_mutates_nothing() {
        let session = Session::new("S1", "Session 0");
        let index = session.append_turn("hi");
        let (turn, cancel) = session.claim_turn(index);
        let (count, _sub) = watch_changes(&session);

        let body = chunks(&[
            "data:{\"type\":\"token_stat\",\"message_id\":\"heartbeat-123\",\"payload\":{\"token_count\":0}}\n\n",
        ]);
        client()
            .consume_frames(&turn, &cancel, body)
            .await
            .unwrap();

        let message = &session.messages()[index];
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(message.content, "");
        assert!(message.thought.is_none());
        assert!(message.references.is_empty());
        assert!(message.is_waiting);
    }

    #[tokio::test]
    async fn test_unauthorize_is_terminal() {
        let session = Session::new("S1", "Session 0");
        let index = session.append_turn("hi");
        let (turn, cancel) = session.claim_turn(index);

        let body = chunks(&[
            "data:{\"type\":\"unauthorize\",\"message_id\":\"m\",\"payload\":{\"content\":\"Session quota exceeded\"}}\n\n",
            &reply_frame("should not apply", "S9"),
        ]);
        client()
            .consume_frames(&turn, &cancel, body)
            .await
            .unwrap();

        assert_eq!(session.messages()[index].content, "Session quota exceeded");
        assert_eq!(session.id(), "S1");
    }

    #[tokio::test]
    async fn test_frame_without_prefix_surfaces_error_message() {
        let session = Session::new("S1", "Session 0");
        let index = session.append_turn("hi");
        let (turn, cancel) = session.claim_turn(index);

        let body = chunks(&["{\"message\":\"backend unavailable\"}\n\n"]);
        client()
            .consume_frames(&turn, &cancel, body)
            .await
            .unwrap();

        assert_eq!(session.messages()[index].content, "backend unavailable");
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_abort_stream() {
        let session = Session::new("S1", "Session 0");
        let index = session.append_turn("hi");
        let (turn, cancel) = session.claim_turn(index);

        let chunk = format!("data:{{not json}}\n\n{}", reply_frame("after", "S1"));
        client()
            .consume_frames(&turn, &cancel, chunks(&[&chunk]))
            .await
            .unwrap();

        assert_eq!(session.messages()[index].content, "after");
    }

    #[tokio::test]
    async fn test_thought_and_reference_replace_wholesale() {
        let session = Session::new("S1", "Session 0");
        let index = session.append_turn("hi");
        let (turn, cancel) = session.claim_turn(index);

        let body = chunks(&[
            "data:{\"type\":\"thought\",\"message_id\":\"m\",\"payload\":{\"procedures\":[{\"name\":\"a\",\"debugging\":{\"content\":\"thinking hard\"}}]}}\n\n",
            "data:{\"type\":\"thought\",\"message_id\":\"m\",\"payload\":{\"procedures\":[{\"name\":\"b\"}]}}\n\n",
            "data:{\"type\":\"reference\",\"message_id\":\"m\",\"payload\":{\"references\":[{\"name\":\"doc one\"},{\"name\":\"doc two\"}]}}\n\n",
            "data:{\"type\":\"reference\",\"message_id\":\"m\",\"payload\":{\"references\":[{\"name\":\"doc three\"}]}}\n\n",
        ]);
        client()
            .consume_frames(&turn, &cancel, body)
            .await
            .unwrap();

        let message = &session.messages()[index];
        // Second thought event has no debugging content: replaced with empty
        assert_eq!(message.thought.as_deref(), Some(""));
        assert_eq!(message.references.len(), 1);
        assert_eq!(message.references[0].name.as_deref(), Some("doc three"));
    }

    #[tokio::test]
    async fn test_reply_from_self_is_ignored() {
        let session = Session::new("S1", "Session 0");
        let index = session.append_turn("hi");
        let (turn, cancel) = session.claim_turn(index);

        let body = chunks(&[
            "data:{\"type\":\"reply\",\"message_id\":\"m\",\"payload\":{\"content\":\"echo\",\"is_from_self\":true}}\n\n",
        ]);
        client()
            .consume_frames(&turn, &cancel, body)
            .await
            .unwrap();

        assert_eq!(session.messages()[index].content, "");
    }

    #[tokio::test]
    async fn test_cancelled_token_exits_without_mutation() {
        let session = Session::new("S1", "Session 0");
        let index = session.append_turn("hi");
        let (turn, cancel) = session.claim_turn(index);
        let (count, _sub) = watch_changes(&session);

        cancel.cancel();
        let body = futures::stream::pending::<std::result::Result<Bytes, Error>>();
        client()
            .consume_frames(&turn, &cancel, Box::pin(body))
            .await
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(session.messages()[index].content, "");
    }

    #[tokio::test]
    async fn test_typeless_error_frame_surfaces_message() {
        let session = Session::new("S1", "Session 0");
        let index = session.append_turn("hi");
        let (turn, cancel) = session.claim_turn(index);

        // Server failures arrive prefixed but without a type field
        let body = chunks(&["data: {\"error\": \"SSE endpoint not configured\"}\n\n"]);
        client()
            .consume_frames(&turn, &cancel, body)
            .await
            .unwrap();

        assert_eq!(
            session.messages()[index].content,
            "SSE endpoint not configured"
        );
    }

    #[tokio::test]
    async fn test_cancel_wins_over_ready_chunk() {
        let session = Session::new("S1", "Session 0");
        let index = session.append_turn("hi");
        let (turn, cancel) = session.claim_turn(index);
        let (count, _sub) = watch_changes(&session);

        // Both select arms are ready at once; cancellation must be observed
        // before the chunk is applied
        cancel.cancel();
        let body = chunks(&[&reply_frame("stray", "S9")]);
        client()
            .consume_frames(&turn, &cancel, body)
            .await
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(session.messages()[index].content, "");
        assert_eq!(session.id(), "S1");
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_skipped() {
        let session = Session::new("S1", "Session 0");
        let index = session.append_turn("hi");
        let (turn, cancel) = session.claim_turn(index);

        let chunk = format!(
            "data:{{\"type\":\"metrics_v2\",\"message_id\":\"m\",\"payload\":{{}}}}\n\n{}",
            reply_frame("real", "S1")
        );
        client()
            .consume_frames(&turn, &cancel, chunks(&[&chunk]))
            .await
            .unwrap();

        assert_eq!(session.messages()[index].content, "real");
    }
}
