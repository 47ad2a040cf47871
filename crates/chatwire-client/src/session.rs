use crate::accumulator::MessageAccumulator;
use crate::adapters::{build_adapter, ProviderAdapter};
use crate::config::ChatConfig;
use crate::dispatch::{Effect, EventDispatcher};
use chatwire_core::{
    Attachment, ChatError, ChatResult, ConversationTurn, LastError, ProtocolFrame, StreamingState,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Where the session is in the send cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Ready for a new turn. A failed turn also lands here, with `last_error` set.
    Idle,
    /// Request issued, no frame received yet.
    Sending,
    /// Frames are being applied to the assistant turn.
    Streaming,
}

/// Immutable view of a session, published after every change.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub turns: Vec<Arc<ConversationTurn>>,
    pub status: SessionStatus,
    pub last_error: Option<LastError>,
}

impl SessionSnapshot {
    /// Whether the last turn ended in (or reported) an error.
    pub fn has_error(&self) -> bool {
        self.last_error.is_some()
    }

    pub fn last_turn(&self) -> Option<&ConversationTurn> {
        self.turns.last().map(Arc::as_ref)
    }
}

/// What happened to a [`ChatSession::send`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The response ended normally. Mid-stream `error` events may still have
    /// set `last_error`.
    Completed,
    /// The request or the stream failed.
    Failed(LastError),
    /// Another turn was in flight; nothing changed.
    Ignored,
    /// [`ChatSession::cancel`] was called before the response ended.
    Cancelled,
}

#[derive(Debug)]
struct SessionState {
    turns: MessageAccumulator,
    status: SessionStatus,
    last_error: Option<LastError>,
}

/// Everything `send` needs after the optimistic turns are in place.
struct Pending {
    generation: u64,
    turn: ConversationTurn,
    history: Vec<Arc<ConversationTurn>>,
    rollback_len: usize,
}

/// Drives one conversation against one backend.
///
/// The session owns the timeline: adapters produce frames, the dispatcher
/// applies them, and only the session decides which turn they land on. At
/// most one turn is in flight. Every in-flight response is tagged with a
/// generation number; [`ChatSession::cancel`] and each new send bump it, and
/// frames from an older generation are discarded before they reach the
/// timeline.
pub struct ChatSession {
    session_id: Uuid,
    adapter: Box<dyn ProviderAdapter>,
    dispatcher: EventDispatcher,
    state: Mutex<SessionState>,
    generation: watch::Sender<u64>,
    publisher: watch::Sender<SessionSnapshot>,
}

impl ChatSession {
    /// Opens a session against the backend described by `config`.
    pub fn new(config: &ChatConfig) -> ChatResult<Self> {
        let adapter = build_adapter(&config.provider, &config.session)?;
        Ok(Self::with_adapter(adapter))
    }

    /// Opens a session over an already constructed adapter.
    pub fn with_adapter(adapter: Box<dyn ProviderAdapter>) -> Self {
        let session_id = Uuid::new_v4();
        let (generation, _) = watch::channel(0);
        let (publisher, _) = watch::channel(SessionSnapshot {
            session_id,
            turns: Vec::new(),
            status: SessionStatus::Idle,
            last_error: None,
        });
        info!(%session_id, provider = adapter.name(), "Chat session opened");
        Self {
            session_id,
            adapter,
            dispatcher: EventDispatcher::new(),
            state: Mutex::new(SessionState {
                turns: MessageAccumulator::new(),
                status: SessionStatus::Idle,
                last_error: None,
            }),
            generation,
            publisher,
        }
    }

    /// Correlation id sent to the backend with every request.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().status
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.publisher.borrow().clone()
    }

    /// A receiver that is notified after every change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.publisher.subscribe()
    }

    /// Sends a user turn and streams the answer into the timeline.
    ///
    /// The user turn and an empty assistant placeholder are appended before
    /// the request goes out. Returns [`SendOutcome::Ignored`] without touching
    /// the timeline if a turn is already in flight.
    pub async fn send(&self, text: impl Into<String>, attachments: Vec<Attachment>) -> SendOutcome {
        let Some(pending) = self.begin(text.into(), attachments) else {
            debug!(session_id = %self.session_id, "Turn already in flight, ignoring send");
            return SendOutcome::Ignored;
        };
        let generation = pending.generation;
        let mut cancelled = self.generation.subscribe();

        let opened = tokio::select! {
            biased;
            _ = cancelled.changed() => return SendOutcome::Cancelled,
            opened = self.adapter.open(self.session_id, &pending.turn, &pending.history) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return self.fail(generation, pending.rollback_len, &e),
        };

        loop {
            let item = tokio::select! {
                biased;
                _ = cancelled.changed() => {
                    stream.abort();
                    return SendOutcome::Cancelled;
                }
                item = stream.next() => item,
            };
            match item {
                Some(Ok(frame)) => {
                    if !self.apply_frame(generation, frame) {
                        stream.abort();
                        return SendOutcome::Cancelled;
                    }
                }
                Some(Err(e)) => return self.fail(generation, pending.rollback_len, &e),
                None => return self.complete(generation),
            }
        }
    }

    /// Abandons the turn in flight, if any.
    ///
    /// Content already applied stays and the assistant turn is frozen as
    /// complete; a placeholder that received nothing is removed. Frames still
    /// arriving from the abandoned response are discarded.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        if state.status == SessionStatus::Idle {
            return false;
        }
        self.generation.send_modify(|g| *g += 1);
        if !state.turns.pop_empty_placeholder() {
            state.turns.finish_last(StreamingState::Complete);
        }
        state.status = SessionStatus::Idle;
        info!(session_id = %self.session_id, "Turn cancelled");
        self.publish(&state);
        true
    }

    /// Clears `last_error`.
    pub fn clear_error(&self) {
        let mut state = self.state.lock();
        if state.last_error.take().is_some() {
            self.publish(&state);
        }
    }

    // -- State transitions. None of these hold the lock across an await. --

    fn begin(&self, text: String, attachments: Vec<Attachment>) -> Option<Pending> {
        let mut state = self.state.lock();
        if state.status != SessionStatus::Idle {
            return None;
        }

        let mut generation = 0;
        self.generation.send_modify(|g| {
            *g += 1;
            generation = *g;
        });

        let rollback_len = state.turns.len();
        let history = state.turns.snapshot();
        let turn = ConversationTurn::user(text, attachments);
        state.turns.append(turn.clone());
        state.turns.append(ConversationTurn::assistant_placeholder());
        state.status = SessionStatus::Sending;
        state.last_error = None;

        info!(
            session_id = %self.session_id,
            generation,
            provider = self.adapter.name(),
            "Sending turn"
        );
        self.publish(&state);
        Some(Pending {
            generation,
            turn,
            history,
            rollback_len,
        })
    }

    fn is_current(&self, generation: u64) -> bool {
        *self.generation.borrow() == generation
    }

    /// Applies one frame if `generation` is still current.
    fn apply_frame(&self, generation: u64, frame: ProtocolFrame) -> bool {
        let mut state = self.state.lock();
        if !self.is_current(generation) {
            trace!(generation, event = frame.event_name(), "Discarding stale frame");
            return false;
        }

        if state.status == SessionStatus::Sending {
            state.status = SessionStatus::Streaming;
            state.turns.begin_streaming();
        }

        let event = frame.event_name();
        let dispatcher = self.dispatcher;
        match state.turns.update_last(|turn| dispatcher.apply(frame, turn)) {
            Some(Effect::Updated) => {}
            Some(Effect::Unchanged) => return true,
            Some(Effect::SurfaceError(message)) => {
                warn!(session_id = %self.session_id, %message, "Backend reported an error mid-stream");
                state.last_error = Some(LastError::Message(message));
            }
            None => {
                debug!(event, "No streaming assistant turn, frame dropped");
                return true;
            }
        }
        self.publish(&state);
        true
    }

    fn complete(&self, generation: u64) -> SendOutcome {
        let mut state = self.state.lock();
        if !self.is_current(generation) {
            return SendOutcome::Cancelled;
        }
        state.turns.finish_last(StreamingState::Complete);
        state.status = SessionStatus::Idle;
        debug!(session_id = %self.session_id, generation, "Turn complete");
        self.publish(&state);
        SendOutcome::Completed
    }

    /// Records a failure. A turn that never received a frame is rolled back
    /// entirely; partial content is kept and frozen as errored, and a
    /// placeholder still empty after its first frame is removed.
    fn fail(&self, generation: u64, rollback_len: usize, err: &ChatError) -> SendOutcome {
        let mut state = self.state.lock();
        if !self.is_current(generation) {
            return SendOutcome::Cancelled;
        }

        if state.status == SessionStatus::Sending {
            state.turns.truncate(rollback_len);
        } else if !state.turns.pop_empty_placeholder() {
            state.turns.finish_last(StreamingState::Errored);
        }
        let last_error = LastError::from(err);
        warn!(session_id = %self.session_id, error = %err, "Turn failed");
        state.last_error = Some(last_error.clone());
        state.status = SessionStatus::Idle;
        self.publish(&state);
        SendOutcome::Failed(last_error)
    }

    fn publish(&self, state: &SessionState) {
        self.publisher.send_replace(SessionSnapshot {
            session_id: self.session_id,
            turns: state.turns.snapshot(),
            status: state.status,
            last_error: state.last_error.clone(),
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::adapters::ChatRequest;
    use crate::stream::FrameStream;
    use async_trait::async_trait;
    use chatwire_core::{ChatResult, Role};
    use reqwest::header::HeaderMap;
    use reqwest::Method;
    use tokio::sync::mpsc;

    /// Answers every turn with frames pushed through a channel.
    struct ChannelAdapter {
        http: reqwest::Client,
        streams: Mutex<Vec<mpsc::Receiver<ChatResult<ProtocolFrame>>>>,
    }

    impl ChannelAdapter {
        fn new() -> (Self, mpsc::Sender<ChatResult<ProtocolFrame>>) {
            let (tx, rx) = mpsc::channel(16);
            let adapter = Self {
                http: reqwest::Client::new(),
                streams: Mutex::new(vec![rx]),
            };
            (adapter, tx)
        }
    }

    #[async_trait]
    impl ProviderAdapter for ChannelAdapter {
        fn name(&self) -> &'static str {
            "channel"
        }

        fn http(&self) -> &reqwest::Client {
            &self.http
        }

        fn build_request(
            &self,
            _session_id: Uuid,
            _turn: &ConversationTurn,
            _history: &[Arc<ConversationTurn>],
        ) -> ChatResult<ChatRequest> {
            Ok(ChatRequest {
                url: "http://unused".to_string(),
                method: Method::POST,
                headers: HeaderMap::new(),
                body: serde_json::Value::Null,
            })
        }

        async fn consume(&self, _response: reqwest::Response) -> ChatResult<FrameStream> {
            Err(ChatError::Protocol("not used".to_string()))
        }

        async fn open(
            &self,
            _session_id: Uuid,
            _turn: &ConversationTurn,
            _history: &[Arc<ConversationTurn>],
        ) -> ChatResult<FrameStream> {
            let rx = self.streams.lock().pop().expect("one stream per test");
            Ok(FrameStream::from_receiver(rx))
        }
    }

    fn token(s: &str) -> ProtocolFrame {
        ProtocolFrame::Token(s.to_string())
    }

    #[test]
    fn test_stale_generation_is_discarded() {
        let (adapter, _tx) = ChannelAdapter::new();
        let session = ChatSession::with_adapter(Box::new(adapter));

        let pending = session.begin("hi".to_string(), vec![]).unwrap();
        assert!(session.apply_frame(pending.generation, token("par")));
        assert!(session.cancel());

        assert!(!session.apply_frame(pending.generation, token("tial")));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert_eq!(snapshot.last_turn().unwrap().text(), "par");
        assert_eq!(snapshot.last_turn().unwrap().state, StreamingState::Complete);
    }

    #[test]
    fn test_begin_is_single_flight() {
        let (adapter, _tx) = ChannelAdapter::new();
        let session = ChatSession::with_adapter(Box::new(adapter));
        assert!(session.begin("one".to_string(), vec![]).is_some());
        assert!(session.begin("two".to_string(), vec![]).is_none());
        assert_eq!(session.snapshot().turns.len(), 2);
    }

    #[test]
    fn test_cancel_removes_empty_placeholder() {
        let (adapter, _tx) = ChannelAdapter::new();
        let session = ChatSession::with_adapter(Box::new(adapter));
        assert!(!session.cancel(), "nothing in flight");

        session.begin("hi".to_string(), vec![]).unwrap();
        assert!(session.cancel());
        let snapshot = session.snapshot();
        assert_eq!(snapshot.turns.len(), 1);
        assert!(!snapshot.has_error());
    }

    #[test]
    fn test_failure_before_first_frame_rolls_back() {
        let (adapter, _tx) = ChannelAdapter::new();
        let session = ChatSession::with_adapter(Box::new(adapter));
        let pending = session.begin("hi".to_string(), vec![]).unwrap();

        let outcome = session.fail(
            pending.generation,
            pending.rollback_len,
            &ChatError::Unauthenticated,
        );
        assert_eq!(outcome, SendOutcome::Failed(LastError::Unauthenticated));
        let snapshot = session.snapshot();
        assert!(snapshot.turns.is_empty());
        assert_eq!(snapshot.last_error.unwrap(), "unauthenticated");

        session.clear_error();
        assert!(!session.snapshot().has_error());
    }

    #[tokio::test]
    async fn test_send_streams_until_channel_closes() {
        let (adapter, tx) = ChannelAdapter::new();
        let session = ChatSession::with_adapter(Box::new(adapter));

        tx.send(Ok(token("Hi"))).await.unwrap();
        tx.send(Ok(ProtocolFrame::Error("slow backend".to_string())))
            .await
            .unwrap();
        tx.send(Ok(token(" there"))).await.unwrap();
        drop(tx);

        let outcome = session.send("hello", vec![]).await;
        assert_eq!(outcome, SendOutcome::Completed);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert_eq!(snapshot.turns.len(), 2);
        assert_eq!(snapshot.last_turn().unwrap().text(), "Hi there");
        assert_eq!(snapshot.last_turn().unwrap().state, StreamingState::Complete);
        assert_eq!(snapshot.last_error.unwrap(), "slow backend");
    }

    #[tokio::test]
    async fn test_mid_stream_failure_keeps_partial_content() {
        let (adapter, tx) = ChannelAdapter::new();
        let session = ChatSession::with_adapter(Box::new(adapter));

        tx.send(Ok(token("Hal"))).await.unwrap();
        tx.send(Err(ChatError::Http("Stream read error: reset".to_string())))
            .await
            .unwrap();

        let outcome = session.send("hello", vec![]).await;
        assert!(matches!(outcome, SendOutcome::Failed(_)));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.turns.len(), 2);
        assert_eq!(snapshot.last_turn().unwrap().text(), "Hal");
        assert_eq!(snapshot.last_turn().unwrap().state, StreamingState::Errored);
    }

    #[tokio::test]
    async fn test_failure_after_contentless_frame_drops_placeholder() {
        let (adapter, tx) = ChannelAdapter::new();
        let session = ChatSession::with_adapter(Box::new(adapter));

        tx.send(Ok(ProtocolFrame::Error("warn".to_string())))
            .await
            .unwrap();
        tx.send(Err(ChatError::Http("reset".to_string())))
            .await
            .unwrap();

        let outcome = session.send("hello", vec![]).await;
        assert!(matches!(outcome, SendOutcome::Failed(_)));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert_eq!(snapshot.turns.len(), 1);
        assert_eq!(snapshot.last_turn().unwrap().role, Role::User);
        assert!(snapshot.has_error());
    }
}
