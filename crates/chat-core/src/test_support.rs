//! Scriptable in-memory backend used by engine, stream and runtime tests.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::{broadcast, mpsc};

use crate::{
    backend::{ChatBackend, MessageSink, MessageSource, StreamHandle},
    error::{ChatError, ChatErrorCategory},
    retry::RetryPolicy,
    session::{RoomRef, Session},
    stream::StreamSettings,
    types::{Message, StreamEvent},
};

type Inbound = Result<Message, ChatError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    CreateSession(String),
    CreateRoom,
    JoinRoom(String),
    FetchHistory(String, u16),
    OpenStream(String),
}

/// Test-side end of one opened stream.
#[derive(Clone)]
pub(crate) struct MockPeer {
    inbound: mpsc::UnboundedSender<Inbound>,
    sent: Arc<Mutex<Vec<Message>>>,
}

impl MockPeer {
    pub(crate) fn deliver(&self, message: Message) {
        self.inbound
            .send(Ok(message))
            .expect("stream reader should still be alive");
    }

    pub(crate) fn fail(&self) {
        let _ = self.inbound.send(Err(read_error()));
    }

    /// Whether the client side has dropped this stream's read half.
    pub(crate) fn is_detached(&self) -> bool {
        self.inbound.is_closed()
    }

    pub(crate) fn sent(&self) -> Vec<Message> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    session_error: Option<ChatError>,
    create_room_error: Option<ChatError>,
    join_error: Option<ChatError>,
    history_error: Option<ChatError>,
    open_failures: u32,
    histories: HashMap<String, Vec<Message>>,
    next_room: u32,
    echo: bool,
    peers: HashMap<String, Vec<MockPeer>>,
}

#[derive(Default)]
pub(crate) struct MockBackend {
    state: Mutex<MockState>,
    fail_writes: Arc<AtomicBool>,
    hang_close: Arc<AtomicBool>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state lock")
    }

    /// Echo every sent message back through the room's stream.
    pub(crate) fn set_echo(&self, echo: bool) {
        self.state().echo = echo;
    }

    pub(crate) fn set_history(&self, room_id: &str, messages: Vec<Message>) {
        self.state().histories.insert(room_id.to_owned(), messages);
    }

    pub(crate) fn fail_session(&self, error: Option<ChatError>) {
        self.state().session_error = error;
    }

    pub(crate) fn fail_create_room(&self, error: Option<ChatError>) {
        self.state().create_room_error = error;
    }

    pub(crate) fn fail_join(&self, error: Option<ChatError>) {
        self.state().join_error = error;
    }

    pub(crate) fn fail_history(&self, error: Option<ChatError>) {
        self.state().history_error = error;
    }

    /// Make the next `count` handshakes fail.
    pub(crate) fn fail_next_opens(&self, count: u32) {
        self.state().open_failures = count;
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `close` on every write half wait forever.
    pub(crate) fn hang_close(&self, hang: bool) {
        self.hang_close.store(hang, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub(crate) fn open_calls(&self, room_id: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| **call == Call::OpenStream(room_id.to_owned()))
            .count()
    }

    /// Most recently opened stream for the room.
    pub(crate) fn peer(&self, room_id: &str) -> MockPeer {
        self.state()
            .peers
            .get(room_id)
            .and_then(|peers| peers.last().cloned())
            .expect("room should have an opened stream")
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn create_session(&self, display_name: &str) -> Result<Session, ChatError> {
        let mut state = self.state();
        state.calls.push(Call::CreateSession(display_name.to_owned()));
        if let Some(err) = state.session_error.clone() {
            return Err(err);
        }
        Ok(Session::new(format!("sess-{display_name}"), display_name))
    }

    async fn create_room(&self, _session: &Session) -> Result<RoomRef, ChatError> {
        let mut state = self.state();
        state.calls.push(Call::CreateRoom);
        if let Some(err) = state.create_room_error.clone() {
            return Err(err);
        }
        state.next_room += 1;
        Ok(RoomRef::new(format!("r{}", state.next_room)))
    }

    async fn join_room(&self, _session: &Session, room_id: &str) -> Result<(), ChatError> {
        let mut state = self.state();
        state.calls.push(Call::JoinRoom(room_id.to_owned()));
        match state.join_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn fetch_history(
        &self,
        _session: &Session,
        room_id: &str,
        limit: u16,
    ) -> Result<Vec<Message>, ChatError> {
        let mut state = self.state();
        state
            .calls
            .push(Call::FetchHistory(room_id.to_owned(), limit));
        if let Some(err) = state.history_error.clone() {
            return Err(err);
        }
        let all = state.histories.get(room_id).cloned().unwrap_or_default();
        let skip = all.len().saturating_sub(usize::from(limit));
        Ok(all.into_iter().skip(skip).collect())
    }

    async fn open_stream(
        &self,
        _session: &Session,
        room_id: &str,
    ) -> Result<StreamHandle, ChatError> {
        let mut state = self.state();
        state.calls.push(Call::OpenStream(room_id.to_owned()));
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(ChatError::new(
                ChatErrorCategory::Connect,
                "handshake_failed",
                "connection refused",
            ));
        }

        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let peer = MockPeer {
            inbound: inbound.clone(),
            sent: Arc::clone(&sent),
        };
        state
            .peers
            .entry(room_id.to_owned())
            .or_default()
            .push(peer);

        let sink = MockSink {
            sent,
            echo: state.echo.then_some(inbound),
            fail_writes: Arc::clone(&self.fail_writes),
            hang_close: Arc::clone(&self.hang_close),
        };
        Ok(StreamHandle::new(sink, MockSource { inbound: inbound_rx }))
    }
}

struct MockSink {
    sent: Arc<Mutex<Vec<Message>>>,
    echo: Option<mpsc::UnboundedSender<Inbound>>,
    fail_writes: Arc<AtomicBool>,
    hang_close: Arc<AtomicBool>,
}

#[async_trait]
impl MessageSink for MockSink {
    async fn send(&mut self, message: &Message) -> Result<(), ChatError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ChatError::new(
                ChatErrorCategory::Write,
                "write_failed",
                "broken pipe",
            ));
        }
        self.sent.lock().expect("sent lock").push(message.clone());
        if let Some(echo) = &self.echo {
            let _ = echo.send(Ok(message.clone()));
        }
        Ok(())
    }

    async fn close(&mut self) {
        if self.hang_close.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

struct MockSource {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl MessageSource for MockSource {
    async fn next_message(&mut self) -> Result<Message, ChatError> {
        match self.inbound.recv().await {
            Some(result) => result,
            None => Err(read_error()),
        }
    }
}

fn read_error() -> ChatError {
    ChatError::new(
        ChatErrorCategory::Read,
        "stream_closed",
        "connection reset by peer",
    )
}

/// Stream settings with a short reconnect delay.
pub(crate) fn fast_settings() -> StreamSettings {
    StreamSettings {
        reconnect: RetryPolicy::fixed(10),
        io_timeout: Duration::from_secs(2),
        event_buffer: 64,
    }
}

pub(crate) fn message(id: &str, user: &str, room_id: &str, content: &str) -> Message {
    let mut msg = Message::chat(
        user,
        room_id,
        content,
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    );
    msg.id = id.to_owned();
    msg
}

/// Receive events until one matches, failing the test after a few seconds.
pub(crate) async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<StreamEvent>,
    mut matches: F,
) -> StreamEvent
where
    F: FnMut(&StreamEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for stream event")
}

/// Poll a condition until it holds, failing the test after a few seconds.
pub(crate) async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition did not become true in time");
}
