use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::{
    backend::{ChatBackend, with_deadline},
    error::ChatError,
    history::HistoryStore,
    retry::RetryPolicy,
    session::Session,
    state_machine::{NavigationStateMachine, Transition, View},
    stream::{OpenOutcome, StreamManager, StreamSettings},
    types::{EngineSnapshot, Intent, Message, StreamEvent},
};

const DEFAULT_HISTORY_LIMIT: u16 = 50;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_EVENT_BUFFER: usize = 256;

/// Engine tuning supplied by the embedding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Messages fetched per bulk history load.
    pub history_limit: u16,
    /// Deadline for each backend request, handshake and write.
    pub request_timeout: Duration,
    /// Delay schedule for stream reconnection.
    pub reconnect: RetryPolicy,
    /// Capacity of the stream event channel.
    pub event_buffer: usize,
}

impl EngineConfig {
    fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            reconnect: self.reconnect,
            io_timeout: self.request_timeout,
            event_buffer: self.event_buffer,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect: RetryPolicy::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Client state plus the side effects of every navigation transition.
///
/// The engine is driven by one caller at a time: `handle` processes one
/// intent to completion before the next one is accepted.
pub struct ChatEngine {
    backend: Arc<dyn ChatBackend>,
    config: EngineConfig,
    nav: NavigationStateMachine,
    session: Option<Session>,
    history: HistoryStore,
    streams: StreamManager,
    input: String,
    error_text: Option<String>,
    reconnect_status: BTreeMap<String, String>,
    status_room: Option<String>,
}

impl ChatEngine {
    pub fn new(backend: Arc<dyn ChatBackend>, config: EngineConfig) -> Self {
        let history = HistoryStore::new();
        let streams = StreamManager::new(
            Arc::clone(&backend),
            history.clone(),
            config.stream_settings(),
        );
        Self {
            backend,
            config,
            nav: NavigationStateMachine::default(),
            session: None,
            history,
            streams,
            input: String::new(),
            error_text: None,
            reconnect_status: BTreeMap::new(),
            status_room: None,
        }
    }

    pub fn view(&self) -> &View {
        self.nav.view()
    }

    pub fn cursor(&self) -> usize {
        self.nav.cursor()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn joined_rooms(&self) -> &[String] {
        rooms_of(&self.session)
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn streams(&self) -> &StreamManager {
        &self.streams
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn error_text(&self) -> Option<&str> {
        self.error_text.as_deref()
    }

    /// Transient reconnection status, cleared once the room reconnects.
    pub fn status_text(&self) -> Option<&str> {
        self.status_room
            .as_ref()
            .and_then(|room_id| self.reconnect_status.get(room_id))
            .map(String::as_str)
    }

    pub fn subscribe_stream_events(&self) -> broadcast::Receiver<StreamEvent> {
        self.streams.subscribe()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let messages = self
            .view()
            .current_room()
            .and_then(|room_id| self.history.messages(room_id))
            .unwrap_or_default();

        EngineSnapshot {
            view: self.view().clone(),
            cursor: self.cursor(),
            username: self.session.as_ref().map(|s| s.username().to_owned()),
            joined_rooms: self.joined_rooms().to_vec(),
            messages,
            input: self.input.clone(),
            error_text: self.error_text.clone(),
            status_text: self.status_text().map(str::to_owned),
        }
    }

    /// Process one user intent.
    pub async fn handle(&mut self, intent: Intent) {
        let transition = self.nav.route(&intent, rooms_of(&self.session));
        trace!(view = ?self.nav.view(), ?transition, "routing intent");

        match transition {
            Transition::Ignore => {}
            Transition::EditInput(text) => self.input = text,
            Transition::MoveCursor(cursor) => {
                self.nav.set_cursor(cursor, rooms_of(&self.session));
            }
            Transition::Navigate(view) => {
                self.error_text = None;
                self.change_view(view);
            }
            Transition::Login => self.login().await,
            Transition::CreateRoom => self.create_room().await,
            Transition::OpenRoom { room_id } => self.open_room(room_id).await,
            Transition::JoinRoom => self.join_room().await,
            Transition::Send { room_id } => self.send_message(room_id).await,
        }
    }

    /// Fold a stream lifecycle event into the transient status line.
    pub fn apply_stream_event(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Connected { .. } | StreamEvent::MessageDelivered { .. } => {}
            StreamEvent::Disconnected { room_id, error } => {
                self.set_status(
                    room_id,
                    format!(
                        "connection to room {room_id} lost: {}; reconnecting",
                        error.message
                    ),
                );
            }
            StreamEvent::ReconnectFailed {
                room_id,
                attempt,
                error,
            } => {
                self.set_status(
                    room_id,
                    format!(
                        "reconnect to room {room_id} failed (attempt {attempt}): {}",
                        error.message
                    ),
                );
            }
            StreamEvent::Reconnected { room_id, .. } => {
                self.reconnect_status.remove(room_id);
                if self.status_room.as_deref() == Some(room_id.as_str()) {
                    self.status_room = self.reconnect_status.keys().next().cloned();
                }
            }
        }
    }

    /// Close every stream. The engine stays usable; rooms reopen on entry.
    pub async fn shutdown(&mut self) {
        info!(rooms = self.streams.room_ids().len(), "closing streams");
        self.close_streams().await;
    }

    async fn login(&mut self) {
        let name = self.input.trim().to_owned();
        if name.is_empty() {
            self.error_text = Some("username must not be empty".to_owned());
            return;
        }

        let result = with_deadline(
            self.config.request_timeout,
            "create_session",
            self.backend.create_session(&name),
        )
        .await;

        match result {
            Ok(session) => {
                let session = session.normalized();
                if let Some(previous) = &self.session
                    && previous.session_id() != session.session_id()
                {
                    info!(
                        previous = previous.username(),
                        "replacing session; closing its streams"
                    );
                    self.close_streams().await;
                }
                info!(
                    username = session.username(),
                    rooms = session.joined_rooms().len(),
                    "session created"
                );
                self.session = Some(session);
                self.error_text = None;
                self.change_view(View::RoomList);
            }
            Err(err) => self.fail("failed to create session", err),
        }
    }

    async fn create_room(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };

        let result = with_deadline(
            self.config.request_timeout,
            "create_room",
            self.backend.create_room(session),
        )
        .await;

        match result {
            Ok(room) => {
                if let Some(session) = self.session.as_mut() {
                    info!(room_id = %room.id, "room created");
                    session.join_room(room.id);
                }
                self.error_text = None;
            }
            Err(err) => self.fail("failed to create room", err),
        }
    }

    async fn open_room(&mut self, room_id: String) {
        let Some(session) = self.session.clone() else {
            return;
        };

        if let Err(err) = self.ensure_stream(&session, &room_id).await {
            self.fail("failed to connect to room", err);
            return;
        }
        if let Err(err) = self.load_history(&session, &room_id).await {
            self.fail("failed to load messages", err);
            return;
        }

        self.error_text = None;
        self.change_view(View::Chat { room_id });
    }

    async fn join_room(&mut self) {
        let room_id = self.input.trim().to_owned();
        if room_id.is_empty() {
            return;
        }
        let Some(session) = self.session.clone() else {
            return;
        };

        let joined = with_deadline(
            self.config.request_timeout,
            "join_room",
            self.backend.join_room(&session, &room_id),
        )
        .await;
        if let Err(err) = joined {
            self.fail("failed to join room", err);
            return;
        }
        // A stream opened here survives a later history failure and is
        // reused by the next attempt.
        if let Err(err) = self.ensure_stream(&session, &room_id).await {
            self.fail("failed to connect to room", err);
            return;
        }
        if let Err(err) = self.load_history(&session, &room_id).await {
            self.fail("failed to load messages", err);
            return;
        }

        if let Some(session) = self.session.as_mut()
            && session.join_room(room_id.clone())
        {
            info!(room_id = %room_id, "room joined");
        }
        self.error_text = None;
        self.change_view(View::Chat { room_id });
    }

    async fn send_message(&mut self, room_id: String) {
        if self.input.is_empty() {
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };

        let message = Message::chat(
            session.username(),
            room_id.as_str(),
            self.input.clone(),
            Utc::now(),
        );
        match self.streams.send(&room_id, &message).await {
            Ok(()) => {
                debug!(room_id = %room_id, "message sent");
                self.input.clear();
                self.error_text = None;
            }
            Err(err) => self.fail("failed to send message", err),
        }
    }

    async fn ensure_stream(&mut self, session: &Session, room_id: &str) -> Result<(), ChatError> {
        let outcome = self.streams.open_stream(session, room_id).await?;
        if outcome == OpenOutcome::Reused {
            debug!(room_id, "stream already open");
        }
        Ok(())
    }

    /// Bulk load: fetch recent messages and replace the room's history.
    async fn load_history(&self, session: &Session, room_id: &str) -> Result<(), ChatError> {
        let limit = HistoryStore::bounded_fetch_limit(self.config.history_limit);
        let messages = with_deadline(
            self.config.request_timeout,
            "fetch_history",
            self.backend.fetch_history(session, room_id, limit),
        )
        .await?;

        debug!(room_id, count = messages.len(), "history loaded");
        self.history.replace(room_id, messages);
        Ok(())
    }

    fn change_view(&mut self, next: View) {
        if self.nav.view() == &next {
            return;
        }
        self.nav.commit(next, rooms_of(&self.session));
        self.input.clear();
    }

    /// Closed streams never report `Reconnected`, so their status goes too.
    async fn close_streams(&mut self) {
        self.streams.close_all().await;
        self.reconnect_status.clear();
        self.status_room = None;
    }

    fn set_status(&mut self, room_id: &str, text: String) {
        self.reconnect_status.insert(room_id.to_owned(), text);
        self.status_room = Some(room_id.to_owned());
    }

    fn fail(&mut self, context: &str, err: ChatError) {
        warn!(error = %err, "{context}");
        self.error_text = Some(format!("{context}: {}", err.message));
    }
}

fn rooms_of(session: &Option<Session>) -> &[String] {
    session.as_ref().map_or(&[], Session::joined_rooms)
}
