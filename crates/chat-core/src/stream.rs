//! Per-room stream ownership, listening and reconnection.
//!
//! Every open room gets one supervisor task. The supervisor is the only
//! reader of the room's stream: it delivers inbound messages to the
//! [`HistoryStore`], and when a read fails it drops the write half, waits
//! out the retry delay and performs a fresh handshake with the same
//! session. The replacement read half is only polled after the old one
//! has been dropped, so a room never has two listeners.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::{Mutex, broadcast},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    backend::{ChatBackend, MessageSink, MessageSource, with_deadline},
    error::ChatError,
    history::HistoryStore,
    retry::RetryPolicy,
    session::Session,
    types::{Message, StreamEvent},
};

/// Outcome of [`StreamManager::open_stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A new handshake was performed and a supervisor spawned.
    Opened,
    /// An existing entry (healthy or reconnecting) was kept.
    Reused,
}

/// Tuning for stream supervision.
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Delay schedule between reconnection attempts.
    pub reconnect: RetryPolicy,
    /// Deadline for one handshake or one write.
    pub io_timeout: Duration,
    /// Capacity of the stream event broadcast channel.
    pub event_buffer: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect: RetryPolicy::default(),
            io_timeout: Duration::from_secs(10),
            event_buffer: 256,
        }
    }
}

struct SinkSlot {
    generation: u64,
    sink: Option<Box<dyn MessageSink>>,
}

struct RoomStream {
    slot: Arc<Mutex<SinkSlot>>,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Counts supervisors that are currently blocked on a read.
struct ListenerGuard<'a>(&'a AtomicUsize);

impl<'a> ListenerGuard<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns the `room_id -> stream` map. Only the primary flow mutates the map;
/// supervisors touch nothing but their own sink slot.
pub struct StreamManager {
    backend: Arc<dyn ChatBackend>,
    history: HistoryStore,
    settings: StreamSettings,
    events: broadcast::Sender<StreamEvent>,
    streams: HashMap<String, RoomStream>,
    listeners: Arc<AtomicUsize>,
}

impl StreamManager {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        history: HistoryStore,
        settings: StreamSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));
        Self {
            backend,
            history,
            settings,
            events,
            streams: HashMap::new(),
            listeners: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Subscribe to stream lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Ensure a stream exists for `room_id`, reusing a live entry.
    pub async fn open_stream(
        &mut self,
        session: &Session,
        room_id: &str,
    ) -> Result<OpenOutcome, ChatError> {
        if let Some(existing) = self.streams.get(room_id) {
            if !existing.task.is_finished() {
                trace!(room_id, "reusing open stream");
                return Ok(OpenOutcome::Reused);
            }
            debug!(room_id, "discarding finished stream entry");
            if let Some(stale) = self.streams.remove(room_id) {
                stale.stop.cancel();
            }
        }

        let handle = with_deadline(
            self.settings.io_timeout,
            "open_stream",
            self.backend.open_stream(session, room_id),
        )
        .await?;

        let slot = Arc::new(Mutex::new(SinkSlot {
            generation: 1,
            sink: Some(handle.sink),
        }));
        let stop = CancellationToken::new();
        let supervisor = Supervisor {
            room_id: room_id.to_owned(),
            session: session.clone(),
            backend: Arc::clone(&self.backend),
            history: self.history.clone(),
            events: self.events.clone(),
            settings: self.settings,
            slot: Arc::clone(&slot),
            stop: stop.child_token(),
            listeners: Arc::clone(&self.listeners),
        };
        let task = tokio::spawn(supervisor.run(handle.source));

        info!(room_id, "stream opened");
        let _ = self.events.send(StreamEvent::Connected {
            room_id: room_id.to_owned(),
            generation: 1,
        });
        self.streams
            .insert(room_id.to_owned(), RoomStream { slot, stop, task });
        Ok(OpenOutcome::Opened)
    }

    /// Write one message to the room's current stream handle.
    ///
    /// Write failures are returned to the caller and never start a reconnect.
    pub async fn send(&self, room_id: &str, message: &Message) -> Result<(), ChatError> {
        let entry = self
            .streams
            .get(room_id)
            .ok_or_else(|| ChatError::not_connected(room_id))?;

        let mut slot = entry.slot.lock().await;
        let sink = slot
            .sink
            .as_mut()
            .ok_or_else(|| ChatError::reconnecting(room_id))?;

        with_deadline(self.settings.io_timeout, "send", sink.send(message)).await
    }

    pub fn has_stream(&self, room_id: &str) -> bool {
        self.streams.contains_key(room_id)
    }

    /// Whether the room has an entry with a usable write half.
    pub async fn is_healthy(&self, room_id: &str) -> bool {
        match self.streams.get(room_id) {
            Some(entry) => entry.slot.lock().await.sink.is_some(),
            None => false,
        }
    }

    /// Number of successful handshakes for the room's current entry.
    pub async fn generation(&self, room_id: &str) -> Option<u64> {
        match self.streams.get(room_id) {
            Some(entry) => Some(entry.slot.lock().await.generation),
            None => None,
        }
    }

    /// Supervisors currently waiting on an inbound message, across all rooms.
    pub fn listener_count(&self) -> usize {
        self.listeners.load(Ordering::SeqCst)
    }

    pub fn room_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.streams.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop every supervisor and close every write half.
    pub async fn close_all(&mut self) {
        let limit = self.settings.io_timeout;
        for (room_id, entry) in self.streams.drain() {
            entry.stop.cancel();
            if let Err(err) = entry.task.await {
                warn!(room_id = %room_id, error = %err, "stream supervisor ended abnormally");
            }
            let sink = entry.slot.lock().await.sink.take();
            if let Some(sink) = sink {
                close_sink(&room_id, sink, limit).await;
            }
            debug!(room_id = %room_id, "stream closed");
        }
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        for entry in self.streams.values() {
            entry.stop.cancel();
        }
    }
}

struct Supervisor {
    room_id: String,
    session: Session,
    backend: Arc<dyn ChatBackend>,
    history: HistoryStore,
    events: broadcast::Sender<StreamEvent>,
    settings: StreamSettings,
    slot: Arc<Mutex<SinkSlot>>,
    stop: CancellationToken,
    listeners: Arc<AtomicUsize>,
}

impl Supervisor {
    async fn run(self, mut source: Box<dyn MessageSource>) {
        loop {
            let failure = {
                let _listening = ListenerGuard::enter(&self.listeners);
                tokio::select! {
                    _ = self.stop.cancelled() => return,
                    err = self.listen(source.as_mut()) => err,
                }
            };
            drop(source);

            let sink = self.slot.lock().await.sink.take();
            if let Some(sink) = sink {
                close_sink(&self.room_id, sink, self.settings.io_timeout).await;
            }
            warn!(room_id = %self.room_id, error = %failure, "stream read failed; reconnecting");
            let _ = self.events.send(StreamEvent::Disconnected {
                room_id: self.room_id.clone(),
                error: failure,
            });

            source = match self.reconnect().await {
                Some(source) => source,
                None => return,
            };
        }
    }

    /// Deliver inbound messages until the stream fails.
    async fn listen(&self, source: &mut dyn MessageSource) -> ChatError {
        loop {
            match source.next_message().await {
                Ok(message) => {
                    if message.room_id != self.room_id {
                        debug!(
                            stream_room = %self.room_id,
                            message_room = %message.room_id,
                            "inbound message targets another room"
                        );
                    }
                    let room_id = message.room_id.clone();
                    if self.history.append(message) {
                        let _ = self.events.send(StreamEvent::MessageDelivered { room_id });
                    } else {
                        trace!(room_id = %room_id, "dropped duplicate inbound message");
                    }
                }
                Err(err) => return err,
            }
        }
    }

    /// Retry the handshake until it succeeds or the supervisor is stopped.
    async fn reconnect(&self) -> Option<Box<dyn MessageSource>> {
        let mut attempt: u32 = 0;
        loop {
            let delay = self.settings.reconnect.delay_for_attempt(attempt);
            tokio::select! {
                _ = self.stop.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
            attempt = attempt.saturating_add(1);

            let result = tokio::select! {
                _ = self.stop.cancelled() => return None,
                result = with_deadline(
                    self.settings.io_timeout,
                    "open_stream",
                    self.backend.open_stream(&self.session, &self.room_id),
                ) => result,
            };

            match result {
                Ok(handle) => {
                    let generation = {
                        let mut slot = self.slot.lock().await;
                        slot.generation += 1;
                        slot.sink = Some(handle.sink);
                        slot.generation
                    };
                    info!(room_id = %self.room_id, generation, attempt, "stream reconnected");
                    let _ = self.events.send(StreamEvent::Reconnected {
                        room_id: self.room_id.clone(),
                        generation,
                    });
                    return Some(handle.source);
                }
                Err(error) => {
                    warn!(room_id = %self.room_id, attempt, error = %error, "reconnect attempt failed");
                    let _ = self.events.send(StreamEvent::ReconnectFailed {
                        room_id: self.room_id.clone(),
                        attempt,
                        error,
                    });
                }
            }
        }
    }
}

/// Close a write half that is no longer reachable through its slot.
async fn close_sink(room_id: &str, mut sink: Box<dyn MessageSink>, limit: Duration) {
    let closed = with_deadline(limit, "close", async {
        sink.close().await;
        Ok(())
    })
    .await;
    if let Err(err) = closed {
        debug!(room_id = %room_id, error = %err, "abandoned stream close");
    }
}
