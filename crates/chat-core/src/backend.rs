//! Backend client contract consumed by the engine and the stream manager.

use std::{future::Future, time::Duration};

use async_trait::async_trait;

use crate::{
    error::ChatError,
    session::{RoomRef, Session},
    types::Message,
};

/// Write half of an open room stream.
#[async_trait]
pub trait MessageSink: Send {
    async fn send(&mut self, message: &Message) -> Result<(), ChatError>;

    /// Best-effort close; errors are swallowed by implementations.
    async fn close(&mut self) {}
}

/// Read half of an open room stream.
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next inbound message. An error ends the stream.
    async fn next_message(&mut self) -> Result<Message, ChatError>;
}

/// Result of a successful stream handshake.
pub struct StreamHandle {
    pub sink: Box<dyn MessageSink>,
    pub source: Box<dyn MessageSource>,
}

impl StreamHandle {
    pub fn new(sink: impl MessageSink + 'static, source: impl MessageSource + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}

/// Request/response operations plus the stream handshake.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn create_session(&self, display_name: &str) -> Result<Session, ChatError>;

    async fn create_room(&self, session: &Session) -> Result<RoomRef, ChatError>;

    /// Joining an already-joined room must succeed.
    async fn join_room(&self, session: &Session, room_id: &str) -> Result<(), ChatError>;

    async fn fetch_history(
        &self,
        session: &Session,
        room_id: &str,
        limit: u16,
    ) -> Result<Vec<Message>, ChatError>;

    async fn open_stream(&self, session: &Session, room_id: &str)
    -> Result<StreamHandle, ChatError>;
}

/// Run a backend call with a deadline, mapping expiry to a `Timeout` error.
pub async fn with_deadline<T, F>(limit: Duration, action: &str, call: F) -> Result<T, ChatError>
where
    F: Future<Output = Result<T, ChatError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ChatError::timed_out(action, limit)),
    }
}
