use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, PoisonError, RwLock},
};

use crate::types::Message;

/// Upper bound for one bulk history fetch.
pub const MAX_FETCH_LIMIT: u16 = 200;

#[derive(Debug, Default, Clone)]
struct RoomLog {
    messages: Vec<Message>,
    ids: HashSet<String>,
}

impl RoomLog {
    fn from_messages(messages: Vec<Message>) -> Self {
        let ids = messages
            .iter()
            .filter(|message| message.has_id())
            .map(|message| message.id.clone())
            .collect();
        Self { messages, ids }
    }

    fn push(&mut self, message: Message) -> bool {
        if message.has_id() && !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        true
    }
}

/// Per-room, append-only message log shared between the primary flow and
/// stream listeners.
///
/// Cloning yields another handle to the same store.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    rooms: Arc<RwLock<HashMap<String, RoomLog>>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace a room's log with a freshly fetched sequence.
    pub fn replace(&self, room_id: &str, messages: Vec<Message>) {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        rooms.insert(room_id.to_owned(), RoomLog::from_messages(messages));
    }

    /// Append an inbound message to the log of its own `room_id`.
    ///
    /// Returns `false` when a message with the same non-empty ID is already
    /// stored for that room.
    pub fn append(&self, message: Message) -> bool {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        rooms
            .entry(message.room_id.clone())
            .or_default()
            .push(message)
    }

    /// Messages for a room in arrival order, `None` when never loaded.
    pub fn messages(&self, room_id: &str) -> Option<Vec<Message>> {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        rooms.get(room_id).map(|log| log.messages.clone())
    }

    pub fn len(&self, room_id: &str) -> usize {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        rooms.get(room_id).map_or(0, |log| log.messages.len())
    }

    pub fn contains_room(&self, room_id: &str) -> bool {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        rooms.contains_key(room_id)
    }

    /// Clamp a requested fetch size into `1..=MAX_FETCH_LIMIT`.
    pub fn bounded_fetch_limit(requested: u16) -> u16 {
        requested.clamp(1, MAX_FETCH_LIMIT)
    }
}
