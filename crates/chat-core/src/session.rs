use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity issued by the backend plus the rooms joined during this process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    session_id: String,
    username: String,
    #[serde(default)]
    joined_rooms: Vec<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    last_activity: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            username: username.into(),
            joined_rooms: Vec::new(),
            created_at: None,
            last_activity: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Joined room IDs in join order.
    pub fn joined_rooms(&self) -> &[String] {
        &self.joined_rooms
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn has_joined(&self, room_id: &str) -> bool {
        self.joined_rooms.iter().any(|id| id == room_id)
    }

    /// Record a joined room. Returns `false` when it was already present.
    pub fn join_room(&mut self, room_id: impl Into<String>) -> bool {
        let room_id = room_id.into();
        if self.has_joined(&room_id) {
            return false;
        }
        self.joined_rooms.push(room_id);
        true
    }

    /// Drop duplicate room IDs received from the backend, keeping first occurrences.
    pub fn normalized(mut self) -> Self {
        let rooms = std::mem::take(&mut self.joined_rooms);
        for room_id in rooms {
            self.join_room(room_id);
        }
        self
    }
}

/// Room metadata returned by room creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomRef {
    #[serde(rename = "room_id")]
    pub id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active_users: Vec<String>,
}

impl RoomRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: None,
            last_activity: None,
            active_users: Vec::new(),
        }
    }
}
