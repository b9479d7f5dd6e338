use serde::{Deserialize, Serialize};

use crate::types::Intent;

/// The four views of the client flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum View {
    #[default]
    Login,
    RoomList,
    JoinRoom,
    Chat { room_id: String },
}

impl View {
    pub fn current_room(&self) -> Option<&str> {
        match self {
            Self::Chat { room_id } => Some(room_id),
            Self::Login | Self::RoomList | Self::JoinRoom => None,
        }
    }

    /// Where `Cancel` leads from this view.
    pub fn cancel_target(&self) -> View {
        match self {
            Self::Login | Self::RoomList => Self::Login,
            Self::JoinRoom | Self::Chat { .. } => Self::RoomList,
        }
    }
}

/// What the engine has to do for one intent in the current view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Intent has no meaning in this view.
    Ignore,
    /// Replace the input buffer.
    EditInput(String),
    /// Move the room cursor to this index.
    MoveCursor(usize),
    /// Switch view without touching the backend.
    Navigate(View),
    /// Create a session from the input buffer.
    Login,
    /// Create a new room.
    CreateRoom,
    /// Enter a room selected from the room list.
    OpenRoom { room_id: String },
    /// Join the room named by the input buffer.
    JoinRoom,
    /// Send the input buffer to the room.
    Send { room_id: String },
}

/// Navigation state: current view plus the room-list cursor.
///
/// `route` is pure; the engine commits view changes only after the
/// side effects of a transition succeed.
#[derive(Debug, Clone, Default)]
pub struct NavigationStateMachine {
    view: View,
    cursor: usize,
}

impl NavigationStateMachine {
    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn route(&self, intent: &Intent, joined_rooms: &[String]) -> Transition {
        match (&self.view, intent) {
            (View::RoomList, Intent::Input(_)) => Transition::Ignore,
            (_, Intent::Input(text)) => Transition::EditInput(text.clone()),

            (view, Intent::Cancel) => Transition::Navigate(view.cancel_target()),

            (View::Login, Intent::Submit) => Transition::Login,
            (View::RoomList, Intent::Submit) => match self.selected_room(joined_rooms) {
                Some(room_id) => Transition::OpenRoom {
                    room_id: room_id.to_owned(),
                },
                None => Transition::Ignore,
            },
            (View::JoinRoom, Intent::Submit) => Transition::JoinRoom,
            (View::Chat { room_id }, Intent::Submit) => Transition::Send {
                room_id: room_id.clone(),
            },

            (View::RoomList, Intent::NavigateUp) => {
                Transition::MoveCursor(clamp_cursor(self.cursor.saturating_sub(1), joined_rooms))
            }
            (View::RoomList, Intent::NavigateDown) => {
                Transition::MoveCursor(clamp_cursor(self.cursor.saturating_add(1), joined_rooms))
            }
            (View::RoomList, Intent::EnterJoinFlow) => Transition::Navigate(View::JoinRoom),
            (View::RoomList, Intent::CreateRoom) => Transition::CreateRoom,

            (
                View::Login | View::JoinRoom | View::Chat { .. },
                Intent::NavigateUp
                | Intent::NavigateDown
                | Intent::EnterJoinFlow
                | Intent::CreateRoom,
            ) => Transition::Ignore,
        }
    }

    /// Commit a view change. Entering the room list re-clamps the cursor;
    /// leaving a chat puts the cursor on the room that was open.
    pub fn commit(&mut self, next: View, joined_rooms: &[String]) {
        if let (View::Chat { room_id }, View::RoomList) = (&self.view, &next)
            && let Some(index) = joined_rooms.iter().position(|id| id == room_id)
        {
            self.cursor = index;
        }
        self.view = next;
        self.cursor = clamp_cursor(self.cursor, joined_rooms);
    }

    pub fn set_cursor(&mut self, cursor: usize, joined_rooms: &[String]) {
        if self.view == View::RoomList {
            self.cursor = clamp_cursor(cursor, joined_rooms);
        }
    }

    fn selected_room<'a>(&self, joined_rooms: &'a [String]) -> Option<&'a str> {
        joined_rooms.get(self.cursor).map(String::as_str)
    }
}

fn clamp_cursor(cursor: usize, joined_rooms: &[String]) -> usize {
    cursor.min(joined_rooms.len().saturating_sub(1))
}
