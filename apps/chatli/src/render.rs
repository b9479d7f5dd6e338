//! Plain-text rendering of engine snapshots.

use std::fmt::Write as _;

use chat_core::{EngineSnapshot, Message, View};

const EMPTY_ROOM_LIST: &str = "  (no rooms yet: /new creates one, /join <id> joins one)";
const EMPTY_ROOM: &str = "  (no messages yet)";

/// Render one full frame for the current view.
pub fn render(snapshot: &EngineSnapshot) -> String {
    let mut out = String::new();
    match &snapshot.view {
        View::Login => {
            out.push_str("== login ==\n");
            out.push_str("type a username and press enter\n");
        }
        View::RoomList => {
            let user = snapshot.username.as_deref().unwrap_or("?");
            let _ = writeln!(out, "== rooms ({user}) ==");
            if snapshot.joined_rooms.is_empty() {
                out.push_str(EMPTY_ROOM_LIST);
                out.push('\n');
            }
            for (index, room_id) in snapshot.joined_rooms.iter().enumerate() {
                let marker = if index == snapshot.cursor { '>' } else { ' ' };
                let _ = writeln!(out, "{marker} {room_id}");
            }
            out.push_str("/up /down select, enter opens, /new, /join, /back logs out\n");
        }
        View::JoinRoom => {
            out.push_str("== join room ==\n");
            out.push_str("type a room id and press enter, /back to cancel\n");
        }
        View::Chat { room_id } => {
            let _ = writeln!(out, "== {room_id} ==");
            if snapshot.messages.is_empty() {
                out.push_str(EMPTY_ROOM);
                out.push('\n');
            }
            for message in &snapshot.messages {
                let own = snapshot.username.as_deref() == Some(message.user.as_str());
                out.push_str(&message_line(message, own));
                out.push('\n');
            }
        }
    }

    if let Some(status) = &snapshot.status_text {
        let _ = writeln!(out, "! {status}");
    }
    if let Some(error) = &snapshot.error_text {
        let _ = writeln!(out, "error: {error}");
    }
    out
}

fn message_line(message: &Message, own: bool) -> String {
    let marker = if own { '*' } else { ' ' };
    format!(
        "{marker}[{}] {}: {}",
        message.timestamp.format("%H:%M"),
        message.user,
        message.content
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn snapshot(view: View) -> EngineSnapshot {
        EngineSnapshot {
            view,
            cursor: 0,
            username: Some("alice".into()),
            joined_rooms: Vec::new(),
            messages: Vec::new(),
            input: String::new(),
            error_text: None,
            status_text: None,
        }
    }

    fn message(user: &str, content: &str) -> Message {
        Message::chat(
            user,
            "lobby",
            content,
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 5, 0).unwrap(),
        )
    }

    #[test]
    fn room_list_marks_cursor() {
        let mut snap = snapshot(View::RoomList);
        snap.joined_rooms = vec!["r1".into(), "r2".into()];
        snap.cursor = 1;

        let frame = render(&snap);
        assert!(frame.starts_with("== rooms (alice) ==\n"));
        assert!(frame.contains("  r1\n"));
        assert!(frame.contains("> r2\n"));
        assert!(!frame.contains(EMPTY_ROOM_LIST));
    }

    #[test]
    fn empty_room_list_shows_hint() {
        let frame = render(&snapshot(View::RoomList));
        assert!(frame.contains(EMPTY_ROOM_LIST));
    }

    #[test]
    fn chat_lists_messages_and_marks_own() {
        let mut snap = snapshot(View::Chat {
            room_id: "lobby".into(),
        });
        snap.messages = vec![message("bob", "hey"), message("alice", "hi")];

        let frame = render(&snap);
        assert!(frame.starts_with("== lobby ==\n"));
        assert!(frame.contains(" [09:05] bob: hey\n"));
        assert!(frame.contains("*[09:05] alice: hi\n"));
    }

    #[test]
    fn status_and_error_follow_the_view() {
        let mut snap = snapshot(View::JoinRoom);
        snap.status_text = Some("connection to room lobby lost: eof; reconnecting".into());
        snap.error_text = Some("failed to join room: room not found".into());

        let frame = render(&snap);
        assert!(frame.ends_with(
            "! connection to room lobby lost: eof; reconnecting\n\
             error: failed to join room: room not found\n"
        ));
    }
}
