//! Maps typed lines to engine intents.

use chat_core::Intent;

/// What one line of stdin asks the client to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineCommand {
    Intents(Vec<Intent>),
    Quit,
}

pub fn parse_line(line: &str) -> LineCommand {
    let trimmed = line.trim();
    let (command, argument) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (trimmed, ""),
    };

    let intents = match (command, argument) {
        ("/quit", "") => return LineCommand::Quit,
        ("/back", "") => vec![Intent::Cancel],
        ("/up", "") => vec![Intent::NavigateUp],
        ("/down", "") => vec![Intent::NavigateDown],
        ("/new", "") => vec![Intent::CreateRoom],
        ("/join", "") => vec![Intent::EnterJoinFlow],
        ("/join", room_id) => vec![
            Intent::EnterJoinFlow,
            Intent::Input(room_id.to_owned()),
            Intent::Submit,
        ],
        ("", _) => vec![Intent::Submit],
        _ => vec![Intent::Input(line.to_owned()), Intent::Submit],
    };
    LineCommand::Intents(intents)
}
