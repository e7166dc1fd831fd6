//! Reply lines sent to clients
//!
//! Replies are plain text meant for humans. Clients key off a few shapes
//! (`Welcome`, `@user joined [#room]`), so those are kept stable.

use super::command::COMMANDS;
use crate::store::{Message, RoomInfo};

/// Server notice
pub fn system(text: impl AsRef<str>) -> String {
    format!("< [System] {}", text.as_ref())
}

/// Error notice
pub fn error(text: impl AsRef<str>) -> String {
    format!("<! [System] {}", text.as_ref())
}

/// First line on a new connection
pub fn greeting() -> String {
    system("Welcome to spacecat! Log in with /user <name>")
}

/// Sent when an unauthenticated client sends anything but `/user`
pub fn login_required() -> String {
    error("Please set your username first with /user <name>")
}

/// Password prompt for an existing account
pub fn password_prompt(username: &str) -> String {
    system(format!("Password for @{username}:"))
}

/// Password prompt for a new account
pub fn new_account_prompt(username: &str) -> String {
    system(format!("New user @{username}. Choose a password:"))
}

/// Username already has a live session
pub fn username_taken(username: &str) -> String {
    error(format!(
        "Username @{username} is already taken. Try another one"
    ))
}

/// Login accepted
pub fn welcome(username: &str) -> String {
    system(format!("Welcome @{username}! You can now start chatting."))
}

/// Room chat line
pub fn chat(room: &str, username: &str, text: &str) -> String {
    format!("< [#{room}] @{username} {text}")
}

/// Whisper line, as seen by the recipient
pub fn whisper(room: &str, username: &str, text: &str) -> String {
    format!("< [#{room}] @{username} *whispered* \"{text}\"")
}

/// Someone entered a room
pub fn joined(username: &str, room: &str) -> String {
    system(format!("@{username} joined [#{room}]!"))
}

/// Someone moved out of a room
pub fn left(username: &str, room: &str) -> String {
    system(format!("@{username} left [#{room}]"))
}

/// Someone disconnected
pub fn departed(username: &str) -> String {
    system(format!("@{username} left the chat!"))
}

/// Room listing, one line per room
pub fn room_list(rooms: &[RoomInfo]) -> Vec<String> {
    if rooms.is_empty() {
        return vec![system("No rooms yet")];
    }

    let mut lines = Vec::with_capacity(rooms.len() + 1);
    lines.push(system("Rooms:"));
    for room in rooms {
        let marker = if room.locked { " [locked]" } else { "" };
        let noun = if room.member_count == 1 { "member" } else { "members" };
        lines.push(format!(
            "\t[#{}]{} {} {}",
            room.name, marker, room.member_count, noun
        ));
    }
    lines
}

/// History listing, oldest first
pub fn history(room: &str, messages: &[Message]) -> Vec<String> {
    if messages.is_empty() {
        return vec![system(format!("No history in [#{room}]"))];
    }

    let mut lines = Vec::with_capacity(messages.len() + 1);
    let noun = if messages.len() == 1 { "message" } else { "messages" };
    lines.push(system(format!("Last {} {noun} in [#{room}]:", messages.len())));
    for message in messages {
        lines.push(format!(
            "\t[{}] @{} {}",
            message.created_at, message.username, message.content
        ));
    }
    lines
}

/// Occupants of a room
pub fn who(room: &str, usernames: &[String]) -> String {
    let names: Vec<String> = usernames.iter().map(|n| format!("@{n}")).collect();
    system(format!("In [#{room}]: {}", names.join(", ")))
}

/// Pending knocks on a room
pub fn knocks(room: &str, usernames: &[String]) -> Vec<String> {
    if usernames.is_empty() {
        return vec![system(format!("Nobody is knocking on [#{room}]"))];
    }

    let mut lines = Vec::with_capacity(usernames.len() + 1);
    lines.push(system(format!("Knocking on [#{room}]:")));
    lines.extend(usernames.iter().map(|name| format!("\t@{name}")));
    lines
}

/// Command list built from the command table
pub fn help() -> Vec<String> {
    let mut lines = Vec::with_capacity(COMMANDS.len() + 1);
    lines.push(system("Commands:"));
    lines.extend(
        COMMANDS
            .iter()
            .map(|spec| format!("\t{:<26} {}", spec.usage, spec.summary)),
    );
    lines
}
