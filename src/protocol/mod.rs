//! Line protocol
//!
//! Newline-delimited UTF-8 in both directions. Each inbound line is either a
//! `/command` or plain chat text; each outbound line is a human-readable
//! notice.

pub mod command;
pub mod reply;

pub use command::{Command, CommandSpec, ParseError, COMMANDS};
