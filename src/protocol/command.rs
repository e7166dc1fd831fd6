//! Command tokenizer and command table
//!
//! A line starting with `/` is split into a command name and its argument
//! text. The name is looked up in [`COMMANDS`], which also carries the usage
//! string and the minimum number of whitespace-separated arguments. Any
//! other line is chat text and becomes [`Command::Send`].

/// One entry of the command table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Name including the leading slash
    pub name: &'static str,
    /// Usage line shown on argument errors and by `/help`
    pub usage: &'static str,
    /// What the command does
    pub summary: &'static str,
    /// Minimum number of arguments
    pub min_args: usize,
}

/// Every command the server understands
pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "/user",
        usage: "/user <name>",
        summary: "log in or create an account",
        min_args: 1,
    },
    CommandSpec {
        name: "/send",
        usage: "/send <text>",
        summary: "say something in the current room",
        min_args: 0,
    },
    CommandSpec {
        name: "/whisper",
        usage: "/whisper <user> <text>",
        summary: "message someone in the same room privately",
        min_args: 2,
    },
    CommandSpec {
        name: "/rooms",
        usage: "/rooms",
        summary: "list rooms",
        min_args: 0,
    },
    CommandSpec {
        name: "/room",
        usage: "/room <name> [--locked]",
        summary: "create a room and move into it",
        min_args: 1,
    },
    CommandSpec {
        name: "/enter",
        usage: "/enter <name>",
        summary: "move into an open room",
        min_args: 1,
    },
    CommandSpec {
        name: "/who",
        usage: "/who",
        summary: "list who is in the current room",
        min_args: 0,
    },
    CommandSpec {
        name: "/history",
        usage: "/history",
        summary: "show recent messages of the current room",
        min_args: 0,
    },
    CommandSpec {
        name: "/knock",
        usage: "/knock <name>",
        summary: "ask to be let into a locked room",
        min_args: 1,
    },
    CommandSpec {
        name: "/peephole",
        usage: "/peephole",
        summary: "list knocks on the room you host",
        min_args: 0,
    },
    CommandSpec {
        name: "/help",
        usage: "/help",
        summary: "show this list",
        min_args: 0,
    },
    CommandSpec {
        name: "/exit",
        usage: "/exit",
        summary: "leave the server",
        min_args: 0,
    },
];

/// Flag marking a new room as locked
pub const LOCKED_FLAG: &str = "--locked";

/// Longest accepted user or room name
pub const MAX_NAME_LEN: usize = 32;

/// A parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/user <name>`
    User {
        /// Requested username
        username: String,
    },
    /// `/send <text>` or a plain chat line; `text` is trimmed and may be empty
    Send {
        /// Message text
        text: String,
    },
    /// `/whisper <user> <text>`
    Whisper {
        /// Recipient
        target: String,
        /// Message text
        text: String,
    },
    /// `/rooms`
    Rooms,
    /// `/room <name> [--locked]`
    Room {
        /// New room name
        name: String,
        /// Whether the room is locked
        locked: bool,
    },
    /// `/enter <name>`
    Enter {
        /// Room name
        name: String,
    },
    /// `/who`
    Who,
    /// `/history`
    History,
    /// `/knock <name>`
    Knock {
        /// Locked room name
        name: String,
    },
    /// `/peephole`
    Peephole,
    /// `/help`
    Help,
    /// `/exit`
    Exit,
}

/// Why a line could not be parsed
///
/// The `Display` text is sent back to the client as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Name not in the command table
    #[error("Unknown command {0}. Type /help for the command list")]
    Unknown(String),

    /// Fewer arguments than the command needs
    #[error("Missing argument. Usage: {usage}")]
    MissingArgument {
        /// Usage line of the command
        usage: &'static str,
    },

    /// User or room name with characters outside `[A-Za-z0-9_-]` or too long
    #[error("Invalid name {0:?}: use up to 32 letters, digits, '_' or '-'")]
    InvalidName(String),

    /// Extra or unknown argument
    #[error("Unexpected argument {arg:?}. Usage: {usage}")]
    UnexpectedArgument {
        /// Offending argument
        arg: String,
        /// Usage line of the command
        usage: &'static str,
    },
}

/// Look up a command by name (with leading slash)
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}

/// Whether a user or room name is acceptable
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn valid_name(name: &str) -> Result<String, ParseError> {
    if is_valid_name(name) {
        Ok(name.to_owned())
    } else {
        Err(ParseError::InvalidName(name.to_owned()))
    }
}

/// Split `text` at the first run of whitespace
fn split_first(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim_start()),
        None => (text, ""),
    }
}

impl Command {
    /// Parse one line (without its trailing newline)
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();

        if !line.starts_with('/') {
            return Ok(Command::Send {
                text: line.to_owned(),
            });
        }

        let (name, rest) = split_first(line);
        let spec = lookup(name).ok_or_else(|| ParseError::Unknown(name.to_owned()))?;

        let args: Vec<&str> = rest.split_whitespace().collect();
        if args.len() < spec.min_args {
            return Err(ParseError::MissingArgument { usage: spec.usage });
        }

        let command = match spec.name {
            "/user" => Command::User {
                username: valid_name(args[0])?,
            },
            "/send" => Command::Send {
                text: rest.trim().to_owned(),
            },
            "/whisper" => {
                let (target, text) = split_first(rest);
                Command::Whisper {
                    target: target.to_owned(),
                    text: text.trim().to_owned(),
                }
            }
            "/rooms" => Command::Rooms,
            "/room" => Self::parse_room(spec, &args)?,
            "/enter" => Command::Enter {
                name: valid_name(args[0])?,
            },
            "/who" => Command::Who,
            "/history" => Command::History,
            "/knock" => Command::Knock {
                name: valid_name(args[0])?,
            },
            "/peephole" => Command::Peephole,
            "/help" => Command::Help,
            "/exit" => Command::Exit,
            other => return Err(ParseError::Unknown(other.to_owned())),
        };

        Ok(command)
    }

    fn parse_room(spec: &'static CommandSpec, args: &[&str]) -> Result<Self, ParseError> {
        let mut name = None;
        let mut locked = false;

        for arg in args {
            if *arg == LOCKED_FLAG {
                locked = true;
            } else if name.is_none() && !arg.starts_with("--") {
                name = Some(valid_name(arg)?);
            } else {
                return Err(ParseError::UnexpectedArgument {
                    arg: (*arg).to_owned(),
                    usage: spec.usage,
                });
            }
        }

        let name = name.ok_or(ParseError::MissingArgument { usage: spec.usage })?;
        Ok(Command::Room { name, locked })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_send() {
        assert_eq!(
            Command::parse("  hello there  "),
            Ok(Command::Send {
                text: "hello there".into()
            })
        );
    }

    #[test]
    fn test_send_keeps_inner_spacing() {
        assert_eq!(
            Command::parse("/send a  b   c"),
            Ok(Command::Send {
                text: "a  b   c".into()
            })
        );
        assert_eq!(Command::parse("/send   "), Ok(Command::Send { text: String::new() }));
    }

    #[test]
    fn test_whisper() {
        assert_eq!(
            Command::parse("/whisper bob  meet me  later"),
            Ok(Command::Whisper {
                target: "bob".into(),
                text: "meet me  later".into()
            })
        );
        assert_eq!(
            Command::parse("/whisper bob"),
            Err(ParseError::MissingArgument {
                usage: "/whisper <user> <text>"
            })
        );
    }

    #[test]
    fn test_room_flags() {
        assert_eq!(
            Command::parse("/room secret --locked"),
            Ok(Command::Room {
                name: "secret".into(),
                locked: true
            })
        );
        assert_eq!(
            Command::parse("/room --locked secret"),
            Ok(Command::Room {
                name: "secret".into(),
                locked: true
            })
        );
        assert_eq!(
            Command::parse("/room lobby"),
            Ok(Command::Room {
                name: "lobby".into(),
                locked: false
            })
        );
        assert!(matches!(
            Command::parse("/room lobby --open"),
            Err(ParseError::UnexpectedArgument { .. })
        ));
        assert!(matches!(
            Command::parse("/room a b"),
            Err(ParseError::UnexpectedArgument { .. })
        ));
        assert!(matches!(
            Command::parse("/room --locked"),
            Err(ParseError::MissingArgument { .. })
        ));
    }

    #[test]
    fn test_missing_arguments_use_table() {
        for spec in COMMANDS.iter().filter(|s| s.min_args > 0) {
            assert_eq!(
                Command::parse(spec.name),
                Err(ParseError::MissingArgument { usage: spec.usage }),
                "{}",
                spec.name
            );
        }
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            Command::parse("/dance now"),
            Err(ParseError::Unknown("/dance".into()))
        );
        // Prefix matching is not a thing
        assert_eq!(
            Command::parse("/roomsx"),
            Err(ParseError::Unknown("/roomsx".into()))
        );
    }

    #[test]
    fn test_names_validated() {
        assert_eq!(
            Command::parse("/user al!ce"),
            Err(ParseError::InvalidName("al!ce".into()))
        );
        assert_eq!(
            Command::parse("/enter dev-ops_2"),
            Ok(Command::Enter {
                name: "dev-ops_2".into()
            })
        );
        assert!(!is_valid_name(&"x".repeat(MAX_NAME_LEN + 1)));
        assert!(is_valid_name(&"x".repeat(MAX_NAME_LEN)));
    }

    #[test]
    fn test_no_argument_commands() {
        assert_eq!(Command::parse("/rooms"), Ok(Command::Rooms));
        assert_eq!(Command::parse("/who"), Ok(Command::Who));
        assert_eq!(Command::parse("/history"), Ok(Command::History));
        assert_eq!(Command::parse("/peephole"), Ok(Command::Peephole));
        assert_eq!(Command::parse("/help"), Ok(Command::Help));
        assert_eq!(Command::parse("/exit"), Ok(Command::Exit));
        assert_eq!(
            Command::parse("/knock secret"),
            Ok(Command::Knock {
                name: "secret".into()
            })
        );
    }

    #[test]
    fn test_every_table_entry_parses() {
        for spec in COMMANDS {
            let line = match spec.min_args {
                0 => spec.name.to_owned(),
                1 => format!("{} name", spec.name),
                _ => format!("{} name text", spec.name),
            };
            assert!(Command::parse(&line).is_ok(), "{line}");
        }
    }
}
