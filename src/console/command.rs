//! Console commands and their parser

use crate::config::MAX_VOLUME;
use crate::playlist::PlaybackMode;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command '{0}', try 'help'")]
    Unknown(String),
    #[error("'{command}' needs <{argument}>")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("Invalid <{argument}> for '{command}': {value}")]
    InvalidArgument {
        command: &'static str,
        argument: &'static str,
        value: String,
    },
}

/// A command typed at the console or sent by the companion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Guilds,
    Channels { guild_id: u64 },
    Join { channel_id: u64 },
    Leave,
    Focus { guild_id: u64 },
    Play { source: String },
    Skip,
    Prev,
    Pause,
    Resume,
    Stop,
    Clear,
    Queue,
    Remove { position: usize },
    Mode(PlaybackMode),
    Volume(u8),
    Quit,
}

pub const HELP: &str = "\
Commands:
  help                     Show this help
  status                   Show connection and playback state
  guilds                   List guilds the bot is in
  channels <guild_id>      List voice channels of a guild
  join <channel_id>        Join a voice channel and focus its guild
  leave                    Leave the focused guild's voice channel
  focus <guild_id>         Send playback commands to another joined guild
  play <source>            Queue a file path or URL, start if idle
  skip | next              Play the next entry (also leaves a repeating one)
  prev | previous          Play the previous entry
  pause                    Pause playback
  resume                   Resume playback
  stop                     Stop playback, keep the queue
  clear                    Stop playback and empty the queue
  queue | list             Show the queue
  remove <position>        Remove an entry from the queue
  mode <normal|loop|repeat>  Set the playback mode
  volume <0-200>           Set the volume in percent
  quit | exit              Disconnect and exit";

impl Command {
    /// Parse a command from its words
    pub fn parse<S: AsRef<str>>(words: &[S]) -> Result<Self, CommandError> {
        let (name, args) = words.split_first().ok_or(CommandError::Empty)?;
        let name = name.as_ref().to_lowercase();
        let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();

        let command = match name.as_str() {
            "help" | "?" => Command::Help,
            "status" => Command::Status,
            "guilds" => Command::Guilds,
            "channels" => Command::Channels {
                guild_id: id_arg("channels", "guild_id", &args)?,
            },
            "join" => Command::Join {
                channel_id: id_arg("join", "channel_id", &args)?,
            },
            "leave" => Command::Leave,
            "focus" => Command::Focus {
                guild_id: id_arg("focus", "guild_id", &args)?,
            },
            "play" => {
                let source = args
                    .iter()
                    .filter(|a| !a.is_empty())
                    .copied()
                    .collect::<Vec<_>>()
                    .join(" ");
                if source.is_empty() {
                    return Err(CommandError::MissingArgument {
                        command: "play",
                        argument: "source",
                    });
                }
                Command::Play { source }
            }
            "skip" | "next" => Command::Skip,
            "prev" | "previous" => Command::Prev,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "stop" => Command::Stop,
            "clear" => Command::Clear,
            "queue" | "list" => Command::Queue,
            "remove" => {
                let value = first_arg("remove", "position", &args)?;
                let position = value
                    .parse::<usize>()
                    .ok()
                    .filter(|p| *p > 0)
                    .ok_or_else(|| invalid("remove", "position", value))?;
                Command::Remove { position }
            }
            "mode" => {
                let value = first_arg("mode", "normal|loop|repeat", &args)?;
                let mode = PlaybackMode::from_str(value)
                    .ok_or_else(|| invalid("mode", "normal|loop|repeat", value))?;
                Command::Mode(mode)
            }
            "volume" => {
                let value = first_arg("volume", "percent", &args)?;
                let volume = value
                    .trim_end_matches('%')
                    .parse::<u8>()
                    .ok()
                    .filter(|v| *v <= MAX_VOLUME)
                    .ok_or_else(|| invalid("volume", "percent", value))?;
                Command::Volume(volume)
            }
            "quit" | "exit" => Command::Quit,
            _ => return Err(CommandError::Unknown(name)),
        };

        Ok(command)
    }

    #[cfg(test)]
    pub fn parse_line(line: &str) -> Result<Self, CommandError> {
        let words: Vec<&str> = line.split_whitespace().collect();
        Self::parse(&words)
    }
}

fn first_arg<'a>(
    command: &'static str,
    argument: &'static str,
    args: &[&'a str],
) -> Result<&'a str, CommandError> {
    args.iter()
        .copied()
        .find(|a| !a.is_empty())
        .ok_or(CommandError::MissingArgument { command, argument })
}

fn id_arg(command: &'static str, argument: &'static str, args: &[&str]) -> Result<u64, CommandError> {
    let value = first_arg(command, argument, args)?;
    // Discord snowflakes are never zero
    value
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| invalid(command, argument, value))
}

fn invalid(command: &'static str, argument: &'static str, value: &str) -> CommandError {
    CommandError::InvalidArgument {
        command,
        argument,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_commands() {
        assert_eq!(Command::parse_line("help"), Ok(Command::Help));
        assert_eq!(Command::parse_line("  SKIP "), Ok(Command::Skip));
        assert_eq!(Command::parse_line("next"), Ok(Command::Skip));
        assert_eq!(Command::parse_line("previous"), Ok(Command::Prev));
        assert_eq!(Command::parse_line("list"), Ok(Command::Queue));
        assert_eq!(Command::parse_line("exit"), Ok(Command::Quit));
    }

    #[test]
    fn test_play_keeps_spaces_in_source() {
        assert_eq!(
            Command::parse_line("play music/My Song.mp3"),
            Ok(Command::Play {
                source: "music/My Song.mp3".to_string()
            })
        );
        // Companion lines are split on single spaces, so words can be empty
        assert_eq!(
            Command::parse(&["play", "", "a", "", "b"]),
            Ok(Command::Play {
                source: "a b".to_string()
            })
        );
        assert_eq!(
            Command::parse_line("play"),
            Err(CommandError::MissingArgument {
                command: "play",
                argument: "source"
            })
        );
    }

    #[test]
    fn test_ids() {
        assert_eq!(
            Command::parse_line("join 123456789012345678"),
            Ok(Command::Join {
                channel_id: 123456789012345678
            })
        );
        assert!(matches!(
            Command::parse_line("join 0"),
            Err(CommandError::InvalidArgument { .. })
        ));
        assert!(matches!(
            Command::parse_line("channels general"),
            Err(CommandError::InvalidArgument { .. })
        ));
        assert!(matches!(
            Command::parse_line("focus"),
            Err(CommandError::MissingArgument { .. })
        ));
    }

    #[test]
    fn test_mode_and_volume() {
        assert_eq!(Command::parse_line("mode Loop"), Ok(Command::Mode(PlaybackMode::Loop)));
        assert!(Command::parse_line("mode shuffle").is_err());
        assert_eq!(Command::parse_line("volume 150%"), Ok(Command::Volume(150)));
        assert_eq!(Command::parse_line("volume 0"), Ok(Command::Volume(0)));
        assert!(Command::parse_line("volume 201").is_err());
        assert!(Command::parse_line("volume loud").is_err());
    }

    #[test]
    fn test_remove() {
        assert_eq!(Command::parse_line("remove 2"), Ok(Command::Remove { position: 2 }));
        assert!(Command::parse_line("remove 0").is_err());
    }

    #[test]
    fn test_errors() {
        assert_eq!(Command::parse_line("   "), Err(CommandError::Empty));
        assert_eq!(
            Command::parse_line("dance"),
            Err(CommandError::Unknown("dance".to_string()))
        );
    }
}
