//! Operator console
//!
//! Reads command lines from a source (stdin or the companion socket),
//! parses them and hands them to the controller that drives Discord

pub mod command;
pub mod stdin;

pub use command::{Command, CommandError, HELP};
pub use stdin::StdinSource;

use crate::player::PlayerError;
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Not in a voice channel, use 'join <channel_id>' first")]
    NoVoiceSession,
    #[error("Guild {0} is not known to the bot")]
    UnknownGuild(u64),
    #[error("Channel {0} is not known to the bot")]
    UnknownChannel(u64),
    #[error("Channel {0} is not a voice channel")]
    NotVoiceChannel(u64),
    #[error("Not joined to guild {0}")]
    NotJoined(u64),
    #[error("Voice connection failed: {0}")]
    Join(#[from] songbird::error::JoinError),
    #[error(transparent)]
    Player(#[from] PlayerError),
}

/// Executes parsed commands against Discord
#[async_trait]
pub trait Controller: Send + Sync {
    async fn execute(&self, command: Command) -> Result<String, ControlError>;
}

/// Somewhere command lines come from
#[async_trait]
pub trait LineSource: Send {
    /// Next line, or `None` once the source is closed
    async fn read_line(&mut self) -> io::Result<Option<String>>;

    /// Show the result of a command to whoever sent it
    async fn reply(&mut self, _text: &str) -> io::Result<()> {
        Ok(())
    }
}

/// Command dispatcher shared by every input source
pub struct Console<C: ?Sized> {
    controller: Arc<C>,
    online: watch::Sender<bool>,
}

impl<C: Controller + ?Sized> Console<C> {
    pub fn new(controller: Arc<C>) -> Self {
        let (online, _) = watch::channel(true);
        Self { controller, online }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Take the console offline and wake everything waiting on it
    pub fn shutdown(&self) {
        if self.online.send_replace(false) {
            info!("Console going offline");
        }
    }

    /// Resolves once the console is offline
    pub async fn wait_offline(&self) {
        let mut rx = self.online.subscribe();
        // Sender lives in self, so the channel can't close under us
        let _ = rx.wait_for(|online| !*online).await;
    }

    /// Read and execute lines from `source` until it closes or the console goes offline
    pub async fn start<S: LineSource + ?Sized>(&self, source: &mut S) -> io::Result<()> {
        while self.is_online() {
            let line = tokio::select! {
                line = source.read_line() => line?,
                _ = self.wait_offline() => break,
            };

            let Some(line) = line else {
                debug!("Console source closed");
                break;
            };

            if let Some(reply) = self.dispatch(&line).await {
                source.reply(&reply).await?;
            }
        }
        Ok(())
    }

    /// Run one command line, returning what to show the operator
    pub async fn dispatch(&self, line: &str) -> Option<String> {
        let words: Vec<&str> = line
            .split(' ')
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .collect();

        let command = match Command::parse(&words) {
            Ok(command) => command,
            Err(CommandError::Empty) => return None,
            Err(e) => {
                warn!("Rejected command '{}': {}", line.trim(), e);
                return Some(e.to_string());
            }
        };

        info!("Console command: {:?}", command);

        match command {
            Command::Help => Some(HELP.to_string()),
            Command::Quit => {
                self.shutdown();
                Some("Shutting down...".to_string())
            }
            command => match self.controller.execute(command).await {
                Ok(reply) => Some(reply),
                Err(e) => {
                    warn!("Command failed: {}", e);
                    Some(format!("Error: {}", e))
                }
            },
        }
    }
}
