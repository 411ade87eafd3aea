//! Discord event handler, track event handler and the console controller

use crate::audio::Transcoder;
use crate::companion::CompanionServer;
use crate::config::Config;
use crate::console::{Command, Console, ControlError, Controller, StdinSource, HELP};
use crate::player::{GuildPlayer, PlayerManager, PlayerStatus};
use chrono::{DateTime, Utc};
use serenity::all::{
    Cache, ChannelId, ChannelType, Client, Context, EventHandler, GatewayIntents, GuildId, Ready,
};
use serenity::async_trait;
use songbird::events::{Event, EventContext, EventHandler as VoiceEventHandler};
use songbird::tracks::PlayMode;
use songbird::{SerenityInit, Songbird};
use std::fmt::Write;
use std::sync::{Arc, Weak};
use tracing::{error, info, warn};

/// Main event handler for the bot
pub struct Handler;

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("Logged in as {}", ready.user.name);
        info!("Member of {} guilds, type 'help' for console commands", ready.guilds.len());
    }

    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        for guild_id in guilds {
            let name = ctx.cache.guild(guild_id).map(|g| g.name.clone());
            info!("Guild {} ({})", guild_id, name.as_deref().unwrap_or("unknown"));
        }
    }
}

/// Track event handler: moves the player on when a track ends or fails
#[derive(Clone)]
pub struct TrackEndNotifier {
    player: Weak<GuildPlayer>,
    generation: u64,
}

impl TrackEndNotifier {
    pub fn new(player: Weak<GuildPlayer>, generation: u64) -> Self {
        Self { player, generation }
    }
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            for (state, _) in tracks.iter() {
                if let PlayMode::Errored(e) = &state.playing {
                    warn!("Track failed: {:?}", e);
                }
            }
        }

        if let Some(player) = self.player.upgrade() {
            player.on_track_end(self.generation).await;
        }

        None
    }
}

/// Runs console commands against the gateway cache and voice manager
pub struct DiscordController {
    cache: Arc<Cache>,
    songbird: Arc<Songbird>,
    players: Arc<PlayerManager>,
    started_at: DateTime<Utc>,
}

impl DiscordController {
    pub fn new(cache: Arc<Cache>, songbird: Arc<Songbird>, players: Arc<PlayerManager>) -> Self {
        Self {
            cache,
            songbird,
            players,
            started_at: Utc::now(),
        }
    }

    fn focused(&self) -> Result<Arc<GuildPlayer>, ControlError> {
        self.players.focused().ok_or(ControlError::NoVoiceSession)
    }

    fn guild_name(&self, guild_id: GuildId) -> String {
        self.cache
            .guild(guild_id)
            .map(|g| g.name.clone())
            .unwrap_or_else(|| format!("Guild_{}", guild_id))
    }

    async fn join(&self, channel_id: u64) -> Result<String, ControlError> {
        let channel_id = ChannelId::new(channel_id);

        // Cache refs must not be held across an await
        let (guild_id, channel_name) = {
            let channel = self
                .cache
                .channel(channel_id)
                .ok_or(ControlError::UnknownChannel(channel_id.get()))?;
            if !matches!(channel.kind, ChannelType::Voice | ChannelType::Stage) {
                return Err(ControlError::NotVoiceChannel(channel_id.get()));
            }
            (channel.guild_id, channel.name.clone())
        };

        let call = self.songbird.join(guild_id, channel_id).await?;
        self.players.attach(guild_id, call);

        info!("Joined voice channel {} in guild {}", channel_id, guild_id);
        Ok(format!(
            "Joined #{} in {}",
            channel_name,
            self.guild_name(guild_id)
        ))
    }

    async fn leave(&self, guild_id: GuildId) -> Result<(), ControlError> {
        self.players.remove(guild_id).await;
        self.songbird.leave(guild_id).await?;
        info!("Left voice in guild {}", guild_id);
        Ok(())
    }

    /// Leave every voice channel, used on shutdown
    pub async fn leave_all(&self) {
        for guild_id in self.players.guild_ids() {
            if let Err(e) = self.leave(guild_id).await {
                warn!("Failed to leave guild {}: {}", guild_id, e);
            }
        }
    }

    fn list_guilds(&self) -> String {
        let mut guilds: Vec<(GuildId, String)> = self
            .cache
            .guilds()
            .into_iter()
            .map(|id| (id, self.guild_name(id)))
            .collect();
        if guilds.is_empty() {
            return "Not in any guild".to_string();
        }
        guilds.sort_by(|a, b| a.1.cmp(&b.1));

        let mut out = String::from("Guilds:");
        for (id, name) in guilds {
            let _ = write!(out, "\n  {}  {}", id, name);
        }
        out
    }

    fn list_channels(&self, guild_id: u64) -> Result<String, ControlError> {
        let guild = self
            .cache
            .guild(GuildId::new(guild_id))
            .ok_or(ControlError::UnknownGuild(guild_id))?;

        let mut channels: Vec<(u16, ChannelId, String)> = guild
            .channels
            .values()
            .filter(|c| matches!(c.kind, ChannelType::Voice | ChannelType::Stage))
            .map(|c| (c.position, c.id, c.name.clone()))
            .collect();
        if channels.is_empty() {
            return Ok(format!("{} has no voice channels", guild.name));
        }
        channels.sort();

        let mut out = format!("Voice channels in {}:", guild.name);
        for (_, id, name) in channels {
            let _ = write!(out, "\n  {}  {}", id, name);
        }
        Ok(out)
    }

    async fn status(&self) -> String {
        let user = self.cache.current_user().name.clone();
        let mut out = format!(
            "Logged in as {}, up {}, {} guilds",
            user,
            format_elapsed(Utc::now() - self.started_at),
            self.cache.guild_count()
        );

        let focused = self.players.focused_guild();
        let guild_ids = self.players.guild_ids();
        if guild_ids.is_empty() {
            out.push_str("\nNot in a voice channel");
        }
        for guild_id in guild_ids {
            let Some(player) = self.players.get(guild_id) else {
                continue;
            };
            let status = player.status().await;
            let marker = if focused == Some(guild_id) { "*" } else { " " };
            let _ = write!(
                out,
                "\n{} {}: {}",
                marker,
                self.guild_name(guild_id),
                format_now_playing(&status, Utc::now())
            );
        }
        out
    }
}

#[async_trait]
impl Controller for DiscordController {
    async fn execute(&self, command: Command) -> Result<String, ControlError> {
        match command {
            Command::Help => Ok(HELP.to_string()),
            Command::Status => Ok(self.status().await),
            Command::Guilds => Ok(self.list_guilds()),
            Command::Channels { guild_id } => self.list_channels(guild_id),
            Command::Join { channel_id } => self.join(channel_id).await,
            Command::Leave => {
                let guild_id = self
                    .players
                    .focused_guild()
                    .ok_or(ControlError::NoVoiceSession)?;
                self.leave(guild_id).await?;
                Ok(format!("Left {}", self.guild_name(guild_id)))
            }
            Command::Focus { guild_id } => {
                if !self.players.set_focus(GuildId::new(guild_id)) {
                    return Err(ControlError::NotJoined(guild_id));
                }
                Ok(format!("Focused {}", self.guild_name(GuildId::new(guild_id))))
            }
            Command::Play { source } => {
                let (position, started) = self.focused()?.enqueue(&source).await?;
                Ok(match started {
                    Some(track) => format!("Now playing {}", track.source),
                    None => format!("Queued {} at #{}", source, position),
                })
            }
            Command::Skip => Ok(match self.focused()?.skip().await? {
                Some(track) => format!("Now playing {}", track.source),
                None => "End of queue, playback stopped".to_string(),
            }),
            Command::Prev => {
                let track = self.focused()?.previous().await?;
                Ok(format!("Now playing {}", track.source))
            }
            Command::Pause => {
                let track = self.focused()?.pause().await?;
                Ok(format!("Paused {}", track.source))
            }
            Command::Resume => {
                let track = self.focused()?.resume().await?;
                Ok(format!("Resumed {}", track.source))
            }
            Command::Stop => Ok(match self.focused()?.stop().await {
                Some(track) => format!("Stopped {}", track.source),
                None => "Nothing is playing".to_string(),
            }),
            Command::Clear => {
                let removed = self.focused()?.clear().await;
                Ok(format!("Cleared {} entries", removed))
            }
            Command::Queue => {
                let status = self.focused()?.status().await;
                Ok(format_queue(&status, Utc::now()))
            }
            Command::Remove { position } => {
                let track = self.focused()?.remove(position).await?;
                Ok(format!("Removed {}", track.source))
            }
            Command::Mode(mode) => {
                self.focused()?.set_mode(mode).await;
                Ok(format!("Playback mode: {}", mode))
            }
            Command::Volume(volume) => {
                self.focused()?.set_volume(volume).await?;
                Ok(format!("Volume set to {}%", volume))
            }
            Command::Quit => Ok("Shutting down...".to_string()),
        }
    }
}

/// m:ss, or h:mm:ss past an hour
fn format_elapsed(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

fn format_now_playing(status: &PlayerStatus, now: DateTime<Utc>) -> String {
    match &status.now_playing {
        Some((track, started_at)) => format!(
            "{} {} [{}] ({}, volume {}%)",
            if status.paused { "Paused" } else { "Playing" },
            track.source,
            format_elapsed(now - *started_at),
            status.mode,
            status.volume
        ),
        None => format!("Idle ({}, volume {}%)", status.mode, status.volume),
    }
}

fn format_queue(status: &PlayerStatus, now: DateTime<Utc>) -> String {
    let mut out = format_now_playing(status, now);
    if status.queue.is_empty() {
        out.push_str("\nQueue is empty");
        return out;
    }
    for (i, track) in status.queue.iter().enumerate() {
        let marker = if status.current_index == Some(i) { ">" } else { " " };
        let _ = write!(out, "\n{} {}. {}", marker, i + 1, track.source);
    }
    out
}

/// Create and run the Discord bot until the console quits
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let transcoder = Transcoder::new(&config.ffmpeg_path);
    let players = Arc::new(PlayerManager::new(transcoder, config.default_volume));
    let songbird = Songbird::serenity();

    let intents = GatewayIntents::non_privileged() | GatewayIntents::GUILD_VOICE_STATES;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(Handler)
        .register_songbird_with(songbird.clone())
        .await?;

    let controller = Arc::new(DiscordController::new(
        client.cache.clone(),
        songbird,
        players,
    ));
    let console = Arc::new(Console::new(controller.clone()));

    let companion = if config.companion {
        Some(CompanionServer::bind(config.companion_addr()).await?)
    } else {
        None
    };

    let shard_manager = client.shard_manager.clone();
    let mut gateway = tokio::spawn(async move { client.start().await });

    {
        let console = console.clone();
        tokio::spawn(async move {
            let mut source = StdinSource::new();
            if let Err(e) = console.start(&mut source).await {
                error!("Console input failed: {}", e);
            }
            info!("Console input closed");
        });
    }

    if let Some(server) = companion {
        info!("Companion socket listening on {}", server.local_addr()?);
        let console = console.clone();
        tokio::spawn(async move { server.serve(console.as_ref()).await });
    }

    info!("Starting bot...");
    let gateway_result = tokio::select! {
        _ = console.wait_offline() => None,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            console.shutdown();
            None
        }
        result = &mut gateway => {
            console.shutdown();
            Some(result)
        }
    };

    controller.leave_all().await;

    let result = match gateway_result {
        Some(result) => result,
        None => {
            shard_manager.shutdown_all().await;
            gateway.await
        }
    };
    result??;

    info!("Bot stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Track;
    use crate::playlist::PlaybackMode;
    use chrono::Duration;

    fn status(now_playing: Option<(Track, DateTime<Utc>)>, queue: Vec<Track>) -> PlayerStatus {
        PlayerStatus {
            guild_id: GuildId::new(1),
            now_playing,
            paused: false,
            mode: PlaybackMode::Loop,
            volume: 80,
            queue,
            current_index: None,
        }
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::seconds(5)), "0:05");
        assert_eq!(format_elapsed(Duration::seconds(125)), "2:05");
        assert_eq!(format_elapsed(Duration::seconds(3725)), "1:02:05");
        assert_eq!(format_elapsed(Duration::seconds(-3)), "0:00");
    }

    #[test]
    fn test_format_idle_queue() {
        let out = format_queue(&status(None, vec![]), Utc::now());
        assert_eq!(out, "Idle (loop, volume 80%)\nQueue is empty");
    }

    #[test]
    fn test_format_queue_marks_current() {
        let now = Utc::now();
        let a = Track::new("a.mp3");
        let b = Track::new("https://example.com/b.ogg");
        let mut st = status(
            Some((b.clone(), now - Duration::seconds(61))),
            vec![a, b],
        );
        st.current_index = Some(1);
        st.paused = true;

        let out = format_queue(&st, now);
        assert_eq!(
            out,
            "Paused https://example.com/b.ogg [1:01] (loop, volume 80%)\n  1. a.mp3\n> 2. https://example.com/b.ogg"
        );
    }
}
