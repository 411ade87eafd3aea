//! Per-guild music players
//!
//! Each joined guild gets a player holding its voice call, its playlist
//! and the track currently streaming from ffmpeg

use crate::audio::{Transcoder, TranscoderError};
use crate::bot::TrackEndNotifier;
use crate::playlist::{PlaybackMode, Playlist, PlaylistError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serenity::all::GuildId;
use songbird::events::{Event, TrackEvent};
use songbird::tracks::{ControlError as TrackControlError, TrackHandle};
use songbird::Call;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("Nothing is playing")]
    NotPlaying,
    #[error("No previous entry in the queue")]
    NoPrevious,
    #[error(transparent)]
    Playlist(#[from] PlaylistError),
    #[error("Transcoder error: {0}")]
    Transcoder(#[from] TranscoderError),
    #[error("Track control failed: {0}")]
    Track(#[from] TrackControlError),
}

/// A queued audio source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// Path or URL handed to ffmpeg
    pub source: String,
    pub added_at: DateTime<Utc>,
}

impl Track {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            added_at: Utc::now(),
        }
    }
}

/// The track currently on the call
struct NowPlaying {
    track: Track,
    handle: TrackHandle,
    started_at: DateTime<Utc>,
    paused: bool,
}

struct PlayerState {
    playlist: Playlist<Track>,
    now_playing: Option<NowPlaying>,
    /// Percent, 0-200
    volume: u8,
    /// Bumped whenever the playing track is replaced or stopped
    generation: u64,
}

/// Read-only view of a player for status and queue listings
#[derive(Debug, Clone)]
pub struct PlayerStatus {
    pub guild_id: GuildId,
    pub now_playing: Option<(Track, DateTime<Utc>)>,
    pub paused: bool,
    pub mode: PlaybackMode,
    pub volume: u8,
    pub queue: Vec<Track>,
    /// 0-based position of the current entry in `queue`
    pub current_index: Option<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Whatever the mode plays after the current entry
    Next,
    /// Past the current entry, even in repeat mode
    Skip,
    Prev,
}

/// Music player for one guild
pub struct GuildPlayer {
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
    transcoder: Transcoder,
    state: Mutex<PlayerState>,
}

impl GuildPlayer {
    pub fn new(
        guild_id: GuildId,
        call: Arc<Mutex<Call>>,
        transcoder: Transcoder,
        volume: u8,
    ) -> Arc<Self> {
        Arc::new(Self {
            guild_id,
            call,
            transcoder,
            state: Mutex::new(PlayerState {
                playlist: Playlist::new(),
                now_playing: None,
                volume,
                generation: 0,
            }),
        })
    }

    /// Queue a source; starts playback if nothing is playing
    ///
    /// Returns the 1-based queue position and the track that started, if any.
    pub async fn enqueue(
        self: &Arc<Self>,
        source: &str,
    ) -> Result<(usize, Option<Track>), PlayerError> {
        let mut state = self.state.lock().await;
        let position = state.playlist.add(Track::new(source));
        info!("[{}] Queued {} at #{}", self.guild_id, source, position);

        if state.now_playing.is_some() {
            return Ok((position, None));
        }
        let started = self.start(&mut state, Step::Next).await?;
        Ok((position, started))
    }

    /// Jump to the entry after the current one; `None` when the queue ran out
    ///
    /// A repeating track is left behind too.
    pub async fn skip(self: &Arc<Self>) -> Result<Option<Track>, PlayerError> {
        let mut state = self.state.lock().await;
        self.start(&mut state, Step::Skip).await
    }

    /// Go back to the previous entry
    pub async fn previous(self: &Arc<Self>) -> Result<Track, PlayerError> {
        let mut state = self.state.lock().await;
        self.start(&mut state, Step::Prev)
            .await?
            .ok_or(PlayerError::NoPrevious)
    }

    /// Called when a track finishes on its own
    ///
    /// Ignored unless `generation` is still the one playing, so tracks
    /// replaced by a skip don't advance the queue a second time.
    pub async fn on_track_end(self: &Arc<Self>, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!("[{}] Ignoring end of replaced track", self.guild_id);
            return;
        }

        state.now_playing = None;
        match self.start(&mut state, Step::Next).await {
            Ok(Some(track)) => debug!("[{}] Advanced to {}", self.guild_id, track.source),
            Ok(None) => info!("[{}] Queue finished", self.guild_id),
            Err(e) => warn!("[{}] Failed to advance: {}", self.guild_id, e),
        }
    }

    pub async fn pause(&self) -> Result<Track, PlayerError> {
        let mut state = self.state.lock().await;
        let now = state.now_playing.as_mut().ok_or(PlayerError::NotPlaying)?;
        now.handle.pause()?;
        now.paused = true;
        Ok(now.track.clone())
    }

    pub async fn resume(&self) -> Result<Track, PlayerError> {
        let mut state = self.state.lock().await;
        let now = state.now_playing.as_mut().ok_or(PlayerError::NotPlaying)?;
        now.handle.play()?;
        now.paused = false;
        Ok(now.track.clone())
    }

    /// Stop the current track, keeping the queue
    pub async fn stop(&self) -> Option<Track> {
        let mut state = self.state.lock().await;
        Self::halt(&mut state)
    }

    /// Stop and forget the whole queue
    pub async fn clear(&self) -> usize {
        let mut state = self.state.lock().await;
        Self::halt(&mut state);
        let removed = state.playlist.len();
        state.playlist.clear();
        removed
    }

    /// Remove an entry by 1-based position
    ///
    /// Removing the entry that is playing moves on to the one after it.
    pub async fn remove(self: &Arc<Self>, position: usize) -> Result<Track, PlayerError> {
        let mut state = self.state.lock().await;
        let index = position.saturating_sub(1);
        let was_current = state.playlist.current_index() == Some(index);
        let removed = state.playlist.remove(index)?;

        if was_current && state.now_playing.is_some() {
            self.start(&mut state, Step::Next).await?;
        }
        Ok(removed)
    }

    pub async fn set_volume(&self, volume: u8) -> Result<(), PlayerError> {
        let mut state = self.state.lock().await;
        state.volume = volume;
        if let Some(now) = &state.now_playing {
            now.handle.set_volume(volume_gain(volume))?;
        }
        Ok(())
    }

    pub async fn set_mode(&self, mode: PlaybackMode) {
        self.state.lock().await.playlist.set_mode(mode);
    }

    #[cfg(test)]
    async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    pub async fn status(&self) -> PlayerStatus {
        let state = self.state.lock().await;
        PlayerStatus {
            guild_id: self.guild_id,
            now_playing: state
                .now_playing
                .as_ref()
                .map(|now| (now.track.clone(), now.started_at)),
            paused: state.now_playing.as_ref().is_some_and(|now| now.paused),
            mode: state.playlist.mode(),
            volume: state.volume,
            queue: state.playlist.iter().cloned().collect(),
            current_index: state.playlist.current_index(),
        }
    }

    /// Stop whatever is playing without touching the queue
    fn halt(state: &mut PlayerState) -> Option<Track> {
        state.generation += 1;
        let now = state.now_playing.take()?;
        if let Err(e) = now.handle.stop() {
            debug!("Track already stopped: {}", e);
        }
        Some(now.track)
    }

    /// Move through the playlist and put the resulting entry on the call
    ///
    /// Entries ffmpeg can't be started for are skipped, at most once each.
    /// Running off the end of the queue stops playback; running off the
    /// start keeps the current track playing.
    async fn start(
        self: &Arc<Self>,
        state: &mut PlayerState,
        step: Step,
    ) -> Result<Option<Track>, PlayerError> {
        let mut attempts = state.playlist.len();
        loop {
            let moved = match step {
                Step::Next => state.playlist.next(),
                Step::Skip => state.playlist.skip(),
                Step::Prev => state.playlist.prev(),
            };
            let track = match moved {
                Ok(track) => track,
                Err(PlaylistError::Exhausted) if step == Step::Prev => return Ok(None),
                Err(PlaylistError::Exhausted) => {
                    Self::halt(state);
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            };

            let input = match self.transcoder.spawn(&track.source) {
                Ok(input) => input,
                Err(e) => {
                    warn!("[{}] Cannot play {}: {}", self.guild_id, track.source, e);
                    attempts = attempts.saturating_sub(1);
                    if step == Step::Prev || attempts == 0 {
                        Self::halt(state);
                        return Err(e.into());
                    }
                    continue;
                }
            };

            state.generation += 1;
            let generation = state.generation;

            let handle = {
                let mut call = self.call.lock().await;
                call.play_only_input(input)
            };
            handle.set_volume(volume_gain(state.volume))?;

            let notifier = TrackEndNotifier::new(Arc::downgrade(self), generation);
            handle.add_event(Event::Track(TrackEvent::End), notifier.clone())?;
            handle.add_event(Event::Track(TrackEvent::Error), notifier)?;

            info!("[{}] Now playing {}", self.guild_id, track.source);
            state.now_playing = Some(NowPlaying {
                track: track.clone(),
                handle,
                started_at: Utc::now(),
                paused: false,
            });
            return Ok(Some(track));
        }
    }
}

/// Percent to songbird's linear gain
fn volume_gain(volume: u8) -> f32 {
    f32::from(volume) / 100.0
}

/// All players, plus the guild console commands act on
pub struct PlayerManager {
    players: DashMap<GuildId, Arc<GuildPlayer>>,
    focus: parking_lot::RwLock<Option<GuildId>>,
    transcoder: Transcoder,
    default_volume: u8,
}

impl PlayerManager {
    pub fn new(transcoder: Transcoder, default_volume: u8) -> Self {
        Self {
            players: DashMap::new(),
            focus: parking_lot::RwLock::new(None),
            transcoder,
            default_volume,
        }
    }

    /// Player for a freshly joined call; keeps the queue of an existing one
    /// and focuses the guild
    pub fn attach(&self, guild_id: GuildId, call: Arc<Mutex<Call>>) -> Arc<GuildPlayer> {
        let player = self
            .players
            .entry(guild_id)
            .or_insert_with(|| {
                GuildPlayer::new(guild_id, call, self.transcoder.clone(), self.default_volume)
            })
            .value()
            .clone();
        *self.focus.write() = Some(guild_id);
        player
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildPlayer>> {
        self.players.get(&guild_id).map(|r| r.value().clone())
    }

    pub fn focused(&self) -> Option<Arc<GuildPlayer>> {
        let guild_id = (*self.focus.read())?;
        self.get(guild_id)
    }

    pub fn focused_guild(&self) -> Option<GuildId> {
        *self.focus.read()
    }

    /// Focus another joined guild; false if there is no player for it
    pub fn set_focus(&self, guild_id: GuildId) -> bool {
        if !self.players.contains_key(&guild_id) {
            return false;
        }
        *self.focus.write() = Some(guild_id);
        true
    }

    /// Drop a guild's player, moving focus to any remaining one
    pub async fn remove(&self, guild_id: GuildId) -> Option<Arc<GuildPlayer>> {
        let (_, player) = self.players.remove(&guild_id)?;
        player.clear().await;

        let mut focus = self.focus.write();
        if *focus == Some(guild_id) {
            *focus = self.players.iter().next().map(|r| *r.key());
        }
        Some(player)
    }

    pub fn guild_ids(&self) -> Vec<GuildId> {
        let mut ids: Vec<GuildId> = self.players.iter().map(|r| *r.key()).collect();
        ids.sort();
        ids
    }
}
