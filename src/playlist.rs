//! Play queue with normal, loop and repeat modes

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PlaylistError {
    #[error("Playlist exhausted")]
    Exhausted,
    #[error("No entry at position {0}")]
    OutOfRange(usize),
}

/// How `next` moves through the playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackMode {
    /// Play every entry once, in order
    #[default]
    Normal,
    /// Start over after the last entry
    Loop,
    /// Keep playing the current entry
    Repeat,
}

impl PlaybackMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackMode::Normal => "normal",
            PlaybackMode::Loop => "loop",
            PlaybackMode::Repeat => "repeat",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "normal" => Some(PlaybackMode::Normal),
            "loop" => Some(PlaybackMode::Loop),
            "repeat" => Some(PlaybackMode::Repeat),
            _ => None,
        }
    }
}

impl fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the playlist stands between calls to `next`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    /// On the entry at this index
    At(usize),
    /// In front of the entry at this index, nothing selected
    Before(usize),
}

/// Ordered entries with a cursor on the one currently playing
#[derive(Debug, Clone)]
pub struct Playlist<T> {
    entries: Vec<T>,
    cursor: Cursor,
    mode: PlaybackMode,
}

impl<T> Default for Playlist<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            cursor: Cursor::Before(0),
            mode: PlaybackMode::Normal,
        }
    }
}

impl<T: Clone> Playlist<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, returning its 1-based position
    pub fn add(&mut self, entry: T) -> usize {
        self.entries.push(entry);
        self.entries.len()
    }

    /// Move to the entry that should play next
    pub fn next(&mut self) -> Result<T, PlaylistError> {
        self.advance(self.mode == PlaybackMode::Repeat)
    }

    /// Move past the current entry, even in repeat mode
    ///
    /// Repeat mode stops after the last entry like normal mode does.
    pub fn skip(&mut self) -> Result<T, PlaylistError> {
        self.advance(false)
    }

    fn advance(&mut self, stay: bool) -> Result<T, PlaylistError> {
        let len = self.entries.len();
        if len == 0 {
            return Err(PlaylistError::Exhausted);
        }

        let index = match self.cursor {
            Cursor::At(i) if stay => i,
            Cursor::At(i) => i + 1,
            Cursor::Before(i) => i,
        };
        let index = if index < len {
            index
        } else if self.mode == PlaybackMode::Loop {
            0
        } else {
            return Err(PlaylistError::Exhausted);
        };

        self.cursor = Cursor::At(index);
        Ok(self.entries[index].clone())
    }

    /// Step back to the entry before the current one
    pub fn prev(&mut self) -> Result<T, PlaylistError> {
        let len = self.entries.len();
        let before = match self.cursor {
            Cursor::At(i) => i,
            Cursor::Before(i) if i > 0 => i,
            Cursor::Before(_) => return Err(PlaylistError::Exhausted),
        };

        let index = match before.checked_sub(1) {
            Some(i) => i,
            None if self.mode == PlaybackMode::Loop && len > 0 => len - 1,
            None => return Err(PlaylistError::Exhausted),
        };

        self.cursor = Cursor::At(index);
        Ok(self.entries[index].clone())
    }

    /// Remove the entry at a 0-based index
    ///
    /// The cursor keeps pointing at the same entry. Removing the current
    /// entry deselects it, and `next` plays whatever took its place.
    pub fn remove(&mut self, index: usize) -> Result<T, PlaylistError> {
        if index >= self.entries.len() {
            return Err(PlaylistError::OutOfRange(index));
        }
        let removed = self.entries.remove(index);

        self.cursor = match self.cursor {
            Cursor::At(c) if index < c => Cursor::At(c - 1),
            Cursor::At(c) if index == c => Cursor::Before(c),
            Cursor::Before(c) if index < c => Cursor::Before(c - 1),
            other => other,
        };

        Ok(removed)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = Cursor::Before(0);
    }
}

impl<T> Playlist<T> {
    #[cfg(test)]
    pub fn current(&self) -> Option<&T> {
        self.current_index().and_then(|i| self.entries.get(i))
    }

    /// 0-based index of the current entry
    pub fn current_index(&self) -> Option<usize> {
        match self.cursor {
            Cursor::At(i) => Some(i),
            Cursor::Before(_) => None,
        }
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PlaybackMode) {
        self.mode = mode;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}
