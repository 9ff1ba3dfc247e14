//! Playback engine: turns a show request into frames in the channel buffer.
//!
//! The dispatch loop drives the engine through [`PlaybackEngine`]:
//!
//! - `start` loads a show and moves the status to `Playing`
//! - `process` advances one tick while the status is active, and may drop the
//!   status back to `Idle` when the show ends or a stop completes
//! - `cleanup` runs once on the active → idle edge

pub mod feed;
pub mod player;
pub mod playlist;
pub mod sequence;

pub use feed::{FeedStatus, SequenceFeed};
pub use player::PlaylistPlayer;
pub use playlist::{Playlist, PlaylistEntry};
pub use sequence::{Sequence, SequenceHeader};

use std::path::PathBuf;

use crate::context::AppContext;

/// What to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowRequest {
    pub playlist: String,
    /// Loop the playlist. Or'ed with the playlist's own flag.
    pub repeat: bool,
}

impl ShowRequest {
    pub fn new(playlist: impl Into<String>, repeat: bool) -> Self {
        Self {
            playlist: playlist.into(),
            repeat,
        }
    }
}

/// Current position, broadcast by a sync master.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPosition {
    pub sequence: String,
    pub frame: u32,
    pub seconds: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("failed to read playlist {path}: {source}")]
    PlaylistRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse playlist {path}: {source}")]
    PlaylistParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("playlist '{0}' has no entries")]
    EmptyPlaylist(String),

    #[error("failed to read sequence {path}: {source}")]
    SequenceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid sequence {path}: {reason}")]
    BadSequence { path: PathBuf, reason: String },
}

pub trait PlaybackEngine {
    /// Load `request` and set the status to `Playing`. Replaces any show
    /// already running.
    fn start(&mut self, request: &ShowRequest, ctx: &mut AppContext) -> Result<(), PlaybackError>;

    /// Advance one tick. Errors are handled here, usually by going idle.
    fn process(&mut self, ctx: &mut AppContext);

    /// Release the finished show. May start another one.
    fn cleanup(&mut self, ctx: &mut AppContext);

    fn current_playlist(&self) -> Option<&str>;

    fn sync_position(&self) -> Option<SyncPosition>;
}
