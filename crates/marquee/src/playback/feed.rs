//! The running sequence, shared between the engine (primary thread) and the
//! output pump (which refreshes the buffer from it every frame).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::error;

use super::{Sequence, SyncPosition};
use crate::channel_data::ChannelBuffer;
use crate::output::FrameFeed;

/// Result of advancing the feed to a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// No sequence loaded.
    Empty,
    Playing,
    /// Past the last frame.
    Finished,
    /// A frame could not be read; the sequence is abandoned.
    Failed,
}

#[derive(Debug)]
struct FeedState {
    sequence: Sequence,
    started: Instant,
    last_frame: Option<u32>,
    frame: Vec<u8>,
    status: FeedStatus,
}

#[derive(Debug, Clone, Default)]
pub struct SequenceFeed {
    inner: Arc<Mutex<Option<FeedState>>>,
}

impl SequenceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<FeedState>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start `sequence` with frame 0 due at `started`.
    pub fn load(&self, sequence: Sequence, started: Instant) {
        *self.lock() = Some(FeedState {
            sequence,
            started,
            last_frame: None,
            frame: Vec::new(),
            status: FeedStatus::Playing,
        });
    }

    /// Re-anchor the running sequence so `frame` is due at `at`.
    pub fn seek(&self, frame: u32, at: Instant) {
        if let Some(state) = self.lock().as_mut() {
            let offset = state.sequence.header().frame_period() * frame;
            state.started = at.checked_sub(offset).unwrap_or(at);
            state.last_frame = None;
            state.status = FeedStatus::Playing;
        }
    }

    pub fn clear(&self) {
        self.lock().take();
    }

    pub fn sequence_name(&self) -> Option<String> {
        self.lock().as_ref().map(|s| s.sequence.name().to_string())
    }

    pub fn status(&self) -> FeedStatus {
        self.lock().as_ref().map_or(FeedStatus::Empty, |s| s.status)
    }

    pub fn position(&self) -> Option<SyncPosition> {
        let guard = self.lock();
        let state = guard.as_ref()?;
        let frame = state.last_frame.unwrap_or(0);
        let seconds = (state.sequence.header().frame_period() * frame).as_secs_f32();
        Some(SyncPosition {
            sequence: state.sequence.name().to_string(),
            frame,
            seconds,
        })
    }

    /// Write the frame due at `now` into `buffer` if it changed.
    pub fn advance(&self, buffer: &ChannelBuffer, now: Instant) -> FeedStatus {
        let mut guard = self.lock();
        let Some(state) = guard.as_mut() else {
            return FeedStatus::Empty;
        };
        if state.status != FeedStatus::Playing {
            return state.status;
        }

        let index = state
            .sequence
            .frame_at(now.saturating_duration_since(state.started));
        if index >= state.sequence.frame_count() {
            state.status = FeedStatus::Finished;
            return state.status;
        }
        if state.last_frame == Some(index) {
            return state.status;
        }

        match state.sequence.read_frame(index, &mut state.frame) {
            Ok(_) => {
                buffer.write(state.sequence.header().offset(), &state.frame);
                state.last_frame = Some(index);
            }
            Err(e) => {
                error!("Abandoning sequence {}: {}", state.sequence.name(), e);
                state.status = FeedStatus::Failed;
            }
        }
        state.status
    }
}

impl FrameFeed for SequenceFeed {
    fn refresh(&self, buffer: &ChannelBuffer) {
        self.advance(buffer, Instant::now());
    }
}
