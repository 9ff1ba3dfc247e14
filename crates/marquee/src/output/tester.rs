//! Channel tester: overlays a test pattern on outgoing frames.
//!
//! The pattern is applied by the pump thread to its private frame copy, so
//! testing never writes the shared channel buffer.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::info;

/// A test pattern over an inclusive, 1-based channel range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum TestPattern {
    /// Every channel in range at `value`.
    Solid {
        start_channel: usize,
        end_channel: usize,
        value: u8,
    },
    /// One channel in range at `value`, stepping every `step_frames` frames.
    Chase {
        start_channel: usize,
        end_channel: usize,
        value: u8,
        #[serde(default = "default_step_frames")]
        step_frames: u32,
    },
}

fn default_step_frames() -> u32 {
    10
}

impl TestPattern {
    fn bounds(&self, frame_len: usize) -> Option<(usize, usize)> {
        let (start, end) = match *self {
            Self::Solid { start_channel, end_channel, .. }
            | Self::Chase { start_channel, end_channel, .. } => (start_channel, end_channel),
        };
        let first = start.max(1) - 1;
        let last = end.min(frame_len);
        (first < last).then_some((first, last))
    }

    /// Write the pattern into `frame` for output frame number `frame_number`.
    pub fn apply(&self, frame: &mut [u8], frame_number: u64) {
        let Some((first, last)) = self.bounds(frame.len()) else {
            return;
        };
        match *self {
            Self::Solid { value, .. } => frame[first..last].fill(value),
            Self::Chase { value, step_frames, .. } => {
                frame[first..last].fill(0);
                let span = (last - first) as u64;
                let step = frame_number / step_frames.max(1) as u64;
                frame[first + (step % span) as usize] = value;
            }
        }
    }
}

/// Shared handle to the active test pattern.
#[derive(Debug, Clone, Default)]
pub struct ChannelTester {
    pattern: Arc<Mutex<Option<TestPattern>>>,
}

impl ChannelTester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_testing(&self) -> bool {
        self.pattern
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn start(&self, pattern: TestPattern) {
        info!("Channel test started: {:?}", pattern);
        *self.pattern.lock().unwrap_or_else(PoisonError::into_inner) = Some(pattern);
    }

    pub fn stop(&self) {
        if self
            .pattern
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            info!("Channel test stopped");
        }
    }

    /// Overlay the active pattern, if any. Uses `try_lock` so the pump never
    /// waits on the primary thread; a contended frame goes out unpatterned.
    pub fn overlay(&self, frame: &mut [u8], frame_number: u64) {
        if let Ok(guard) = self.pattern.try_lock() {
            if let Some(pattern) = guard.as_ref() {
                pattern.apply(frame, frame_number);
            }
        }
    }
}
