//! Playback status and the previous-status edge tracker.

use serde::Serialize;

/// Process-wide playback status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Playing,
    StoppingNow,
    StoppingGracefullyAfterLoop,
    StoppingGracefully,
}

impl PlaybackStatus {
    /// Playing or any stopping variant: the engine must be ticked.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    pub fn is_stopping(&self) -> bool {
        matches!(
            self,
            Self::StoppingNow | Self::StoppingGracefullyAfterLoop | Self::StoppingGracefully
        )
    }

    /// Whether `self -> next` is an edge of the playback state machine.
    ///
    /// `Idle` only leaves towards `Playing`. Active states may go anywhere.
    pub fn can_transition_to(&self, next: PlaybackStatus) -> bool {
        match (self, next) {
            (Self::Idle, next) => matches!(next, Self::Idle | Self::Playing),
            _ => true,
        }
    }
}

/// How strongly a stop was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    /// Blank and stop immediately.
    Now,
    /// Finish the current playlist pass.
    GracefulAfterLoop,
    /// Finish the current sequence.
    Graceful,
}

impl StopKind {
    pub fn status(&self) -> PlaybackStatus {
        match self {
            Self::Now => PlaybackStatus::StoppingNow,
            Self::GracefulAfterLoop => PlaybackStatus::StoppingGracefullyAfterLoop,
            Self::Graceful => PlaybackStatus::StoppingGracefully,
        }
    }

    /// Higher is stronger. A weaker request never overrides a stronger one.
    fn strength(&self) -> u8 {
        match self {
            Self::Graceful => 0,
            Self::GracefulAfterLoop => 1,
            Self::Now => 2,
        }
    }

    pub fn from_status(status: PlaybackStatus) -> Option<Self> {
        match status {
            PlaybackStatus::StoppingNow => Some(Self::Now),
            PlaybackStatus::StoppingGracefullyAfterLoop => Some(Self::GracefulAfterLoop),
            PlaybackStatus::StoppingGracefully => Some(Self::Graceful),
            _ => None,
        }
    }

    /// Status after requesting `self` while in `current`, or `None` if the
    /// request has no effect.
    pub fn apply_to(&self, current: PlaybackStatus) -> Option<PlaybackStatus> {
        match current {
            PlaybackStatus::Idle => None,
            PlaybackStatus::Playing => Some(self.status()),
            stopping => {
                let existing = Self::from_status(stopping)?;
                (self.strength() > existing.strength()).then(|| self.status())
            }
        }
    }
}

impl std::str::FromStr for StopKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "now" | "immediate" => Ok(Self::Now),
            "graceful_after_loop" | "after_loop" => Ok(Self::GracefulAfterLoop),
            "graceful" => Ok(Self::Graceful),
            other => Err(format!("unknown stop kind '{}'", other)),
        }
    }
}

/// What the loop must do after observing a tick's final status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEdge {
    /// Nothing to do.
    None,
    /// Status just dropped from active to idle; run cleanup once.
    Stopped,
}

/// Single-slot memory of the status seen on the previous tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusTracker {
    previous: PlaybackStatus,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous(&self) -> PlaybackStatus {
        self.previous
    }

    /// Detect the active → idle edge for `current`.
    pub fn edge(&self, current: PlaybackStatus) -> StatusEdge {
        if current == PlaybackStatus::Idle && self.previous.is_active() {
            StatusEdge::Stopped
        } else {
            StatusEdge::None
        }
    }

    /// [`edge`](Self::edge), also catching a show that started and ended
    /// within one tick. `before` is the status the engine phase began with.
    pub fn edge_within(&self, before: PlaybackStatus, current: PlaybackStatus) -> StatusEdge {
        if current == PlaybackStatus::Idle && before.is_active() {
            StatusEdge::Stopped
        } else {
            self.edge(current)
        }
    }

    /// Close out the tick.
    ///
    /// `reactivated` means cleanup ran and playback restarted during it; the
    /// slot then records `Idle` so the next tick does not clean up again off
    /// a stale active value.
    pub fn settle(&mut self, current: PlaybackStatus, reactivated: bool) {
        self.previous = if reactivated {
            PlaybackStatus::Idle
        } else {
            current
        };
    }
}
