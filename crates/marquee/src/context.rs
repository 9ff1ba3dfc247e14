//! Application context owned by the dispatch loop.
//!
//! Holds the mode, the playback status and the run flag. The scheduler,
//! playback engine and command handlers read and write through it instead of
//! touching process globals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::mode::OperatingMode;
use crate::status::{PlaybackStatus, StopKind};

/// Cleared to end the dispatch loop. Shared with signal handlers.
#[derive(Debug, Clone)]
pub struct RunFlag {
    shutdown: Arc<AtomicBool>,
}

impl RunFlag {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn keep_running(&self) -> bool {
        !self.shutdown.load(Ordering::Acquire)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Route SIGINT/SIGTERM/SIGQUIT into this flag.
    pub fn register_signals(&self) -> std::io::Result<()> {
        for signal in signal_hook::consts::TERM_SIGNALS {
            signal_hook::flag::register(*signal, Arc::clone(&self.shutdown))?;
        }
        Ok(())
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable daemon state touched only by the primary thread.
#[derive(Debug)]
pub struct AppContext {
    mode: OperatingMode,
    status: PlaybackStatus,
    overlay_input: bool,
    run: RunFlag,
}

impl AppContext {
    pub fn new(mode: OperatingMode, run: RunFlag) -> Self {
        Self {
            mode,
            status: PlaybackStatus::Idle,
            overlay_input: false,
            run,
        }
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    /// Move to `next` if it is an edge of the state machine.
    ///
    /// Returns false (and leaves the status alone) for illegal edges such as
    /// `Idle -> Stopping*`.
    pub fn set_status(&mut self, next: PlaybackStatus) -> bool {
        if self.status == next {
            return true;
        }
        if !self.status.can_transition_to(next) {
            warn!("Ignoring playback status change {:?} -> {:?}", self.status, next);
            return false;
        }
        debug!("Playback status {:?} -> {:?}", self.status, next);
        self.status = next;
        true
    }

    /// Ask the engine to stop. No effect while idle or when a stronger stop
    /// is already pending.
    pub fn request_stop(&mut self, kind: StopKind) -> bool {
        match kind.apply_to(self.status) {
            Some(next) => self.set_status(next),
            None => false,
        }
    }

    /// Whether external channel writes (memory-map style input) are enabled.
    pub fn overlay_input(&self) -> bool {
        self.overlay_input
    }

    pub fn set_overlay_input(&mut self, enabled: bool) {
        self.overlay_input = enabled;
    }

    pub fn run_flag(&self) -> &RunFlag {
        &self.run
    }

    pub fn keep_running(&self) -> bool {
        self.run.keep_running()
    }

    pub fn request_shutdown(&self) {
        self.run.request_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> AppContext {
        AppContext::new(OperatingMode::Player, RunFlag::new())
    }

    #[test]
    fn test_starts_idle() {
        let ctx = ctx();
        assert_eq!(ctx.status(), PlaybackStatus::Idle);
        assert!(ctx.keep_running());
        assert!(!ctx.overlay_input());
    }

    #[test]
    fn test_rejects_idle_to_stopping() {
        let mut ctx = ctx();
        assert!(!ctx.set_status(PlaybackStatus::StoppingNow));
        assert_eq!(ctx.status(), PlaybackStatus::Idle);
        assert!(!ctx.request_stop(StopKind::Now));
        assert_eq!(ctx.status(), PlaybackStatus::Idle);
    }

    #[test]
    fn test_stop_while_playing() {
        let mut ctx = ctx();
        assert!(ctx.set_status(PlaybackStatus::Playing));
        assert!(ctx.request_stop(StopKind::GracefulAfterLoop));
        assert_eq!(ctx.status(), PlaybackStatus::StoppingGracefullyAfterLoop);
    }

    #[test]
    fn test_shutdown_is_shared_between_clones() {
        let ctx = ctx();
        let flag = ctx.run_flag().clone();
        flag.request_shutdown();
        assert!(!ctx.keep_running());
    }
}
