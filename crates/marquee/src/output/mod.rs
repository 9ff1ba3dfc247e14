//! Channel output: drivers, the refresh cadence, the output pump thread and
//! the channel tester.
//!
//! ```text
//! Playback engine / bridge receiver        Output pump thread
//!        │                                        │
//!        │                                FrameFeed::refresh()
//!        ▼                                        ▼
//!   ChannelBuffer::write()  ──► ChannelBuffer ──► snapshot_into()
//!                                                 │  + test pattern overlay
//!                                                 ▼
//!                                          OutputDriverSet::send()
//! ```

pub mod drivers;
pub mod pump;
pub mod refresh;
pub mod tester;

pub use drivers::{build_drivers, LogOutput, UdpOutput};
pub use pump::{OutputPump, PumpControl, PumpStats, SharedPump};
pub use refresh::RefreshInterval;
pub use tester::{ChannelTester, TestPattern};

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use crate::channel_data::ChannelBuffer;

/// One hardware or network output sink.
pub trait OutputDriver: Send {
    fn name(&self) -> &str;

    fn init(&mut self) -> Result<(), OutputError>;

    /// Push one full frame of channel data. Drivers pick their own range.
    fn send(&mut self, frame: &[u8]) -> Result<(), OutputError>;

    fn close(&mut self);
}

/// Writes time-based data (the running sequence) into the buffer. Called by
/// the pump thread right before each frame is taken.
pub trait FrameFeed: Send + Sync {
    fn refresh(&self, buffer: &ChannelBuffer);
}

/// All configured drivers, shared between the primary thread (init/close)
/// and the pump thread (send).
#[derive(Clone, Default)]
pub struct OutputDriverSet {
    drivers: Arc<Mutex<Vec<Box<dyn OutputDriver>>>>,
}

impl OutputDriverSet {
    pub fn new(drivers: Vec<Box<dyn OutputDriver>>) -> Self {
        Self {
            drivers: Arc::new(Mutex::new(drivers)),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Box<dyn OutputDriver>>> {
        self.drivers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize every driver. Drivers that fail are dropped from the set.
    pub fn init(&self) -> usize {
        let mut drivers = self.lock();
        drivers.retain_mut(|driver| match driver.init() {
            Ok(()) => {
                info!("Output {} initialized", driver.name());
                true
            }
            Err(e) => {
                warn!("Output {} failed to initialize, disabling: {}", driver.name(), e);
                false
            }
        });
        drivers.len()
    }

    /// Send a frame to every driver. Returns how many sends failed.
    pub fn send(&self, frame: &[u8]) -> usize {
        let mut failures = 0;
        for driver in self.lock().iter_mut() {
            if let Err(e) = driver.send(frame) {
                warn!("Output {} send failed: {}", driver.name(), e);
                failures += 1;
            }
        }
        failures
    }

    pub fn close(&self) {
        for driver in self.lock().iter_mut() {
            driver.close();
            info!("Output {} closed", driver.name());
        }
    }
}

/// Errors from output drivers and the pump.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("unknown output kind '{0}'")]
    UnknownKind(String),

    #[error("invalid output target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("output I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to spawn output thread: {0}")]
    ThreadSpawn(String),

    #[error("output thread exited before confirming start")]
    StartupLost,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flaky {
        init_ok: bool,
        sent: Arc<Mutex<usize>>,
    }

    impl OutputDriver for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn init(&mut self) -> Result<(), OutputError> {
            if self.init_ok {
                Ok(())
            } else {
                Err(OutputError::StartupLost)
            }
        }

        fn send(&mut self, _frame: &[u8]) -> Result<(), OutputError> {
            *self.sent.lock().unwrap() += 1;
            Ok(())
        }

        fn close(&mut self) {}
    }

    #[test]
    fn test_failed_init_drops_driver() {
        let sent = Arc::new(Mutex::new(0));
        let set = OutputDriverSet::new(vec![
            Box::new(Flaky { init_ok: true, sent: Arc::clone(&sent) }),
            Box::new(Flaky { init_ok: false, sent: Arc::clone(&sent) }),
        ]);

        assert_eq!(set.init(), 1);
        assert_eq!(set.send(&[0; 4]), 0);
        assert_eq!(*sent.lock().unwrap(), 1);
    }
}
