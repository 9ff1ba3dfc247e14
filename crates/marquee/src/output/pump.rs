//! Output pump: the dedicated thread that pushes channel data to the drivers
//! at the refresh cadence.
//!
//! `start` does not return until the thread has confirmed it is running, and
//! `stop` does not return until it has exited, so `is_running` is always
//! accurate when the dispatch loop checks it.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, error, info};

use super::{ChannelTester, FrameFeed, OutputDriverSet, OutputError, RefreshInterval};
use crate::channel_data::ChannelBuffer;

/// Start/stop surface the dispatch loop and playback engine use.
pub trait PumpControl {
    fn is_running(&self) -> bool;

    /// Start at `interval`. A no-op while already running.
    fn start(&mut self, interval: RefreshInterval) -> Result<(), OutputError>;

    /// Stop and join. A no-op while stopped.
    fn stop(&mut self);
}

/// Pump shared between the dispatch loop and the playback engine. Both live on
/// the primary thread.
pub type SharedPump = Rc<RefCell<dyn PumpControl>>;

/// Runtime counters updated by the pump thread.
#[derive(Debug, Default)]
pub struct PumpStats {
    pub frames: AtomicU64,
    pub send_failures: AtomicU64,
    /// Frames that started late because the previous one overran its slot.
    pub overruns: AtomicU64,
}

/// Everything the pump thread reads each frame.
#[derive(Clone)]
struct PumpInputs {
    buffer: ChannelBuffer,
    drivers: OutputDriverSet,
    tester: ChannelTester,
    feed: Option<Arc<dyn FrameFeed>>,
    stats: Arc<PumpStats>,
}

/// Owns at most one running pump thread.
pub struct OutputPump {
    inputs: PumpInputs,
    thread: Option<PumpThread>,
}

impl OutputPump {
    pub fn new(buffer: ChannelBuffer, drivers: OutputDriverSet, tester: ChannelTester) -> Self {
        Self {
            inputs: PumpInputs {
                buffer,
                drivers,
                tester,
                feed: None,
                stats: Arc::new(PumpStats::default()),
            },
            thread: None,
        }
    }

    /// Let `feed` refresh the buffer before every frame is snapshotted.
    pub fn with_feed(mut self, feed: Arc<dyn FrameFeed>) -> Self {
        self.inputs.feed = Some(feed);
        self
    }

    pub fn shared(self) -> Rc<RefCell<OutputPump>> {
        Rc::new(RefCell::new(self))
    }

    pub fn stats(&self) -> &Arc<PumpStats> {
        &self.inputs.stats
    }

    pub fn interval(&self) -> Option<RefreshInterval> {
        self.thread.as_ref().map(|t| t.interval)
    }
}

impl PumpControl for OutputPump {
    fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(PumpThread::is_alive)
    }

    fn start(&mut self, interval: RefreshInterval) -> Result<(), OutputError> {
        if self.is_running() {
            debug!("Output pump already running");
            return Ok(());
        }

        // Reap a thread that died on its own before starting a new one.
        self.thread = None;

        let thread = PumpThread::spawn(interval, self.inputs.clone())?;
        info!(
            "Output pump started: {} updates/s ({:?} period)",
            interval.updates_per_second(),
            interval.period()
        );
        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            drop(thread);
            info!(
                "Output pump stopped after {} frames",
                self.inputs.stats.frames.load(Ordering::Relaxed)
            );
        }
    }
}

impl Drop for OutputPump {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle to a spawned pump thread. Dropping it stops and joins the thread.
struct PumpThread {
    interval: RefreshInterval,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PumpThread {
    fn spawn(interval: RefreshInterval, inputs: PumpInputs) -> Result<Self, OutputError> {
        let running = Arc::new(AtomicBool::new(true));
        let running_for_thread = Arc::clone(&running);
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let handle = thread::Builder::new()
            .name("channel-output".to_string())
            .spawn(move || {
                let _ = ready_tx.send(());
                run_pump_loop(interval, inputs, running_for_thread);
            })
            .map_err(|e| OutputError::ThreadSpawn(e.to_string()))?;

        if ready_rx.recv().is_err() {
            running.store(false, Ordering::Release);
            let _ = handle.join();
            return Err(OutputError::StartupLost);
        }

        Ok(Self {
            interval,
            running,
            handle: Some(handle),
        })
    }

    fn is_alive(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for PumpThread {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                error!("Output pump thread panicked");
            }
        }
    }
}

fn run_pump_loop(interval: RefreshInterval, inputs: PumpInputs, running: Arc<AtomicBool>) {
    let PumpInputs {
        buffer,
        drivers,
        tester,
        feed,
        stats,
    } = inputs;
    let period = interval.period();
    let mut frame = Vec::with_capacity(buffer.len());
    let mut frame_number: u64 = 0;
    let mut next_deadline = Instant::now();

    while running.load(Ordering::Acquire) {
        if let Some(feed) = &feed {
            feed.refresh(&buffer);
        }
        buffer.snapshot_into(&mut frame);
        tester.overlay(&mut frame, frame_number);

        let failures = drivers.send(&frame);
        if failures > 0 {
            stats.send_failures.fetch_add(failures as u64, Ordering::Relaxed);
        }
        stats.frames.fetch_add(1, Ordering::Relaxed);
        frame_number += 1;

        next_deadline += period;
        let now = Instant::now();
        if next_deadline > now {
            // stop() unparks us, so shutdown does not wait out a long period
            thread::park_timeout(next_deadline - now);
        } else {
            stats.overruns.fetch_add(1, Ordering::Relaxed);
            next_deadline = now;
        }
    }

    debug!("Output pump loop exited after {} frames", frame_number);
}
