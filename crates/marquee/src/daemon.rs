//! The dispatch loop.
//!
//! One primary thread sleeps on the readable sources with a fixed timeout,
//! services whatever woke it, then runs the per-tick work in a fixed order:
//!
//! 1. command / bridge / control sources (only those registered and ready)
//! 2. output pump activation check
//! 3. scheduler and playback engine (player modes) or remote bookkeeping
//! 4. GPIO sampling
//!
//! A timeout is the idle heartbeat, not an error. A wait interrupted by a
//! signal is retried without touching any state.

use std::time::Duration;

use chrono::NaiveDateTime;
use marqueeconf::ShowSettings;
use tracing::{debug, error, info, warn};

use crate::bridge::BridgeSource;
use crate::channel_data::ChannelBuffer;
use crate::command::{Command, CommandReply, CommandSource, StatusReport};
use crate::context::AppContext;
use crate::control::ControlSource;
use crate::gpio::GpioSource;
use crate::mode::OperatingMode;
use crate::output::{ChannelTester, OutputDriverSet, RefreshInterval, SharedPump};
use crate::playback::{PlaybackEngine, ShowRequest};
use crate::scheduler::{ScheduleIntent, Scheduler};
use crate::source_set::{Readiness, WaitError, Waiter};
use crate::status::{PlaybackStatus, StatusEdge, StatusTracker};
use crate::sync::{RemotePlayback, SyncBroadcast};

/// How long the loop sleeps when nothing is readable.
pub const LOOP_SLEEP: Duration = Duration::from_millis(500);

/// Loop settings taken from the show configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonSettings {
    pub refresh: RefreshInterval,
    pub always_transmit: bool,
    pub loop_sleep: Duration,
}

impl DaemonSettings {
    pub fn from_config(show: &ShowSettings) -> Self {
        Self {
            refresh: RefreshInterval::from_config(show.bridging_interval_ms),
            always_transmit: show.always_transmit,
            loop_sleep: LOOP_SLEEP,
        }
    }
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            refresh: RefreshInterval::default(),
            always_transmit: false,
            loop_sleep: LOOP_SLEEP,
        }
    }
}

/// The output path shared by the loop, the engine and the pump.
pub struct OutputParts {
    pub pump: SharedPump,
    pub buffer: ChannelBuffer,
    pub tester: ChannelTester,
    pub drivers: OutputDriverSet,
}

/// Result of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Ran,
    /// Wait interrupted by a signal; nothing else happened.
    Interrupted,
    /// Wait failed; shutdown has been requested.
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub interrupted: u64,
    pub cleanups: u64,
}

type Clock = Box<dyn FnMut() -> NaiveDateTime>;

fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

pub struct Daemon {
    ctx: AppContext,
    settings: DaemonSettings,
    waiter: Box<dyn Waiter>,
    output: OutputParts,
    commands: Option<Box<dyn CommandSource>>,
    bridge: Option<Box<dyn BridgeSource>>,
    control: Option<Box<dyn ControlSource>>,
    scheduler: Option<Box<dyn Scheduler>>,
    engine: Option<Box<dyn PlaybackEngine>>,
    gpio: Option<Box<dyn GpioSource>>,
    remote: Option<Box<dyn RemotePlayback>>,
    sync_master: Option<Box<dyn SyncBroadcast>>,
    tracker: StatusTracker,
    clock: Clock,
    stats: LoopStats,
}

impl Daemon {
    pub fn new(
        ctx: AppContext,
        mut settings: DaemonSettings,
        waiter: Box<dyn Waiter>,
        output: OutputParts,
    ) -> Self {
        // A zero wait turns the loop into a busy spin.
        if settings.loop_sleep.is_zero() {
            warn!("Loop sleep of zero requested, using {:?}", LOOP_SLEEP);
            settings.loop_sleep = LOOP_SLEEP;
        }
        Self {
            ctx,
            settings,
            waiter,
            output,
            commands: None,
            bridge: None,
            control: None,
            scheduler: None,
            engine: None,
            gpio: None,
            remote: None,
            sync_master: None,
            tracker: StatusTracker::new(),
            clock: Box::new(local_now),
            stats: LoopStats::default(),
        }
    }

    pub fn with_commands(mut self, source: impl CommandSource + 'static) -> Self {
        self.commands = Some(Box::new(source));
        self
    }

    pub fn with_bridge(mut self, source: impl BridgeSource + 'static) -> Self {
        self.bridge = Some(Box::new(source));
        self
    }

    pub fn with_control(mut self, source: impl ControlSource + 'static) -> Self {
        self.control = Some(Box::new(source));
        self
    }

    pub fn with_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Box::new(scheduler));
        self
    }

    pub fn with_engine(mut self, engine: impl PlaybackEngine + 'static) -> Self {
        self.engine = Some(Box::new(engine));
        self
    }

    pub fn with_gpio(mut self, gpio: impl GpioSource + 'static) -> Self {
        self.gpio = Some(Box::new(gpio));
        self
    }

    pub fn with_remote(mut self, remote: impl RemotePlayback + 'static) -> Self {
        self.remote = Some(Box::new(remote));
        self
    }

    pub fn with_sync_master(mut self, master: impl SyncBroadcast + 'static) -> Self {
        self.sync_master = Some(Box::new(master));
        self
    }

    pub fn with_clock(mut self, clock: impl FnMut() -> NaiveDateTime + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut AppContext {
        &mut self.ctx
    }

    pub fn settings(&self) -> DaemonSettings {
        self.settings
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn previous_status(&self) -> PlaybackStatus {
        self.tracker.previous()
    }

    /// Work done once before the first tick: driver init, blanking, the
    /// bridge-mode pump, and recovering a show that is already due.
    pub fn startup(&mut self) {
        let mode = self.ctx.mode();
        let ready = self.output.drivers.init();
        debug!("{} output drivers ready", ready);
        self.send_blanking_data();

        if mode.is_bridge() {
            if self.bridge.is_none() {
                warn!("Bridge mode without a bridge source; no input will be received");
            }
            // Bridge data only reaches the drivers through the pump.
            self.start_pump();
        } else if mode.is_player() {
            let now = (self.clock)();
            let status = self.ctx.status();
            let intent = self
                .scheduler
                .as_mut()
                .and_then(|s| s.check_now(now, status));
            if let Some(intent) = intent {
                self.apply_intent(intent);
            }
        }

        info!("Starting main processing loop in {} mode", mode);
    }

    /// Loop until the run flag clears, then shut down.
    pub fn run(&mut self) -> LoopStats {
        while self.ctx.keep_running() {
            self.tick();
        }
        self.shutdown();
        self.stats
    }

    /// One loop iteration.
    pub fn tick(&mut self) -> TickOutcome {
        let ready = match self.waiter.wait(self.settings.loop_sleep) {
            Ok(ready) => ready,
            Err(WaitError::Interrupted) => {
                self.stats.interrupted += 1;
                return TickOutcome::Interrupted;
            }
            Err(WaitError::Failed(e)) => {
                error!("Main wait failed: {}", e);
                self.ctx.request_shutdown();
                return TickOutcome::Failed;
            }
        };
        self.stats.ticks += 1;

        self.service_sources(ready);
        self.ensure_pump();

        match self.ctx.mode() {
            mode if mode.is_player() => self.tick_player(),
            OperatingMode::RemoteSync => self.tick_remote(),
            _ => {}
        }

        self.poll_gpio();
        TickOutcome::Ran
    }

    fn service_sources(&mut self, ready: Readiness) {
        if ready.command {
            if let Some(mut commands) = self.commands.take() {
                commands.service(&mut |command| self.handle_command(command));
                self.commands = Some(commands);
            }
        }

        if ready.bridge {
            if let Some(bridge) = self.bridge.as_mut() {
                bridge.receive(&self.output.buffer);
            }
        }

        if ready.control {
            let packets = match self.control.as_mut() {
                Some(control) => control.receive(),
                None => Vec::new(),
            };
            for packet in packets {
                match self.remote.as_mut() {
                    Some(remote) if self.ctx.mode() == OperatingMode::RemoteSync => {
                        remote.apply(&packet)
                    }
                    _ => debug!("Ignoring sync packet for {}", packet.sequence),
                }
            }
        }
    }

    /// Whether the activation policy wants the pump started now.
    pub fn pump_should_run(&self) -> bool {
        !self.output.pump.borrow().is_running()
            && !self.ctx.mode().is_bridge()
            && (self.ctx.overlay_input()
                || self.output.tester.is_testing()
                || self.settings.always_transmit)
    }

    fn ensure_pump(&mut self) {
        if self.pump_should_run() {
            self.start_pump();
        }
    }

    fn start_pump(&mut self) {
        if let Err(e) = self.output.pump.borrow_mut().start(self.settings.refresh) {
            error!("Failed to start output pump: {}", e);
        }
    }

    fn tick_player(&mut self) {
        let before = self.ctx.status();
        if before.is_active() {
            if let Some(engine) = self.engine.as_mut() {
                engine.process(&mut self.ctx);
            }
        }

        let mut reactivated = false;
        if self.tracker.edge_within(before, self.ctx.status()) == StatusEdge::Stopped {
            if let Some(engine) = self.engine.as_mut() {
                engine.cleanup(&mut self.ctx);
            }
            self.stats.cleanups += 1;
            reactivated = self.ctx.status().is_active();
            if reactivated {
                debug!("Playback restarted during cleanup");
            }
        }
        self.tracker.settle(self.ctx.status(), reactivated);

        let now = (self.clock)();
        let status = self.ctx.status();
        let intent = self.scheduler.as_mut().and_then(|s| s.tick(now, status));
        if let Some(intent) = intent {
            self.apply_intent(intent);
        }

        if let Some(master) = self.sync_master.as_mut() {
            let position = self.engine.as_ref().and_then(|e| e.sync_position());
            master.broadcast(position.as_ref());
        }
    }

    fn tick_remote(&mut self) {
        if let Some(remote) = self.remote.as_mut() {
            if remote.is_streaming() {
                remote.process();
            }
        }
    }

    fn poll_gpio(&mut self) {
        let events = match self.gpio.as_mut() {
            Some(gpio) => gpio.poll(),
            None => return,
        };
        for event in events {
            info!("GPIO {} {:?} edge: {:?}", event.pin, event.edge, event.command);
            if let CommandReply::Error { message } = self.handle_command(event.command) {
                warn!("GPIO {} command failed: {}", event.pin, message);
            }
        }
    }

    fn apply_intent(&mut self, intent: ScheduleIntent) {
        match intent {
            ScheduleIntent::Start(request) => {
                if let Err(message) = self.start_show(&request) {
                    warn!("Scheduled show {} not started: {}", request.playlist, message);
                }
            }
            ScheduleIntent::Stop(kind) => {
                self.ctx.request_stop(kind);
            }
        }
    }

    fn start_show(&mut self, request: &ShowRequest) -> Result<(), String> {
        if !self.ctx.mode().is_player() {
            return Err(format!("playback is not available in {} mode", self.ctx.mode()));
        }
        let Some(engine) = self.engine.as_mut() else {
            return Err("no playback engine".to_string());
        };
        engine
            .start(request, &mut self.ctx)
            .map_err(|e| e.to_string())
    }

    /// Apply one command from the command socket or a GPIO trigger.
    pub fn handle_command(&mut self, command: Command) -> CommandReply {
        match command {
            Command::Start { playlist, repeat } => {
                match self.start_show(&ShowRequest::new(playlist.clone(), repeat)) {
                    Ok(()) => CommandReply::ok(format!("playing {}", playlist)),
                    Err(message) => CommandReply::error(message),
                }
            }
            Command::Stop { kind } => {
                if self.ctx.request_stop(kind) {
                    CommandReply::ok(format!("stopping ({:?})", kind))
                } else {
                    CommandReply::ok("nothing to stop")
                }
            }
            Command::Status => CommandReply::Status(self.status_report()),
            Command::Test { pattern: Some(pattern) } => {
                self.output.tester.start(pattern);
                CommandReply::ok("test pattern running")
            }
            Command::Test { pattern: None } => {
                self.output.tester.stop();
                CommandReply::ok("test stopped")
            }
            Command::Overlay { enabled } => {
                self.ctx.set_overlay_input(enabled);
                info!("Overlay input {}", if enabled { "enabled" } else { "disabled" });
                CommandReply::ok(format!("overlay {}", if enabled { "on" } else { "off" }))
            }
            Command::SetChannels {
                start_channel,
                values,
            } => {
                if !self.ctx.overlay_input() {
                    return CommandReply::error("overlay input is disabled");
                }
                if start_channel == 0 {
                    return CommandReply::error("channels are numbered from 1");
                }
                let written = self.output.buffer.write(start_channel - 1, &values);
                CommandReply::ok(format!("wrote {} channels", written))
            }
            Command::Shutdown => {
                info!("Shutdown requested by command");
                self.ctx.request_shutdown();
                CommandReply::ok("shutting down")
            }
        }
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            mode: self.ctx.mode().to_string(),
            status: self.ctx.status(),
            playlist: self
                .engine
                .as_ref()
                .and_then(|e| e.current_playlist())
                .map(str::to_string),
            pump_running: self.output.pump.borrow().is_running(),
            testing: self.output.tester.is_testing(),
            overlay_input: self.ctx.overlay_input(),
        }
    }

    fn send_blanking_data(&mut self) {
        self.output.buffer.blank();
        let failures = self.output.drivers.send(&self.output.buffer.snapshot());
        if failures > 0 {
            warn!("{} drivers failed to send blanking data", failures);
        }
    }

    /// Orderly teardown after the loop exits.
    pub fn shutdown(&mut self) {
        info!("Main loop complete, shutting down");
        self.output.pump.borrow_mut().stop();

        if let Some(control) = self.control.as_mut() {
            control.shutdown();
        }
        if self.ctx.mode().is_bridge() {
            if let Some(bridge) = self.bridge.as_mut() {
                bridge.shutdown();
            }
        }
        if let Some(master) = self.sync_master.as_mut() {
            master.shutdown();
        }
        if let Some(remote) = self.remote.as_mut() {
            remote.stop();
        }

        self.send_blanking_data();
        self.output.drivers.close();
    }
}
