//! marqueed - the show playback daemon.
//!
//! Startup order: config load, command line overrides, optional
//! daemonization, logging, realtime priority, signal handlers, main loop.

use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use marquee::{
    build_drivers, startup, AppContext, BridgeReceiver, ChannelBuffer, ChannelTester,
    CommandSocket, ControlSocket, DailyScheduler, Daemon, DaemonSettings, GpioPoller, LoopStats,
    OperatingMode, OutputDriverSet, OutputParts, OutputPump, PlaylistPlayer, PollWaiter,
    ReadableSourceSet, RemoteFollower, RunFlag, SequenceFeed, SharedPump, SyncMaster, SysfsPins,
    UniverseMap,
};
use marqueeconf::MarqueeConfig;
use tracing::{error, info, warn};

/// Realtime show playback daemon
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to load instead of ./marquee.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Operating mode: bridge, player, master or remote
    #[arg(long)]
    mode: Option<OperatingMode>,

    /// Stay in the foreground
    #[arg(short, long, conflicts_with = "daemonize")]
    foreground: bool,

    /// Detach and run in the background
    #[arg(short, long)]
    daemonize: bool,

    /// Skip the SCHED_FIFO request
    #[arg(long)]
    no_realtime: bool,

    /// Log filter, e.g. "info" or "marquee=debug"
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Fold the flags into the loaded config. `RUST_LOG`, already applied by
    /// the loader, keeps precedence over `--log-level`.
    fn apply(&self, config: &mut MarqueeConfig, rust_log_set: bool) {
        if let Some(mode) = self.mode {
            config.show.settings.mode = mode.to_string();
        }
        if self.foreground {
            config.infra.daemon.daemonize = false;
        }
        if self.daemonize {
            config.infra.daemon.daemonize = true;
        }
        if self.no_realtime {
            config.infra.daemon.realtime_priority = 0;
        }
        if let Some(level) = &self.log_level {
            if rust_log_set {
                eprintln!("marqueed: RUST_LOG is set, ignoring --log-level {level}");
            } else {
                config.infra.telemetry.log_level = level.clone();
            }
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (mut config, sources) = match MarqueeConfig::load_with_sources_from(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("marqueed: {e}");
            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut config, std::env::var_os("RUST_LOG").is_some());

    let mode: OperatingMode = match config.show.settings.mode.parse() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("marqueed: {e}");
            return ExitCode::FAILURE;
        }
    };

    if config.infra.daemon.daemonize {
        if let Err(e) = startup::daemonize() {
            eprintln!("marqueed: {e}");
            return ExitCode::FAILURE;
        }
    }

    if let Err(e) = startup::init_logging(
        &config.infra.telemetry.log_level,
        config.infra.paths.log_file.as_deref(),
    ) {
        eprintln!("marqueed: {e}");
        return ExitCode::FAILURE;
    }

    info!("marqueed {} starting in {} mode", env!("CARGO_PKG_VERSION"), mode);
    for file in &sources.files {
        info!("Loaded config from {}", file.display());
    }
    for var in &sources.env_overrides {
        info!("Config override from ${}", var);
    }

    let priority = config.infra.daemon.realtime_priority;
    if priority > 0 {
        if let Err(e) = startup::request_realtime_priority(priority) {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
        info!("Running with SCHED_FIFO priority {}", priority);
    }

    match run(&config, mode) {
        Ok(stats) => {
            info!(
                "Shutdown complete after {} ticks ({} interrupted, {} cleanups)",
                stats.ticks, stats.interrupted, stats.cleanups
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: &MarqueeConfig, mode: OperatingMode) -> Result<LoopStats> {
    let run_flag = RunFlag::new();
    run_flag
        .register_signals()
        .context("Failed to register signal handlers")?;

    let show = &config.show;
    let settings = DaemonSettings::from_config(&show.settings);

    let buffer = ChannelBuffer::new(show.settings.channel_count);
    let drivers = OutputDriverSet::new(
        build_drivers(&show.outputs).context("Invalid output configuration")?,
    );
    let tester = ChannelTester::new();
    let feed = SequenceFeed::new();
    let pump = OutputPump::new(buffer.clone(), drivers.clone(), tester.clone())
        .with_feed(Arc::new(feed.clone()))
        .shared();
    let shared_pump: SharedPump = pump.clone();

    let media_dir = &config.infra.paths.media_dir;
    let playlists_dir = media_dir.join(&show.settings.playlists_dir);
    let sequences_dir = media_dir.join(&show.settings.sequences_dir);

    let mut sources = ReadableSourceSet::new();

    let commands = match CommandSocket::bind(&config.infra.paths.command_socket) {
        Ok(socket) => {
            sources = sources.with_command(socket.as_raw_fd());
            Some(socket)
        }
        Err(e) => {
            warn!("{}; commands disabled", e);
            None
        }
    };

    let control = match ControlSocket::bind(&config.infra.bind.control) {
        Ok(socket) => {
            sources = sources.with_control(socket.as_raw_fd());
            Some(socket)
        }
        Err(e) => {
            warn!("Control socket on {} unavailable: {}", config.infra.bind.control, e);
            None
        }
    };

    let bridge = if mode.is_bridge() {
        let universes = UniverseMap::from_config(&show.bridge.universes);
        match BridgeReceiver::bind(&config.infra.bind.bridge, universes) {
            Ok(receiver) => {
                sources = sources.with_bridge(receiver.as_raw_fd());
                Some(receiver)
            }
            Err(e) => {
                error!("Bridge initialization on {} failed: {}", config.infra.bind.bridge, e);
                None
            }
        }
    } else {
        None
    };

    let ctx = AppContext::new(mode, run_flag);
    let output = OutputParts {
        pump: shared_pump,
        buffer: buffer.clone(),
        tester,
        drivers,
    };
    let mut daemon = Daemon::new(ctx, settings, Box::new(PollWaiter::new(sources)), output);

    if let Some(commands) = commands {
        daemon = daemon.with_commands(commands);
    }
    if let Some(control) = control {
        daemon = daemon.with_control(control);
    }
    if let Some(bridge) = bridge {
        daemon = daemon.with_bridge(bridge);
    }

    if !mode.is_bridge() && !settings.always_transmit {
        warn!("always_transmit is off; frames reach the outputs only while overlay input or a test pattern is active");
    }

    if mode.is_player() {
        let scheduler =
            DailyScheduler::from_config(&show.schedule).context("Invalid schedule configuration")?;
        let player = PlaylistPlayer::new(
            playlists_dir,
            sequences_dir.clone(),
            buffer.clone(),
            feed.clone(),
        );
        daemon = daemon.with_scheduler(scheduler).with_engine(player);
    }

    match mode {
        OperatingMode::MasterSync => {
            let master = SyncMaster::init(&config.infra.bind.sync_target)
                .context("Failed to initialize sync master")?;
            daemon = daemon.with_sync_master(master);
        }
        OperatingMode::RemoteSync => {
            let follower = RemoteFollower::new(sequences_dir, buffer, feed);
            daemon = daemon.with_remote(follower);
        }
        _ => {}
    }

    let gpio = GpioPoller::from_config(&show.gpio, SysfsPins::new())
        .context("Invalid GPIO configuration")?;
    if !gpio.is_empty() {
        daemon = daemon.with_gpio(gpio);
    }

    daemon.startup();
    let stats = daemon.run();

    let pump = pump.borrow();
    let pump_stats = pump.stats();
    info!(
        "Output pump sent {} frames ({} driver failures, {} overruns)",
        pump_stats.frames.load(std::sync::atomic::Ordering::Relaxed),
        pump_stats.send_failures.load(std::sync::atomic::Ordering::Relaxed),
        pump_stats.overruns.load(std::sync::atomic::Ordering::Relaxed),
    );
    Ok(stats)
}
