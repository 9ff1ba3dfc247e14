//! Marquee: realtime show playback daemon.
//!
//! Drives lighting outputs from scheduled playlists, bridges incoming E1.31
//! data straight to the outputs, and keeps a fixed output cadence no matter
//! what the control side is doing.
//!
//! Two threads do the work:
//!
//! - **Dispatch loop** (primary thread): waits on the command, bridge and
//!   control sockets with a 500 ms heartbeat, then runs the scheduler,
//!   playback engine and GPIO triggers
//! - **Output pump** (`channel-output` thread): snapshots the channel buffer
//!   at the refresh cadence and pushes it through the output drivers
//!
//! The operating mode picks which of these paths is live:
//!
//! - **bridge**: E1.31 in, channels out. No scheduler, no playback
//! - **player**: scheduled and commanded playlists
//! - **master**: player that also broadcasts its position to remotes
//! - **remote**: follows a master's sync packets

pub mod bridge;
pub mod channel_data;
pub mod command;
pub mod context;
pub mod control;
pub mod daemon;
pub mod gpio;
pub mod mode;
pub mod output;
pub mod playback;
pub mod scheduler;
pub mod source_set;
pub mod startup;
pub mod status;
pub mod sync;

pub use bridge::{decode_e131, BridgeError, BridgeReceiver, BridgeSource, BridgeStats, UniverseMap};
pub use channel_data::ChannelBuffer;
pub use command::{Command, CommandError, CommandReply, CommandSocket, CommandSource, StatusReport};
pub use context::{AppContext, RunFlag};
pub use control::{ControlError, ControlSocket, ControlSource, SyncAction, SyncPacket};
pub use daemon::{Daemon, DaemonSettings, LoopStats, OutputParts, TickOutcome, LOOP_SLEEP};
pub use gpio::{GpioError, GpioEvent, GpioPoller, GpioSource, PinReader, SysfsPins};
pub use mode::{OperatingMode, UnknownMode};
pub use output::{
    build_drivers, ChannelTester, FrameFeed, OutputDriver, OutputDriverSet, OutputError,
    OutputPump, PumpControl, RefreshInterval, SharedPump, TestPattern,
};
pub use playback::{
    PlaybackEngine, PlaybackError, PlaylistPlayer, SequenceFeed, ShowRequest, SyncPosition,
};
pub use scheduler::{DailyScheduler, ScheduleError, ScheduleIntent, Scheduler};
pub use source_set::{PollWaiter, ReadableSourceSet, Readiness, WaitError, Waiter};
pub use startup::StartupError;
pub use status::{PlaybackStatus, StatusEdge, StatusTracker, StopKind};
pub use sync::{RemoteFollower, RemotePlayback, SyncBroadcast, SyncMaster, SyncState};
