//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// All infrastructure sections.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InfraConfig {
    pub paths: PathsConfig,
    pub bind: BindConfig,
    pub telemetry: TelemetryConfig,
    pub daemon: DaemonConfig,
}

/// Filesystem paths for media, sockets and logs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Base directory for playlists and sequences.
    /// Default: ~/.local/share/marquee
    #[serde(default = "PathsConfig::default_media_dir")]
    pub media_dir: PathBuf,

    /// Unix datagram socket for control commands.
    /// Default: /tmp/marquee-command.sock
    #[serde(default = "PathsConfig::default_command_socket")]
    pub command_socket: PathBuf,

    /// Log file. Logs go to stderr when unset.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl PathsConfig {
    fn default_media_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/marquee"))
            .unwrap_or_else(|| PathBuf::from(".local/share/marquee"))
    }

    fn default_command_socket() -> PathBuf {
        PathBuf::from("/tmp/marquee-command.sock")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            media_dir: Self::default_media_dir(),
            command_socket: Self::default_command_socket(),
            log_file: None,
        }
    }
}

/// Network bind addresses for this process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BindConfig {
    /// UDP address the bridge receiver listens on (E1.31 port).
    /// Default: 0.0.0.0:5568
    #[serde(default = "BindConfig::default_bridge")]
    pub bridge: String,

    /// UDP address for control/sync packets.
    /// Default: 0.0.0.0:32320
    #[serde(default = "BindConfig::default_control")]
    pub control: String,

    /// Destination for sync packets sent in master mode.
    /// Default: 255.255.255.255:32320
    #[serde(default = "BindConfig::default_sync_target")]
    pub sync_target: String,
}

impl BindConfig {
    fn default_bridge() -> String {
        "0.0.0.0:5568".to_string()
    }

    fn default_control() -> String {
        "0.0.0.0:32320".to_string()
    }

    fn default_sync_target() -> String {
        "255.255.255.255:32320".to_string()
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            bridge: Self::default_bridge(),
            control: Self::default_control(),
            sync_target: Self::default_sync_target(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Process setup performed before the main loop starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// Detach from the terminal (double fork + setsid).
    #[serde(default)]
    pub daemonize: bool,

    /// SCHED_FIFO priority requested at startup. 0 skips the request.
    /// Default: 99
    #[serde(default = "DaemonConfig::default_realtime_priority")]
    pub realtime_priority: i32,
}

impl DaemonConfig {
    fn default_realtime_priority() -> i32 {
        99
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            daemonize: false,
            realtime_priority: Self::default_realtime_priority(),
        }
    }
}
