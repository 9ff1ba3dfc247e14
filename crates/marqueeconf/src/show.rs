//! Show configuration - operating mode, outputs, bridge, schedule and GPIO.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// All show sections.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ShowConfig {
    /// The `[show]` table.
    #[serde(rename = "show")]
    pub settings: ShowSettings,

    /// `[[outputs]]` entries, in channel order.
    pub outputs: Vec<OutputConfig>,

    /// `[bridge]` table.
    pub bridge: BridgeConfig,

    /// `[[schedule]]` entries. Earlier entries win when several are due.
    pub schedule: Vec<ScheduleEntryConfig>,

    /// `[[gpio]]` trigger inputs.
    pub gpio: Vec<GpioInputConfig>,
}

/// Core show settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShowSettings {
    /// Operating mode: `bridge`, `player`, `master` or `remote`.
    /// Default: player
    #[serde(default = "ShowSettings::default_mode")]
    pub mode: String,

    /// Size of the shared channel buffer.
    /// Default: 65536
    #[serde(default = "ShowSettings::default_channel_count")]
    pub channel_count: usize,

    /// Output refresh period in milliseconds. Unset or 0 means 50 ms.
    #[serde(default)]
    pub bridging_interval_ms: Option<u32>,

    /// Keep the output pump running even when nothing is playing.
    #[serde(default)]
    pub always_transmit: bool,

    /// Playlist directory. Relative paths resolve against `paths.media_dir`.
    /// Default: playlists
    #[serde(default = "ShowSettings::default_playlists_dir")]
    pub playlists_dir: PathBuf,

    /// Sequence directory. Relative paths resolve against `paths.media_dir`.
    /// Default: sequences
    #[serde(default = "ShowSettings::default_sequences_dir")]
    pub sequences_dir: PathBuf,
}

impl ShowSettings {
    fn default_mode() -> String {
        "player".to_string()
    }

    fn default_channel_count() -> usize {
        65536
    }

    fn default_playlists_dir() -> PathBuf {
        PathBuf::from("playlists")
    }

    fn default_sequences_dir() -> PathBuf {
        PathBuf::from("sequences")
    }
}

impl Default for ShowSettings {
    fn default() -> Self {
        Self {
            mode: Self::default_mode(),
            channel_count: Self::default_channel_count(),
            bridging_interval_ms: None,
            always_transmit: false,
            playlists_dir: Self::default_playlists_dir(),
            sequences_dir: Self::default_sequences_dir(),
        }
    }
}

/// One output sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    /// Driver kind: `udp` or `log`.
    pub kind: String,

    /// Driver target, e.g. `host:port` for `udp`.
    #[serde(default)]
    pub target: String,

    /// First channel sent by this output (1-based).
    #[serde(default = "OutputConfig::default_start_channel")]
    pub start_channel: usize,

    /// Number of channels sent by this output.
    #[serde(default = "OutputConfig::default_channel_count")]
    pub channel_count: usize,
}

impl OutputConfig {
    fn default_start_channel() -> usize {
        1
    }

    fn default_channel_count() -> usize {
        512
    }
}

/// Bridge mode input mapping.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub universes: Vec<UniverseConfig>,
}

/// Maps one incoming universe onto the channel buffer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UniverseConfig {
    pub universe: u16,

    /// First channel the universe lands on (1-based).
    pub start_channel: usize,

    /// Channels taken from the universe.
    /// Default: 512
    #[serde(default = "UniverseConfig::default_size")]
    pub size: usize,
}

impl UniverseConfig {
    fn default_size() -> usize {
        512
    }
}

/// One daily schedule window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEntryConfig {
    pub playlist: String,

    /// Window start, `HH:MM` or `HH:MM:SS`.
    pub start: String,

    /// Window end. An end before the start wraps past midnight.
    pub end: String,

    /// Day names (`mon`..`sun`) or `everyday`, `weekdays`, `weekends`.
    /// Default: everyday
    #[serde(default = "ScheduleEntryConfig::default_days")]
    pub days: Vec<String>,

    #[serde(default)]
    pub repeat: bool,

    /// How to stop at the end of the window:
    /// `graceful`, `graceful_after_loop` or `now`.
    /// Default: graceful
    #[serde(default = "ScheduleEntryConfig::default_stop")]
    pub stop: String,

    #[serde(default = "ScheduleEntryConfig::default_enabled")]
    pub enabled: bool,
}

impl ScheduleEntryConfig {
    fn default_days() -> Vec<String> {
        vec!["everyday".to_string()]
    }

    fn default_stop() -> String {
        "graceful".to_string()
    }

    fn default_enabled() -> bool {
        true
    }
}

/// A GPIO pin that triggers commands on edges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpioInputConfig {
    pub pin: u32,

    /// Command table dispatched on a low-to-high edge.
    #[serde(default)]
    pub rising: Option<toml::Table>,

    /// Command table dispatched on a high-to-low edge.
    #[serde(default)]
    pub falling: Option<toml::Table>,
}
