//! Configuration for the marquee show daemon.
//!
//! Kept dependency-light so the daemon and any companion tool can link it.
//!
//! Settings come in two groups:
//!
//! - [`InfraConfig`]: process plumbing fixed at startup (paths, sockets,
//!   log output, daemonization, scheduling priority)
//! - [`ShowConfig`]: what the daemon plays and how (mode, output cadence,
//!   outputs, bridge universes, schedule, GPIO triggers)
//!
//! Sources are layered, each one overriding the ones before it:
//!
//! ```text
//! compiled defaults
//!   < /etc/marquee/config.toml
//!   < ~/.config/marquee/config.toml
//!   < ./marquee.toml, or the file passed with --config
//!   < MARQUEE_* environment variables
//! ```
//!
//! A small show file:
//!
//! ```toml
//! [paths]
//! media_dir = "~/media"
//!
//! [daemon]
//! realtime_priority = 99
//!
//! [show]
//! mode = "player"
//! bridging_interval_ms = 25
//! always_transmit = true
//!
//! [[outputs]]
//! kind = "udp"
//! target = "10.0.0.50:9000"
//! channel_count = 512
//!
//! [[schedule]]
//! playlist = "evening"
//! start = "18:00"
//! end = "23:00"
//! ```

pub mod infra;
pub mod loader;
pub mod show;

pub use infra::{BindConfig, DaemonConfig, InfraConfig, PathsConfig, TelemetryConfig};
pub use loader::{config_search_path, ConfigSources};
pub use show::{
    BridgeConfig, GpioInputConfig, OutputConfig, ScheduleEntryConfig, ShowConfig, ShowSettings,
    UniverseConfig,
};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config in {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Everything the daemon reads at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarqueeConfig {
    #[serde(flatten)]
    pub infra: InfraConfig,

    #[serde(flatten)]
    pub show: ShowConfig,
}

impl MarqueeConfig {
    /// Layer every config file on the search path, then the environment.
    ///
    /// `explicit` (the `--config` argument) stands in for `./marquee.toml`.
    /// Returns the merged config and a record of what contributed to it.
    pub fn load_with_sources_from(
        explicit: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut merged = toml::Table::new();
        let mut files = Vec::new();
        for path in config_search_path(explicit) {
            loader::merge_tables(&mut merged, loader::load_table(&path)?);
            files.push(path);
        }

        let origin = files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let mut config = loader::from_table(merged, &origin)?;

        let env_overrides = loader::apply_env_overrides(&mut config);
        Ok((
            config,
            ConfigSources {
                files,
                env_overrides,
            },
        ))
    }
}
