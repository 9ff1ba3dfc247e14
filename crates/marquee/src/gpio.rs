//! GPIO trigger inputs.
//!
//! Pins are sampled once per dispatch tick. An edge between two samples
//! raises the command configured for it.

use std::path::PathBuf;

use marqueeconf::GpioInputConfig;
use tracing::{debug, info, warn};

use crate::command::Command;

#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("failed to read gpio {pin}: {source}")]
    Read {
        pin: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("gpio {pin}: unexpected value '{value}'")]
    BadValue { pin: u32, value: String },

    #[error("gpio {pin}: invalid {edge} command: {message}")]
    BadCommand {
        pin: u32,
        edge: &'static str,
        message: String,
    },
}

/// Reads the current level of a pin.
pub trait PinReader {
    fn read(&mut self, pin: u32) -> Result<bool, GpioError>;
}

/// Levels from `/sys/class/gpio/gpioN/value`. Pin export and direction are
/// set up outside the daemon.
#[derive(Debug, Clone)]
pub struct SysfsPins {
    root: PathBuf,
}

impl SysfsPins {
    pub fn new() -> Self {
        Self::with_root("/sys/class/gpio")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsPins {
    fn default() -> Self {
        Self::new()
    }
}

impl PinReader for SysfsPins {
    fn read(&mut self, pin: u32) -> Result<bool, GpioError> {
        let path = self.root.join(format!("gpio{}", pin)).join("value");
        let value = std::fs::read_to_string(&path).map_err(|source| GpioError::Read { pin, source })?;
        match value.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(GpioError::BadValue {
                pin,
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GpioEvent {
    pub pin: u32,
    pub edge: Edge,
    pub command: Command,
}

/// Edge source the dispatch loop polls each tick.
pub trait GpioSource {
    fn poll(&mut self) -> Vec<GpioEvent>;
}

#[derive(Debug)]
struct WatchedPin {
    pin: u32,
    rising: Option<Command>,
    falling: Option<Command>,
    last: Option<bool>,
    read_failing: bool,
}

fn table_command(
    pin: u32,
    edge: &'static str,
    table: &Option<toml::Table>,
) -> Result<Option<Command>, GpioError> {
    let Some(table) = table else {
        return Ok(None);
    };
    toml::Value::Table(table.clone())
        .try_into::<Command>()
        .map(Some)
        .map_err(|e| GpioError::BadCommand {
            pin,
            edge,
            message: e.to_string(),
        })
}

pub struct GpioPoller<R: PinReader = SysfsPins> {
    reader: R,
    pins: Vec<WatchedPin>,
}

impl<R: PinReader> GpioPoller<R> {
    pub fn from_config(configs: &[GpioInputConfig], reader: R) -> Result<Self, GpioError> {
        let pins = configs
            .iter()
            .map(|c| -> Result<WatchedPin, GpioError> {
                Ok(WatchedPin {
                    pin: c.pin,
                    rising: table_command(c.pin, "rising", &c.rising)?,
                    falling: table_command(c.pin, "falling", &c.falling)?,
                    last: None,
                    read_failing: false,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if !pins.is_empty() {
            info!("Watching {} GPIO inputs", pins.len());
        }
        Ok(Self { reader, pins })
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

impl<R: PinReader> GpioSource for GpioPoller<R> {
    fn poll(&mut self) -> Vec<GpioEvent> {
        let mut events = Vec::new();
        for watched in &mut self.pins {
            let level = match self.reader.read(watched.pin) {
                Ok(level) => {
                    watched.read_failing = false;
                    level
                }
                Err(e) => {
                    if !watched.read_failing {
                        warn!("{}", e);
                        watched.read_failing = true;
                    }
                    continue;
                }
            };

            let previous = watched.last.replace(level);
            let (edge, command) = match (previous, level) {
                (Some(false), true) => (Edge::Rising, &watched.rising),
                (Some(true), false) => (Edge::Falling, &watched.falling),
                _ => continue,
            };
            debug!("GPIO {} {:?} edge", watched.pin, edge);
            if let Some(command) = command {
                events.push(GpioEvent {
                    pin: watched.pin,
                    edge,
                    command: command.clone(),
                });
            }
        }
        events
    }
}
