//! Operating mode, fixed for the lifetime of the process.

use std::fmt;
use std::str::FromStr;

/// What the daemon is for.
///
/// `Bridge` relays external lighting data and never plays anything locally.
/// The other three form the player family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingMode {
    Bridge,
    Player,
    /// A player that also broadcasts sync packets to remotes.
    MasterSync,
    /// Follows a master's sync packets instead of its own schedule.
    RemoteSync,
}

impl OperatingMode {
    /// Modes that run the scheduler and playback engine.
    pub fn is_player(&self) -> bool {
        matches!(self, Self::Player | Self::MasterSync)
    }

    pub fn is_bridge(&self) -> bool {
        matches!(self, Self::Bridge)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bridge => "bridge",
            Self::Player => "player",
            Self::MasterSync => "master",
            Self::RemoteSync => "remote",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown operating mode '{0}' (expected bridge, player, master or remote)")]
pub struct UnknownMode(pub String);

impl FromStr for OperatingMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bridge" => Ok(Self::Bridge),
            "player" => Ok(Self::Player),
            "master" | "mastersync" | "master_sync" => Ok(Self::MasterSync),
            "remote" | "remotesync" | "remote_sync" => Ok(Self::RemoteSync),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modes() {
        assert_eq!("bridge".parse::<OperatingMode>().unwrap(), OperatingMode::Bridge);
        assert_eq!("Player".parse::<OperatingMode>().unwrap(), OperatingMode::Player);
        assert_eq!("master".parse::<OperatingMode>().unwrap(), OperatingMode::MasterSync);
        assert_eq!("remote".parse::<OperatingMode>().unwrap(), OperatingMode::RemoteSync);
        assert!("standalone".parse::<OperatingMode>().is_err());
    }

    #[test]
    fn test_player_family() {
        assert!(OperatingMode::Player.is_player());
        assert!(OperatingMode::MasterSync.is_player());
        assert!(!OperatingMode::RemoteSync.is_player());
        assert!(!OperatingMode::Bridge.is_player());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for mode in [
            OperatingMode::Bridge,
            OperatingMode::Player,
            OperatingMode::MasterSync,
            OperatingMode::RemoteSync,
        ] {
            assert_eq!(mode.to_string().parse::<OperatingMode>().unwrap(), mode);
        }
    }
}
