//! JSON command socket.
//!
//! A unix datagram socket carrying one JSON object per datagram, tagged by
//! `command`. Replies go back to the sender's bound path when it has one.
//!
//! ```text
//! {"command": "start", "playlist": "evening", "repeat": true}
//! {"command": "stop", "kind": "graceful"}
//! {"command": "test", "pattern": {"pattern": "solid", "start_channel": 1, "end_channel": 3, "value": 255}}
//! ```

use std::io::ErrorKind;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::output::TestPattern;
use crate::status::{PlaybackStatus, StopKind};

/// Datagrams handled per wake.
pub const MAX_COMMANDS_PER_WAKE: usize = 16;

const MAX_DATAGRAM: usize = 64 * 1024;

/// A request from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Start a playlist by name.
    Start {
        playlist: String,
        #[serde(default)]
        repeat: bool,
    },
    Stop {
        #[serde(default = "default_stop_kind")]
        kind: StopKind,
    },
    Status,
    /// Start a test pattern, or end testing when `pattern` is absent.
    Test {
        #[serde(default)]
        pattern: Option<TestPattern>,
    },
    /// Enable or disable external channel writes.
    Overlay { enabled: bool },
    /// Write raw values starting at a 1-based channel.
    SetChannels {
        start_channel: usize,
        values: Vec<u8>,
    },
    Shutdown,
}

fn default_stop_kind() -> StopKind {
    StopKind::Graceful
}

/// Snapshot returned by `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub mode: String,
    pub status: PlaybackStatus,
    pub playlist: Option<String>,
    pub pump_running: bool,
    pub testing: bool,
    pub overlay_input: bool,
}

/// Reply to one command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandReply {
    Ok { message: String },
    Status(StatusReport),
    Error { message: String },
}

impl CommandReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self::Ok {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Error { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to bind command socket {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid command: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Decode one datagram.
pub fn parse_command(datagram: &[u8]) -> Result<Command, CommandError> {
    Ok(serde_json::from_slice(datagram)?)
}

/// Command input the dispatch loop drives.
pub trait CommandSource {
    /// Read every pending command, hand each to `handler` and send back its
    /// reply. Returns the number of commands handled.
    fn service(&mut self, handler: &mut dyn FnMut(Command) -> CommandReply) -> usize;
}

/// Non-blocking unix datagram command socket.
pub struct CommandSocket {
    socket: UnixDatagram,
    path: PathBuf,
    datagram: Vec<u8>,
}

impl CommandSocket {
    /// Bind at `path`, replacing a stale socket file left by a previous run.
    pub fn bind(path: &Path) -> Result<Self, CommandError> {
        if path.exists() {
            debug!("Removing stale command socket {}", path.display());
            let _ = std::fs::remove_file(path);
        }
        let bind_err = |source| CommandError::Bind {
            path: path.to_path_buf(),
            source,
        };
        let socket = UnixDatagram::bind(path).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;

        info!("Command socket listening on {}", path.display());
        Ok(Self {
            socket,
            path: path.to_path_buf(),
            datagram: vec![0; MAX_DATAGRAM],
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CommandSource for CommandSocket {
    fn service(&mut self, handler: &mut dyn FnMut(Command) -> CommandReply) -> usize {
        let mut handled = 0;
        for _ in 0..MAX_COMMANDS_PER_WAKE {
            let (len, peer) = match self.socket.recv_from(&mut self.datagram) {
                Ok(received) => received,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Command socket receive failed: {}", e);
                    break;
                }
            };

            let reply = match parse_command(&self.datagram[..len]) {
                Ok(command) => {
                    debug!("Command: {:?}", command);
                    handled += 1;
                    handler(command)
                }
                Err(e) => {
                    warn!("{}", e);
                    CommandReply::error(e.to_string())
                }
            };

            let Some(reply_path) = peer.as_pathname() else {
                continue;
            };
            match serde_json::to_vec(&reply) {
                Ok(bytes) => {
                    if let Err(e) = self.socket.send_to(&bytes, reply_path) {
                        debug!("Reply to {} failed: {}", reply_path.display(), e);
                    }
                }
                Err(e) => warn!("Could not encode reply: {}", e),
            }
        }
        handled
    }
}

impl AsRawFd for CommandSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl Drop for CommandSocket {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command(br#"{"command":"start","playlist":"evening"}"#).unwrap(),
            Command::Start {
                playlist: "evening".into(),
                repeat: false
            }
        );
        assert_eq!(
            parse_command(br#"{"command":"stop"}"#).unwrap(),
            Command::Stop {
                kind: StopKind::Graceful
            }
        );
        assert_eq!(
            parse_command(br#"{"command":"stop","kind":"now"}"#).unwrap(),
            Command::Stop { kind: StopKind::Now }
        );
        assert_eq!(
            parse_command(br#"{"command":"test"}"#).unwrap(),
            Command::Test { pattern: None }
        );
        assert_eq!(
            parse_command(
                br#"{"command":"test","pattern":{"pattern":"solid","start_channel":1,"end_channel":3,"value":9}}"#
            )
            .unwrap(),
            Command::Test {
                pattern: Some(TestPattern::Solid {
                    start_channel: 1,
                    end_channel: 3,
                    value: 9
                })
            }
        );
        assert_eq!(
            parse_command(br#"{"command":"set_channels","start_channel":5,"values":[1,2]}"#).unwrap(),
            Command::SetChannels {
                start_channel: 5,
                values: vec![1, 2]
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(parse_command(br#"{"command":"explode"}"#).is_err());
        assert!(parse_command(b"not json").is_err());
    }

    #[test]
    fn test_reply_shape() {
        let json = serde_json::to_value(CommandReply::ok("started")).unwrap();
        assert_eq!(json["result"], "ok");
        assert_eq!(json["message"], "started");

        let json = serde_json::to_value(CommandReply::Status(StatusReport {
            mode: "player".into(),
            status: PlaybackStatus::Playing,
            playlist: Some("evening".into()),
            pump_running: true,
            testing: false,
            overlay_input: false,
        }))
        .unwrap();
        assert_eq!(json["result"], "status");
        assert_eq!(json["status"], "playing");
    }

    #[test]
    fn test_socket_round_trip_with_reply() {
        let dir = tempfile::tempdir().unwrap();
        let server_path = dir.path().join("marquee.sock");
        let client_path = dir.path().join("client.sock");

        let mut server = CommandSocket::bind(&server_path).unwrap();
        let client = UnixDatagram::bind(&client_path).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        client.send_to(br#"{"command":"status"}"#, &server_path).unwrap();
        client.send_to(b"garbage", &server_path).unwrap();

        let mut seen = Vec::new();
        let handled = server.service(&mut |cmd| {
            seen.push(cmd);
            CommandReply::ok("fine")
        });
        assert_eq!(handled, 1);
        assert_eq!(seen, vec![Command::Status]);

        let mut buf = [0u8; 1024];
        let n = client.recv(&mut buf).unwrap();
        let first: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(first["result"], "ok");
        let n = client.recv(&mut buf).unwrap();
        let second: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(second["result"], "error");

        drop(server);
        assert!(!server_path.exists());
    }

    #[test]
    fn test_bind_replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        std::fs::write(&path, b"").unwrap();
        assert!(CommandSocket::bind(&path).is_ok());
    }
}
