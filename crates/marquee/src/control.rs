//! Control protocol: the binary UDP packets a sync master broadcasts to its
//! remotes.
//!
//! ```text
//! 0      4      5        6      10        14
//! "MRQC" | type | action | frame | seconds | sequence name\0
//!          u8     u8       u32le   f32le
//! ```

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::os::fd::{AsRawFd, RawFd};

use tracing::{debug, info, warn};

pub const CONTROL_MAGIC: &[u8; 4] = b"MRQC";
pub const PACKET_TYPE_SYNC: u8 = 1;

const HEADER_LEN: usize = 14;
const MAX_NAME_LEN: usize = 255;

/// Packets handled per wake.
pub const MAX_PACKETS_PER_WAKE: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ControlError {
    #[error("packet too short ({0} bytes)")]
    TooShort(usize),

    #[error("bad magic")]
    BadMagic,

    #[error("unsupported packet type {0}")]
    UnsupportedType(u8),

    #[error("unknown sync action {0}")]
    UnknownAction(u8),

    #[error("sequence name is not NUL-terminated UTF-8")]
    BadName,

    #[error("sequence name too long ({0} bytes)")]
    NameTooLong(usize),

    #[error("control socket: {0}")]
    Io(String),
}

impl From<std::io::Error> for ControlError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Start,
    Stop,
    Sync,
}

impl SyncAction {
    fn code(self) -> u8 {
        match self {
            Self::Start => 0,
            Self::Stop => 1,
            Self::Sync => 2,
        }
    }

    fn from_code(code: u8) -> Result<Self, ControlError> {
        match code {
            0 => Ok(Self::Start),
            1 => Ok(Self::Stop),
            2 => Ok(Self::Sync),
            other => Err(ControlError::UnknownAction(other)),
        }
    }
}

/// One sync update from a master.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPacket {
    pub action: SyncAction,
    pub sequence: String,
    pub frame: u32,
    pub seconds: f32,
}

impl SyncPacket {
    pub fn start(sequence: &str) -> Self {
        Self {
            action: SyncAction::Start,
            sequence: sequence.to_string(),
            frame: 0,
            seconds: 0.0,
        }
    }

    pub fn stop(sequence: &str) -> Self {
        Self {
            action: SyncAction::Stop,
            sequence: sequence.to_string(),
            frame: 0,
            seconds: 0.0,
        }
    }

    pub fn sync(sequence: &str, frame: u32, seconds: f32) -> Self {
        Self {
            action: SyncAction::Sync,
            sequence: sequence.to_string(),
            frame,
            seconds,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ControlError> {
        let name = self.sequence.as_bytes();
        if name.len() > MAX_NAME_LEN {
            return Err(ControlError::NameTooLong(name.len()));
        }
        let mut out = Vec::with_capacity(HEADER_LEN + name.len() + 1);
        out.extend_from_slice(CONTROL_MAGIC);
        out.push(PACKET_TYPE_SYNC);
        out.push(self.action.code());
        out.extend_from_slice(&self.frame.to_le_bytes());
        out.extend_from_slice(&self.seconds.to_le_bytes());
        out.extend_from_slice(name);
        out.push(0);
        Ok(out)
    }

    pub fn decode(packet: &[u8]) -> Result<Self, ControlError> {
        if packet.len() < HEADER_LEN + 1 {
            return Err(ControlError::TooShort(packet.len()));
        }
        if &packet[0..4] != CONTROL_MAGIC {
            return Err(ControlError::BadMagic);
        }
        if packet[4] != PACKET_TYPE_SYNC {
            return Err(ControlError::UnsupportedType(packet[4]));
        }
        let action = SyncAction::from_code(packet[5])?;
        let frame = u32::from_le_bytes([packet[6], packet[7], packet[8], packet[9]]);
        let seconds = f32::from_le_bytes([packet[10], packet[11], packet[12], packet[13]]);

        let tail = &packet[HEADER_LEN..];
        let end = tail.iter().position(|b| *b == 0).ok_or(ControlError::BadName)?;
        let sequence = std::str::from_utf8(&tail[..end])
            .map_err(|_| ControlError::BadName)?
            .to_string();

        Ok(Self {
            action,
            sequence,
            frame,
            seconds,
        })
    }
}

/// Control input the dispatch loop drives.
pub trait ControlSource {
    /// Read pending packets. Malformed packets are logged and skipped.
    fn receive(&mut self) -> Vec<SyncPacket>;

    fn shutdown(&mut self);
}

/// Non-blocking UDP control socket.
pub struct ControlSocket {
    socket: Option<UdpSocket>,
    packet: Vec<u8>,
}

impl ControlSocket {
    pub fn bind(addr: &str) -> Result<Self, ControlError> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        info!("Control socket listening on {}", socket.local_addr()?);
        Ok(Self {
            socket: Some(socket),
            packet: vec![0; 1500],
        })
    }

    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }
}

impl ControlSource for ControlSocket {
    fn receive(&mut self) -> Vec<SyncPacket> {
        let mut packets = Vec::new();
        let Some(socket) = &self.socket else {
            return packets;
        };
        for _ in 0..MAX_PACKETS_PER_WAKE {
            match socket.recv_from(&mut self.packet) {
                Ok((len, from)) => match SyncPacket::decode(&self.packet[..len]) {
                    Ok(packet) => packets.push(packet),
                    Err(e) => debug!("Dropping control packet from {}: {}", from, e),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Control receive failed: {}", e);
                    break;
                }
            }
        }
        packets
    }

    fn shutdown(&mut self) {
        if self.socket.take().is_some() {
            info!("Control socket closed");
        }
    }
}

impl AsRawFd for ControlSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_ref().map_or(-1, |s| s.as_raw_fd())
    }
}
