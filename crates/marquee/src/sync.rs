//! Multi-controller sync: the master side broadcasts the running sequence's
//! position, the remote side follows it.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::channel_data::ChannelBuffer;
use crate::control::{ControlError, SyncAction, SyncPacket};
use crate::playback::{Sequence, SequenceFeed, SyncPosition};

/// Master-side broadcaster, fed the engine's position every tick.
pub trait SyncBroadcast {
    /// `None` while nothing is playing.
    fn broadcast(&mut self, position: Option<&SyncPosition>);

    fn shutdown(&mut self);
}

pub struct SyncMaster {
    socket: UdpSocket,
    target: SocketAddr,
    current: Option<String>,
    sent: u64,
}

impl SyncMaster {
    pub fn init(target: &str) -> Result<Self, ControlError> {
        let target = target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ControlError::Io(format!("no address for {}", target)))?;
        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        socket.set_broadcast(true)?;
        info!("Sync master broadcasting to {}", target);
        Ok(Self {
            socket,
            target,
            current: None,
            sent: 0,
        })
    }

    fn send(&mut self, packet: &SyncPacket) {
        match packet.encode() {
            Ok(bytes) => match self.socket.send_to(&bytes, self.target) {
                Ok(_) => self.sent += 1,
                Err(e) => debug!("Sync send to {} failed: {}", self.target, e),
            },
            Err(e) => warn!("Cannot encode sync packet: {}", e),
        }
    }

    pub fn packets_sent(&self) -> u64 {
        self.sent
    }
}

impl SyncBroadcast for SyncMaster {
    fn broadcast(&mut self, position: Option<&SyncPosition>) {
        match (self.current.take(), position) {
            (Some(current), Some(p)) if current == p.sequence => {
                self.send(&SyncPacket::sync(&p.sequence, p.frame, p.seconds));
                self.current = Some(current);
            }
            (previous, Some(p)) => {
                if let Some(previous) = previous {
                    self.send(&SyncPacket::stop(&previous));
                }
                self.send(&SyncPacket::start(&p.sequence));
                self.send(&SyncPacket::sync(&p.sequence, p.frame, p.seconds));
                self.current = Some(p.sequence.clone());
            }
            (Some(previous), None) => self.send(&SyncPacket::stop(&previous)),
            (None, None) => {}
        }
    }

    fn shutdown(&mut self) {
        if let Some(current) = self.current.take() {
            self.send(&SyncPacket::stop(&current));
        }
        info!("Sync master shut down ({} packets sent)", self.sent);
    }
}

/// What a remote knows about its master's playback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncState {
    pub sequence: Option<String>,
    pub frame: u32,
    pub seconds: f32,
    pub received_at: Option<Instant>,
    pub streaming: bool,
}

impl SyncState {
    pub fn apply(&mut self, packet: &SyncPacket, now: Instant) {
        match packet.action {
            SyncAction::Start | SyncAction::Sync => {
                self.sequence = Some(packet.sequence.clone());
                self.frame = packet.frame;
                self.seconds = packet.seconds;
                self.received_at = Some(now);
                self.streaming = true;
            }
            SyncAction::Stop => *self = Self::default(),
        }
    }
}

/// Remote-side bookkeeping the dispatch loop drives in remote mode.
pub trait RemotePlayback {
    fn apply(&mut self, packet: &SyncPacket);

    fn is_streaming(&self) -> bool;

    /// Per-tick work while the master is streaming.
    fn process(&mut self);

    fn stop(&mut self);
}

pub struct RemoteFollower {
    sequences_dir: PathBuf,
    buffer: ChannelBuffer,
    feed: SequenceFeed,
    state: SyncState,
    pending_seek: bool,
    unavailable: Option<String>,
}

impl RemoteFollower {
    pub fn new(
        sequences_dir: PathBuf,
        buffer: ChannelBuffer,
        feed: SequenceFeed,
    ) -> Self {
        Self {
            sequences_dir,
            buffer,
            feed,
            state: SyncState::default(),
            pending_seek: false,
            unavailable: None,
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn apply_at(&mut self, packet: &SyncPacket, now: Instant) {
        self.state.apply(packet, now);
        if packet.action == SyncAction::Stop {
            debug!("Master stopped {}", packet.sequence);
            self.feed.clear();
            self.buffer.blank();
            self.unavailable = None;
        } else {
            self.pending_seek = true;
        }
    }

    fn ensure_loaded(&mut self, name: &str, now: Instant) -> bool {
        if self.feed.sequence_name().as_deref() == Some(name) {
            return true;
        }
        if self.unavailable.as_deref() == Some(name) {
            return false;
        }

        match Sequence::open(&self.sequences_dir.join(name)) {
            Ok(sequence) => {
                info!("Following master sequence {}", name);
                self.feed.load(sequence, now);
                self.pending_seek = true;
                self.unavailable = None;
                true
            }
            Err(e) => {
                warn!("Cannot follow {}: {}", name, e);
                self.feed.clear();
                self.unavailable = Some(name.to_string());
                false
            }
        }
    }

    pub fn process_at(&mut self, now: Instant) {
        if !self.state.streaming {
            return;
        }
        let Some(name) = self.state.sequence.clone() else {
            return;
        };
        if !self.ensure_loaded(&name, now) {
            return;
        }

        if self.pending_seek {
            let anchor = self.state.received_at.unwrap_or(now);
            self.feed.seek(self.state.frame, anchor);
            self.pending_seek = false;
        }
        self.feed.advance(&self.buffer, now);
    }
}

impl RemotePlayback for RemoteFollower {
    fn apply(&mut self, packet: &SyncPacket) {
        self.apply_at(packet, Instant::now());
    }

    fn is_streaming(&self) -> bool {
        self.state.streaming
    }

    fn process(&mut self) {
        self.process_at(Instant::now());
    }

    fn stop(&mut self) {
        self.state = SyncState::default();
        self.feed.clear();
        self.buffer.blank();
    }
}
