//! Bridge receiver: E1.31 (sACN) input written straight into the channel
//! buffer.
//!
//! Only used in bridge mode. Each wake drains a bounded number of datagrams,
//! decodes the DMX data packets, maps universes onto channel ranges, then
//! writes the whole batch into the buffer under one lock.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};

use marqueeconf::UniverseConfig;
use tracing::{debug, info, warn};

use crate::channel_data::ChannelBuffer;

/// Datagrams handled per wake so a flood cannot stall the loop.
pub const MAX_DATAGRAMS_PER_WAKE: usize = 64;

const ACN_IDENTIFIER: &[u8; 12] = b"ASC-E1.17\0\0\0";
const VECTOR_ROOT_E131_DATA: u32 = 0x0000_0004;
const VECTOR_E131_DATA_PACKET: u32 = 0x0000_0002;
const VECTOR_DMP_SET_PROPERTY: u8 = 0x02;
const OPTION_PREVIEW_DATA: u8 = 0x80;
const OPTION_STREAM_TERMINATED: u8 = 0x40;
const DATA_OFFSET: usize = 126;

/// Errors from decoding bridge input.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("packet too short ({0} bytes)")]
    TooShort(usize),

    #[error("not an ACN packet")]
    BadIdentifier,

    #[error("unsupported vector 0x{0:08x}")]
    UnsupportedVector(u32),

    #[error("property count {count} exceeds packet length {len}")]
    BadLength { count: usize, len: usize },

    #[error("non-DMX start code 0x{0:02x}")]
    StartCode(u8),

    #[error("preview data")]
    Preview,
}

/// A decoded E1.31 DMX data packet.
#[derive(Debug, PartialEq, Eq)]
pub struct E131Frame<'a> {
    pub universe: u16,
    pub sequence: u8,
    pub priority: u8,
    pub terminated: bool,
    /// Slot values after the start code.
    pub data: &'a [u8],
}

fn be_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn be_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Decode one E1.31 data packet.
pub fn decode_e131(packet: &[u8]) -> Result<E131Frame<'_>, BridgeError> {
    if packet.len() < DATA_OFFSET {
        return Err(BridgeError::TooShort(packet.len()));
    }
    if &packet[4..16] != ACN_IDENTIFIER {
        return Err(BridgeError::BadIdentifier);
    }

    let root_vector = be_u32(packet, 18);
    if root_vector != VECTOR_ROOT_E131_DATA {
        return Err(BridgeError::UnsupportedVector(root_vector));
    }
    let framing_vector = be_u32(packet, 40);
    if framing_vector != VECTOR_E131_DATA_PACKET {
        return Err(BridgeError::UnsupportedVector(framing_vector));
    }
    if packet[117] != VECTOR_DMP_SET_PROPERTY {
        return Err(BridgeError::UnsupportedVector(packet[117] as u32));
    }

    let options = packet[112];
    if options & OPTION_PREVIEW_DATA != 0 {
        return Err(BridgeError::Preview);
    }

    // Property count includes the start code.
    let count = be_u16(packet, 123) as usize;
    if count == 0 || DATA_OFFSET - 1 + count > packet.len() {
        return Err(BridgeError::BadLength {
            count,
            len: packet.len(),
        });
    }
    let start_code = packet[125];
    if start_code != 0 {
        return Err(BridgeError::StartCode(start_code));
    }

    Ok(E131Frame {
        universe: be_u16(packet, 113),
        sequence: packet[111],
        priority: packet[108],
        terminated: options & OPTION_STREAM_TERMINATED != 0,
        data: &packet[DATA_OFFSET..DATA_OFFSET - 1 + count],
    })
}

/// Where each universe lands in the channel buffer.
#[derive(Debug, Clone, Default)]
pub struct UniverseMap {
    // universe -> (0-based offset, size)
    ranges: HashMap<u16, (usize, usize)>,
}

impl UniverseMap {
    pub fn from_config(universes: &[UniverseConfig]) -> Self {
        let ranges = universes
            .iter()
            .map(|u| (u.universe, (u.start_channel.saturating_sub(1), u.size)))
            .collect();
        Self { ranges }
    }

    pub fn universes(&self) -> impl Iterator<Item = u16> + '_ {
        self.ranges.keys().copied()
    }

    /// Channel offset and the slice of `data` to write, if mapped.
    pub fn place<'a>(&self, universe: u16, data: &'a [u8]) -> Option<(usize, &'a [u8])> {
        let &(offset, size) = self.ranges.get(&universe)?;
        Some((offset, &data[..data.len().min(size)]))
    }
}

/// E1.31 sequence check: a packet up to 20 behind the last one is stale.
fn is_stale(last: u8, incoming: u8) -> bool {
    let diff = incoming.wrapping_sub(last) as i8;
    diff <= 0 && diff > -20
}

/// Running counters for the bridge input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub packets: u64,
    pub applied: u64,
    pub unmapped: u64,
    pub stale: u64,
    pub errors: u64,
}

/// Input side the dispatch loop drives in bridge mode.
pub trait BridgeSource {
    /// Drain ready input into `buffer`. Returns frames applied.
    fn receive(&mut self, buffer: &ChannelBuffer) -> usize;

    fn shutdown(&mut self);
}

/// UDP E1.31 receiver.
pub struct BridgeReceiver {
    socket: Option<UdpSocket>,
    universes: UniverseMap,
    last_sequence: HashMap<u16, u8>,
    stats: BridgeStats,
    packet: Vec<u8>,
    /// Frames decoded during the current wake, written together at the end.
    pending: Vec<(usize, Vec<u8>)>,
}

impl BridgeReceiver {
    /// Bind the receive socket and join the multicast group of every mapped
    /// universe.
    pub fn bind(addr: &str, universes: UniverseMap) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        for universe in universes.universes() {
            let [hi, lo] = universe.to_be_bytes();
            let group = Ipv4Addr::new(239, 255, hi, lo);
            if let Err(e) = socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED) {
                warn!("Could not join multicast {} for universe {}: {}", group, universe, e);
            }
        }

        info!("Bridge receiver listening on {}", socket.local_addr()?);
        Ok(Self::from_socket(socket, universes))
    }

    /// Wrap an already bound, non-blocking socket.
    pub fn from_socket(socket: UdpSocket, universes: UniverseMap) -> Self {
        Self {
            socket: Some(socket),
            universes,
            last_sequence: HashMap::new(),
            stats: BridgeStats::default(),
            packet: vec![0; 1500],
            pending: Vec::new(),
        }
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn accept(&mut self, len: usize) -> bool {
        self.stats.packets += 1;
        let frame = match decode_e131(&self.packet[..len]) {
            Ok(frame) => frame,
            Err(BridgeError::StartCode(_)) | Err(BridgeError::Preview) => return false,
            Err(e) => {
                self.stats.errors += 1;
                debug!("Dropping bridge packet: {}", e);
                return false;
            }
        };

        if let Some(&last) = self.last_sequence.get(&frame.universe) {
            if is_stale(last, frame.sequence) {
                self.stats.stale += 1;
                return false;
            }
        }
        self.last_sequence.insert(frame.universe, frame.sequence);

        if frame.terminated {
            debug!("Universe {} stream terminated", frame.universe);
            self.last_sequence.remove(&frame.universe);
            return false;
        }

        match self.universes.place(frame.universe, frame.data) {
            Some((offset, values)) => {
                self.pending.push((offset, values.to_vec()));
                self.stats.applied += 1;
                true
            }
            None => {
                self.stats.unmapped += 1;
                false
            }
        }
    }
}

impl BridgeSource for BridgeReceiver {
    fn receive(&mut self, buffer: &ChannelBuffer) -> usize {
        let mut applied = 0;
        for _ in 0..MAX_DATAGRAMS_PER_WAKE {
            let Some(socket) = &self.socket else {
                break;
            };
            match socket.recv(&mut self.packet) {
                Ok(len) => {
                    if self.accept(len) {
                        applied += 1;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Bridge receive failed: {}", e);
                    self.stats.errors += 1;
                    break;
                }
            }
        }

        if !self.pending.is_empty() {
            let writes = self.pending.iter().map(|(offset, values)| (*offset, values.as_slice()));
            buffer.write_many(writes);
            self.pending.clear();
        }
        applied
    }

    fn shutdown(&mut self) {
        if self.socket.take().is_some() {
            info!(
                "Bridge receiver shut down ({} packets, {} applied)",
                self.stats.packets, self.stats.applied
            );
        }
    }
}

impl AsRawFd for BridgeReceiver {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_ref().map_or(-1, |s| s.as_raw_fd())
    }
}
