//! Concrete output drivers.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use marqueeconf::OutputConfig;
use tracing::debug;

use super::{OutputDriver, OutputError};

/// Channel range of the full frame an output is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRange {
    /// 0-based first channel.
    pub offset: usize,
    pub count: usize,
}

impl ChannelRange {
    /// From a 1-based start channel as written in config.
    pub fn from_config(start_channel: usize, count: usize) -> Self {
        Self {
            offset: start_channel.saturating_sub(1),
            count,
        }
    }

    pub fn slice<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        let start = self.offset.min(frame.len());
        let end = self.offset.saturating_add(self.count).min(frame.len());
        &frame[start..end]
    }
}

/// Sends its channel range as one raw UDP datagram per frame.
pub struct UdpOutput {
    name: String,
    target: SocketAddr,
    range: ChannelRange,
    socket: Option<UdpSocket>,
}

impl UdpOutput {
    pub fn new(target: &str, range: ChannelRange) -> Result<Self, OutputError> {
        let addr = target
            .to_socket_addrs()
            .map_err(|e| OutputError::InvalidTarget {
                target: target.to_string(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| OutputError::InvalidTarget {
                target: target.to_string(),
                reason: "no address".to_string(),
            })?;

        Ok(Self {
            name: format!("udp:{}", addr),
            target: addr,
            range,
            socket: None,
        })
    }
}

impl OutputDriver for UdpOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self) -> Result<(), OutputError> {
        let bind: SocketAddr = if self.target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        socket.set_broadcast(true)?;
        socket.connect(self.target)?;
        self.socket = Some(socket);
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), OutputError> {
        if let Some(socket) = &self.socket {
            socket.send(self.range.slice(frame))?;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.socket = None;
    }
}

/// Logs a checksum of its range every `every` frames. Handy on benches
/// without hardware.
pub struct LogOutput {
    name: String,
    range: ChannelRange,
    every: u64,
    frames: u64,
}

impl LogOutput {
    pub fn new(range: ChannelRange, every: u64) -> Self {
        Self {
            name: format!("log:{}+{}", range.offset + 1, range.count),
            range,
            every: every.max(1),
            frames: 0,
        }
    }
}

impl OutputDriver for LogOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), OutputError> {
        if self.frames % self.every == 0 {
            let slice = self.range.slice(frame);
            let sum: u64 = slice.iter().map(|&v| v as u64).sum();
            let lit = slice.iter().filter(|&&v| v > 0).count();
            debug!("{} frame {}: {} lit, sum {}", self.name, self.frames, lit, sum);
        }
        self.frames += 1;
        Ok(())
    }

    fn close(&mut self) {}
}

/// Build drivers from `[[outputs]]` config entries.
pub fn build_drivers(configs: &[OutputConfig]) -> Result<Vec<Box<dyn OutputDriver>>, OutputError> {
    configs
        .iter()
        .map(|config| {
            let range = ChannelRange::from_config(config.start_channel, config.channel_count);
            let driver: Box<dyn OutputDriver> = match config.kind.as_str() {
                "udp" => Box::new(UdpOutput::new(&config.target, range)?),
                "log" => Box::new(LogOutput::new(range, 40)),
                other => return Err(OutputError::UnknownKind(other.to_string())),
            };
            Ok(driver)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_range_slice_clips() {
        let frame = [1, 2, 3, 4, 5];
        assert_eq!(ChannelRange::from_config(2, 2).slice(&frame), &[2, 3]);
        assert_eq!(ChannelRange::from_config(4, 10).slice(&frame), &[4, 5]);
        assert!(ChannelRange::from_config(9, 1).slice(&frame).is_empty());
    }

    #[test]
    fn test_udp_output_sends_its_range() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let target = receiver.local_addr().unwrap().to_string();

        let mut output = UdpOutput::new(&target, ChannelRange::from_config(3, 2)).unwrap();
        output.init().unwrap();
        output.send(&[10, 20, 30, 40, 50]).unwrap();

        let mut buf = [0u8; 16];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[30, 40]);
    }

    #[test]
    fn test_build_drivers_rejects_unknown_kind() {
        let configs = vec![OutputConfig {
            kind: "dmx-usb".to_string(),
            target: String::new(),
            start_channel: 1,
            channel_count: 512,
        }];
        assert!(matches!(
            build_drivers(&configs),
            Err(OutputError::UnknownKind(kind)) if kind == "dmx-usb"
        ));
    }

    #[test]
    fn test_build_log_driver() {
        let configs = vec![OutputConfig {
            kind: "log".to_string(),
            target: String::new(),
            start_channel: 1,
            channel_count: 16,
        }];
        let drivers = build_drivers(&configs).unwrap();
        assert_eq!(drivers[0].name(), "log:1+16");
    }
}
