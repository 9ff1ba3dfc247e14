//! Readable-source multiplexing for the dispatch loop.
//!
//! The loop sleeps on up to three descriptors (command, bridge, control)
//! with a bounded timeout. [`Waiter`] is the seam: the daemon uses
//! [`PollWaiter`], tests script readiness and interruptions.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Failure modes of a readiness wait.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    /// A signal arrived mid-wait. Not an error; the loop retries.
    #[error("wait interrupted by signal")]
    Interrupted,

    #[error("wait failed: {0}")]
    Failed(#[source] io::Error),
}

/// Which registered sources became readable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub command: bool,
    pub bridge: bool,
    pub control: bool,
}

impl Readiness {
    pub fn any(&self) -> bool {
        self.command || self.bridge || self.control
    }
}

/// Blocks until a source is readable or the timeout passes.
pub trait Waiter {
    fn wait(&mut self, timeout: Duration) -> Result<Readiness, WaitError>;
}

/// Descriptors to watch. Absent sources are not polled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadableSourceSet {
    pub command: Option<RawFd>,
    pub bridge: Option<RawFd>,
    pub control: Option<RawFd>,
}

impl ReadableSourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command(mut self, fd: RawFd) -> Self {
        self.command = Some(fd);
        self
    }

    pub fn with_bridge(mut self, fd: RawFd) -> Self {
        self.bridge = Some(fd);
        self
    }

    pub fn with_control(mut self, fd: RawFd) -> Self {
        self.control = Some(fd);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.command.is_none() && self.bridge.is_none() && self.control.is_none()
    }
}

/// `poll(2)` over a [`ReadableSourceSet`].
pub struct PollWaiter {
    sources: ReadableSourceSet,
    fds: Vec<libc::pollfd>,
}

impl PollWaiter {
    pub fn new(sources: ReadableSourceSet) -> Self {
        let fds = [sources.command, sources.bridge, sources.control]
            .into_iter()
            .flatten()
            .filter(|fd| *fd >= 0)
            .map(|fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();
        Self { sources, fds }
    }

    pub fn sources(&self) -> ReadableSourceSet {
        self.sources
    }

    fn is_ready(&self, fd: Option<RawFd>) -> bool {
        let Some(fd) = fd else {
            return false;
        };
        self.fds
            .iter()
            .any(|p| p.fd == fd && p.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0)
    }
}

impl Waiter for PollWaiter {
    fn wait(&mut self, timeout: Duration) -> Result<Readiness, WaitError> {
        for p in &mut self.fds {
            p.revents = 0;
        }
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

        // SAFETY: `fds` is a live, correctly sized array of pollfd for the
        // duration of the call.
        let rc = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };

        if rc < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.kind() {
                io::ErrorKind::Interrupted => WaitError::Interrupted,
                _ => WaitError::Failed(err),
            });
        }
        if rc == 0 {
            return Ok(Readiness::default());
        }

        Ok(Readiness {
            command: self.is_ready(self.sources.command),
            bridge: self.is_ready(self.sources.bridge),
            control: self.is_ready(self.sources.control),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::os::fd::AsRawFd;
    use std::time::Instant;

    #[test]
    fn test_timeout_with_nothing_ready() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut waiter = PollWaiter::new(ReadableSourceSet::new().with_command(socket.as_raw_fd()));

        let start = Instant::now();
        let ready = waiter.wait(Duration::from_millis(30)).unwrap();
        assert!(!ready.any());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_reports_only_the_ready_source() {
        let bridge = UdpSocket::bind("127.0.0.1:0").unwrap();
        let control = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"x", bridge.local_addr().unwrap()).unwrap();

        let mut waiter = PollWaiter::new(
            ReadableSourceSet::new()
                .with_bridge(bridge.as_raw_fd())
                .with_control(control.as_raw_fd()),
        );
        let ready = waiter.wait(Duration::from_secs(2)).unwrap();
        assert_eq!(
            ready,
            Readiness {
                command: false,
                bridge: true,
                control: false
            }
        );
    }

    #[test]
    fn test_empty_set_just_sleeps() {
        let mut waiter = PollWaiter::new(ReadableSourceSet::new());
        assert!(waiter.sources().is_empty());
        let ready = waiter.wait(Duration::from_millis(5)).unwrap();
        assert_eq!(ready, Readiness::default());
    }
}
