//! Raw sequence files: a 16-byte header followed by fixed-size frames.
//!
//! ```text
//! 0      4         5          6          8               12              16
//! "MSEQ" | version | reserved | frame_ms | channel_count | start_channel | frames...
//!          u8        u8         u16le      u32le           u32le
//! ```

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::PlaybackError;

pub const SEQUENCE_MAGIC: &[u8; 4] = b"MSEQ";
pub const SEQUENCE_VERSION: u8 = 1;
pub const HEADER_LEN: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceHeader {
    pub frame_ms: u16,
    pub channel_count: u32,
    /// First channel the frame data lands on (1-based).
    pub start_channel: u32,
}

impl SequenceHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN as usize] {
        let mut out = [0u8; HEADER_LEN as usize];
        out[0..4].copy_from_slice(SEQUENCE_MAGIC);
        out[4] = SEQUENCE_VERSION;
        out[6..8].copy_from_slice(&self.frame_ms.to_le_bytes());
        out[8..12].copy_from_slice(&self.channel_count.to_le_bytes());
        out[12..16].copy_from_slice(&self.start_channel.to_le_bytes());
        out
    }

    fn decode(bytes: &[u8; HEADER_LEN as usize]) -> Result<Self, String> {
        if &bytes[0..4] != SEQUENCE_MAGIC {
            return Err("bad magic".into());
        }
        if bytes[4] != SEQUENCE_VERSION {
            return Err(format!("unsupported version {}", bytes[4]));
        }
        let header = Self {
            frame_ms: u16::from_le_bytes([bytes[6], bytes[7]]),
            channel_count: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            start_channel: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        };
        if header.frame_ms == 0 {
            return Err("frame period is zero".into());
        }
        if header.channel_count == 0 {
            return Err("no channels".into());
        }
        Ok(header)
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_millis(self.frame_ms as u64)
    }

    /// 0-based buffer offset of the first channel.
    pub fn offset(&self) -> usize {
        (self.start_channel as usize).saturating_sub(1)
    }
}

/// An open sequence file, read one frame at a time.
#[derive(Debug)]
pub struct Sequence {
    name: String,
    path: PathBuf,
    file: File,
    header: SequenceHeader,
    frame_count: u32,
}

impl Sequence {
    pub fn open(path: &Path) -> Result<Self, PlaybackError> {
        let open_err = |source| PlaybackError::SequenceOpen {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(open_err)?;
        let len = file.metadata().map_err(open_err)?.len();

        let mut raw = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut raw).map_err(open_err)?;
        let header = SequenceHeader::decode(&raw).map_err(|reason| PlaybackError::BadSequence {
            path: path.to_path_buf(),
            reason,
        })?;

        let frame_count = ((len - HEADER_LEN) / header.channel_count as u64) as u32;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            name,
            path: path.to_path_buf(),
            file,
            header,
            frame_count,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &SequenceHeader {
        &self.header
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn duration(&self) -> Duration {
        self.header.frame_period() * self.frame_count
    }

    /// Frame index due `elapsed` after the sequence started.
    pub fn frame_at(&self, elapsed: Duration) -> u32 {
        let index = elapsed.as_millis() / self.header.frame_ms as u128;
        index.min(u32::MAX as u128) as u32
    }

    /// Read frame `index` into `out`. Returns false past the end.
    pub fn read_frame(&mut self, index: u32, out: &mut Vec<u8>) -> Result<bool, PlaybackError> {
        if index >= self.frame_count {
            return Ok(false);
        }
        let size = self.header.channel_count as usize;
        out.resize(size, 0);
        let at = HEADER_LEN + index as u64 * size as u64;
        let io_err = |source| PlaybackError::SequenceOpen {
            path: self.path.clone(),
            source,
        };
        self.file.seek(SeekFrom::Start(at)).map_err(io_err)?;
        self.file.read_exact(out).map_err(io_err)?;
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) fn write_sequence(path: &Path, frame_ms: u16, start_channel: u32, frames: &[Vec<u8>]) {
    let channel_count = frames.first().map_or(1, |f| f.len()) as u32;
    let mut bytes = SequenceHeader {
        frame_ms,
        channel_count,
        start_channel,
    }
    .encode()
    .to_vec();
    for frame in frames {
        bytes.extend_from_slice(frame);
    }
    std::fs::write(path, bytes).unwrap();
}
