//! Shared channel buffer.
//!
//! One writer role (bridge receiver or playback side, fixed by the operating
//! mode) and one reader (the output pump thread). Writes and snapshots take
//! the same lock, so the pump never sees a half-applied update.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Current output channel values. Cloning shares the same storage.
#[derive(Debug, Clone)]
pub struct ChannelBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
    len: usize,
}

impl ChannelBuffer {
    pub fn new(channel_count: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(vec![0; channel_count])),
            len: channel_count,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        // A panicked writer leaves plain bytes behind; keep serving them.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy `values` starting at 0-based `offset`. Values past the end are
    /// dropped. Returns the number of channels written.
    pub fn write(&self, offset: usize, values: &[u8]) -> usize {
        if offset >= self.len {
            return 0;
        }
        let count = values.len().min(self.len - offset);
        self.lock()[offset..offset + count].copy_from_slice(&values[..count]);
        count
    }

    /// Apply several writes under one lock.
    pub fn write_many<'a>(&self, writes: impl IntoIterator<Item = (usize, &'a [u8])>) -> usize {
        let mut data = self.lock();
        let mut total = 0;
        for (offset, values) in writes {
            if offset >= data.len() {
                continue;
            }
            let count = values.len().min(data.len() - offset);
            data[offset..offset + count].copy_from_slice(&values[..count]);
            total += count;
        }
        total
    }

    pub fn get(&self, channel: usize) -> Option<u8> {
        self.lock().get(channel).copied()
    }

    pub fn blank(&self) {
        self.lock().fill(0);
    }

    /// Copy the whole buffer into `out`, reusing its allocation.
    pub fn snapshot_into(&self, out: &mut Vec<u8>) {
        let data = self.lock();
        out.clear();
        out.extend_from_slice(&data);
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_clips_at_end() {
        let buffer = ChannelBuffer::new(4);
        assert_eq!(buffer.write(2, &[9, 9, 9]), 2);
        assert_eq!(buffer.snapshot(), vec![0, 0, 9, 9]);
        assert_eq!(buffer.write(4, &[1]), 0);
    }

    #[test]
    fn test_write_many_under_one_lock() {
        let buffer = ChannelBuffer::new(8);
        let written = buffer.write_many([(1usize, &[10u8][..]), (5, &[50u8, 51][..]), (99, &[1u8][..])]);
        assert_eq!(written, 3);
        assert_eq!(buffer.get(1), Some(10));
        assert_eq!(buffer.get(5), Some(50));
        assert_eq!(buffer.get(6), Some(51));
        assert_eq!(buffer.get(0), Some(0));
    }

    #[test]
    fn test_clones_share_storage() {
        let a = ChannelBuffer::new(2);
        let b = a.clone();
        a.write(0, &[7]);
        assert_eq!(b.get(0), Some(7));
        b.blank();
        assert_eq!(a.get(0), Some(0));
    }

    #[test]
    fn test_snapshot_into_reuses_vec() {
        let buffer = ChannelBuffer::new(3);
        buffer.write(0, &[1, 2, 3]);
        let mut out = vec![42; 10];
        buffer.snapshot_into(&mut out);
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn test_concurrent_reader_sees_whole_updates() {
        let buffer = ChannelBuffer::new(64);
        let writer = buffer.clone();
        let handle = std::thread::spawn(move || {
            for value in 0..=255u8 {
                writer.write(0, &[value; 64]);
            }
        });

        let mut frame = Vec::new();
        for _ in 0..1000 {
            buffer.snapshot_into(&mut frame);
            let first = frame[0];
            assert!(frame.iter().all(|&v| v == first), "torn frame observed");
        }
        handle.join().unwrap();
    }
}
