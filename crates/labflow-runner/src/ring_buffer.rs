//! Bounded byte buffer holding the tail of a session transcript.

use std::collections::VecDeque;
use std::fmt;

/// Keeps the most recent `max_bytes` bytes written to it.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    buffer: VecDeque<u8>,
    max_bytes: usize,
    total_bytes_written: usize,
}

impl RingBuffer {
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(max_bytes.min(8192)),
            max_bytes,
            total_bytes_written: 0,
        }
    }

    /// Append `data`, dropping the oldest bytes once full.
    pub fn write(&mut self, data: &[u8]) {
        self.total_bytes_written += data.len();
        if self.max_bytes == 0 {
            return;
        }
        let tail = if data.len() > self.max_bytes {
            &data[data.len() - self.max_bytes..]
        } else {
            data
        };
        let overflow = (self.buffer.len() + tail.len()).saturating_sub(self.max_bytes);
        self.buffer.drain(..overflow);
        self.buffer.extend(tail);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub const fn total_bytes_written(&self) -> usize {
        self.total_bytes_written
    }

    #[must_use]
    pub const fn was_truncated(&self) -> bool {
        self.total_bytes_written > self.max_bytes
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.buffer.iter().copied().collect()
    }
}

impl fmt::Display for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_keeps_tail_across_writes() {
        let mut buffer = RingBuffer::new(10);
        buffer.write(b"12345");
        buffer.write(b"67890");
        buffer.write(b"ABCDE");
        assert_eq!(buffer.to_string(), "67890ABCDE");
        assert_eq!(buffer.total_bytes_written(), 15);
        assert!(buffer.was_truncated());
    }

    #[test]
    fn test_single_oversized_write() {
        let mut buffer = RingBuffer::new(5);
        buffer.write(b"hello world");
        assert_eq!(buffer.to_string(), "world");
    }

    #[test]
    fn test_exact_capacity_is_not_truncated() {
        let mut buffer = RingBuffer::new(4);
        buffer.write(b"abcd");
        assert!(!buffer.was_truncated());
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_zero_capacity_counts_but_keeps_nothing() {
        let mut buffer = RingBuffer::new(0);
        buffer.write(b"abc");
        assert!(buffer.is_empty());
        assert_eq!(buffer.total_bytes_written(), 3);
    }

    proptest! {
        #[test]
        fn prop_matches_naive_tail(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..40), 0..20), cap in 1usize..64) {
            let mut buffer = RingBuffer::new(cap);
            let mut all = Vec::new();
            for chunk in &chunks {
                buffer.write(chunk);
                all.extend_from_slice(chunk);
            }
            let start = all.len().saturating_sub(cap);
            prop_assert_eq!(buffer.to_bytes(), all[start..].to_vec());
        }
    }
}
