//! Receive-side reassembly buffer.
//!
//! [`Reassembly`] keeps every data segment keyed by its byte offset and a
//! cumulative cursor: the first offset not yet covered by a contiguous run
//! starting at offset 1.  Out-of-order segments are buffered until the gap
//! before them closes; duplicates are recognised by offset and ignored.
//!
//! This module only manages state; socket I/O is the caller's job.

use std::collections::BTreeMap;

/// Outcome of offering one data segment to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// New offset; the payload was stored.
    Accepted,
    /// The offset was already buffered or lies below the cursor.
    Duplicate,
    /// The offset is too far ahead of the cursor to buffer.
    OutOfWindow,
}

#[derive(Debug)]
pub struct Reassembly {
    chunks: BTreeMap<u32, Vec<u8>>,
    /// First byte offset not yet received contiguously.
    cursor: u32,
    /// How far past the cursor a segment may start.
    reach: u32,
    received_bytes: u64,
}

impl Reassembly {
    /// Buffer at most `reach` bytes ahead of the cumulative cursor.
    pub fn new(reach: u32) -> Self {
        Self {
            chunks: BTreeMap::new(),
            cursor: 1,
            reach,
            received_bytes: 0,
        }
    }

    /// Cumulative acknowledgement number: next byte offset expected.
    pub fn ack_number(&self) -> u32 {
        self.cursor
    }

    /// Distinct payload bytes accepted so far.
    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// Store the payload at `seq` unless it was seen before.
    ///
    /// An empty payload covers no offset and is treated as a duplicate.
    pub fn insert(&mut self, seq: u32, payload: &[u8]) -> Insert {
        if payload.is_empty() || seq < self.cursor || self.chunks.contains_key(&seq) {
            return Insert::Duplicate;
        }
        if seq - self.cursor >= self.reach {
            return Insert::OutOfWindow;
        }

        self.received_bytes += payload.len() as u64;
        self.chunks.insert(seq, payload.to_vec());
        while let Some(chunk) = self.chunks.get(&self.cursor) {
            self.cursor = self.cursor.saturating_add(chunk.len() as u32);
        }
        Insert::Accepted
    }

    /// `true` if bytes beyond the cursor are buffered, leaving a hole.
    pub fn has_gap(&self) -> bool {
        self.chunks.range(self.cursor..).next().is_some()
    }

    /// The contiguous byte stream from offset 1, truncated at the first gap.
    pub fn assemble(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.cursor.saturating_sub(1) as usize);
        let mut offset = 1;
        while let Some(chunk) = self.chunks.get(&offset) {
            out.extend_from_slice(chunk);
            offset += chunk.len() as u32;
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state() {
        let r = Reassembly::new(1000);
        assert_eq!(r.ack_number(), 1);
        assert_eq!(r.received_bytes(), 0);
        assert!(r.assemble().is_empty());
    }

    #[test]
    fn in_order_segments_advance_cursor() {
        let mut r = Reassembly::new(1000);
        assert_eq!(r.insert(1, b"abc"), Insert::Accepted);
        assert_eq!(r.ack_number(), 4);
        assert_eq!(r.insert(4, b"de"), Insert::Accepted);
        assert_eq!(r.ack_number(), 6);
        assert_eq!(r.assemble(), b"abcde");
    }

    #[test]
    fn gap_holds_cursor_until_filled() {
        let mut r = Reassembly::new(1000);
        r.insert(1, b"ab");
        r.insert(5, b"ef");
        r.insert(7, b"g");
        assert_eq!(r.ack_number(), 3);
        assert!(r.has_gap());
        assert_eq!(r.assemble(), b"ab");

        r.insert(3, b"cd");
        assert_eq!(r.ack_number(), 8);
        assert!(!r.has_gap());
        assert_eq!(r.assemble(), b"abcdefg");
    }

    #[test]
    fn duplicates_are_idempotent() {
        let mut r = Reassembly::new(1000);
        r.insert(1, b"abc");
        r.insert(7, b"ghi");
        let ack = r.ack_number();

        assert_eq!(r.insert(1, b"abc"), Insert::Duplicate);
        assert_eq!(r.insert(7, b"ghi"), Insert::Duplicate);
        assert_eq!(r.ack_number(), ack);
        assert_eq!(r.received_bytes(), 6);
        assert_eq!(r.assemble(), b"abc");
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let mut r = Reassembly::new(1000);
        let order: [(u32, &[u8]); 5] = [
            (9, b"ij"),
            (1, b"abcd"),
            (9, b"ij"),
            (5, b"efgh"),
            (1, b"abcd"),
        ];
        let mut last = r.ack_number();
        for (seq, payload) in order {
            r.insert(seq, payload);
            assert!(r.ack_number() >= last);
            last = r.ack_number();
        }
        assert_eq!(last, 11);
    }

    #[test]
    fn segment_beyond_reach_is_refused() {
        let mut r = Reassembly::new(10);
        assert_eq!(r.insert(11, b"x"), Insert::OutOfWindow);
        assert_eq!(r.insert(10, b"x"), Insert::Accepted);
        assert_eq!(r.received_bytes(), 1);
    }
}
