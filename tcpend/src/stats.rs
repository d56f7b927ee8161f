//! Transfer statistics.
//!
//! Counters are bumped from several concurrent paths, so they are plain
//! atomics shared behind an `Arc`; a session takes a [`SenderStats`] or
//! [`ReceiverStats`] snapshot when it ends.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one session.
#[derive(Debug, Default)]
pub struct Counters {
    /// Payload bytes handed to the network (retransmissions included).
    pub bytes_sent: AtomicU64,
    /// Segments handed to the network.
    pub segments_sent: AtomicU64,
    /// Valid segments taken off the network.
    pub segments_received: AtomicU64,
    /// Datagrams dropped because the checksum did not verify.
    pub checksum_discards: AtomicU64,
    /// Datagrams dropped because they could not be parsed at all.
    pub malformed_discards: AtomicU64,
    /// Segments sent again (timeouts, fast retransmits, repeated SYN/FIN).
    pub retransmissions: AtomicU64,
    /// Acknowledgements repeating the highest ack number seen.
    pub duplicate_acks: AtomicU64,
    /// New payload bytes accepted into the reassembly buffer.
    pub bytes_received: AtomicU64,
    /// Data segments whose offset was already buffered.
    pub duplicate_segments: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn sender_snapshot(&self) -> SenderStats {
        SenderStats {
            bytes_transferred: Self::get(&self.bytes_sent),
            segments_sent: Self::get(&self.segments_sent),
            segments_received: Self::get(&self.segments_received),
            retransmissions: Self::get(&self.retransmissions),
            duplicate_acks: Self::get(&self.duplicate_acks),
            checksum_discards: Self::get(&self.checksum_discards),
        }
    }

    pub fn receiver_snapshot(&self) -> ReceiverStats {
        ReceiverStats {
            bytes_received: Self::get(&self.bytes_received),
            segments_received: Self::get(&self.segments_received),
            duplicate_segments: Self::get(&self.duplicate_segments),
            checksum_discards: Self::get(&self.checksum_discards),
        }
    }
}

/// Sender statistics at session end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub bytes_transferred: u64,
    pub segments_sent: u64,
    pub segments_received: u64,
    pub retransmissions: u64,
    pub duplicate_acks: u64,
    pub checksum_discards: u64,
}

impl fmt::Display for SenderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Amount of Data transferred: {}", self.bytes_transferred)?;
        writeln!(f, "Number of packets sent: {}", self.segments_sent)?;
        writeln!(f, "Number of packets received: {}", self.segments_received)?;
        writeln!(f, "Number of retransmissions: {}", self.retransmissions)?;
        writeln!(f, "Number of duplicate acknowledgements: {}", self.duplicate_acks)?;
        write!(
            f,
            "Number of packets discarded due to incorrect checksum: {}",
            self.checksum_discards
        )
    }
}

/// Receiver statistics at session end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub bytes_received: u64,
    pub segments_received: u64,
    pub duplicate_segments: u64,
    pub checksum_discards: u64,
}

impl fmt::Display for ReceiverStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Amount of Data received: {}", self.bytes_received)?;
        writeln!(f, "Number of packets received: {}", self.segments_received)?;
        writeln!(f, "Number of duplicate packets: {}", self.duplicate_segments)?;
        write!(
            f,
            "Number of packets discarded due to incorrect checksum: {}",
            self.checksum_discards
        )
    }
}
