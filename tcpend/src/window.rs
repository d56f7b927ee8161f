//! Send-side sliding window.
//!
//! [`SlidingWindow`] owns every data segment of a session up front and
//! tracks which of them are in flight:
//!
//! ```text
//!   0        left                right              total
//!   │ acked   │ <── in flight ──▶ │ <── unsent ──▶  │
//!   └─────────┴───────────────────┴─────────────────┘
//!               right - left <= capacity
//! ```
//!
//! Every in-flight segment carries a [`Bookkeeping`] record (duplicate-ack
//! count, retransmissions, last send time, timeout).  The window is pure
//! state: the caller does all socket I/O and owns the clock, which keeps the
//! retransmission policy testable without a network.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::{ConfigError, MAX_MTU, MAX_STREAM_LEN};
use crate::segment::{flags, Segment};
use crate::timer::TimerConfig;

/// A segment was transmitted the maximum number of times without being
/// acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("segment {seq} exceeded the retransmission limit")]
pub struct RetransmitLimit {
    pub seq: u32,
}

/// Split `payload` into data segments of at most `mtu` bytes.
///
/// Sequence numbers are 1-based byte offsets; every segment carries ACK.
/// An empty payload yields no segments.
pub fn segment_payload(payload: &[u8], mtu: usize) -> Result<Vec<Segment>, ConfigError> {
    if mtu == 0 || mtu > MAX_MTU {
        return Err(ConfigError::Mtu(mtu));
    }
    if payload.len() > MAX_STREAM_LEN {
        return Err(ConfigError::StreamTooLong(payload.len()));
    }

    let mut segments = Vec::with_capacity(payload.len().div_ceil(mtu));
    let mut offset = 1u32;
    for chunk in payload.chunks(mtu) {
        segments.push(Segment::new(offset, 0, flags::ACK, chunk.to_vec())?);
        offset += chunk.len() as u32;
    }
    Ok(segments)
}

// ---------------------------------------------------------------------------
// Bookkeeping
// ---------------------------------------------------------------------------

/// Retransmission state of one in-flight segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bookkeeping {
    /// Repeats of the ack number equal to this segment's sequence number.
    pub dup_acks: u32,
    /// Times this segment has been sent again.
    pub retransmits: u32,
    /// Most recent transmission.
    pub sent_at: Instant,
    /// Timeout in force at that transmission.
    pub timeout: Duration,
}

impl Bookkeeping {
    fn fresh(now: Instant, timeout: Duration) -> Self {
        Self {
            dup_acks: 0,
            retransmits: 0,
            sent_at: now,
            timeout,
        }
    }
}

/// Result of feeding one acknowledgement number into the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The ack moved `left` forward past this many segments.
    Advanced(usize),
    /// The ack repeats the highest ack seen so far.
    Duplicate,
    /// The ack is lower than one already seen.
    Stale,
    /// The ack covers bytes that were never sent.
    OutOfWindow,
}

// ---------------------------------------------------------------------------
// SlidingWindow
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SlidingWindow {
    segments: Vec<Segment>,
    capacity: usize,
    left: usize,
    right: usize,
    /// `inflight[i]` belongs to `segments[left + i]`.
    inflight: VecDeque<Bookkeeping>,
    highest_ack: Option<u32>,
}

impl SlidingWindow {
    /// # Panics
    ///
    /// Panics if `capacity` is zero; configuration validation rules that out.
    pub fn new(segments: Vec<Segment>, capacity: usize) -> Self {
        assert!(capacity >= 1, "window capacity must be at least 1");
        Self {
            segments,
            capacity,
            left: 0,
            right: 0,
            inflight: VecDeque::with_capacity(capacity),
            highest_ack: None,
        }
    }

    /// Index of the oldest unacknowledged segment.
    pub fn left(&self) -> usize {
        self.left
    }

    /// Index of the next segment to send.
    pub fn right(&self) -> usize {
        self.right
    }

    pub fn total(&self) -> usize {
        self.segments.len()
    }

    pub fn in_flight(&self) -> usize {
        self.right - self.left
    }

    /// `true` when `right` may advance.
    pub fn has_room(&self) -> bool {
        self.in_flight() < self.capacity && self.right < self.segments.len()
    }

    /// `true` once every segment has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.left == self.segments.len()
    }

    pub fn bookkeeping(&self, index: usize) -> Option<&Bookkeeping> {
        index
            .checked_sub(self.left)
            .and_then(|i| self.inflight.get(i))
    }

    /// One past the last byte offset sent so far.
    fn sent_end(&self) -> u32 {
        match self.right.checked_sub(1) {
            Some(last) => {
                let seg = &self.segments[last];
                seg.seq + seg.payload_len() as u32
            }
            None => 1,
        }
    }

    /// Claim the segment at `right` for transmission and advance `right`.
    ///
    /// Returns `None` when the window is full or nothing is left to send.
    pub fn next_to_send(&mut self, now: Instant, rto: Duration) -> Option<Segment> {
        if !self.has_room() {
            return None;
        }
        let segment = self.segments[self.right].clone();
        self.inflight.push_back(Bookkeeping::fresh(now, rto));
        self.right += 1;
        Some(segment)
    }

    /// Process a cumulative acknowledgement number.
    pub fn on_ack(&mut self, ack: u32) -> AckOutcome {
        if ack > self.sent_end() {
            return AckOutcome::OutOfWindow;
        }
        match self.highest_ack {
            Some(highest) if ack < highest => return AckOutcome::Stale,
            Some(highest) if ack == highest => {
                if let Some(front) = self.inflight.front_mut() {
                    if self.segments[self.left].seq == ack {
                        front.dup_acks += 1;
                    }
                }
                return AckOutcome::Duplicate;
            }
            _ => {}
        }

        self.highest_ack = Some(ack);
        let mut advanced = 0;
        while self.left < self.right && self.segments[self.left].seq < ack {
            self.left += 1;
            self.inflight.pop_front();
            advanced += 1;
        }
        AckOutcome::Advanced(advanced)
    }

    /// Scan the in-flight segments and collect the ones to send again.
    ///
    /// A segment whose timer expired triggers Go-Back-N: it and every
    /// segment after it up to `right` are resent and the scan stops.  A
    /// segment with enough duplicate acks is fast-retransmitted alone.
    pub fn sweep(
        &mut self,
        now: Instant,
        rto: Duration,
        timer: &TimerConfig,
    ) -> Result<Vec<Segment>, RetransmitLimit> {
        let mut resend = Vec::new();
        for i in 0..self.inflight.len() {
            let index = self.left + i;
            let entry = self.inflight[i];

            if entry.retransmits >= timer.max_retransmissions {
                return Err(RetransmitLimit {
                    seq: self.segments[index].seq,
                });
            }

            if now.saturating_duration_since(entry.sent_at) > entry.timeout {
                for (j, later) in self.inflight.iter_mut().enumerate().skip(i) {
                    later.retransmits += 1;
                    later.sent_at = now;
                    later.timeout = rto;
                    resend.push(self.segments[self.left + j].clone());
                }
                break;
            }

            if entry.dup_acks >= timer.fast_retransmit_threshold {
                let entry = &mut self.inflight[i];
                entry.retransmits += 1;
                entry.dup_acks = 0;
                entry.sent_at = now;
                resend.push(self.segments[index].clone());
            }
        }
        Ok(resend)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
