//! Session configuration.
//!
//! Both roles take a plain struct that is checked once with `validate()`
//! before any socket traffic happens.

use std::net::SocketAddr;

use thiserror::Error;

use crate::segment::{SegmentError, HEADER_LEN};
use crate::socket::MAX_DATAGRAM;
use crate::timer::TimerConfig;

/// Largest payload that still fits a single UDP datagram with its header.
pub const MAX_MTU: usize = MAX_DATAGRAM - HEADER_LEN;

/// Longest byte stream one session can carry.
///
/// Data occupies offsets `1..=len`, the FIN takes `len + 1` and its
/// acknowledgement `len + 2`; all of them must fit in a `u32`.
pub const MAX_STREAM_LEN: usize = u32::MAX as usize - 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MTU must be between 1 and {MAX_MTU} bytes, got {0}")]
    Mtu(usize),

    #[error("window must hold at least one segment")]
    Window,

    #[error("minimum RTO {min:?} exceeds maximum RTO {max:?}")]
    RtoRange {
        min: std::time::Duration,
        max: std::time::Duration,
    },

    #[error("retransmission tick must be non-zero")]
    Tick,

    #[error("{0} bytes do not fit in the 32-bit sequence space")]
    StreamTooLong(usize),

    #[error(transparent)]
    Segment(#[from] SegmentError),
}

/// Settings of the sending side.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Address of the receiving peer.
    pub remote: SocketAddr,
    /// Maximum payload bytes per segment.
    pub mtu: usize,
    /// Sliding window capacity, in segments.
    pub window: usize,
    pub timer: TimerConfig,
}

impl SenderConfig {
    pub fn new(remote: SocketAddr, mtu: usize, window: usize) -> Self {
        Self {
            remote,
            mtu,
            window,
            timer: TimerConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_common(self.mtu, self.window, &self.timer)
    }
}

/// Settings of the receiving side.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Maximum payload bytes per inbound segment.
    pub mtu: usize,
    /// Segments buffered ahead of the cumulative ack point.
    pub window: usize,
    pub timer: TimerConfig,
}

impl ReceiverConfig {
    pub fn new(mtu: usize, window: usize) -> Self {
        Self {
            mtu,
            window,
            timer: TimerConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_common(self.mtu, self.window, &self.timer)
    }
}

fn validate_common(mtu: usize, window: usize, timer: &TimerConfig) -> Result<(), ConfigError> {
    if mtu == 0 || mtu > MAX_MTU {
        return Err(ConfigError::Mtu(mtu));
    }
    if window == 0 {
        return Err(ConfigError::Window);
    }
    if timer.min_rto > timer.max_rto {
        return Err(ConfigError::RtoRange {
            min: timer.min_rto,
            max: timer.max_rto,
        });
    }
    if timer.tick.is_zero() {
        return Err(ConfigError::Tick);
    }
    Ok(())
}
