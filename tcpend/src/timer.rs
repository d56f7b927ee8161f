//! Timing parameters and retransmission-timeout estimation.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! ACK arrives within a bounded time.  This module provides:
//! - [`TimerConfig`]: every timing knob of a session (initial RTO, RTO clamp,
//!   sweep tick, linger, retry limits).
//! - [`RttEstimator`]: exponentially weighted round-trip estimation.
//! - [`timestamp_now`]: the nanosecond clock carried in segment headers.
//!
//! The estimator is seeded by the handshake reply:
//!   `ERTT = R`, `EDEV = 0`, `RTO = 2·R`
//! and every later sample updates it as
//!   `EDEV = β·EDEV + (1−β)·|R − ERTT|`
//!   `ERTT = α·ERTT + (1−α)·R`
//!   `RTO  = ERTT + 4·EDEV`
//! with α = 0.875 and β = 0.75.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Weight of the previous smoothed RTT.
const ALPHA: f64 = 0.875;
/// Weight of the previous smoothed deviation.
const BETA: f64 = 0.75;

/// Transmission attempts allowed for any one segment, SYN or FIN.
pub const MAX_RETRANSMISSIONS: u32 = 16;

/// Duplicate ACKs that trigger a fast retransmit.
pub const FAST_RETRANSMIT_THRESHOLD: u32 = 3;

/// Adjustable timeout parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    /// RTO before any RTT sample is available.
    pub initial_rto: Duration,
    /// Lower clamp for the adaptive RTO.
    pub min_rto: Duration,
    /// Upper clamp for the adaptive RTO.
    pub max_rto: Duration,
    /// Interval between retransmission sweeps.
    pub tick: Duration,
    /// How long the closing side keeps its socket after the final ACK.
    pub linger: Duration,
    /// How long the receiver waits for the final ACK before resending FIN+ACK.
    pub close_timeout: Duration,
    /// Retransmissions allowed per segment before the session aborts.
    pub max_retransmissions: u32,
    /// Duplicate ACK count that triggers a fast retransmit.
    pub fast_retransmit_threshold: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            initial_rto: Duration::from_secs(5),
            min_rto: Duration::from_millis(10),
            max_rto: Duration::from_secs(60),
            tick: Duration::from_millis(1),
            linger: Duration::from_secs(2),
            close_timeout: Duration::from_millis(250),
            max_retransmissions: MAX_RETRANSMISSIONS,
            fast_retransmit_threshold: FAST_RETRANSMIT_THRESHOLD,
        }
    }
}

/// Smoothed round-trip estimate for one connection.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    min_rto: Duration,
    max_rto: Duration,
    /// Smoothed RTT in nanoseconds, `None` before the first sample.
    ertt: Option<f64>,
    /// Smoothed deviation in nanoseconds.
    edev: f64,
    /// Current timeout.
    rto: Duration,
}

impl RttEstimator {
    pub fn new(config: &TimerConfig) -> Self {
        Self {
            min_rto: config.min_rto,
            max_rto: config.max_rto,
            ertt: None,
            edev: 0.0,
            rto: config.initial_rto,
        }
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Smoothed RTT, once at least one sample has been taken.
    pub fn ertt(&self) -> Option<Duration> {
        self.ertt.map(|n| Duration::from_nanos(n as u64))
    }

    /// Smoothed deviation.
    pub fn edev(&self) -> Duration {
        Duration::from_nanos(self.edev as u64)
    }

    /// Start over from the sample taken on the handshake reply.
    pub fn seed(&mut self, sample: Duration) {
        let r = sample.as_nanos() as f64;
        self.ertt = Some(r);
        self.edev = 0.0;
        self.set_rto(2.0 * r);
    }

    /// Fold in a later sample.  Acts as [`seed`](Self::seed) if none came first.
    pub fn update(&mut self, sample: Duration) {
        let Some(ertt) = self.ertt else {
            self.seed(sample);
            return;
        };
        let r = sample.as_nanos() as f64;
        let dev = (r - ertt).abs();
        let ertt = ALPHA * ertt + (1.0 - ALPHA) * r;
        self.ertt = Some(ertt);
        self.edev = BETA * self.edev + (1.0 - BETA) * dev;
        self.set_rto(ertt + 4.0 * self.edev);
    }

    /// Sample against a timestamp carried in an inbound segment.
    pub fn sample_since(timestamp: u64) -> Duration {
        Duration::from_nanos(timestamp_now().saturating_sub(timestamp))
    }

    fn set_rto(&mut self, nanos: f64) {
        self.rto = Duration::from_nanos(nanos as u64).clamp(self.min_rto, self.max_rto);
    }
}

/// Nanoseconds since the UNIX epoch, as carried in segment headers.
pub fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as u64)
}
