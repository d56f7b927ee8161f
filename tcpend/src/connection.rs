//! Connection lifecycle: handshake and teardown.
//!
//! A [`Connection`] tracks the FSM state (see [`crate::state`]) and the two
//! sequence cursors of one session:
//! - `seq`: next sequence number this side sends.
//! - `ack`: next sequence number expected from the peer.
//!
//! The active side (sender) drives [`Connection::open`] and
//! [`Connection::close`] itself: each sends a control segment, waits one RTO
//! for the matching reply and retransmits up to the configured limit.  The
//! passive side (receiver) feeds inbound control segments into
//! [`Connection::accept_syn`], [`Connection::accept_fin`] and
//! [`Connection::on_final_ack`] from its own receive loop and sends the
//! replies they return.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::task::JoinError;
use tokio::time::{self, Instant};

use crate::config::ConfigError;
use crate::link::Link;
use crate::segment::{flags, Segment};
use crate::socket::Datagram;
use crate::state::ConnectionState;
use crate::stats::Counters;
use crate::timer::{timestamp_now, RttEstimator, TimerConfig};
use crate::window::RetransmitLimit;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Everything that can end a session early.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("no handshake reply from {peer} after {attempts} attempts")]
    HandshakeFailed { peer: SocketAddr, attempts: u32 },

    #[error("connection teardown failed after {attempts} attempts")]
    TeardownFailed { attempts: u32 },

    #[error(transparent)]
    RetransmitLimit(#[from] RetransmitLimit),

    #[error("session task failed: {0}")]
    Task(#[from] JoinError),
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Connection {
    state: ConnectionState,
    /// Next sequence number this side sends.
    pub seq: u32,
    /// Next sequence number expected from the peer.
    pub ack: u32,
    peer: Option<SocketAddr>,
}

impl Connection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Peer address, once known.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// A pure ACK carrying the current cursors, echoing `timestamp`.
    pub fn ack_segment(&self, timestamp: u64) -> Segment {
        self.reply(flags::ACK, timestamp)
    }

    fn reply(&self, flag_bits: u8, timestamp: u64) -> Segment {
        let mut segment = Segment::control(self.seq, self.ack, flag_bits);
        segment.stamp(self.ack, timestamp);
        segment
    }

    // -----------------------------------------------------------------------
    // Active side
    // -----------------------------------------------------------------------

    /// Three-way handshake as the initiator.
    ///
    /// Sends SYN with sequence number 0 and waits one RTO for a SYN+ACK (or a
    /// pure ACK of the SYN).  The reply seeds `rtt`; the peer's ack number
    /// becomes the local sequence base.
    pub async fn open<D: Datagram>(
        &mut self,
        link: &Link<D>,
        peer: SocketAddr,
        rtt: &mut RttEstimator,
        timer: &TimerConfig,
    ) -> Result<(), ConnError> {
        self.peer = Some(peer);
        self.seq = 0;
        self.ack = 0;
        self.state = ConnectionState::SynSent;

        for attempt in 1..=timer.max_retransmissions {
            let syn = self.reply(flags::SYN, timestamp_now());
            if attempt > 1 {
                Counters::bump(&link.counters().retransmissions);
                log::debug!("[conn] SYN timed out; retry {attempt}");
            }
            link.send(&syn, peer).await?;

            let deadline = Instant::now() + rtt.rto();
            let reply = await_reply(link, peer, deadline, |s| {
                (s.is_syn() && s.is_ack()) || (s.is_pure_ack() && s.ack == 1)
            })
            .await?;

            if let Some(reply) = reply {
                rtt.seed(RttEstimator::sample_since(reply.timestamp));
                self.seq = reply.ack;
                self.ack = reply.seq.wrapping_add(1);
                self.state = ConnectionState::Established;
                link.send(&self.ack_segment(timestamp_now()), peer).await?;
                log::debug!(
                    "[conn] established with {peer}: seq={} ack={} rto={:?}",
                    self.seq,
                    self.ack,
                    rtt.rto()
                );
                return Ok(());
            }
        }

        self.state = ConnectionState::Closed;
        Err(ConnError::HandshakeFailed {
            peer,
            attempts: timer.max_retransmissions,
        })
    }

    /// Move the local sequence number past `len` bytes of sent data.
    pub fn advance(&mut self, len: u32) {
        self.seq = self.seq.wrapping_add(len);
    }

    /// Close as the initiator.
    ///
    /// Sends FIN and waits one RTO for the peer's FIN (or a pure ACK of the
    /// FIN), answers it with an ACK and then lingers, acknowledging any
    /// repeated FIN from the peer.
    pub async fn close<D: Datagram>(
        &mut self,
        link: &Link<D>,
        rtt: &mut RttEstimator,
        timer: &TimerConfig,
    ) -> Result<(), ConnError> {
        let Some(peer) = self.peer else {
            self.state = ConnectionState::Closed;
            return Ok(());
        };
        let fin_seq = self.seq;
        self.state = ConnectionState::FinSent;

        for attempt in 1..=timer.max_retransmissions {
            let fin = self.reply(flags::FIN, timestamp_now());
            if attempt > 1 {
                Counters::bump(&link.counters().retransmissions);
                log::debug!("[conn] FIN timed out; retry {attempt}");
            }
            link.send(&fin, peer).await?;

            let deadline = Instant::now() + rtt.rto();
            let reply = await_reply(link, peer, deadline, |s| {
                s.is_fin() || (s.is_pure_ack() && s.ack == fin_seq.wrapping_add(1))
            })
            .await?;

            if let Some(reply) = reply {
                rtt.update(RttEstimator::sample_since(reply.timestamp));
                self.seq = fin_seq.wrapping_add(1);
                if reply.is_fin() {
                    self.ack = reply.seq.wrapping_add(1);
                }
                let last_ack = self.ack_segment(timestamp_now());
                link.send(&last_ack, peer).await?;
                log::debug!("[conn] FIN acknowledged; lingering for {:?}", timer.linger);

                linger(link, peer, timer, Some(&last_ack)).await?;
                self.state = ConnectionState::Closed;
                return Ok(());
            }
        }

        linger(link, peer, timer, None).await?;
        self.state = ConnectionState::Closed;
        Err(ConnError::TeardownFailed {
            attempts: timer.max_retransmissions,
        })
    }

    // -----------------------------------------------------------------------
    // Passive side
    // -----------------------------------------------------------------------

    /// Answer a SYN from `from` with SYN+ACK.
    ///
    /// A retransmitted SYN is answered again with the same reply.
    pub fn accept_syn(&mut self, syn: &Segment, from: SocketAddr) -> Segment {
        self.peer = Some(from);
        self.seq = 0;
        self.ack = syn.seq.wrapping_add(1);
        self.state = ConnectionState::SynReceived;
        log::debug!("[conn] SYN from {from}; → SYN+ACK ack={}", self.ack);
        self.reply(flags::SYN | flags::ACK, syn.timestamp)
    }

    /// The first ACK or data segment after the SYN completes the handshake.
    pub fn establish(&mut self) {
        if self.state == ConnectionState::SynReceived {
            self.state = ConnectionState::Established;
            log::debug!("[conn] established with {:?}", self.peer);
        }
    }

    /// Answer the peer's FIN with FIN+ACK.
    ///
    /// Only the first FIN moves the sequence number; a repeated FIN gets the
    /// same reply again.
    pub fn accept_fin(&mut self, fin: &Segment) -> Segment {
        if self.state != ConnectionState::FinReceived {
            self.seq = self.seq.wrapping_add(1);
            self.state = ConnectionState::FinReceived;
        }
        self.ack = fin.seq.wrapping_add(1);
        log::debug!("[conn] FIN seq={}; → FIN+ACK ack={}", fin.seq, self.ack);
        self.fin_ack(fin.timestamp)
    }

    /// The FIN+ACK reply, for resending while the final ACK is outstanding.
    pub fn fin_ack(&self, timestamp: u64) -> Segment {
        self.reply(flags::FIN | flags::ACK, timestamp)
    }

    /// Returns `true` (and closes) if `segment` is the peer's final ACK.
    pub fn on_final_ack(&mut self, segment: &Segment) -> bool {
        let done = self.state == ConnectionState::FinReceived
            && segment.is_pure_ack()
            && segment.ack == self.seq.wrapping_add(1);
        if done {
            self.state = ConnectionState::Closed;
            log::debug!("[conn] final ACK received; closed");
        }
        done
    }
}

/// Wait until `deadline` for a segment from `peer` satisfying `matches`.
///
/// Anything else is logged and ignored.  `Ok(None)` means the deadline
/// passed.
async fn await_reply<D: Datagram>(
    link: &Link<D>,
    peer: SocketAddr,
    deadline: Instant,
    mut matches: impl FnMut(&Segment) -> bool,
) -> Result<Option<Segment>, ConnError> {
    loop {
        let (segment, from) = match time::timeout_at(deadline, link.recv()).await {
            Ok(received) => received?,
            Err(_) => return Ok(None),
        };
        if from != peer {
            log::debug!("[conn] ignoring segment from unknown peer {from}");
            continue;
        }
        if matches(&segment) {
            return Ok(Some(segment));
        }
        log::debug!("[conn] ignoring unexpected segment {segment}");
    }
}

/// Keep the socket open for `timer.linger`, re-acknowledging any FIN the
/// peer repeats because our ACK was lost.
async fn linger<D: Datagram>(
    link: &Link<D>,
    peer: SocketAddr,
    timer: &TimerConfig,
    last_ack: Option<&Segment>,
) -> Result<(), ConnError> {
    let deadline = Instant::now() + timer.linger;
    while let Some(segment) = await_reply(link, peer, deadline, Segment::is_fin).await? {
        if let Some(ack) = last_ack {
            let mut ack = ack.clone();
            ack.stamp(ack.ack, segment.timestamp);
            Counters::bump(&link.counters().retransmissions);
            link.send(&ack, peer).await?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
