//! Receiving side of a session.
//!
//! [`Receiver::run`] is a single request/response loop: take one segment
//! off the link, update the connection and reassembly state, send the
//! reply.  Every data segment is answered with a pure ACK carrying the
//! cumulative cursor and echoing the segment's timestamp, so the sender
//! samples round trips against its own clock.
//!
//! The reassembled stream is written to the sink once, when the peer's FIN
//! arrives.

use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time;

use crate::config::ReceiverConfig;
use crate::connection::{ConnError, Connection};
use crate::link::Link;
use crate::reassembly::{Insert, Reassembly};
use crate::segment::Segment;
use crate::socket::Datagram;
use crate::state::ConnectionState;
use crate::stats::{Counters, ReceiverStats};
use crate::timer::timestamp_now;

/// One receiving session over a [`Datagram`] endpoint, writing to `W`.
pub struct Receiver<D, W> {
    config: ReceiverConfig,
    datagram: D,
    sink: W,
}

impl<D, W> Receiver<D, W>
where
    D: Datagram,
    W: AsyncWrite + Unpin,
{
    pub fn new(config: ReceiverConfig, datagram: D, sink: W) -> Self {
        Self {
            config,
            datagram,
            sink,
        }
    }

    /// Accept one session, write its byte stream to the sink and report
    /// statistics.
    pub async fn run(self) -> Result<ReceiverStats, ConnError> {
        let Self {
            config,
            datagram,
            mut sink,
        } = self;
        config.validate()?;

        let timer = &config.timer;
        let counters = Arc::new(Counters::default());
        let link = Link::new(datagram, config.mtu, Arc::clone(&counters));
        let reach = (config.window as u64 * config.mtu as u64).min(u64::from(u32::MAX)) as u32;
        let mut buffer = Reassembly::new(reach);
        let mut conn = Connection::new();
        let mut flushed = false;
        let mut fin_sends = 0u32;

        log::debug!("[receiver] listening on {}", link.local_addr()?);
        loop {
            let received = if conn.state() == ConnectionState::FinReceived {
                match time::timeout(timer.close_timeout, link.recv()).await {
                    Ok(received) => Some(received?),
                    Err(_) => None,
                }
            } else {
                Some(link.recv().await?)
            };

            let Some((segment, from)) = received else {
                // Final ACK overdue: the FIN+ACK was probably lost.
                let Some(peer) = conn.peer() else { continue };
                if fin_sends >= timer.max_retransmissions {
                    log::error!("[receiver] no final ACK after {fin_sends} FIN+ACKs");
                    return Err(ConnError::TeardownFailed {
                        attempts: fin_sends,
                    });
                }
                fin_sends += 1;
                Counters::bump(&counters.retransmissions);
                link.send(&conn.fin_ack(timestamp_now()), peer).await?;
                continue;
            };

            match conn.peer() {
                Some(peer) if peer != from => {
                    log::debug!("[receiver] ignoring segment from unknown peer {from}");
                    continue;
                }
                None if !segment.is_syn() => {
                    log::debug!("[receiver] ignoring {segment} before SYN");
                    continue;
                }
                _ => {}
            }

            if segment.is_syn() {
                if matches!(
                    conn.state(),
                    ConnectionState::Closed | ConnectionState::SynReceived
                ) {
                    let reply = conn.accept_syn(&segment, from);
                    link.send(&reply, from).await?;
                } else {
                    log::debug!("[receiver] ignoring SYN in state {}", conn.state());
                }
                continue;
            }

            if segment.is_fin() {
                if conn.state() != ConnectionState::FinReceived {
                    fin_sends = 1;
                }
                let reply = conn.accept_fin(&segment);
                link.send(&reply, from).await?;
                // Reply first so a slow sink does not stall the peer's FIN.
                if !flushed {
                    flush(&mut sink, &buffer, &segment).await?;
                    flushed = true;
                }
                continue;
            }

            if conn.on_final_ack(&segment) {
                break;
            }
            conn.establish();

            if !segment.has_data() {
                continue;
            }
            if !conn.state().accepts_data() {
                log::debug!("[receiver] ignoring data in state {}", conn.state());
                continue;
            }

            match buffer.insert(segment.seq, segment.payload()) {
                Insert::Accepted => {
                    Counters::add(&counters.bytes_received, segment.payload_len() as u64);
                }
                Insert::Duplicate => {
                    Counters::bump(&counters.duplicate_segments);
                }
                Insert::OutOfWindow => {
                    log::debug!(
                        "[receiver] seq={} beyond window (cursor {})",
                        segment.seq,
                        buffer.ack_number()
                    );
                }
            }
            conn.ack = buffer.ack_number();
            link.send(&conn.ack_segment(segment.timestamp), from).await?;
        }

        log::debug!(
            "[receiver] session closed; {} bytes received",
            buffer.received_bytes()
        );
        Ok(counters.receiver_snapshot())
    }
}

/// Write the contiguous stream to `sink`, warning if the FIN shows bytes
/// are missing.
async fn flush<W: AsyncWrite + Unpin>(
    sink: &mut W,
    buffer: &Reassembly,
    fin: &Segment,
) -> Result<(), ConnError> {
    if buffer.has_gap() || fin.seq != buffer.ack_number() {
        log::warn!(
            "[receiver] stream incomplete at FIN (seq {}, contiguous up to {}); output truncated",
            fin.seq,
            buffer.ack_number()
        );
    }
    let bytes = buffer.assemble();
    sink.write_all(&bytes).await?;
    sink.flush().await?;
    Ok(())
}
