//! Segment-level I/O over a [`Datagram`].
//!
//! [`Link`] speaks [`Segment`] instead of raw bytes.  Every segment that
//! crosses it produces one trace line on the [`TRACE_TARGET`] log target;
//! datagrams that fail to parse or whose checksum does not verify are
//! counted and dropped here, so the protocol engines only ever see valid
//! segments.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::segment::{Direction, Segment, SegmentError, HEADER_LEN};
use crate::socket::{is_transient, Datagram};
use crate::stats::Counters;

/// Log target of the per-segment `snd`/`rcv` trace lines.
pub const TRACE_TARGET: &str = "tcpend::trace";

/// A datagram endpoint that sends and receives whole segments.
pub struct Link<D> {
    datagram: D,
    recv_capacity: usize,
    counters: Arc<Counters>,
}

impl<D: Datagram> Link<D> {
    /// Wrap `datagram`; inbound datagrams may carry at most `mtu` payload
    /// bytes.
    pub fn new(datagram: D, mtu: usize, counters: Arc<Counters>) -> Self {
        Self {
            datagram,
            recv_capacity: HEADER_LEN + mtu,
            counters,
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.datagram.local_addr()
    }

    /// Encode `segment` and send it as a single datagram to `dest`.
    pub async fn send(&self, segment: &Segment, dest: SocketAddr) -> io::Result<()> {
        let bytes = segment.encode();
        self.datagram.send_to(&bytes, dest).await?;

        log::info!(target: TRACE_TARGET, "{}", segment.trace(Direction::Sent));
        Counters::bump(&self.counters.segments_sent);
        Counters::add(&self.counters.bytes_sent, segment.payload_len() as u64);
        Ok(())
    }

    /// Wait for the next valid segment.
    ///
    /// Corrupt and malformed datagrams are dropped silently (and counted);
    /// transient socket errors are skipped.  Only a hard I/O failure is
    /// returned.
    pub async fn recv(&self) -> io::Result<(Segment, SocketAddr)> {
        let mut buf = vec![0u8; self.recv_capacity];
        loop {
            let (n, addr) = match self.datagram.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) if is_transient(&e) => {
                    log::debug!("transient receive error: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            };

            match Segment::decode_verified(&buf[..n]) {
                Ok(segment) => {
                    log::info!(target: TRACE_TARGET, "{}", segment.trace(Direction::Received));
                    Counters::bump(&self.counters.segments_received);
                    return Ok((segment, addr));
                }
                Err(e @ SegmentError::ChecksumMismatch { .. }) => {
                    log::debug!("dropping datagram from {addr}: {e}");
                    Counters::bump(&self.counters.checksum_discards);
                }
                Err(e) => {
                    log::debug!("dropping malformed datagram from {addr}: {e}");
                    Counters::bump(&self.counters.malformed_discards);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::segment::flags;
    use crate::socket::Socket;

    async fn link(mtu: usize) -> Link<Socket> {
        let sock = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        Link::new(sock, mtu, Arc::new(Counters::default()))
    }

    #[tokio::test]
    async fn segment_crosses_the_link() {
        let a = link(64).await;
        let b = link(64).await;
        let seg = Segment::new(1, 1, flags::ACK, b"payload".to_vec()).unwrap();

        a.send(&seg, b.local_addr().unwrap()).await.unwrap();
        let (got, from) = b.recv().await.unwrap();

        assert_eq!(got.payload(), b"payload");
        assert_eq!(from, a.local_addr().unwrap());
        assert_eq!(a.counters().segments_sent.load(Ordering::Relaxed), 1);
        assert_eq!(a.counters().bytes_sent.load(Ordering::Relaxed), 7);
        assert_eq!(b.counters().segments_received.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn corrupt_datagram_is_dropped_and_counted() {
        let raw = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = link(64).await;
        let dest = b.local_addr().unwrap();

        let mut bytes = Segment::new(1, 1, flags::ACK, b"abc".to_vec()).unwrap().encode();
        bytes[HEADER_LEN] ^= 0x80;
        raw.send_to(&bytes, dest).await.unwrap();
        raw.send_to(b"short", dest).await.unwrap();
        let good = Segment::control(0, 9, flags::ACK).encode();
        raw.send_to(&good, dest).await.unwrap();

        let (got, _) = tokio::time::timeout(Duration::from_secs(2), b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.ack, 9);
        assert_eq!(b.counters().checksum_discards.load(Ordering::Relaxed), 1);
        assert_eq!(b.counters().malformed_discards.load(Ordering::Relaxed), 1);
    }
}
