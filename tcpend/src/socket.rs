//! Async datagram substrate.
//!
//! [`Datagram`] is the only thing the protocol engines know about the
//! network: send some bytes to an address, receive some bytes and learn who
//! sent them.  Either operation may lose, duplicate, reorder or corrupt data.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket`; the fault
//! injecting [`crate::simulator::Simulator`] wraps any other implementation.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

/// Largest payload a single UDP datagram over IPv4 can carry.
pub const MAX_DATAGRAM: usize = 65_507;

/// An unreliable, unordered datagram endpoint.
///
/// All methods take `&self` so one endpoint can be shared between the
/// concurrent paths of a session.
#[async_trait]
pub trait Datagram: Send + Sync {
    /// Send `buf` as a single datagram to `dest`.
    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<()>;

    /// Wait for the next datagram, returning its length and source address.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Address this endpoint is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// An async UDP socket.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port `0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }
}

#[async_trait]
impl Datagram for Socket {
    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.inner.send_to(buf, dest).await?;
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

/// Returns `true` if the error is likely transient (a later receive may
/// succeed).
///
/// Some platforms surface an ICMP port-unreachable from an earlier send as
/// an error on the next receive.
pub fn is_transient(e: &io::Error) -> bool {
    use io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::Interrupted
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
    )
}
