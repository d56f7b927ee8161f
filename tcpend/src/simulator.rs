//! Fault-injecting network simulator.
//!
//! Real networks drop, reorder, duplicate and corrupt datagrams.  To exercise
//! the reliability mechanisms without depending on actual network
//! conditions, [`Simulator`] wraps any [`Datagram`] and intercepts sends,
//! applying a configurable fault model:
//!
//! | Fault        | Description                                            |
//! |--------------|--------------------------------------------------------|
//! | Loss         | Drop a datagram with probability `loss_rate`.          |
//! | Reordering   | Hold a datagram back until the next one has been sent. |
//! | Duplication  | Deliver a datagram twice.                              |
//! | Corruption   | Flip one random bit of the datagram.                   |
//!
//! Receives pass straight through.  All randomness comes from a seeded
//! [`StdRng`], so a failing run can be replayed with the same seed.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::socket::Datagram;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`; out-of-range values are
/// clamped.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is held back behind the next one.
    pub reorder_rate: f64,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that one bit of a datagram is flipped.
    pub corrupt_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default; the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            reorder_rate: 0.0,
            duplicate_rate: 0.0,
            corrupt_rate: 0.0,
            seed: 0,
        }
    }
}

impl SimulatorConfig {
    /// Pass-through apart from dropping `loss_rate` of all datagrams.
    pub fn lossy(loss_rate: f64, seed: u64) -> Self {
        Self {
            loss_rate,
            seed,
            ..Self::default()
        }
    }
}

/// Counts of the faults injected so far.
#[derive(Debug, Default)]
pub struct FaultCounters {
    pub dropped: AtomicU64,
    pub reordered: AtomicU64,
    pub duplicated: AtomicU64,
    pub corrupted: AtomicU64,
}

/// What to do with one outbound datagram.
struct Plan {
    datagrams: Vec<Vec<u8>>,
    release: Option<(Vec<u8>, SocketAddr)>,
}

/// A fault-injecting wrapper around another datagram endpoint.
pub struct Simulator<D> {
    inner: D,
    config: SimulatorConfig,
    rng: Mutex<StdRng>,
    held: Mutex<Option<(Vec<u8>, SocketAddr)>>,
    counters: FaultCounters,
}

impl<D: Datagram> Simulator<D> {
    pub fn new(inner: D, config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            inner,
            config,
            rng: Mutex::new(rng),
            held: Mutex::new(None),
            counters: FaultCounters::default(),
        }
    }

    /// Faults injected so far.
    pub fn counters(&self) -> &FaultCounters {
        &self.counters
    }

    /// Roll the dice for one datagram.  No lock survives past this call.
    fn plan(&self, buf: &[u8], dest: SocketAddr) -> Plan {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());

        if chance(&mut rng, self.config.loss_rate) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Plan {
                datagrams: Vec::new(),
                release: None,
            };
        }

        let mut bytes = buf.to_vec();
        if !bytes.is_empty() && chance(&mut rng, self.config.corrupt_rate) {
            let bit = rng.random_range(0..bytes.len() * 8);
            bytes[bit / 8] ^= 1 << (bit % 8);
            self.counters.corrupted.fetch_add(1, Ordering::Relaxed);
        }

        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held.is_none() && chance(&mut rng, self.config.reorder_rate) {
            *held = Some((bytes, dest));
            self.counters.reordered.fetch_add(1, Ordering::Relaxed);
            return Plan {
                datagrams: Vec::new(),
                release: None,
            };
        }
        let release = held.take();

        let mut datagrams = vec![bytes];
        if chance(&mut rng, self.config.duplicate_rate) {
            datagrams.push(datagrams[0].clone());
            self.counters.duplicated.fetch_add(1, Ordering::Relaxed);
        }
        Plan { datagrams, release }
    }
}

fn chance(rng: &mut StdRng, p: f64) -> bool {
    rng.random_bool(p.clamp(0.0, 1.0))
}

#[async_trait]
impl<D: Datagram> Datagram for Simulator<D> {
    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<()> {
        let plan = self.plan(buf, dest);
        for bytes in &plan.datagrams {
            self.inner.send_to(bytes, dest).await?;
        }
        if let Some((bytes, held_dest)) = plan.release {
            self.inner.send_to(&bytes, held_dest).await?;
        }
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::socket::Socket;

    async fn pair(config: SimulatorConfig) -> (Simulator<Socket>, Socket) {
        let a = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        (Simulator::new(a, config), b)
    }

    async fn recv(sock: &Socket) -> Option<Vec<u8>> {
        let mut buf = [0u8; 256];
        match tokio::time::timeout(Duration::from_millis(100), sock.recv_from(&mut buf)).await {
            Ok(Ok((n, _))) => Some(buf[..n].to_vec()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn default_config_passes_through() {
        let (sim, b) = pair(SimulatorConfig::default()).await;
        for i in 0..8u8 {
            sim.send_to(&[i; 4], b.local_addr).await.unwrap();
        }
        for i in 0..8u8 {
            assert_eq!(recv(&b).await, Some(vec![i; 4]));
        }
    }

    #[tokio::test]
    async fn full_loss_drops_everything() {
        let (sim, b) = pair(SimulatorConfig::lossy(1.0, 7)).await;
        for _ in 0..4 {
            sim.send_to(b"gone", b.local_addr).await.unwrap();
        }
        assert_eq!(recv(&b).await, None);
        assert_eq!(sim.counters().dropped.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn full_duplication_delivers_twice() {
        let config = SimulatorConfig {
            duplicate_rate: 1.0,
            ..SimulatorConfig::default()
        };
        let (sim, b) = pair(config).await;
        sim.send_to(b"twice", b.local_addr).await.unwrap();
        assert_eq!(recv(&b).await.as_deref(), Some(&b"twice"[..]));
        assert_eq!(recv(&b).await.as_deref(), Some(&b"twice"[..]));
    }

    #[tokio::test]
    async fn corruption_flips_exactly_one_bit() {
        let config = SimulatorConfig {
            corrupt_rate: 1.0,
            seed: 3,
            ..SimulatorConfig::default()
        };
        let (sim, b) = pair(config).await;
        let original = [0u8; 16];
        sim.send_to(&original, b.local_addr).await.unwrap();
        let got = recv(&b).await.unwrap();
        let flipped: u32 = got.iter().map(|b| b.count_ones()).sum();
        assert_eq!(flipped, 1);
    }

    #[tokio::test]
    async fn reordering_swaps_with_the_next_datagram() {
        let config = SimulatorConfig {
            reorder_rate: 1.0,
            ..SimulatorConfig::default()
        };
        let (sim, b) = pair(config).await;
        sim.send_to(b"first", b.local_addr).await.unwrap();
        sim.send_to(b"second", b.local_addr).await.unwrap();
        assert_eq!(recv(&b).await.as_deref(), Some(&b"second"[..]));
        assert_eq!(recv(&b).await.as_deref(), Some(&b"first"[..]));
    }
}
