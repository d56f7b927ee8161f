//! End-to-end transfers between a [`Sender`] and a [`Receiver`] on
//! loopback, with and without injected network faults.
//!
//! Every test checks that the receiver's output is byte-for-byte the
//! sender's input.

use std::net::SocketAddr;
use std::time::Duration;

use rstest::rstest;

use tcpend::{
    Receiver, ReceiverConfig, ReceiverStats, Sender, SenderConfig, SenderStats, Simulator,
    SimulatorConfig, Socket, TimerConfig,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn test_timer() -> TimerConfig {
    TimerConfig {
        initial_rto: Duration::from_millis(200),
        linger: Duration::from_millis(500),
        close_timeout: Duration::from_millis(50),
        ..TimerConfig::default()
    }
}

async fn bind_loopback() -> (Socket, SocketAddr) {
    let socket = Socket::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind loopback socket");
    let addr = socket.local_addr;
    (socket, addr)
}

/// Run one full session and return both sides' statistics plus the bytes
/// the receiver wrote.
async fn run_session(
    input: Vec<u8>,
    mtu: usize,
    window: usize,
    sender_faults: SimulatorConfig,
    receiver_faults: SimulatorConfig,
) -> (SenderStats, ReceiverStats, Vec<u8>) {
    let (recv_socket, recv_addr) = bind_loopback().await;
    let (send_socket, _) = bind_loopback().await;

    let mut send_config = SenderConfig::new(recv_addr, mtu, window);
    send_config.timer = test_timer();
    let mut recv_config = ReceiverConfig::new(mtu, window);
    recv_config.timer = test_timer();

    let mut out = Vec::new();
    let sender = Sender::new(
        send_config,
        Simulator::new(send_socket, sender_faults),
        input,
    );
    let receiver = Receiver::new(
        recv_config,
        Simulator::new(recv_socket, receiver_faults),
        &mut out,
    );

    let (sent, received) = tokio::time::timeout(Duration::from_secs(60), async move {
        tokio::join!(sender.run(), receiver.run())
    })
    .await
    .expect("session timed out");

    (
        sent.expect("sender failed"),
        received.expect("receiver failed"),
        out,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[rstest]
#[case::single_segment(500, 1000, 4)]
#[case::exact_multiple(4000, 1000, 4)]
#[case::ragged_tail(10_001, 1000, 8)]
#[case::stop_and_wait(3000, 512, 1)]
#[case::tiny_mtu(777, 1, 64)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clean_transfer(#[case] len: usize, #[case] mtu: usize, #[case] window: usize) {
    let input = payload(len);
    let (sent, received, out) = run_session(
        input.clone(),
        mtu,
        window,
        SimulatorConfig::default(),
        SimulatorConfig::default(),
    )
    .await;

    assert_eq!(out, input);
    assert_eq!(received.bytes_received, len as u64);
    assert!(sent.bytes_transferred >= len as u64);
    assert_eq!(received.checksum_discards, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lossy_transfer_delivers_everything() {
    let input = payload(100_000);
    let (sent, received, out) = run_session(
        input.clone(),
        1000,
        8,
        SimulatorConfig::lossy(0.05, 11),
        SimulatorConfig::lossy(0.05, 12),
    )
    .await;

    assert_eq!(out, input);
    assert_eq!(received.bytes_received, input.len() as u64);
    assert!(sent.retransmissions > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn corrupted_segments_are_discarded_and_recovered() {
    let faults = |seed| SimulatorConfig {
        corrupt_rate: 0.05,
        seed,
        ..SimulatorConfig::default()
    };
    let input = payload(60_000);
    let (sent, received, out) = run_session(input.clone(), 1200, 8, faults(21), faults(22)).await;

    assert_eq!(out, input);
    assert!(received.checksum_discards + sent.checksum_discards > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplication_and_reordering_are_harmless() {
    let faults = |seed| SimulatorConfig {
        duplicate_rate: 0.1,
        reorder_rate: 0.1,
        seed,
        ..SimulatorConfig::default()
    };
    let input = payload(40_000);
    let (_, received, out) = run_session(input.clone(), 800, 16, faults(31), faults(32)).await;

    assert_eq!(out, input);
    // Duplicates are recognised, never double counted.
    assert_eq!(received.bytes_received, input.len() as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn everything_at_once() {
    let faults = |seed| SimulatorConfig {
        loss_rate: 0.03,
        reorder_rate: 0.03,
        duplicate_rate: 0.03,
        corrupt_rate: 0.03,
        seed,
    };
    let input = payload(50_000);
    let (_, _, out) = run_session(input.clone(), 1000, 10, faults(41), faults(42)).await;
    assert_eq!(out, input);
}
