//! Sending side of a session.
//!
//! [`Sender::run`] performs the whole session: handshake, windowed data
//! transfer, teardown.  The transfer phase runs three tasks over one shared
//! [`SenderState`]:
//!
//! ```text
//!             ┌────────────┐  notify_one   ┌──────────────┐
//!             │  producer  │◀──────────────│ ack consumer │◀── ACKs
//!             └─────┬──────┘               └──────┬───────┘
//!   new segments    │   Arc<Mutex<SenderState>>   │
//!                   ▼                             ▼
//!             ┌──────────────────────────────────────────┐
//!             │  SlidingWindow + RttEstimator            │
//!             └──────────────────────────────────────────┘
//!                   ▲
//!             ┌─────┴──────┐
//!             │   ticker   │──▶ retransmissions
//!             └────────────┘
//! ```
//!
//! The mutex is a `std::sync::Mutex` and is never held across an `.await`;
//! segments picked under the lock are sent after it is released.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::Notify;
use tokio::task::JoinError;
use tokio::time::{self, MissedTickBehavior};

use crate::config::SenderConfig;
use crate::connection::{ConnError, Connection};
use crate::link::Link;
use crate::segment::Segment;
use crate::socket::Datagram;
use crate::stats::{Counters, SenderStats};
use crate::timer::{timestamp_now, RttEstimator, TimerConfig};
use crate::window::{segment_payload, AckOutcome, SlidingWindow};

/// State shared by the transfer tasks.
#[derive(Debug)]
struct SenderState {
    window: SlidingWindow,
    rtt: RttEstimator,
}

impl SenderState {
    /// Fold one inbound segment in.  Returns `true` when `left` moved.
    fn on_segment(&mut self, segment: &Segment, counters: &Counters) -> bool {
        self.rtt.update(RttEstimator::sample_since(segment.timestamp));

        if segment.is_syn() {
            log::debug!("[sender] ignoring late handshake reply {segment}");
            return false;
        }
        if !segment.is_ack() {
            log::debug!("[sender] ignoring segment without ACK {segment}");
            return false;
        }

        match self.window.on_ack(segment.ack) {
            AckOutcome::Advanced(n) => {
                if n > 0 {
                    log::debug!(
                        "[sender] ← ACK ack={} (slid {n}, left={}, right={})",
                        segment.ack,
                        self.window.left(),
                        self.window.right()
                    );
                }
                n > 0
            }
            AckOutcome::Duplicate => {
                Counters::bump(&counters.duplicate_acks);
                false
            }
            outcome => {
                log::debug!("[sender] ignoring ack {}: {outcome:?}", segment.ack);
                false
            }
        }
    }
}

type Shared = Arc<Mutex<SenderState>>;

fn lock(state: &Mutex<SenderState>) -> MutexGuard<'_, SenderState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// One sending session over a [`Datagram`] endpoint.
pub struct Sender<D> {
    config: SenderConfig,
    datagram: D,
    payload: Vec<u8>,
}

impl<D: Datagram + 'static> Sender<D> {
    pub fn new(config: SenderConfig, datagram: D, payload: Vec<u8>) -> Self {
        Self {
            config,
            datagram,
            payload,
        }
    }

    /// Deliver the payload to `config.remote` and report statistics.
    pub async fn run(self) -> Result<SenderStats, ConnError> {
        let Self {
            config,
            datagram,
            payload,
        } = self;
        config.validate()?;

        let segments = segment_payload(&payload, config.mtu)?;
        let total_len = payload.len() as u32;
        drop(payload);

        let peer = config.remote;
        let timer = config.timer.clone();
        let counters = Arc::new(Counters::default());
        let link = Arc::new(Link::new(datagram, config.mtu, Arc::clone(&counters)));

        let mut conn = Connection::new();
        let mut rtt = RttEstimator::new(&timer);
        conn.open(&link, peer, &mut rtt, &timer).await?;

        log::debug!(
            "[sender] sending {} bytes in {} segments, window {}",
            total_len,
            segments.len(),
            config.window
        );
        let state = Arc::new(Mutex::new(SenderState {
            window: SlidingWindow::new(segments, config.window),
            rtt,
        }));
        transfer(&link, &state, &counters, peer, conn.ack, &timer).await?;

        let mut rtt = lock(&state).rtt.clone();
        conn.advance(total_len);
        conn.close(&link, &mut rtt, &timer).await?;

        Ok(counters.sender_snapshot())
    }
}

/// Run the producer, ack consumer and ticker until every segment is
/// acknowledged or one of them fails.
async fn transfer<D: Datagram + 'static>(
    link: &Arc<Link<D>>,
    state: &Shared,
    counters: &Arc<Counters>,
    peer: SocketAddr,
    ack: u32,
    timer: &TimerConfig,
) -> Result<(), ConnError> {
    let space = Arc::new(Notify::new());

    let mut producer = tokio::spawn(produce(
        Arc::clone(link),
        Arc::clone(state),
        Arc::clone(&space),
        peer,
        ack,
    ));
    let mut acks = tokio::spawn(consume_acks(
        Arc::clone(link),
        Arc::clone(state),
        space,
        Arc::clone(counters),
        peer,
    ));
    let mut ticker = tokio::spawn(retransmit(
        Arc::clone(link),
        Arc::clone(state),
        Arc::clone(counters),
        peer,
        ack,
        timer.clone(),
    ));

    let mut producer_done = false;
    let result = loop {
        tokio::select! {
            joined = &mut producer, if !producer_done => match flatten(joined) {
                Ok(()) => producer_done = true,
                Err(e) => break Err(e),
            },
            joined = &mut acks => break flatten(joined),
            joined = &mut ticker => break flatten(joined),
        }
    };

    for handle in [producer, acks, ticker] {
        if !handle.is_finished() {
            handle.abort();
            let _ = handle.await;
        }
    }
    if let Err(e) = &result {
        log::error!("[sender] transfer aborted: {e}");
    }
    result
}

fn flatten(joined: Result<Result<(), ConnError>, JoinError>) -> Result<(), ConnError> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(e.into()),
    }
}

/// Send each segment as soon as the window has room for it.
async fn produce<D: Datagram>(
    link: Arc<Link<D>>,
    state: Shared,
    space: Arc<Notify>,
    peer: SocketAddr,
    ack: u32,
) -> Result<(), ConnError> {
    loop {
        let next = {
            let mut st = lock(&state);
            if st.window.right() == st.window.total() {
                return Ok(());
            }
            let rto = st.rtt.rto();
            st.window.next_to_send(Instant::now(), rto)
        };
        match next {
            Some(mut segment) => {
                segment.stamp(ack, timestamp_now());
                link.send(&segment, peer).await?;
            }
            None => space.notified().await,
        }
    }
}

/// Process acknowledgements until the whole window is acknowledged.
async fn consume_acks<D: Datagram>(
    link: Arc<Link<D>>,
    state: Shared,
    space: Arc<Notify>,
    counters: Arc<Counters>,
    peer: SocketAddr,
) -> Result<(), ConnError> {
    if lock(&state).window.is_complete() {
        return Ok(());
    }
    loop {
        let (segment, from) = link.recv().await?;
        if from != peer {
            log::debug!("[sender] ignoring segment from unknown peer {from}");
            continue;
        }

        let (advanced, complete) = {
            let mut st = lock(&state);
            let advanced = st.on_segment(&segment, &counters);
            (advanced, st.window.is_complete())
        };
        if advanced {
            space.notify_one();
        }
        if complete {
            log::debug!("[sender] all segments acknowledged");
            return Ok(());
        }
    }
}

/// Periodically sweep the window for expired or thrice-duplicated segments.
async fn retransmit<D: Datagram>(
    link: Arc<Link<D>>,
    state: Shared,
    counters: Arc<Counters>,
    peer: SocketAddr,
    ack: u32,
    timer: TimerConfig,
) -> Result<(), ConnError> {
    let mut tick = time::interval(timer.tick);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tick.tick().await;
        let resend: Vec<Segment> = {
            let mut st = lock(&state);
            let rto = st.rtt.rto();
            st.window.sweep(Instant::now(), rto, &timer)?
        };
        for mut segment in resend {
            log::debug!("[sender] retransmitting seq={}", segment.seq);
            segment.stamp(ack, timestamp_now());
            Counters::bump(&counters.retransmissions);
            link.send(&segment, peer).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::segment::flags;

    fn state(n: usize, capacity: usize) -> SenderState {
        let payload = vec![7u8; n * 4];
        SenderState {
            window: SlidingWindow::new(segment_payload(&payload, 4).unwrap(), capacity),
            rtt: RttEstimator::new(&TimerConfig::default()),
        }
    }

    fn ack(n: u32) -> Segment {
        let mut seg = Segment::control(0, n, flags::ACK);
        seg.timestamp = timestamp_now();
        seg
    }

    #[test]
    fn ack_advances_and_samples_rtt() {
        let counters = Counters::default();
        let mut st = state(3, 3);
        let now = Instant::now();
        while st.window.next_to_send(now, Duration::from_secs(1)).is_some() {}

        assert!(st.on_segment(&ack(5), &counters));
        assert_eq!(st.window.left(), 1);
        assert!(st.rtt.ertt().is_some());
    }

    #[test]
    fn repeated_ack_counts_as_duplicate() {
        let counters = Counters::default();
        let mut st = state(3, 3);
        let now = Instant::now();
        while st.window.next_to_send(now, Duration::from_secs(1)).is_some() {}

        assert!(!st.on_segment(&ack(1), &counters));
        assert!(!st.on_segment(&ack(1), &counters));
        assert!(!st.on_segment(&ack(1), &counters));
        assert_eq!(
            counters.duplicate_acks.load(std::sync::atomic::Ordering::Relaxed),
            2
        );
    }

    #[test]
    fn late_syn_ack_is_ignored() {
        let counters = Counters::default();
        let mut st = state(2, 2);
        let now = Instant::now();
        while st.window.next_to_send(now, Duration::from_secs(1)).is_some() {}

        let mut syn_ack = Segment::control(0, 5, flags::SYN | flags::ACK);
        syn_ack.timestamp = timestamp_now();
        assert!(!st.on_segment(&syn_ack, &counters));
        assert_eq!(st.window.left(), 0);
    }
}
