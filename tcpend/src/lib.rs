//! `tcpend` — a TCP-like reliable byte stream implemented over UDP.
//!
//! One side sends a file, the other writes it out.  Delivery survives loss,
//! reordering, duplication and corruption through checksums, cumulative
//! acknowledgements, a sliding window and adaptive retransmission.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────────┐             ┌──────────────────────┐
//!  │       Sender         │  segments   │      Receiver        │
//!  │ SlidingWindow + RTT  │────────────▶│     Reassembly       │
//!  │ (3 tokio tasks)      │◀────────────│ (request/response)   │
//!  └──────────┬───────────┘    ACKs     └──────────┬───────────┘
//!             │ Connection (handshake / teardown)  │
//!  ┌──────────▼───────────┐             ┌──────────▼───────────┐
//!  │        Link          │             │        Link          │
//!  │ codec, trace, drops  │             │ codec, trace, drops  │
//!  └──────────┬───────────┘             └──────────┬───────────┘
//!             │ Datagram (Socket / Simulator)      │
//!             ▼                                    ▼
//! ```
//!
//! Each module has a single responsibility:
//! - [`segment`]     — wire format and checksum
//! - [`state`]       — finite-state-machine types
//! - [`connection`]  — handshake, teardown, session errors
//! - [`window`]      — send-side sliding window and retransmission policy
//! - [`sender`]      — sending session (producer, ack consumer, ticker)
//! - [`reassembly`]  — receive-side offset-keyed buffer
//! - [`receiver`]    — receiving session
//! - [`timer`]       — timing knobs and RTT estimation
//! - [`link`]        — segment-level I/O and trace lines
//! - [`socket`]      — async datagram abstraction over tokio `UdpSocket`
//! - [`simulator`]   — lossy/reordering network layer for testing
//! - [`config`]      — session configuration and validation
//! - [`stats`]       — transfer counters and end-of-session reports

pub mod config;
pub mod connection;
pub mod link;
pub mod reassembly;
pub mod receiver;
pub mod segment;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod stats;
pub mod timer;
pub mod window;

pub use config::{ConfigError, ReceiverConfig, SenderConfig};
pub use connection::ConnError;
pub use receiver::Receiver;
pub use segment::{Segment, SegmentError};
pub use sender::Sender;
pub use simulator::{Simulator, SimulatorConfig};
pub use socket::{Datagram, Socket};
pub use stats::{ReceiverStats, SenderStats};
pub use timer::TimerConfig;
