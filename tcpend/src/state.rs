//! Connection finite-state machine (FSM) types.
//!
//! This module defines every state a [`crate::connection::Connection`] can
//! occupy.  Transitions live in [`crate::connection`]; both roles walk the
//! same diagram from opposite ends:
//!
//! ```text
//!  sender                                   receiver
//!  CLOSED ──SYN sent──▶ SYN_SENT            CLOSED ──SYN rcvd──▶ SYN_RECEIVED
//!                          │ SYN+ACK                                  │ ACK / data
//!                          ▼                                          ▼
//!                     ESTABLISHED                                ESTABLISHED
//!                          │ FIN sent                                 │ FIN rcvd
//!                          ▼                                          ▼
//!                      FIN_SENT                                 FIN_RECEIVED
//!                          │ FIN+ACK, linger                          │ final ACK
//!                          ▼                                          ▼
//!                       CLOSED                                     CLOSED
//! ```

use std::fmt;

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection exists; initial and final state.
    #[default]
    Closed,
    /// SYN has been sent; waiting for SYN+ACK.
    SynSent,
    /// SYN received; SYN+ACK sent; waiting for ACK or data.
    SynReceived,
    /// Handshake complete; data transfer in progress.
    Established,
    /// Local side sent FIN; waiting for the peer's FIN+ACK.
    FinSent,
    /// Peer's FIN received and answered; waiting for the final ACK.
    FinReceived,
}

impl ConnectionState {
    /// `true` once the handshake has completed and before teardown begins.
    pub fn is_established(self) -> bool {
        self == Self::Established
    }

    /// `true` while the peer may still deliver data segments.
    pub fn accepts_data(self) -> bool {
        matches!(self, Self::SynReceived | Self::Established)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::SynSent => "SYN_SENT",
            Self::SynReceived => "SYN_RECEIVED",
            Self::Established => "ESTABLISHED",
            Self::FinSent => "FIN_SENT",
            Self::FinReceived => "FIN_RECEIVED",
        };
        f.write_str(name)
    }
}
