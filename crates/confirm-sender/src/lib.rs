//! confirm-sender: publish with confirms under a bounded in-flight window.
//!
//! A [`Sender`] pulls items from a stream, publishes each one over a
//! [`Connection`], and reports the broker's verdict for every item it
//! emitted. At most `max_in_flight` items are unconfirmed at any time.
//!
//! # Core Invariants
//!
//! 1. **Bounded window**: pending items never exceed `max_in_flight`
//! 2. **No eager pull**: the source is not polled while the window is full
//! 3. **Exactly once**: every emitted item resolves to one outcome
//! 4. **Input-order emission**: items are published in source order;
//!    outcomes arrive in confirmation order
//! 5. **Fail-stop**: a lost connection stops emission and fails what is
//!    pending; items never emitted are never reported
//!
//! # Architecture
//!
//! ```text
//! source -> [window credit] -> Connection::send -> AckHandle
//!                ^                                   |
//!                |_______ outcome <- confirmation ___|
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod message;
pub mod sender;
pub mod transport;
pub mod window;

#[cfg(test)]
mod tests;

pub use broker::{BrokerConfig, BrokerStats, MemoryBroker, MemoryConnection};
pub use config::{DrainPolicy, MaxInFlight, SendOptions};
pub use error::{SenderError, SenderResult, TransportError, TransportResult};
pub use message::{DestinationId, FailureReason, OutboundItem, OutboundResult, PublishOutcome};
pub use sender::{ConfirmStream, PublishReport, Sender};
pub use transport::{ack_channel, AckHandle, AckSender, Confirmation, Connection, Transport};
pub use window::{InFlightWindow, WindowGauge};

pub use tokio_util::sync::CancellationToken;
