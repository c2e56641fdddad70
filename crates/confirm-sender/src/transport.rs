//! Transport contract the sender publishes through.
//!
//! A transport hands out connections. A connection publishes items without
//! blocking and later resolves each returned [`AckHandle`] with a
//! [`Confirmation`]. The resolving half, [`AckSender`], stays with the
//! transport; dropping it unresolved resolves the handle as lost, so every
//! emitted item resolves exactly once.

use crate::error::TransportResult;
use crate::message::{DestinationId, OutboundItem};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Broker verdict for one published item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// The broker took responsibility for the item
    Ack,
    /// The broker refused the item
    Nack { reason: Option<String> },
    /// No verdict will ever arrive (connection failure)
    Lost { reason: String },
}

/// Pending confirmation for a single published item.
#[derive(Debug)]
pub struct AckHandle {
    rx: oneshot::Receiver<Confirmation>,
}

/// Resolving side of an [`AckHandle`].
#[derive(Debug)]
pub struct AckSender {
    tx: oneshot::Sender<Confirmation>,
}

/// Create a linked confirmation pair.
pub fn ack_channel() -> (AckSender, AckHandle) {
    let (tx, rx) = oneshot::channel();
    (AckSender { tx }, AckHandle { rx })
}

impl AckSender {
    pub fn ack(self) {
        self.resolve(Confirmation::Ack);
    }

    pub fn nack(self, reason: Option<String>) {
        self.resolve(Confirmation::Nack { reason });
    }

    pub fn lose(self, reason: impl Into<String>) {
        self.resolve(Confirmation::Lost {
            reason: reason.into(),
        });
    }

    /// Deliver a verdict. A handle that was already dropped is ignored.
    pub fn resolve(self, confirmation: Confirmation) {
        let _ = self.tx.send(confirmation);
    }
}

impl Future for AckHandle {
    type Output = Confirmation;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| Confirmation::Lost {
                reason: "confirmation channel closed".to_string(),
            })
        })
    }
}

/// Something that can open connections to a broker.
#[async_trait]
pub trait Transport: Send + Sync {
    type Connection: Connection + 'static;

    /// Open a new connection.
    async fn connect(&self) -> TransportResult<Self::Connection>;
}

/// One broker connection.
///
/// Not meant for concurrent publishing from two emission paths; the
/// [`Sender`](crate::Sender) that owns it serialises its sessions.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Declare a fresh, broker-named destination.
    async fn declare_destination(&self) -> TransportResult<DestinationId>;

    /// Delete a destination and whatever it holds.
    async fn delete_destination(&self, destination: &DestinationId) -> TransportResult<()>;

    /// Publish an item. Returns immediately; the verdict arrives on the handle.
    fn send(&self, item: &OutboundItem) -> TransportResult<AckHandle>;

    fn is_open(&self) -> bool;

    /// Close the connection. Outstanding confirmations resolve as lost.
    async fn close(&self) -> TransportResult<()>;
}
