//! In-memory broker with publisher confirms.
//!
//! Stands in for a real broker in benchmarks and tests:
//!
//! - queues are broker-named and may be length-limited; a publish to a
//!   full queue is nacked
//! - a publish to an unknown destination is acked and dropped
//! - confirmations are delayed by `confirm_latency` plus random jitter, so
//!   they can arrive out of publish order
//! - connections can be severed on demand or after a number of publishes

use crate::error::{TransportError, TransportResult};
use crate::message::{DestinationId, OutboundItem};
use crate::transport::{ack_channel, AckHandle, AckSender, Connection, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Broker behaviour.
#[derive(Debug, Clone, Default)]
pub struct BrokerConfig {
    /// Base delay before a confirmation is delivered
    pub confirm_latency: Duration,

    /// Upper bound of the random delay added to each confirmation
    pub confirm_jitter: Duration,

    /// Queue length limit applied to declared queues
    pub max_queue_length: Option<usize>,

    /// Sever each connection when it attempts publish number `n + 1`
    pub fail_after_publishes: Option<u64>,
}

/// Broker-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub published: u64,
    pub acked: u64,
    pub nacked: u64,
    pub queues: usize,
}

#[derive(Debug, Default)]
struct Queue {
    depth: usize,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<DestinationId, Queue>,
    stats: BrokerStats,
}

/// Shared in-memory broker. Cloning yields another handle to the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    config: BrokerConfig,
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(BrokerState::default())),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn stats(&self) -> BrokerStats {
        let state = self.state.lock();
        BrokerStats {
            queues: state.queues.len(),
            ..state.stats
        }
    }

    /// Messages currently held by `destination`, if it exists.
    pub fn queue_depth(&self, destination: &DestinationId) -> Option<usize> {
        self.state.lock().queues.get(destination).map(|q| q.depth)
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    type Connection = MemoryConnection;

    async fn connect(&self) -> TransportResult<MemoryConnection> {
        let connection = MemoryConnection {
            id: Uuid::new_v4(),
            broker: self.clone(),
            open: Arc::new(AtomicBool::new(true)),
            publishes: AtomicU64::new(0),
            next_tag: AtomicU64::new(0),
            outstanding: Arc::new(Mutex::new(HashMap::new())),
        };
        debug!(connection_id = %connection.id, "Connection opened");
        Ok(connection)
    }
}

/// Unresolved confirmations keyed by delivery tag.
type Outstanding = Arc<Mutex<HashMap<u64, AckSender>>>;

/// Connection to a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryConnection {
    id: Uuid,
    broker: MemoryBroker,
    open: Arc<AtomicBool>,
    publishes: AtomicU64,
    next_tag: AtomicU64,
    outstanding: Outstanding,
}

impl MemoryConnection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Drop the connection as if the network failed. Every outstanding
    /// confirmation resolves as lost.
    pub fn sever(&self, reason: &str) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }

        let lost: Vec<AckSender> = self.outstanding.lock().drain().map(|(_, tx)| tx).collect();
        warn!(
            connection_id = %self.id,
            reason = %reason,
            outstanding = lost.len(),
            "Connection severed"
        );
        for tx in lost {
            tx.lose(reason);
        }
    }

    /// Confirmations not yet delivered.
    pub fn outstanding(&self) -> usize {
        self.outstanding.lock().len()
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::ConnectionClosed(format!(
                "connection {} is closed",
                self.id
            )))
        }
    }

    /// Store the message and decide its verdict.
    fn enqueue(&self, item: &OutboundItem) -> Result<(), String> {
        let mut state = self.broker.state.lock();
        state.stats.published += 1;

        let max_length = self.broker.config.max_queue_length;
        let verdict = match state.queues.get_mut(item.destination()) {
            Some(queue) if max_length.is_some_and(|max| queue.depth >= max) => {
                Err(format!("queue {} is full", item.destination()))
            }
            Some(queue) => {
                queue.depth += 1;
                Ok(())
            }
            // Unroutable and not mandatory: the broker confirms and drops it.
            None => Ok(()),
        };

        match verdict {
            Ok(()) => state.stats.acked += 1,
            Err(_) => state.stats.nacked += 1,
        }
        verdict
    }

    fn confirm_delay(&self) -> Duration {
        let config = &self.broker.config;
        if config.confirm_jitter.is_zero() {
            return config.confirm_latency;
        }
        let jitter_us = config.confirm_jitter.as_micros() as u64;
        config.confirm_latency + Duration::from_micros(rand::thread_rng().gen_range(0..=jitter_us))
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn declare_destination(&self) -> TransportResult<DestinationId> {
        self.ensure_open()?;
        let destination = DestinationId::new(format!("amq.gen-{}", Uuid::new_v4()));
        self.broker
            .state
            .lock()
            .queues
            .insert(destination.clone(), Queue::default());
        debug!(connection_id = %self.id, destination = %destination, "Queue declared");
        Ok(destination)
    }

    async fn delete_destination(&self, destination: &DestinationId) -> TransportResult<()> {
        self.ensure_open()?;
        match self.broker.state.lock().queues.remove(destination) {
            Some(queue) => {
                debug!(destination = %destination, depth = queue.depth, "Queue deleted");
                Ok(())
            }
            None => Err(TransportError::UnknownDestination(destination.to_string())),
        }
    }

    fn send(&self, item: &OutboundItem) -> TransportResult<AckHandle> {
        self.ensure_open()?;

        let attempt = self.publishes.fetch_add(1, Ordering::AcqRel);
        if let Some(limit) = self.broker.config.fail_after_publishes {
            if attempt >= limit {
                self.sever("injected failure");
                return Err(TransportError::ConnectionClosed(
                    "injected failure".to_string(),
                ));
            }
        }

        let (tx, handle) = ack_channel();
        let verdict = self.enqueue(item);
        let delay = self.confirm_delay();

        if delay.is_zero() {
            match verdict {
                Ok(()) => tx.ack(),
                Err(reason) => tx.nack(Some(reason)),
            }
            return Ok(handle);
        }

        let tag = self.next_tag.fetch_add(1, Ordering::AcqRel);
        self.outstanding.lock().insert(tag, tx);

        // A sever that raced with this publish has already drained the map.
        if !self.is_open() {
            if let Some(tx) = self.outstanding.lock().remove(&tag) {
                tx.lose("connection closed during publish");
            }
            return Ok(handle);
        }

        let outstanding = self.outstanding.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Gone if the connection was severed in the meantime.
            let Some(tx) = outstanding.lock().remove(&tag) else {
                return;
            };
            match verdict {
                Ok(()) => tx.ack(),
                Err(reason) => tx.nack(Some(reason)),
            }
        });

        Ok(handle)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn close(&self) -> TransportResult<()> {
        if self.is_open() {
            self.sever("connection closed by client");
            info!(connection_id = %self.id, "Connection closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Confirmation;

    #[tokio::test]
    async fn test_declare_and_delete_queue() {
        let broker = MemoryBroker::default();
        let conn = broker.connect().await.unwrap();

        let queue = conn.declare_destination().await.unwrap();
        assert!(queue.as_str().starts_with("amq.gen-"));
        assert_eq!(broker.stats().queues, 1);

        conn.delete_destination(&queue).await.unwrap();
        assert_eq!(broker.stats().queues, 0);

        let err = conn.delete_destination(&queue).await.unwrap_err();
        assert!(matches!(err, TransportError::UnknownDestination(_)));
    }

    #[tokio::test]
    async fn test_publish_is_acked_and_stored() {
        let broker = MemoryBroker::default();
        let conn = broker.connect().await.unwrap();
        let queue = conn.declare_destination().await.unwrap();

        let handle = conn.send(&OutboundItem::new(queue.clone(), b"x".to_vec())).unwrap();
        assert_eq!(handle.await, Confirmation::Ack);
        assert_eq!(broker.queue_depth(&queue), Some(1));
        assert_eq!(broker.stats().acked, 1);
    }

    #[tokio::test]
    async fn test_full_queue_nacks() {
        let broker = MemoryBroker::new(BrokerConfig {
            max_queue_length: Some(1),
            ..Default::default()
        });
        let conn = broker.connect().await.unwrap();
        let queue = conn.declare_destination().await.unwrap();

        let first = conn.send(&OutboundItem::new(queue.clone(), vec![1])).unwrap();
        let second = conn.send(&OutboundItem::new(queue.clone(), vec![2])).unwrap();

        assert_eq!(first.await, Confirmation::Ack);
        assert!(matches!(second.await, Confirmation::Nack { reason: Some(_) }));
        assert_eq!(broker.queue_depth(&queue), Some(1));
        assert_eq!(broker.stats().nacked, 1);
    }

    #[tokio::test]
    async fn test_unroutable_publish_is_acked() {
        let broker = MemoryBroker::default();
        let conn = broker.connect().await.unwrap();

        let handle = conn.send(&OutboundItem::new("nowhere", vec![1])).unwrap();
        assert_eq!(handle.await, Confirmation::Ack);
    }

    #[tokio::test]
    async fn test_delayed_confirms_wait_for_latency() {
        let broker = MemoryBroker::new(BrokerConfig {
            confirm_latency: Duration::from_millis(50),
            ..Default::default()
        });
        let conn = broker.connect().await.unwrap();
        let queue = conn.declare_destination().await.unwrap();

        let start = std::time::Instant::now();
        let handle = conn.send(&OutboundItem::new(queue, vec![1])).unwrap();
        assert_eq!(conn.outstanding(), 1);
        assert_eq!(handle.await, Confirmation::Ack);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(conn.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_sever_loses_outstanding_confirms() {
        let broker = MemoryBroker::new(BrokerConfig {
            confirm_latency: Duration::from_secs(60),
            ..Default::default()
        });
        let conn = broker.connect().await.unwrap();
        let queue = conn.declare_destination().await.unwrap();

        let a = conn.send(&OutboundItem::new(queue.clone(), vec![1])).unwrap();
        let b = conn.send(&OutboundItem::new(queue.clone(), vec![2])).unwrap();
        conn.sever("network down");

        assert!(!conn.is_open());
        assert!(matches!(a.await, Confirmation::Lost { .. }));
        assert!(matches!(b.await, Confirmation::Lost { .. }));
        assert!(conn.send(&OutboundItem::new(queue, vec![3])).is_err());
    }

    #[tokio::test]
    async fn test_fail_after_publishes() {
        let broker = MemoryBroker::new(BrokerConfig {
            fail_after_publishes: Some(2),
            ..Default::default()
        });
        let conn = broker.connect().await.unwrap();

        assert!(conn.send(&OutboundItem::new("q", vec![1])).is_ok());
        assert!(conn.send(&OutboundItem::new("q", vec![2])).is_ok());
        let err = conn.send(&OutboundItem::new("q", vec![3])).unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed(_)));
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let broker = MemoryBroker::default();
        let conn = broker.connect().await.unwrap();
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(!conn.is_open());
        assert!(conn.declare_destination().await.is_err());
    }
}
