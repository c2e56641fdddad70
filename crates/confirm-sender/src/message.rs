//! Outbound items and their publish outcomes.

use crate::error::{SenderError, SenderResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identifier of a destination on the broker (queue name or routing key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DestinationId(String);

impl DestinationId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DestinationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DestinationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A message to publish.
///
/// Built once with the `with_*` methods and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundItem {
    destination: DestinationId,
    payload: Vec<u8>,
    headers: BTreeMap<String, String>,
    correlation_id: Option<Uuid>,
}

impl OutboundItem {
    /// Create an item for `destination` carrying `payload`.
    pub fn new(destination: impl Into<DestinationId>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            destination: destination.into(),
            payload: payload.into(),
            headers: BTreeMap::new(),
            correlation_id: None,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn destination(&self) -> &DestinationId {
        &self.destination
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    /// Reject items no broker could route.
    pub fn validate(&self) -> SenderResult<()> {
        if self.destination.as_str().trim().is_empty() {
            return Err(SenderError::MalformedItem(
                "destination must not be empty".to_string(),
            ));
        }
        if self.headers.keys().any(|k| k.is_empty()) {
            return Err(SenderError::MalformedItem(
                "header keys must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why an item failed without a broker verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The connection went away while the item was pending
    ConnectionLost(String),
    /// The session was cancelled while the item was pending
    Cancelled,
    /// The item failed validation and was never emitted
    Malformed(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(reason) => write!(f, "connection lost: {}", reason),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Malformed(reason) => write!(f, "malformed: {}", reason),
        }
    }
}

/// Terminal result for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    Acknowledged,
    Rejected { reason: Option<String> },
    Failed { reason: FailureReason },
}

impl PublishOutcome {
    pub fn failed(reason: FailureReason) -> Self {
        Self::Failed { reason }
    }

    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// An item together with its terminal outcome.
#[derive(Debug, Clone)]
pub struct OutboundResult {
    /// Zero-based position of the item in the source
    pub sequence: u64,
    pub item: OutboundItem,
    pub outcome: PublishOutcome,
}
