//! Configuration for publishing sessions.

use crate::error::{SenderError, SenderResult};
use serde::Serialize;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Semaphore;

/// `i32::MAX`, commonly passed as a limit to mean "no limit".
pub const LEGACY_UNBOUNDED_SENTINEL: usize = i32::MAX as usize;

/// Default capacity of the outcome channel between a session and its caller.
pub const DEFAULT_OUTCOME_BUFFER: usize = 256;

/// Maximum number of emitted but unconfirmed items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(into = "String")]
pub enum MaxInFlight {
    /// At most this many items are pending at any time.
    Bounded(NonZeroUsize),
    /// No gating: every item is emitted as soon as it is pulled.
    #[default]
    Unbounded,
}

impl MaxInFlight {
    /// Build a limit from a raw count.
    ///
    /// `0` is rejected. Counts the semaphore cannot represent, and
    /// [`LEGACY_UNBOUNDED_SENTINEL`], mean unbounded.
    pub fn from_limit(limit: usize) -> SenderResult<Self> {
        if limit >= Semaphore::MAX_PERMITS || limit == LEGACY_UNBOUNDED_SENTINEL {
            return Ok(Self::Unbounded);
        }

        NonZeroUsize::new(limit)
            .map(Self::Bounded)
            .ok_or_else(|| SenderError::Config("max_in_flight must be at least 1".to_string()))
    }

    /// The window size, or `None` when unbounded.
    pub fn limit(&self) -> Option<usize> {
        match self {
            Self::Bounded(n) => Some(n.get()),
            Self::Unbounded => None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Self::Unbounded)
    }
}

impl fmt::Display for MaxInFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(n) => write!(f, "{}", n),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}

impl From<MaxInFlight> for String {
    fn from(value: MaxInFlight) -> Self {
        value.to_string()
    }
}

impl FromStr for MaxInFlight {
    type Err = SenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unbounded") || s.eq_ignore_ascii_case("max") {
            return Ok(Self::Unbounded);
        }

        let limit: usize = s
            .parse()
            .map_err(|_| SenderError::Config(format!("invalid max_in_flight: {:?}", s)))?;
        Self::from_limit(limit)
    }
}

/// What a session does with pending items once emission has stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPolicy {
    /// Resolve every pending item as failed right away.
    FailPending,
    /// Keep servicing confirmations, optionally for at most `grace`;
    /// anything still pending afterwards fails.
    Await { grace: Option<Duration> },
}

/// Options for a publishing session.
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// In-flight window size
    pub max_in_flight: MaxInFlight,

    /// Policy applied to pending items when the connection is lost
    pub on_connection_lost: DrainPolicy,

    /// Policy applied to pending items on cancellation or timeout
    pub on_cancel: DrainPolicy,

    /// Whole-session deadline; reaching it behaves like a cancellation
    pub session_timeout: Option<Duration>,

    /// Capacity of the outcome channel
    pub outcome_buffer: usize,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            max_in_flight: MaxInFlight::Unbounded,
            on_connection_lost: DrainPolicy::FailPending,
            on_cancel: DrainPolicy::Await { grace: None },
            session_timeout: None,
            outcome_buffer: DEFAULT_OUTCOME_BUFFER,
        }
    }
}

impl SendOptions {
    /// Build options from the environment, falling back to defaults.
    ///
    /// Reads `SENDER_MAX_IN_FLIGHT`, `SENDER_SESSION_TIMEOUT_MS` and
    /// `SENDER_OUTCOME_BUFFER`.
    pub fn from_env() -> SenderResult<Self> {
        let mut options = Self::default();

        if let Ok(raw) = std::env::var("SENDER_MAX_IN_FLIGHT") {
            options.max_in_flight = raw.parse()?;
        }

        options.session_timeout = std::env::var("SENDER_SESSION_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis);

        options.outcome_buffer = std::env::var("SENDER_OUTCOME_BUFFER")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_OUTCOME_BUFFER);

        options.validate()?;
        Ok(options)
    }

    pub fn with_max_in_flight(mut self, max_in_flight: MaxInFlight) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_connection_lost_policy(mut self, policy: DrainPolicy) -> Self {
        self.on_connection_lost = policy;
        self
    }

    pub fn with_cancel_policy(mut self, policy: DrainPolicy) -> Self {
        self.on_cancel = policy;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    pub fn with_outcome_buffer(mut self, capacity: usize) -> Self {
        self.outcome_buffer = capacity;
        self
    }

    /// Check option values that the type system does not cover.
    pub fn validate(&self) -> SenderResult<()> {
        if self.outcome_buffer == 0 {
            return Err(SenderError::Config(
                "outcome_buffer must be at least 1".to_string(),
            ));
        }
        if self.outcome_buffer > Semaphore::MAX_PERMITS {
            return Err(SenderError::Config(format!(
                "outcome_buffer must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.session_timeout == Some(Duration::ZERO) {
            return Err(SenderError::Config(
                "session_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_in_flight_parse() {
        assert_eq!("1".parse::<MaxInFlight>().unwrap().limit(), Some(1));
        assert_eq!("256".parse::<MaxInFlight>().unwrap().limit(), Some(256));
        assert!("unbounded".parse::<MaxInFlight>().unwrap().is_unbounded());
        assert!("MAX".parse::<MaxInFlight>().unwrap().is_unbounded());
        assert!("2147483647".parse::<MaxInFlight>().unwrap().is_unbounded());
    }

    #[test]
    fn test_max_in_flight_rejects_zero_and_garbage() {
        assert!(matches!(
            "0".parse::<MaxInFlight>(),
            Err(SenderError::Config(_))
        ));
        assert!(matches!(
            "lots".parse::<MaxInFlight>(),
            Err(SenderError::Config(_))
        ));
        assert!(MaxInFlight::from_limit(0).is_err());
    }

    #[test]
    fn test_max_in_flight_huge_limit_is_unbounded() {
        assert!(MaxInFlight::from_limit(usize::MAX).unwrap().is_unbounded());
        assert!(MaxInFlight::from_limit(Semaphore::MAX_PERMITS)
            .unwrap()
            .is_unbounded());
    }

    #[test]
    fn test_max_in_flight_display() {
        assert_eq!(MaxInFlight::from_limit(10).unwrap().to_string(), "10");
        assert_eq!(MaxInFlight::Unbounded.to_string(), "unbounded");
    }

    #[test]
    fn test_default_options() {
        let options = SendOptions::default();
        assert!(options.max_in_flight.is_unbounded());
        assert_eq!(options.on_connection_lost, DrainPolicy::FailPending);
        assert_eq!(options.on_cancel, DrainPolicy::Await { grace: None });
        assert!(options.session_timeout.is_none());
        assert_eq!(options.outcome_buffer, DEFAULT_OUTCOME_BUFFER);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let options = SendOptions::default().with_outcome_buffer(0);
        assert!(options.validate().is_err());

        let options = SendOptions::default().with_outcome_buffer(usize::MAX);
        assert!(matches!(options.validate(), Err(SenderError::Config(_))));

        let options = SendOptions::default().with_outcome_buffer(Semaphore::MAX_PERMITS);
        assert!(options.validate().is_ok());

        let options = SendOptions::default().with_session_timeout(Duration::ZERO);
        assert!(options.validate().is_err());
    }
}
