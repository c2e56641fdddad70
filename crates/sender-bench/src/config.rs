//! Benchmark parameters.

use crate::error::{BenchError, BenchResult};
use confirm_sender::{BrokerConfig, MaxInFlight, SendOptions};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_NB_MESSAGES: &str = "1,10,100,1000";
pub const DEFAULT_MAX_IN_FLIGHT: &str = "1,256,unbounded";
pub const DEFAULT_ITERATION_SECS: u64 = 5;
pub const DEFAULT_THREADS: usize = 2;

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl FromStr for OutputFormat {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(BenchError::Config(format!(
                "unknown output format {:?} (expected table or json)",
                other
            ))),
        }
    }
}

/// One point of the parameter matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchCase {
    pub nb_messages: usize,
    pub max_in_flight: MaxInFlight,
}

impl fmt::Display for BenchCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "nb_messages={} max_in_flight={}",
            self.nb_messages, self.max_in_flight
        )
    }
}

/// Validated benchmark configuration.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Batch sizes to measure
    pub nb_messages: Vec<usize>,

    /// In-flight limits to measure
    pub max_in_flight: Vec<MaxInFlight>,

    /// Length of the warmup iteration
    pub warmup: Duration,

    /// Length of the measured iteration
    pub measurement: Duration,

    /// Concurrent workers sharing one sender
    pub threads: usize,

    /// Payload size of each message in bytes
    pub payload_size: usize,

    /// Broker confirm latency
    pub confirm_latency: Duration,

    /// Broker confirm jitter
    pub confirm_jitter: Duration,

    pub format: OutputFormat,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            nb_messages: parse_list(DEFAULT_NB_MESSAGES).unwrap_or_default(),
            max_in_flight: parse_list(DEFAULT_MAX_IN_FLIGHT).unwrap_or_default(),
            warmup: Duration::from_secs(DEFAULT_ITERATION_SECS),
            measurement: Duration::from_secs(DEFAULT_ITERATION_SECS),
            threads: DEFAULT_THREADS,
            payload_size: 0,
            confirm_latency: Duration::ZERO,
            confirm_jitter: Duration::ZERO,
            format: OutputFormat::Table,
        }
    }
}

impl BenchConfig {
    /// Check parameter values.
    pub fn validate(&self) -> BenchResult<()> {
        if self.nb_messages.is_empty() {
            return Err(BenchError::Config("nb_messages is empty".to_string()));
        }
        if self.nb_messages.contains(&0) {
            return Err(BenchError::Config(
                "nb_messages values must be at least 1".to_string(),
            ));
        }
        if self.max_in_flight.is_empty() {
            return Err(BenchError::Config("max_in_flight is empty".to_string()));
        }
        if self.threads == 0 {
            return Err(BenchError::Config("threads must be at least 1".to_string()));
        }
        if self.measurement.is_zero() {
            return Err(BenchError::Config(
                "measurement time must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Every combination of batch size and in-flight limit, limit-major.
    pub fn cases(&self) -> Vec<BenchCase> {
        self.max_in_flight
            .iter()
            .flat_map(|&max_in_flight| {
                self.nb_messages.iter().map(move |&nb_messages| BenchCase {
                    nb_messages,
                    max_in_flight,
                })
            })
            .collect()
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            confirm_latency: self.confirm_latency,
            confirm_jitter: self.confirm_jitter,
            ..Default::default()
        }
    }

    pub fn send_options(&self, case: &BenchCase) -> SendOptions {
        SendOptions::default().with_max_in_flight(case.max_in_flight)
    }
}

/// Parse a comma-separated parameter list such as `1,10,100`.
pub fn parse_list<T>(raw: &str) -> BenchResult<Vec<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<T>()
                .map_err(|e| BenchError::Config(format!("invalid value {:?}: {}", s, e)))
        })
        .collect()
}
