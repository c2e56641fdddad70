//! sender-bench: throughput of publishing with confirms.
//!
//! Every case of the `nb_messages` x `max_in_flight` matrix runs as a
//! trial against a fresh in-memory broker:
//!
//! 1. **Trial setup**: open a management connection
//! 2. **Iteration setup**: declare a queue, connect a sender, build the batch
//! 3. **Operation**: publish the whole batch and wait for the last confirm,
//!    repeated by every worker until the iteration time is up
//! 4. **Iteration teardown**: delete the queue, close the sender
//!
//! One warmup iteration precedes the measured one. Throughput is reported
//! in operations (batches) per second.

pub mod config;
pub mod error;
pub mod harness;
pub mod report;

pub use config::{BenchCase, BenchConfig, OutputFormat};
pub use error::{BenchError, BenchResult};
pub use harness::{run_case, run_matrix};
pub use report::CaseResult;
