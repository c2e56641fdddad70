//! Behaviour tests for the sender.
//!
//! - `harness.rs`          - mock broker with test-driven confirmations
//! - `admission.rs`        - window bound, unbounded emission, no eager pull
//! - `outcomes.rs`         - one outcome per item, rejections, malformed items
//! - `connection_loss.rs`  - fail-stop on connection loss, drain policies
//! - `cancellation.rs`     - external cancel, session timeout, dropped stream
//! - `sessions.rs`         - sender lifecycle and session exclusivity
//! - `memory_broker.rs`    - sender against the in-memory broker

mod connection_loss;
