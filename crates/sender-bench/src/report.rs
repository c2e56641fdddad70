//! Result rendering.

use crate::config::BenchCase;
use crate::error::BenchResult;
use confirm_sender::MaxInFlight;
use serde::Serialize;
use std::fmt::Write;
use std::time::Duration;

/// Measured throughput of one case.
#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub nb_messages: usize,
    pub max_in_flight: MaxInFlight,
    /// Completed batches in the measured iteration
    pub ops: u64,
    pub elapsed_ms: u64,
    pub ops_per_sec: f64,
    pub msgs_per_sec: f64,
    /// Highest in-flight count any batch reached
    pub peak_in_flight: usize,
}

impl CaseResult {
    pub fn new(case: BenchCase, ops: u64, messages: u64, elapsed: Duration, peak_in_flight: usize) -> Self {
        let secs = elapsed.as_secs_f64();
        let rate = |count: u64| if secs > 0.0 { count as f64 / secs } else { 0.0 };

        Self {
            nb_messages: case.nb_messages,
            max_in_flight: case.max_in_flight,
            ops,
            elapsed_ms: elapsed.as_millis() as u64,
            ops_per_sec: rate(ops),
            msgs_per_sec: rate(messages),
            peak_in_flight,
        }
    }
}

const HEADERS: [&str; 5] = ["max_in_flight", "nb_messages", "ops/s", "msgs/s", "peak"];

/// Aligned text table, one row per case.
pub fn render_table(results: &[CaseResult]) -> String {
    let rows: Vec<[String; 5]> = results
        .iter()
        .map(|r| {
            [
                r.max_in_flight.to_string(),
                r.nb_messages.to_string(),
                format!("{:.1}", r.ops_per_sec),
                format!("{:.1}", r.msgs_per_sec),
                r.peak_in_flight.to_string(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let header = HEADERS.map(String::from);
    let mut out = String::new();
    for row in std::iter::once(&header).chain(&rows) {
        let cells: Vec<String> = row
            .iter()
            .zip(widths)
            .enumerate()
            .map(|(i, (cell, width))| {
                if i < 2 {
                    format!("{:<width$}", cell, width = width)
                } else {
                    format!("{:>width$}", cell, width = width)
                }
            })
            .collect();
        let _ = writeln!(out, "{}", cells.join("  ").trim_end());
    }
    out
}

/// One JSON object per line.
pub fn render_json(results: &[CaseResult]) -> BenchResult<String> {
    let mut out = String::new();
    for result in results {
        out.push_str(&serde_json::to_string(result)?);
        out.push('\n');
    }
    Ok(out)
}
