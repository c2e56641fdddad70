//! sender-bench binary entry point.
//!
//! Usage: sender-bench [--nb-messages 1,10,100,1000] [--max-in-flight 1,256,unbounded]

use clap::Parser;
use sender_bench::config::{parse_list, DEFAULT_MAX_IN_FLIGHT, DEFAULT_NB_MESSAGES};
use sender_bench::report::{render_json, render_table};
use sender_bench::{BenchConfig, OutputFormat};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// Throughput of publishing with confirms under an in-flight limit.
#[derive(Parser, Debug)]
#[command(name = "sender-bench")]
#[command(about = "Measure publish-with-confirms throughput across batch sizes and in-flight limits")]
struct Args {
    /// Batch sizes, comma separated
    #[arg(long, env = "BENCH_NB_MESSAGES", default_value = DEFAULT_NB_MESSAGES)]
    nb_messages: String,

    /// In-flight limits, comma separated ("unbounded" for no limit)
    #[arg(long, env = "BENCH_MAX_IN_FLIGHT", default_value = DEFAULT_MAX_IN_FLIGHT)]
    max_in_flight: String,

    /// Warmup iteration length in seconds
    #[arg(long, env = "BENCH_WARMUP_SECS", default_value = "5")]
    warmup_secs: u64,

    /// Measured iteration length in seconds
    #[arg(long, env = "BENCH_MEASUREMENT_SECS", default_value = "5")]
    measurement_secs: u64,

    /// Concurrent workers per case
    #[arg(long, env = "BENCH_THREADS", default_value = "2")]
    threads: usize,

    /// Message payload size in bytes
    #[arg(long, env = "BENCH_PAYLOAD_BYTES", default_value = "0")]
    payload_bytes: usize,

    /// Simulated broker confirm latency in microseconds
    #[arg(long, env = "BENCH_CONFIRM_LATENCY_US", default_value = "0")]
    confirm_latency_us: u64,

    /// Random extra confirm delay, up to this many microseconds
    #[arg(long, env = "BENCH_CONFIRM_JITTER_US", default_value = "0")]
    confirm_jitter_us: u64,

    /// Output format (table, json)
    #[arg(long, default_value = "table")]
    format: String,

    /// Write JSONL logs to this file instead of stderr
    #[arg(long, env = "BENCH_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> anyhow::Result<BenchConfig> {
        let config = BenchConfig {
            nb_messages: parse_list(&self.nb_messages)?,
            max_in_flight: parse_list(&self.max_in_flight)?,
            warmup: Duration::from_secs(self.warmup_secs),
            measurement: Duration::from_secs(self.measurement_secs),
            threads: self.threads,
            payload_size: self.payload_bytes,
            confirm_latency: Duration::from_micros(self.confirm_latency_us),
            confirm_jitter: Duration::from_micros(self.confirm_jitter_us),
            format: self.format.parse::<OutputFormat>()?,
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    observability::init_with_config(observability::LogConfig {
        service_name: "sender-bench".into(),
        default_level: args.log_level.clone(),
        log_path: args.log_file.clone(),
        ..Default::default()
    });

    let config = args.into_config()?;
    info!(
        nb_messages = ?config.nb_messages,
        max_in_flight = ?config.max_in_flight.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
        threads = config.threads,
        warmup_secs = config.warmup.as_secs(),
        measurement_secs = config.measurement.as_secs(),
        "Configuration loaded"
    );

    let results = tokio::select! {
        results = sender_bench::run_matrix(&config) => match results {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "Benchmark failed");
                return Err(e.into());
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, exiting...");
            return Ok(());
        }
    };

    let rendered = match config.format {
        OutputFormat::Table => render_table(&results),
        OutputFormat::Json => render_json(&results)?,
    };
    print!("{}", rendered);

    Ok(())
}
