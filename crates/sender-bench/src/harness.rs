//! Trial and iteration lifecycle for one benchmark case.

use crate::config::{BenchCase, BenchConfig};
use crate::error::BenchResult;
use crate::report::CaseResult;
use confirm_sender::{
    Connection, DestinationId, MemoryBroker, MemoryConnection, OutboundItem, Sender, Transport,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Totals of one timed iteration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IterationStats {
    pub ops: u64,
    pub messages: u64,
    pub peak_in_flight: usize,
}

impl IterationStats {
    fn merge(&mut self, other: IterationStats) {
        self.ops += other.ops;
        self.messages += other.messages;
        self.peak_in_flight = self.peak_in_flight.max(other.peak_in_flight);
    }
}

/// State shared by all iterations of one case.
struct Trial {
    broker: MemoryBroker,
    /// Management connection, used for queue declare and delete only
    admin: MemoryConnection,
}

impl Trial {
    async fn setup(config: &BenchConfig) -> BenchResult<Self> {
        let broker = MemoryBroker::new(config.broker_config());
        let admin = broker.connect().await?;
        Ok(Self { broker, admin })
    }

    async fn teardown(self) -> BenchResult<()> {
        self.admin.close().await?;
        Ok(())
    }

    /// Declare a queue, connect a sender, run workers for `duration`, and
    /// tear both down again.
    async fn iteration(&self, config: &BenchConfig, case: BenchCase, duration: Duration) -> BenchResult<(IterationStats, Duration)> {
        let queue = self.admin.declare_destination().await?;
        let sender = Arc::new(Sender::connect(&self.broker, config.send_options(&case)).await?);
        let batch = Arc::new(build_batch(&queue, case.nb_messages, config.payload_size));

        let started = Instant::now();
        let deadline = started + duration;
        let outcome = run_workers(&sender, &batch, config.threads, deadline).await;
        let elapsed = started.elapsed();

        let stats = self.finish(&queue, &sender, outcome).await?;
        Ok((stats, elapsed))
    }

    /// Delete the queue and close the sender whatever the workers did.
    /// A worker error wins over a teardown error.
    async fn finish(
        &self,
        queue: &DestinationId,
        sender: &Sender<MemoryConnection>,
        outcome: BenchResult<IterationStats>,
    ) -> BenchResult<IterationStats> {
        let deleted = self.admin.delete_destination(queue).await;
        let closed = sender.close().await;

        let stats = outcome?;
        deleted?;
        closed?;
        Ok(stats)
    }
}

fn build_batch(queue: &DestinationId, count: usize, payload_size: usize) -> Vec<OutboundItem> {
    let payload = vec![0u8; payload_size];
    (0..count)
        .map(|_| OutboundItem::new(queue.clone(), payload.clone()))
        .collect()
}

/// Run `threads` workers against one sender until `deadline`.
///
/// Each worker repeats the operation: publish the whole batch and wait
/// for its last confirmation.
async fn run_workers(
    sender: &Arc<Sender<MemoryConnection>>,
    batch: &Arc<Vec<OutboundItem>>,
    threads: usize,
    deadline: Instant,
) -> BenchResult<IterationStats> {
    let workers: Vec<_> = (0..threads)
        .map(|worker| {
            let sender = sender.clone();
            let batch = batch.clone();
            tokio::spawn(async move {
                let mut stats = IterationStats::default();
                while Instant::now() < deadline {
                    let items = batch.clone();
                    let report = sender
                        .send_all((0..items.len()).map(move |i| items[i].clone()))
                        .await?;
                    stats.ops += 1;
                    stats.messages += report.total() as u64;
                    stats.peak_in_flight = stats.peak_in_flight.max(report.peak_in_flight);
                }
                debug!(worker, ops = stats.ops, "Worker finished");
                BenchResult::Ok(stats)
            })
        })
        .collect();

    let mut total = IterationStats::default();
    for worker in workers {
        total.merge(worker.await??);
    }
    Ok(total)
}

/// Run one case: a warmup iteration, then the measured one.
pub async fn run_case(config: &BenchConfig, case: BenchCase) -> BenchResult<CaseResult> {
    let trial = Trial::setup(config).await?;

    if !config.warmup.is_zero() {
        let (warmup, _) = trial.iteration(config, case, config.warmup).await?;
        debug!(%case, ops = warmup.ops, "Warmup iteration complete");
    }

    let (stats, elapsed) = trial.iteration(config, case, config.measurement).await?;
    trial.teardown().await?;

    let result = CaseResult::new(case, stats.ops, stats.messages, elapsed, stats.peak_in_flight);
    info!(
        %case,
        ops = result.ops,
        ops_per_sec = result.ops_per_sec,
        peak_in_flight = result.peak_in_flight,
        "Case measured"
    );
    Ok(result)
}

/// Run every case of the matrix in order.
pub async fn run_matrix(config: &BenchConfig) -> BenchResult<Vec<CaseResult>> {
    config.validate()?;

    let cases = config.cases();
    info!(cases = cases.len(), threads = config.threads, "Starting benchmark");

    let mut results = Vec::with_capacity(cases.len());
    for case in cases {
        results.push(run_case(config, case).await?);
    }
    Ok(results)
}
