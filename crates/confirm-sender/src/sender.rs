//! Publisher with confirms and a bounded in-flight window.

use crate::config::{DrainPolicy, SendOptions};
use crate::error::{SenderError, SenderResult};
use crate::message::{FailureReason, OutboundItem, OutboundResult, PublishOutcome};
use crate::transport::{Confirmation, Connection, Transport};
use crate::window::{Credit, InFlightWindow, Slot, WindowGauge};
use futures_util::stream::{FuturesUnordered, Stream, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Publishes items over one owned connection and reports a confirmed
/// outcome for every item it emits.
///
/// Sessions started on the same sender run one at a time.
pub struct Sender<C: Connection> {
    connection: Arc<C>,
    options: SendOptions,
    session_lock: Arc<Mutex<()>>,
    closed: AtomicBool,
}

impl<C: Connection + 'static> Sender<C> {
    /// Open a connection on `transport` and wrap it in a sender.
    pub async fn connect<T>(transport: &T, options: SendOptions) -> SenderResult<Self>
    where
        T: Transport<Connection = C>,
    {
        options.validate()?;
        let connection = transport.connect().await?;
        info!(max_in_flight = %options.max_in_flight, "Sender connected");
        Ok(Self::from_parts(connection, options))
    }

    /// Wrap an already open connection.
    pub fn new(connection: C, options: SendOptions) -> SenderResult<Self> {
        options.validate()?;
        Ok(Self::from_parts(connection, options))
    }

    fn from_parts(connection: C, options: SendOptions) -> Self {
        Self {
            connection: Arc::new(connection),
            options,
            session_lock: Arc::new(Mutex::new(())),
            closed: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &SendOptions {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Publish every item of `source`, yielding outcomes as confirmations
    /// arrive.
    ///
    /// Must be called from within a tokio runtime.
    pub fn send_with_confirms<S>(&self, source: S) -> ConfirmStream
    where
        S: Stream<Item = OutboundItem> + Send + 'static,
    {
        self.send_with_confirms_until(source, CancellationToken::new())
    }

    /// Like [`send_with_confirms`](Self::send_with_confirms), stopping
    /// emission as soon as `cancel` fires.
    pub fn send_with_confirms_until<S>(&self, source: S, cancel: CancellationToken) -> ConfirmStream
    where
        S: Stream<Item = OutboundItem> + Send + 'static,
    {
        // The timeout also covers time spent queued behind another session.
        let deadline = self
            .options
            .session_timeout
            .map(|timeout| tokio::time::Instant::now() + timeout);
        let (tx, rx) = mpsc::channel(self.options.outcome_buffer);
        let window = InFlightWindow::new(self.options.max_in_flight);
        let gauge = window.gauge();

        if self.is_closed() {
            // Capacity is at least one and nothing else has sent yet.
            let _ = tx.try_send(Err(SenderError::Closed));
            return ConfirmStream { rx, gauge };
        }

        let session = Session {
            connection: self.connection.clone(),
            options: self.options.clone(),
            window,
            pending: PendingSet::default(),
            tx,
            cancel,
            deadline,
            abandoned: 0,
        };
        let session_lock = self.session_lock.clone();

        tokio::spawn(async move {
            let _guard = tokio::select! {
                guard = session_lock.lock_owned() => guard,
                _ = session.cancel.cancelled() => {
                    debug!("Session cancelled while waiting for the connection");
                    let _ = session.tx.send(Err(SenderError::Cancelled { failed: 0 })).await;
                    return;
                }
                _ = sleep_until_or_forever(session.deadline) => {
                    debug!("Session timed out while waiting for the connection");
                    let _ = session.tx.send(Err(SenderError::Cancelled { failed: 0 })).await;
                    return;
                }
            };
            session.run(source).await;
        });

        ConfirmStream { rx, gauge }
    }

    /// Publish `items` and wait for the last confirmation.
    ///
    /// A connection loss or cancellation is returned as an error after the
    /// affected items have been accounted for.
    pub async fn send_all<I>(&self, items: I) -> SenderResult<PublishReport>
    where
        I: IntoIterator<Item = OutboundItem>,
        I::IntoIter: Send + 'static,
    {
        let started = Instant::now();
        let mut stream = self.send_with_confirms(futures_util::stream::iter(items));
        let mut report = PublishReport::default();

        while let Some(result) = stream.next().await {
            report.record(&result?.outcome);
        }

        report.peak_in_flight = stream.peak_in_flight();
        report.elapsed = started.elapsed();
        Ok(report)
    }

    /// Close the underlying connection. Closing twice is a no-op.
    pub async fn close(&self) -> SenderResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.connection.close().await?;
        info!("Sender closed");
        Ok(())
    }
}

/// Outcomes of one publishing session, in confirmation order.
///
/// Ends after the last outcome; a fatal stop is reported as a final `Err`.
#[derive(Debug)]
pub struct ConfirmStream {
    rx: mpsc::Receiver<SenderResult<OutboundResult>>,
    gauge: Arc<WindowGauge>,
}

impl ConfirmStream {
    /// Items currently emitted and unresolved.
    pub fn in_flight(&self) -> usize {
        self.gauge.in_flight()
    }

    /// Highest number of unresolved items observed in this session.
    pub fn peak_in_flight(&self) -> usize {
        self.gauge.peak()
    }
}

impl Stream for ConfirmStream {
    type Item = SenderResult<OutboundResult>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Tally of a completed session.
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    pub acknowledged: usize,
    pub rejected: usize,
    pub failed: usize,
    pub peak_in_flight: usize,
    pub elapsed: Duration,
}

impl PublishReport {
    fn record(&mut self, outcome: &PublishOutcome) {
        match outcome {
            PublishOutcome::Acknowledged => self.acknowledged += 1,
            PublishOutcome::Rejected { .. } => self.rejected += 1,
            PublishOutcome::Failed { .. } => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.acknowledged + self.rejected + self.failed
    }
}

/// Emitted items waiting for a confirmation, keyed by sequence.
///
/// Each entry holds its window slot, so removing it returns the credit.
#[derive(Debug, Default)]
pub(crate) struct PendingSet {
    entries: HashMap<u64, (OutboundItem, Slot)>,
}

impl PendingSet {
    fn insert(&mut self, sequence: u64, item: OutboundItem, slot: Slot) {
        self.entries.insert(sequence, (item, slot));
    }

    fn remove(&mut self, sequence: u64) -> Option<(OutboundItem, Slot)> {
        self.entries.remove(&sequence)
    }

    /// Remove every entry, lowest sequence first.
    fn drain(&mut self) -> Vec<(u64, OutboundItem, Slot)> {
        let mut drained: Vec<_> = self
            .entries
            .drain()
            .map(|(sequence, (item, slot))| (sequence, item, slot))
            .collect();
        drained.sort_by_key(|(sequence, _, _)| *sequence);
        drained
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Why a session stopped before draining its source.
#[derive(Debug)]
enum Stop {
    ConnectionLost(String),
    Cancelled,
    TimedOut,
    /// The caller dropped the outcome stream.
    Detached,
}

/// What happened to one confirmation.
enum Resolved {
    Reported,
    ConnectionLost(String),
    Detached,
}

struct Session<C: Connection> {
    connection: Arc<C>,
    options: SendOptions,
    window: InFlightWindow,
    pending: PendingSet,
    tx: mpsc::Sender<SenderResult<OutboundResult>>,
    cancel: CancellationToken,
    deadline: Option<tokio::time::Instant>,
    /// Items failed because of a connection loss or cancellation
    abandoned: usize,
}

impl<C: Connection + 'static> Session<C> {
    async fn run<S>(mut self, source: S)
    where
        S: Stream<Item = OutboundItem> + Send,
    {
        let started = Instant::now();
        let source = source.fuse();
        tokio::pin!(source);

        let timeout = sleep_until_or_forever(self.deadline);
        tokio::pin!(timeout);

        let mut confirmations = FuturesUnordered::new();
        let mut next_sequence: u64 = 0;
        let mut emitted: u64 = 0;
        let mut exhausted = false;

        debug!(max_in_flight = %self.options.max_in_flight, "Session started");

        let stop = loop {
            if exhausted && self.pending.is_empty() {
                break None;
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break Some(Stop::Cancelled),
                _ = &mut timeout => break Some(Stop::TimedOut),
                _ = self.tx.closed() => break Some(Stop::Detached),

                Some((sequence, confirmation)) = confirmations.next(), if !confirmations.is_empty() => {
                    match self.resolve(sequence, confirmation).await {
                        Resolved::Reported => {}
                        Resolved::ConnectionLost(reason) => break Some(Stop::ConnectionLost(reason)),
                        Resolved::Detached => break Some(Stop::Detached),
                    }
                }

                admitted = next_admitted(&self.window, &mut source), if !exhausted => {
                    let Some((credit, item)) = admitted else {
                        exhausted = true;
                        debug!(items = next_sequence, "Source exhausted");
                        continue;
                    };

                    let sequence = next_sequence;
                    next_sequence += 1;

                    if let Err(e) = item.validate() {
                        drop(credit);
                        warn!(sequence, error = %e, "Skipping malformed item");
                        let outcome = PublishOutcome::failed(FailureReason::Malformed(e.to_string()));
                        if !self.report(sequence, item, outcome).await {
                            break Some(Stop::Detached);
                        }
                        continue;
                    }

                    match self.connection.send(&item) {
                        Ok(handle) => {
                            let slot = self.window.occupy(credit);
                            self.pending.insert(sequence, item, slot);
                            confirmations.push(async move { (sequence, handle.await) });
                            emitted += 1;
                            trace!(sequence, in_flight = self.pending.len(), "Item emitted");
                        }
                        Err(e) => {
                            warn!(sequence, error = %e, "Send failed, stopping emission");
                            break Some(Stop::ConnectionLost(e.to_string()));
                        }
                    }
                }
            }
        };

        let stop = match stop {
            None => {
                info!(
                    items = next_sequence,
                    peak_in_flight = self.window.gauge().peak(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Session complete"
                );
                return;
            }
            Some(Stop::Detached) => {
                debug!(
                    pending = self.pending.len(),
                    "Outcome stream dropped, abandoning session"
                );
                return;
            }
            Some(stop) => stop,
        };

        let (policy, reason) = match &stop {
            Stop::ConnectionLost(reason) => (
                self.options.on_connection_lost,
                FailureReason::ConnectionLost(reason.clone()),
            ),
            _ => (self.options.on_cancel, FailureReason::Cancelled),
        };

        warn!(
            ?stop,
            pending = self.pending.len(),
            pulled = next_sequence,
            emitted,
            "Session stopped early"
        );

        if let DrainPolicy::Await { grace } = policy {
            if !self.drain(&mut confirmations, grace).await {
                return;
            }
        }
        drop(confirmations);

        for (sequence, item, slot) in self.pending.drain() {
            let delivered = self
                .report(sequence, item, PublishOutcome::failed(reason.clone()))
                .await;
            drop(slot);
            if !delivered {
                return;
            }
        }

        let error = match stop {
            Stop::ConnectionLost(reason) => SenderError::ConnectionLost {
                reason,
                failed: self.abandoned,
            },
            _ => SenderError::Cancelled {
                failed: self.abandoned,
            },
        };
        let _ = self.tx.send(Err(error)).await;
    }

    /// Service outstanding confirmations, for at most `grace` if set.
    ///
    /// Returns false if the caller went away.
    async fn drain<F>(&mut self, confirmations: &mut FuturesUnordered<F>, grace: Option<Duration>) -> bool
    where
        F: Future<Output = (u64, Confirmation)>,
    {
        let deadline = grace.map(|grace| tokio::time::Instant::now() + grace);
        let deadline = sleep_until_or_forever(deadline);
        tokio::pin!(deadline);

        while !confirmations.is_empty() {
            tokio::select! {
                _ = &mut deadline => {
                    debug!(pending = self.pending.len(), "Drain grace period elapsed");
                    break;
                }
                Some((sequence, confirmation)) = confirmations.next() => {
                    if let Resolved::Detached = self.resolve(sequence, confirmation).await {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Turn a confirmation into an outcome and free its slot.
    async fn resolve(&mut self, sequence: u64, confirmation: Confirmation) -> Resolved {
        let Some((item, slot)) = self.pending.remove(sequence) else {
            return Resolved::Reported;
        };

        let (outcome, lost) = match confirmation {
            Confirmation::Ack => (PublishOutcome::Acknowledged, None),
            Confirmation::Nack { reason } => {
                debug!(sequence, reason = ?reason, "Item rejected by broker");
                (PublishOutcome::Rejected { reason }, None)
            }
            Confirmation::Lost { reason } => (
                PublishOutcome::failed(FailureReason::ConnectionLost(reason.clone())),
                Some(reason),
            ),
        };

        let delivered = self.report(sequence, item, outcome).await;
        drop(slot);

        match (delivered, lost) {
            (false, _) => Resolved::Detached,
            (true, Some(reason)) => Resolved::ConnectionLost(reason),
            (true, None) => Resolved::Reported,
        }
    }

    /// Hand an outcome to the caller. Returns false if nobody is listening.
    async fn report(&mut self, sequence: u64, item: OutboundItem, outcome: PublishOutcome) -> bool {
        if let PublishOutcome::Failed {
            reason: FailureReason::ConnectionLost(_) | FailureReason::Cancelled,
        } = &outcome
        {
            self.abandoned += 1;
        }

        self.tx
            .send(Ok(OutboundResult {
                sequence,
                item,
                outcome,
            }))
            .await
            .is_ok()
    }
}

/// Take a credit, then pull the next item. Nothing is pulled while the
/// window is full.
async fn next_admitted<St>(window: &InFlightWindow, source: &mut St) -> Option<(Credit, OutboundItem)>
where
    St: Stream<Item = OutboundItem> + Unpin,
{
    let credit = window.admit().await;
    let item = source.next().await?;
    Some((credit, item))
}

async fn sleep_until_or_forever(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
