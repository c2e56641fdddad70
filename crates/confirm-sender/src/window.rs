//! In-flight window: credit-based admission control for a session.

use crate::config::MaxInFlight;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Shared view of a window's occupancy.
#[derive(Debug, Default)]
pub struct WindowGauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl WindowGauge {
    /// Items currently emitted and unresolved.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Highest in-flight count seen so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Admission control for one session.
///
/// A bounded window hands out at most `limit` credits; an unbounded one
/// hands them out without waiting.
#[derive(Debug)]
pub struct InFlightWindow {
    credits: Option<Arc<Semaphore>>,
    gauge: Arc<WindowGauge>,
}

/// Permission to emit one item.
#[derive(Debug)]
pub struct Credit {
    _permit: Option<OwnedSemaphorePermit>,
}

/// An emitted item's slot in the window. Dropping it returns the credit.
#[derive(Debug)]
pub struct Slot {
    _credit: Credit,
    gauge: Arc<WindowGauge>,
}

impl InFlightWindow {
    pub fn new(max_in_flight: MaxInFlight) -> Self {
        Self {
            credits: max_in_flight
                .limit()
                .map(|limit| Arc::new(Semaphore::new(limit))),
            gauge: Arc::new(WindowGauge::default()),
        }
    }

    /// Wait until a credit is free.
    ///
    /// Cancel-safe: dropping the future before it completes takes nothing.
    pub async fn admit(&self) -> Credit {
        let permit = match &self.credits {
            // The semaphore is owned by this window and never closed.
            Some(credits) => credits.clone().acquire_owned().await.ok(),
            None => None,
        };
        Credit { _permit: permit }
    }

    /// Mark a credit as backing an emitted item.
    pub fn occupy(&self, credit: Credit) -> Slot {
        self.gauge.enter();
        Slot {
            _credit: credit,
            gauge: self.gauge.clone(),
        }
    }

    /// Credits currently free, or `None` when unbounded.
    pub fn available(&self) -> Option<usize> {
        self.credits.as_ref().map(|c| c.available_permits())
    }

    pub fn gauge(&self) -> Arc<WindowGauge> {
        self.gauge.clone()
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.gauge.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bounded_window_blocks_when_full() {
        let window = InFlightWindow::new(MaxInFlight::from_limit(2).unwrap());

        let a = window.occupy(window.admit().await);
        let _b = window.occupy(window.admit().await);
        assert_eq!(window.available(), Some(0));
        assert_eq!(window.gauge().in_flight(), 2);

        let blocked = tokio::time::timeout(Duration::from_millis(50), window.admit()).await;
        assert!(blocked.is_err(), "third credit must wait");

        drop(a);
        assert_eq!(window.available(), Some(1));
        let third = tokio::time::timeout(Duration::from_millis(50), window.admit()).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn test_unbounded_window_never_blocks() {
        let window = InFlightWindow::new(MaxInFlight::Unbounded);
        let slots: Vec<_> = futures_util::future::join_all((0..100).map(|_| window.admit()))
            .await
            .into_iter()
            .map(|c| window.occupy(c))
            .collect();

        assert_eq!(window.available(), None);
        assert_eq!(window.gauge().in_flight(), 100);
        drop(slots);
        assert_eq!(window.gauge().in_flight(), 0);
        assert_eq!(window.gauge().peak(), 100);
    }

    #[tokio::test]
    async fn test_unused_credit_is_returned() {
        let window = InFlightWindow::new(MaxInFlight::from_limit(1).unwrap());
        let credit = window.admit().await;
        assert_eq!(window.available(), Some(0));
        drop(credit);
        assert_eq!(window.available(), Some(1));
        assert_eq!(window.gauge().peak(), 0);
    }
}
