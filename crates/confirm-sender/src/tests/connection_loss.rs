//! Connection loss: emission stops, pending items fail or drain.

use super::harness::{collect, items, ConfirmMode, MockBroker};
use crate::{DrainPolicy, FailureReason, MaxInFlight, PublishOutcome, SendOptions, Sender, SenderError};
use futures_util::stream;
use std::time::Duration;

fn bounded(limit: usize) -> SendOptions {
    SendOptions::default().with_max_in_flight(MaxInFlight::from_limit(limit).unwrap())
}

fn lost_reason(outcome: &PublishOutcome) -> Option<&str> {
    match outcome {
        PublishOutcome::Failed {
            reason: FailureReason::ConnectionLost(reason),
        } => Some(reason.as_str()),
        _ => None,
    }
}

#[tokio::test]
async fn send_failure_fails_pending_and_stops_emission() {
    let broker = MockBroker::new(ConfirmMode::Manual);
    broker.fail_at(5);
    let sender = Sender::new(broker.connection(), SendOptions::default()).unwrap();

    let collected = collect(sender.send_with_confirms(stream::iter(items("q", 10)))).await;

    assert_eq!(broker.publish_count(), 5);
    assert_eq!(collected.results.len(), 5);
    assert_eq!(collected.failed(), 5);
    assert!(collected.results.iter().all(|r| r.sequence < 5));
    assert!(collected
        .results
        .iter()
        .all(|r| lost_reason(&r.outcome).is_some()));

    match collected.terminal {
        Some(SenderError::ConnectionLost { failed, reason }) => {
            assert_eq!(failed, 5);
            assert!(reason.contains("injected failure"), "reason was {}", reason);
        }
        other => panic!("expected connection lost, got {:?}", other),
    }
}

#[tokio::test]
async fn pending_failures_are_reported_in_sequence_order() {
    let broker = MockBroker::new(ConfirmMode::Manual);
    broker.fail_at(4);
    let sender = Sender::new(broker.connection(), SendOptions::default()).unwrap();

    let collected = collect(sender.send_with_confirms(stream::iter(items("q", 8)))).await;
    assert_eq!(collected.sequences(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn severed_connection_fails_window() {
    let broker = MockBroker::new(ConfirmMode::Manual);
    let sender = Sender::new(broker.connection(), bounded(3)).unwrap();
    let session = sender.send_with_confirms(stream::iter(items("q", 10)));
    let collector = tokio::spawn(collect(session));

    assert!(broker.wait_for_waiting(3).await);
    broker.sever("broker went away");

    let collected = collector.await.unwrap();
    assert_eq!(broker.publish_count(), 3);
    assert_eq!(collected.results.len(), 3);
    assert!(collected
        .results
        .iter()
        .all(|r| lost_reason(&r.outcome) == Some("broker went away")));
    assert!(matches!(
        collected.terminal,
        Some(SenderError::ConnectionLost { failed: 3, .. })
    ));
}

#[tokio::test]
async fn acknowledged_items_survive_a_later_loss() {
    let broker = MockBroker::new(ConfirmMode::Manual);
    let sender = Sender::new(broker.connection(), bounded(3)).unwrap();
    let session = sender.send_with_confirms(stream::iter(items("q", 10)));
    let collector = tokio::spawn(collect(session));

    assert!(broker.wait_for_waiting(3).await);
    broker.confirm(0);
    assert!(broker.wait_for_publishes(4).await);
    assert!(broker.wait_for_waiting(3).await);
    broker.sever("gone");

    let collected = collector.await.unwrap();
    assert_eq!(collected.acknowledged(), 1);
    assert_eq!(collected.failed(), 3);
    assert!(matches!(
        collected.terminal,
        Some(SenderError::ConnectionLost { failed: 3, .. })
    ));
}

#[tokio::test]
async fn await_policy_drains_confirmations_after_send_failure() {
    let broker = MockBroker::new(ConfirmMode::Manual);
    broker.refuse_from(3);
    let options = SendOptions::default()
        .with_connection_lost_policy(DrainPolicy::Await { grace: None });
    let sender = Sender::new(broker.connection(), options).unwrap();
    let session = sender.send_with_confirms(stream::iter(items("q", 5)));
    let collector = tokio::spawn(collect(session));

    assert!(broker.wait_for_publishes(3).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    broker.confirm_all_reversed();

    let collected = collector.await.unwrap();
    assert_eq!(collected.acknowledged(), 3);
    assert_eq!(collected.failed(), 0);
    assert!(matches!(
        collected.terminal,
        Some(SenderError::ConnectionLost { failed: 0, .. })
    ));
}

#[tokio::test]
async fn fail_pending_policy_ignores_late_confirmations() {
    let broker = MockBroker::new(ConfirmMode::Manual);
    broker.refuse_from(3);
    let sender = Sender::new(broker.connection(), SendOptions::default()).unwrap();

    let collected = collect(sender.send_with_confirms(stream::iter(items("q", 5)))).await;

    assert_eq!(collected.failed(), 3);
    assert!(matches!(
        collected.terminal,
        Some(SenderError::ConnectionLost { failed: 3, .. })
    ));

    // The broker still holds the confirmations; resolving them now is harmless.
    assert_eq!(broker.confirm_all_reversed(), 3);
}

#[tokio::test]
async fn await_policy_grace_period_expires() {
    let broker = MockBroker::new(ConfirmMode::Manual);
    broker.refuse_from(3);
    let options = SendOptions::default().with_connection_lost_policy(DrainPolicy::Await {
        grace: Some(Duration::from_millis(50)),
    });
    let sender = Sender::new(broker.connection(), options).unwrap();

    let collected = collect(sender.send_with_confirms(stream::iter(items("q", 5)))).await;

    assert_eq!(collected.failed(), 3);
    assert!(matches!(
        collected.terminal,
        Some(SenderError::ConnectionLost { failed: 3, .. })
    ));
}

#[tokio::test]
async fn closed_connection_emits_nothing() {
    let broker = MockBroker::new(ConfirmMode::Immediate);
    broker.sever("down before start");
    let sender = Sender::new(broker.connection(), SendOptions::default()).unwrap();

    let collected = collect(sender.send_with_confirms(stream::iter(items("q", 3)))).await;

    assert!(collected.results.is_empty());
    assert!(matches!(
        collected.terminal,
        Some(SenderError::ConnectionLost { failed: 0, .. })
    ));
}

#[tokio::test]
async fn send_all_surfaces_connection_loss() {
    let broker = MockBroker::new(ConfirmMode::Immediate);
    broker.fail_at(2);
    let sender = Sender::new(broker.connection(), SendOptions::default()).unwrap();

    let err = sender.send_all(items("q", 6)).await.unwrap_err();
    assert!(matches!(err, SenderError::ConnectionLost { .. }));
    assert_eq!(broker.publish_count(), 2);
}
