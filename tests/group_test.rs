//! Task group behaviour under a gated fetcher

mod common;

use batchloader::downloader::{GroupOptions, GroupPhase, SpeedTier, TaskGroup, TierLimits};
use batchloader::queue::{EventBus, GroupEventKind};
use batchloader::TransferError;
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test]
async fn test_concurrency_capped_at_low_tier() {
    let bus = EventBus::new();
    let fetcher = GatedFetcher::gated(200);
    let outcomes = Outcomes::new();
    let group = group(5, &fetcher, &bus, None, &outcomes);

    group.start().await;
    wait_until("four transfers", || fetcher.calls() == 4).await;

    // The fifth must wait for a free slot
    sleep(Duration::from_millis(50)).await;
    assert_eq!(fetcher.calls(), 4);
    assert_eq!(group.executing().await, 4);

    fetcher.release(1);
    wait_until("fifth transfer", || fetcher.calls() == 5).await;

    fetcher.release(4);
    wait_until("all tasks done", || outcomes.ok() == 5).await;
    wait_for_phase(&group, GroupPhase::Completed).await;
    assert_eq!(fetcher.peak(), 4);
    assert_eq!(group.remaining(), 0);
}

#[tokio::test]
async fn test_completed_fires_once() {
    let bus = EventBus::new();
    let fetcher = GatedFetcher::open(200);
    let outcomes = Outcomes::new();
    let recorder = EventRecorder::new();
    let mut rx = bus.watch();
    let group = group(3, &fetcher, &bus, Some(recorder.clone()), &outcomes);

    group.start().await;
    wait_for_event(&mut rx, group.id(), GroupEventKind::Completed).await;

    // Starting a finished group changes nothing
    group.start().await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(outcomes.ok(), 3);
    assert_eq!(
        recorder.kinds_for(group.id()),
        vec![GroupEventKind::Started, GroupEventKind::Completed]
    );
    assert!(group.has_completed());
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let bus = EventBus::new();
    let fetcher = GatedFetcher::gated(200);
    let outcomes = Outcomes::new();
    let recorder = EventRecorder::new();
    let group = group(6, &fetcher, &bus, Some(recorder.clone()), &outcomes);

    group.start().await;
    group.start().await;
    wait_until("four transfers", || fetcher.calls() == 4).await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(fetcher.calls(), 4);
    assert_eq!(recorder.count(group.id(), GroupEventKind::Started), 1);

    fetcher.release(6);
    wait_until("all tasks done", || outcomes.ok() == 6).await;
}

#[tokio::test]
async fn test_stop_lets_in_flight_drain() {
    let bus = EventBus::new();
    let fetcher = GatedFetcher::gated(200);
    let outcomes = Outcomes::new();
    let recorder = EventRecorder::new();
    let group = group(5, &fetcher, &bus, Some(recorder.clone()), &outcomes);

    group.start().await;
    wait_until("four transfers", || fetcher.calls() == 4).await;

    group.stop().await;
    group.stop().await;
    assert_eq!(group.phase().await, GroupPhase::Stopped);

    fetcher.release(4);
    wait_until("in-flight tasks done", || outcomes.ok() == 4).await;
    sleep(Duration::from_millis(50)).await;

    // Nothing new was dispatched, and a stopped group stays stopped
    assert_eq!(fetcher.calls(), 4);
    assert_eq!(group.remaining(), 1);
    group.start().await;
    assert!(!group.is_running().await);
    assert!(!group.has_completed());
    assert_eq!(recorder.count(group.id(), GroupEventKind::Stopped), 1);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let bus = EventBus::new();
    let fetcher = GatedFetcher::gated(200);
    let outcomes = Outcomes::new();
    let recorder = EventRecorder::new();
    let group = group(5, &fetcher, &bus, Some(recorder.clone()), &outcomes);

    group.start().await;
    wait_until("four transfers", || fetcher.calls() == 4).await;
    group.pause().await;
    assert_eq!(group.phase().await, GroupPhase::Paused);

    fetcher.release(4);
    wait_until("in-flight tasks done", || outcomes.ok() == 4).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(fetcher.calls(), 4);

    group.start().await;
    wait_until("last transfer", || fetcher.calls() == 5).await;
    fetcher.release(1);
    wait_for_phase(&group, GroupPhase::Completed).await;

    wait_until("completed delivered", || {
        recorder.count(group.id(), GroupEventKind::Completed) == 1
    })
    .await;
    assert_eq!(
        recorder.kinds_for(group.id()),
        vec![
            GroupEventKind::Started,
            GroupEventKind::Paused,
            GroupEventKind::Started,
            GroupEventKind::Completed,
        ]
    );
}

#[tokio::test]
async fn test_boost_dispatches_immediately() {
    let bus = EventBus::new();
    let fetcher = GatedFetcher::gated(200);
    let outcomes = Outcomes::new();
    let group = group(10, &fetcher, &bus, None, &outcomes);

    group.start().await;
    wait_until("low tier saturated", || fetcher.calls() == 4).await;

    group.boost().await;
    wait_until("high tier saturated", || fetcher.calls() == 8).await;
    assert_eq!(group.executing().await, 8);

    fetcher.release(10);
    wait_until("all tasks done", || outcomes.ok() == 10).await;
    assert_eq!(fetcher.peak(), 8);
}

#[tokio::test]
async fn test_throttle_does_not_preempt() {
    let bus = EventBus::new();
    let fetcher = GatedFetcher::gated(200);
    let outcomes = Outcomes::new();
    let group = TaskGroup::new(
        None,
        tasks(10, &outcomes),
        fetcher.clone(),
        bus.clone(),
        GroupOptions {
            tier: SpeedTier::High,
            ..Default::default()
        },
    );

    group.start().await;
    wait_until("high tier saturated", || fetcher.calls() == 8).await;

    group.throttle().await;
    assert_eq!(group.concurrency_limit().await, 4);
    assert_eq!(fetcher.in_flight(), 8);

    // Finishing one leaves 7 running, still above the new cap
    fetcher.release(1);
    wait_until("one done", || outcomes.ok() == 1).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(fetcher.calls(), 8);
    assert_eq!(group.executing().await, 7);

    fetcher.release(9);
    wait_until("all tasks done", || outcomes.ok() == 10).await;
}

#[tokio::test]
async fn test_custom_limits() {
    let bus = EventBus::new();
    let fetcher = GatedFetcher::gated(200);
    let outcomes = Outcomes::new();
    let group = TaskGroup::new(
        None,
        tasks(4, &outcomes),
        fetcher.clone(),
        bus.clone(),
        GroupOptions {
            limits: TierLimits::new(1, 2),
            ..Default::default()
        },
    );

    group.start().await;
    wait_until("one transfer", || fetcher.calls() == 1).await;
    sleep(Duration::from_millis(20)).await;
    assert_eq!(fetcher.calls(), 1);

    fetcher.release(4);
    wait_until("all tasks done", || outcomes.ok() == 4).await;
    assert_eq!(fetcher.peak(), 1);
}

#[tokio::test]
async fn test_failed_transfers_still_complete_group() {
    let bus = EventBus::new();
    let fetcher = GatedFetcher::open(404);
    let outcomes = Outcomes::new();
    let mut rx = bus.watch();
    let group = group(3, &fetcher, &bus, None, &outcomes);

    group.start().await;
    wait_for_event(&mut rx, group.id(), GroupEventKind::Completed).await;

    let failures = outcomes.failures();
    assert_eq!(failures.len(), 3);
    assert!(failures
        .iter()
        .all(|e| *e == TransferError::InvalidResponse { status: 404 }));
    assert!(group
        .tasks()
        .iter()
        .all(|t| matches!(t.error(), Some(TransferError::InvalidResponse { status: 404 }))));
}

#[tokio::test]
async fn test_cancel_all_finishes_every_task() {
    let bus = EventBus::new();
    let fetcher = GatedFetcher::gated(200);
    let outcomes = Outcomes::new();
    let mut rx = bus.watch();
    let group = group(6, &fetcher, &bus, None, &outcomes);

    group.start().await;
    wait_until("four transfers", || fetcher.calls() == 4).await;

    group.cancel_all().await;
    wait_for_event(&mut rx, group.id(), GroupEventKind::Completed).await;

    // Pending tasks never reached the fetcher
    assert_eq!(fetcher.calls(), 4);
    assert_eq!(fetcher.in_flight(), 0);
    let failures = outcomes.failures();
    assert_eq!(failures.len(), 6);
    assert!(failures.iter().all(TransferError::is_cancelled));
}

#[tokio::test]
async fn test_cancel_all_before_start_reports_every_task() {
    let bus = EventBus::new();
    let fetcher = GatedFetcher::gated(200);
    let outcomes = Outcomes::new();
    let recorder = EventRecorder::new();
    let group = group(5, &fetcher, &bus, Some(recorder.clone()), &outcomes);

    group.cancel_all().await;

    // Every callback has fired by the time cancel_all returns
    let failures = outcomes.failures();
    assert_eq!(failures.len(), 5);
    assert!(failures.iter().all(TransferError::is_cancelled));
    assert!(group.tasks().iter().all(|t| t.is_finished()));
    assert_eq!(group.remaining(), 0);

    // Completion waits for a start, and nothing is fetched
    sleep(Duration::from_millis(20)).await;
    assert!(recorder.kinds_for(group.id()).is_empty());
    group.start().await;
    wait_for_phase(&group, GroupPhase::Completed).await;
    assert_eq!(fetcher.calls(), 0);
    wait_until("completed delivered", || {
        recorder.count(group.id(), GroupEventKind::Completed) == 1
    })
    .await;
    assert_eq!(
        recorder.kinds_for(group.id()),
        vec![GroupEventKind::Started, GroupEventKind::Completed]
    );
}

#[tokio::test]
async fn test_transfer_timeout() {
    let bus = EventBus::new();
    let fetcher = GatedFetcher::gated(200);
    let outcomes = Outcomes::new();
    let mut rx = bus.watch();
    let group = TaskGroup::new(
        None,
        tasks(2, &outcomes),
        fetcher.clone(),
        bus.clone(),
        GroupOptions {
            transfer_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        },
    );

    group.start().await;
    wait_for_event(&mut rx, group.id(), GroupEventKind::Completed).await;

    let failures = outcomes.failures();
    assert_eq!(failures.len(), 2);
    assert!(failures
        .iter()
        .all(|e| matches!(e, TransferError::TimedOut(_))));
}

#[tokio::test]
async fn test_delegate_sees_events_before_watchers() {
    let bus = EventBus::new();
    let fetcher = GatedFetcher::open(200);
    let outcomes = Outcomes::new();
    let recorder = EventRecorder::new();
    let mut rx = bus.watch();
    let group = group(1, &fetcher, &bus, Some(Arc::clone(&recorder)), &outcomes);

    group.start().await;
    wait_for_event(&mut rx, group.id(), GroupEventKind::Started).await;
    assert_eq!(recorder.kinds_for(group.id()), vec![GroupEventKind::Started]);

    wait_for_event(&mut rx, group.id(), GroupEventKind::Completed).await;
    assert_eq!(recorder.count(group.id(), GroupEventKind::Completed), 1);
}

#[tokio::test]
async fn test_stop_ends_paused_group() {
    let bus = EventBus::new();
    let fetcher = GatedFetcher::gated(200);
    let outcomes = Outcomes::new();
    let recorder = EventRecorder::new();
    let group = group(5, &fetcher, &bus, Some(recorder.clone()), &outcomes);

    group.start().await;
    wait_until("four transfers", || fetcher.calls() == 4).await;
    group.pause().await;
    group.stop().await;
    group.stop().await;
    assert_eq!(group.phase().await, GroupPhase::Stopped);

    // A stopped group cannot be resumed
    group.start().await;
    assert!(!group.is_running().await);

    fetcher.release(4);
    wait_until("in-flight tasks done", || outcomes.ok() == 4).await;
    wait_until("events delivered", || {
        recorder.count(group.id(), GroupEventKind::Stopped) == 1
    })
    .await;
    assert_eq!(
        recorder.kinds_for(group.id()),
        vec![
            GroupEventKind::Started,
            GroupEventKind::Paused,
            GroupEventKind::Stopped,
        ]
    );
}
