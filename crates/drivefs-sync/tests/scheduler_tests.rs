//! Timer behavior of SyncScheduler under a paused clock

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{harness, FakeRemote};
use drivefs_core::config::SyncConfig;
use drivefs_sync::SyncScheduler;

fn config(push: bool) -> SyncConfig {
    SyncConfig {
        fast_poll_interval_secs: 60,
        slow_poll_interval_secs: 300,
        push_notifications: push,
    }
}

async fn advance_secs(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn test_polls_at_fast_interval_without_push() {
    let h = harness(FakeRemote::new(1));
    h.sync.load_if_needed(None).await.unwrap();
    let scheduler = SyncScheduler::new(h.sync.clone(), &config(false));
    assert_eq!(scheduler.polling_interval(), Duration::from_secs(60));

    scheduler.start();
    advance_secs(59).await;
    assert_eq!(h.remote.delta_calls(), 0);
    advance_secs(2).await;
    assert_eq!(h.remote.delta_calls(), 1);
    advance_secs(60).await;
    assert_eq!(h.remote.delta_calls(), 2);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_polls_at_slow_interval_with_push() {
    let h = harness(FakeRemote::new(1));
    h.sync.load_if_needed(None).await.unwrap();
    let scheduler = SyncScheduler::new(h.sync.clone(), &config(true));
    assert_eq!(scheduler.polling_interval(), Duration::from_secs(300));

    scheduler.start();
    advance_secs(200).await;
    assert_eq!(h.remote.delta_calls(), 0);
    advance_secs(101).await;
    assert_eq!(h.remote.delta_calls(), 1);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_toggling_push_reschedules_running_loop() {
    let h = harness(FakeRemote::new(1));
    h.sync.load_if_needed(None).await.unwrap();
    let scheduler = SyncScheduler::new(h.sync.clone(), &config(false));
    scheduler.start();

    advance_secs(30).await;
    scheduler.set_push_notification_enabled(true);
    assert!(scheduler.push_notification_enabled());
    assert_eq!(scheduler.polling_interval(), Duration::from_secs(300));

    // The fast tick at t=60 no longer fires; the next one is at t=330.
    advance_secs(270).await;
    assert_eq!(h.remote.delta_calls(), 0);
    advance_secs(31).await;
    assert_eq!(h.remote.delta_calls(), 1);

    scheduler.set_push_notification_enabled(false);
    advance_secs(61).await;
    assert_eq!(h.remote.delta_calls(), 2);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_ticks_skip_unloaded_tree() {
    let h = harness(FakeRemote::new(1));
    let scheduler = SyncScheduler::new(h.sync.clone(), &config(false));
    scheduler.start();

    advance_secs(181).await;

    assert_eq!(h.remote.delta_calls(), 0);
    assert_eq!(h.remote.full_feed_calls.load(Ordering::SeqCst), 0);
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_halts_polling() {
    let h = harness(FakeRemote::new(1));
    h.sync.load_if_needed(None).await.unwrap();
    let scheduler = SyncScheduler::new(h.sync.clone(), &config(false));

    scheduler.start();
    scheduler.start();
    assert!(scheduler.is_running());

    scheduler.stop().await;
    assert!(!scheduler.is_running());
    advance_secs(300).await;
    assert_eq!(h.remote.delta_calls(), 0);

    scheduler.start();
    advance_secs(61).await;
    assert_eq!(h.remote.delta_calls(), 1);
    scheduler.stop().await;
}
