use std::time::Duration;

use tokio::time::{sleep, timeout};

use kyro_state::{DeliveryMode, GateConfig, LifecycleOwner, StateStore, WhenActiveExt};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(80);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Screen {
    title: &'static str,
}

fn screen(title: &'static str) -> Screen {
    Screen { title }
}

/// Give the gate's tasks and the store worker time to catch up.
async fn settle() {
    sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn redeliver_on_start_repeats_last_value_on_every_activation() {
    let store = StateStore::new(screen("A")).unwrap();
    let owner = LifecycleOwner::new();
    let mut gated = store
        .subscribe()
        .when_active(&owner, DeliveryMode::RedeliverOnStart)
        .unwrap();

    settle().await;
    assert!(timeout(QUIET, gated.recv()).await.is_err());

    owner.activate();
    assert_eq!(timeout(WAIT, gated.recv()).await.unwrap(), Some(screen("A")));

    owner.deactivate();
    settle().await;
    owner.activate();
    assert_eq!(timeout(WAIT, gated.recv()).await.unwrap(), Some(screen("A")));
}

#[tokio::test]
async fn unique_only_stays_silent_until_a_new_value() {
    let store = StateStore::new(screen("A")).unwrap();
    let owner = LifecycleOwner::new();
    let mut gated = store
        .subscribe()
        .when_active(&owner, DeliveryMode::UniqueOnly)
        .unwrap();

    settle().await;
    owner.activate();
    assert_eq!(timeout(WAIT, gated.recv()).await.unwrap(), Some(screen("A")));

    owner.deactivate();
    settle().await;
    owner.activate();
    assert!(timeout(QUIET, gated.recv()).await.is_err());

    store.mutate(|_| screen("B")).unwrap();
    assert_eq!(timeout(WAIT, gated.recv()).await.unwrap(), Some(screen("B")));
}

#[tokio::test]
async fn inactive_window_keeps_only_the_latest_value() {
    let store = StateStore::new(0u32).unwrap();
    let owner = LifecycleOwner::new();
    let mut gated = store
        .subscribe()
        .when_active(&owner, DeliveryMode::RedeliverOnStart)
        .unwrap();

    for _ in 0..3 {
        store.mutate(|s| s + 1).unwrap();
    }
    settle().await;

    owner.activate();
    assert_eq!(timeout(WAIT, gated.recv()).await.unwrap(), Some(3));
    assert!(timeout(QUIET, gated.recv()).await.is_err());
}

#[tokio::test]
async fn active_at_wrap_time_delivers_immediately() {
    let store = StateStore::new(screen("home")).unwrap();
    let owner = LifecycleOwner::active();
    let mut gated = store
        .subscribe()
        .when_active(&owner, DeliveryMode::UniqueOnly)
        .unwrap();

    assert_eq!(timeout(WAIT, gated.recv()).await.unwrap(), Some(screen("home")));
}

#[tokio::test]
async fn active_window_forwards_commits_in_order() {
    let store = StateStore::new(0u32).unwrap();
    let owner = LifecycleOwner::active();
    let mut gated = store
        .subscribe()
        .when_active(&owner, DeliveryMode::RedeliverOnStart)
        .unwrap();

    for _ in 0..5 {
        store.mutate(|s| s + 1).unwrap();
    }

    // The one-slot buffer may coalesce values, but never reorders them.
    let mut last = None;
    while last != Some(5) {
        let value = timeout(WAIT, gated.recv()).await.unwrap().unwrap();
        if let Some(prev) = last {
            assert!(value > prev, "{value} delivered after {prev}");
        }
        last = Some(value);
    }
}

/// Commits a value while active that the consumer has not yet received, then
/// flips the owner inactive and back.
async fn reactivation_after_unreceived_commit(mode: DeliveryMode, flicker: bool) {
    let store = StateStore::new(0u32).unwrap();
    let owner = LifecycleOwner::active();
    let mut gated = store.subscribe().when_active(&owner, mode).unwrap();
    assert_eq!(timeout(WAIT, gated.recv()).await.unwrap(), Some(0));

    store.mutate(|_| 1).unwrap();
    settle().await;
    owner.deactivate();
    if !flicker {
        settle().await;
        assert!(timeout(QUIET, gated.recv()).await.is_err());
    }

    owner.activate();
    assert_eq!(timeout(WAIT, gated.recv()).await.unwrap(), Some(1));
    assert_eq!(gated.last_delivered(), Some(1));
    assert!(timeout(QUIET, gated.recv()).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn redeliver_on_start_delivers_value_committed_before_deactivation() {
    reactivation_after_unreceived_commit(DeliveryMode::RedeliverOnStart, false).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unique_only_delivers_value_committed_before_deactivation() {
    reactivation_after_unreceived_commit(DeliveryMode::UniqueOnly, false).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quick_flicker_does_not_lose_the_latest_value() {
    reactivation_after_unreceived_commit(DeliveryMode::RedeliverOnStart, true).await;
    reactivation_after_unreceived_commit(DeliveryMode::UniqueOnly, true).await;
}

#[tokio::test]
async fn newer_commit_while_inactive_wins() {
    let store = StateStore::new(0u32).unwrap();
    let owner = LifecycleOwner::active();
    let mut gated = store
        .subscribe()
        .when_active(&owner, DeliveryMode::RedeliverOnStart)
        .unwrap();
    assert_eq!(timeout(WAIT, gated.recv()).await.unwrap(), Some(0));

    store.mutate(|_| 1).unwrap();
    settle().await;
    owner.deactivate();
    store.mutate(|_| 2).unwrap();
    settle().await;

    owner.activate();
    assert_eq!(timeout(WAIT, gated.recv()).await.unwrap(), Some(2));
    assert!(timeout(QUIET, gated.recv()).await.is_err());
}

#[tokio::test]
async fn seeded_prior_delivery_is_not_repeated() {
    let store = StateStore::new(screen("A")).unwrap();
    let owner = LifecycleOwner::new();
    let config = GateConfig::new(DeliveryMode::UniqueOnly).with_last_delivered(screen("A"));
    let mut gated = store.subscribe().when_active_with(&owner, config).unwrap();

    settle().await;
    owner.activate();
    assert!(timeout(QUIET, gated.recv()).await.is_err());
    assert_eq!(gated.last_delivered(), Some(screen("A")));
}

#[tokio::test]
async fn terminate_ends_the_gate_but_not_the_store() {
    let store = StateStore::new(0u32).unwrap();
    let owner = LifecycleOwner::active();
    let mut gated = store
        .subscribe()
        .when_active(&owner, DeliveryMode::RedeliverOnStart)
        .unwrap();
    assert_eq!(timeout(WAIT, gated.recv()).await.unwrap(), Some(0));

    owner.terminate();
    assert_eq!(timeout(WAIT, gated.recv()).await.unwrap(), None);

    // Late edges are ignored.
    assert!(!owner.activate());
    assert!(store.is_running());
    store.mutate(|s| s + 1).unwrap();
}

#[tokio::test]
async fn dropping_the_gate_releases_the_upstream_subscription() {
    let store = StateStore::new(0u32).unwrap();
    let owner = LifecycleOwner::new();
    let gated = store
        .subscribe()
        .when_active(&owner, DeliveryMode::RedeliverOnStart)
        .unwrap();
    assert_eq!(store.subscriber_count(), 1);

    drop(gated);
    let released = timeout(WAIT, async {
        while store.subscriber_count() != 0 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(released.is_ok());
}
