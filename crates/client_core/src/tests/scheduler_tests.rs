use super::*;
use crate::test_support::{ApiCall, Harness};

async fn polls(h: &Harness) -> usize {
    h.api.count(ApiCall::ServoStatus).await
}

#[tokio::test(start_paused = true)]
async fn reconciles_after_initial_delay_then_on_interval() {
    let h = Harness::new().await;
    let handle = spawn_reconcile_loop(h.reconciler.clone(), ScheduleSettings::default());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(polls(&h).await, 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(polls(&h).await, 1);

    tokio::time::sleep(DEFAULT_RECONCILE_INTERVAL).await;
    assert_eq!(polls(&h).await, 2);

    tokio::time::sleep(DEFAULT_RECONCILE_INTERVAL * 2).await;
    assert_eq!(polls(&h).await, 4);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn visibility_and_manual_triggers_reconcile_immediately() {
    let h = Harness::new().await;
    let handle = spawn_reconcile_loop(h.reconciler.clone(), ScheduleSettings::default());
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(polls(&h).await, 1);

    handle.visibility_regained();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(polls(&h).await, 2);

    handle.request_reconcile();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(polls(&h).await, 3);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_polling() {
    let h = Harness::new().await;
    let handle = spawn_reconcile_loop(
        h.reconciler.clone(),
        ScheduleSettings {
            initial_delay: Duration::ZERO,
            interval: Duration::from_secs(1),
        },
    );
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(polls(&h).await, 2);

    handle.shutdown().await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(polls(&h).await, 2);
}

#[tokio::test(start_paused = true)]
async fn failed_poll_keeps_loop_alive() {
    let h = Harness::new().await;
    *h.api.servo.lock().await =
        crate::test_support::Reply::Transport("connection refused".into());
    let handle = spawn_reconcile_loop(
        h.reconciler.clone(),
        ScheduleSettings {
            initial_delay: Duration::ZERO,
            interval: Duration::from_secs(1),
        },
    );

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(polls(&h).await, 3);
    assert!(!h.reconciler.views().await.fire.active);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn oversized_interval_is_clamped_instead_of_panicking() {
    let h = Harness::new().await;
    let handle = spawn_reconcile_loop(
        h.reconciler.clone(),
        ScheduleSettings {
            initial_delay: Duration::ZERO,
            interval: Duration::MAX,
        },
    );
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(polls(&h).await, 1);

    tokio::time::sleep(MAX_RECONCILE_INTERVAL).await;
    assert_eq!(polls(&h).await, 2);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn zero_interval_still_polls() {
    let h = Harness::new().await;
    let handle = spawn_reconcile_loop(
        h.reconciler.clone(),
        ScheduleSettings {
            initial_delay: Duration::ZERO,
            interval: Duration::ZERO,
        },
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(polls(&h).await > 1);

    handle.shutdown().await;
}
