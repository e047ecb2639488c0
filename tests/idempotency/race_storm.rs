use futures::future::join_all;
use job_safety_core::MemoryCoordinator;
use job_safety_idempotency::{EffectKind, SideEffectGuard, order_entity_id};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

fn waiting_guard() -> Arc<SideEffectGuard> {
    Arc::new(
        SideEffectGuard::builder(Arc::new(MemoryCoordinator::new()))
            .await_pending_result(Duration::from_secs(2), Duration::from_millis(5))
            .build(),
    )
}

/// Ten workers retry the same order at once; the order is placed once and
/// every duplicate sees the first run's result.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ten_callers_one_execution() {
    let guard = waiting_guard();
    let counter = Arc::new(AtomicU64::new(0));
    let entity = order_entity_id("BTCUSDT", "buy", 0.25, Some(64_000.0));

    let tasks = (0..10).map(|_| {
        let guard = Arc::clone(&guard);
        let counter = Arc::clone(&counter);
        let entity = entity.clone();
        tokio::spawn(async move {
            guard
                .execute_once(&EffectKind::OrderPlacement, &entity, || async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, String>(counter.fetch_add(1, Ordering::SeqCst) + 1)
                })
                .await
                .unwrap()
        })
    });

    let outcomes: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(outcomes.iter().filter(|o| o.executed).count(), 1);
    assert!(outcomes.iter().all(|o| o.result == Some(1)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_entities_do_not_collide() {
    let guard = waiting_guard();
    let counter = Arc::new(AtomicU64::new(0));

    let tasks = (0..20).map(|i| {
        let guard = Arc::clone(&guard);
        let counter = Arc::clone(&counter);
        tokio::spawn(async move {
            let entity = order_entity_id("ETHUSDT", "sell", f64::from(i % 5) + 1.0, None);
            guard
                .execute_once(&EffectKind::OrderPlacement, &entity, || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                })
                .await
                .unwrap()
        })
    });
    join_all(tasks).await;

    // five distinct quantities
    assert_eq!(counter.load(Ordering::SeqCst), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_run_lets_a_racer_retry() {
    let guard = waiting_guard();
    let attempts = Arc::new(AtomicU64::new(0));
    let entity = order_entity_id("SOLUSDT", "buy", 3.0, None);

    let first = guard
        .execute_once(&EffectKind::OrderPlacement, &entity, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<u64, _>("exchange timeout")
        })
        .await;
    assert!(first.is_err());

    let second = guard
        .execute_once(&EffectKind::OrderPlacement, &entity, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(42u64)
        })
        .await
        .unwrap();
    assert!(second.executed);
    assert_eq!(second.result, Some(42));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}
