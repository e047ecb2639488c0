//! Side effect guard stress tests

use job_safety_core::MemoryCoordinator;
use job_safety_idempotency::{pnl_entity_id, EffectKind, SideEffectGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{init_tracing, ConcurrencyTracker};

/// Test: many distinct entities, each written once
#[tokio::test]
#[ignore]
async fn stress_sequential_distinct_entities() {
    init_tracing();
    let guard = SideEffectGuard::new(Arc::new(MemoryCoordinator::new()));
    let writes = AtomicUsize::new(0);

    let start = Instant::now();
    for trade in 0..100_000 {
        let entity = pnl_entity_id(&format!("trade-{trade}"));
        let outcome = guard
            .execute_once(&EffectKind::PnlWrite, &entity, || async {
                writes.fetch_add(1, Ordering::Relaxed);
                Ok::<_, String>(trade)
            })
            .await
            .unwrap();
        assert!(outcome.executed);
    }
    let elapsed = start.elapsed();

    println!("100k guarded writes in {:?}", elapsed);
    println!(
        "Throughput: {:.0} writes/sec",
        100_000.0 / elapsed.as_secs_f64()
    );
    assert_eq!(writes.load(Ordering::Relaxed), 100_000);
}

/// Test: a thousand workers retrying the same handful of trades
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore]
async fn stress_contended_entities() {
    init_tracing();
    let guard = Arc::new(
        SideEffectGuard::builder(Arc::new(MemoryCoordinator::new()))
            .await_pending_result(Duration::from_secs(5), Duration::from_millis(2))
            .build(),
    );
    let tracker = ConcurrencyTracker::new();
    let writes = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for worker in 0..1_000 {
        let guard = Arc::clone(&guard);
        let tracker = Arc::clone(&tracker);
        let writes = Arc::clone(&writes);
        handles.push(tokio::spawn(async move {
            let trade = worker % 10;
            let entity = pnl_entity_id(&format!("trade-{trade}"));
            guard
                .execute_once(&EffectKind::PnlWrite, &entity, || async {
                    tracker.enter();
                    writes.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    tracker.exit();
                    Ok::<_, String>(trade)
                })
                .await
                .unwrap()
        }));
    }

    let mut executed = 0;
    for handle in handles {
        let outcome = handle.await.unwrap();
        if outcome.executed {
            executed += 1;
        }
        assert!(outcome.result.is_some());
    }

    println!("Peak concurrent writes: {}", tracker.peak());
    assert_eq!(executed, 10);
    assert_eq!(writes.load(Ordering::SeqCst), 10);
    assert!(tracker.peak() <= 10);
}
