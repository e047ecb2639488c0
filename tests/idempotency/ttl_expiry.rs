use futures::future::join_all;
use job_safety_core::{ManualClock, MemoryCoordinator};
use job_safety_idempotency::{EffectKind, SideEffectGuard, pnl_entity_id};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

fn guard(clock: Arc<ManualClock>) -> Arc<SideEffectGuard> {
    Arc::new(
        SideEffectGuard::builder(Arc::new(MemoryCoordinator::with_clock(clock)))
            .default_ttl(Duration::from_secs(60))
            .build(),
    )
}

#[tokio::test]
async fn mark_blocks_until_ttl_then_rearms_once() {
    let clock = Arc::new(ManualClock::starting_now());
    let guard = guard(clock.clone());
    let entity = pnl_entity_id("trade-881");
    let runs = Arc::new(AtomicU64::new(0));

    let run = |runs: Arc<AtomicU64>| async move {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok::<_, String>("written".to_string())
    };

    assert!(
        guard
            .execute_once(&EffectKind::PnlWrite, &entity, || run(runs.clone()))
            .await
            .unwrap()
            .executed
    );

    clock.advance(Duration::from_secs(59));
    let duplicate = guard
        .execute_once(&EffectKind::PnlWrite, &entity, || run(runs.clone()))
        .await
        .unwrap();
    assert!(duplicate.is_duplicate());
    assert_eq!(duplicate.result.as_deref(), Some("written"));

    clock.advance(Duration::from_secs(2));
    let racers = (0..8).map(|_| {
        let guard = Arc::clone(&guard);
        let runs = Arc::clone(&runs);
        let entity = entity.clone();
        async move {
            guard
                .execute_once(&EffectKind::PnlWrite, &entity, || run(runs))
                .await
                .unwrap()
                .executed
        }
    });
    let executed = join_all(racers).await.into_iter().filter(|e| *e).count();

    assert_eq!(executed, 1);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn remaining_ttl_is_reported() {
    let clock = Arc::new(ManualClock::starting_now());
    let guard = guard(clock.clone());
    let entity = pnl_entity_id("trade-12");

    guard
        .mark_executed(&EffectKind::PnlWrite, &entity)
        .await
        .unwrap();
    clock.advance(Duration::from_secs(45));

    let ttl = guard.ttl(&EffectKind::PnlWrite, &entity).await.unwrap().unwrap();
    assert!(ttl <= Duration::from_secs(15));
    assert!(ttl > Duration::from_secs(14));
}
