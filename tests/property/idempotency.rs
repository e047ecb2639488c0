//! Property tests for side effect deduplication.
//!
//! Invariants tested:
//! - Entity ids do not depend on parameter order
//! - Each distinct entity executes exactly once, however often it is retried

use job_safety_core::MemoryCoordinator;
use job_safety_idempotency::{generate_entity_id, order_entity_id, EffectKind, SideEffectGuard};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn ledger_params() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::btree_map("[a-z_]{1,8}", "[A-Za-z0-9.-]{0,12}", 1..6)
        .prop_map(|params| params.into_iter().collect::<Vec<_>>())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    /// Property: shuffling parameters never changes the id
    #[test]
    fn entity_id_ignores_parameter_order(
        (params, shuffled) in ledger_params().prop_flat_map(|params| {
            let shuffled = Just(params.clone()).prop_shuffle();
            (Just(params), shuffled)
        }),
    ) {
        let a = generate_entity_id(&EffectKind::LedgerWrite, params);
        let b = generate_entity_id(&EffectKind::LedgerWrite, shuffled);
        prop_assert_eq!(a.len(), 32);
        prop_assert_eq!(a, b);
    }

    /// Property: retries of the same order collapse onto one execution
    #[test]
    fn each_entity_executes_once(
        picks in prop::collection::vec(0usize..4, 1..25),
    ) {
        let quantities = [0.1, 0.25, 1.0, 2.5];
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let guard = SideEffectGuard::new(Arc::new(MemoryCoordinator::new()));
            let runs = AtomicUsize::new(0);

            for &pick in &picks {
                let entity = order_entity_id("ETHUSDT", "sell", quantities[pick], None);
                let outcome = guard
                    .execute_once(&EffectKind::OrderPlacement, &entity, || async {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>(pick)
                    })
                    .await
                    .unwrap();
                prop_assert_eq!(outcome.result, Some(pick));
            }

            let distinct: HashSet<usize> = picks.iter().copied().collect();
            prop_assert_eq!(runs.load(Ordering::SeqCst), distinct.len());
            Ok(())
        })?;
    }
}
