//! Property tests for chain convergence.
//!
//! A generated session history (inserts anchored on earlier elements, plus
//! deletions) is delivered to independent stores in different orders, with
//! duplicated messages mixed in. Every delivery order must produce the same
//! chain, the same visible text, and a positional mapping that matches a
//! fresh traversal.

use proptest::prelude::*;

use quilt_crdt::sequence::{integrate_remote, iter_chain, rebuild_mapping, to_text};
use quilt_crdt::{CrdtError, ElementId, ElementStore};

#[derive(Clone, Debug)]
struct HistoryOp {
    id: ElementId,
    prev: Option<ElementId>,
    value: char,
    deleted: bool,
}

const CLIENTS: [&str; 3] = ["alice", "bob", "carol"];

/// Builds a causally sensible history from a seed: each insert anchors on an
/// element generated earlier (or the head) and carries a later clock, the way
/// live replicas behave. Concurrency is exercised by delivery order.
fn build_history(seed: &[(u8, u16)]) -> Vec<HistoryOp> {
    let mut ops: Vec<HistoryOp> = Vec::new();
    let mut inserted: Vec<ElementId> = Vec::new();

    for (step, (action, pick)) in seed.iter().enumerate() {
        let pick = *pick as usize;
        if *action % 4 == 0 && !inserted.is_empty() {
            let target = inserted[pick % inserted.len()].clone();
            let origin = ops
                .iter()
                .find(|op| op.id == target && !op.deleted)
                .expect("insert precedes delete")
                .clone();
            ops.push(HistoryOp {
                deleted: true,
                ..origin
            });
        } else {
            let id = ElementId::new(CLIENTS[pick % CLIENTS.len()], 1000 + step as u64, 0);
            let prev = if inserted.is_empty() || pick % 5 == 0 {
                None
            } else {
                Some(inserted[pick % inserted.len()].clone())
            };
            let value = if pick % 7 == 0 {
                '\n'
            } else {
                (b'a' + (pick % 26) as u8) as char
            };
            ops.push(HistoryOp {
                id: id.clone(),
                prev,
                value,
                deleted: false,
            });
            inserted.push(id);
        }
    }
    ops
}

fn try_apply(store: &mut ElementStore, op: HistoryOp, deferred: &mut Vec<HistoryOp>) {
    if op.deleted && store.contains(&op.id) {
        store.mark_deleted(&op.id).expect("element present");
        return;
    }
    // Unknown deleted elements integrate as tombstones so that a deletion
    // delivered before its insertion still converges.
    match integrate_remote(store, op.id.clone(), op.prev.as_ref(), op.value, op.deleted) {
        Ok(()) => {}
        Err(CrdtError::DuplicateId(_)) => {
            if op.deleted {
                store.mark_deleted(&op.id).expect("element present");
            }
        }
        Err(CrdtError::NotFound(_)) => deferred.push(op),
        Err(other) => panic!("unexpected apply error: {other}"),
    }
}

/// Applies ops in the given order, parking anchor-less ops until their anchor
/// arrives, exactly like the client's deferred buffer.
fn replay(order: &[HistoryOp]) -> ElementStore {
    let mut store = ElementStore::new();
    let mut deferred: Vec<HistoryOp> = Vec::new();

    for op in order {
        try_apply(&mut store, op.clone(), &mut deferred);
    }
    loop {
        if deferred.is_empty() {
            break;
        }
        let parked = std::mem::take(&mut deferred);
        let before = parked.len();
        for op in parked {
            try_apply(&mut store, op, &mut deferred);
        }
        assert!(
            deferred.len() < before,
            "deferred ops made no progress: {deferred:?}"
        );
    }
    store
}

fn shuffled(ops: &[HistoryOp], mut seed: u64) -> Vec<HistoryOp> {
    let mut out = ops.to_vec();
    for i in (1..out.len()).rev() {
        // xorshift64
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        out.swap(i, (seed as usize) % (i + 1));
    }
    out
}

fn chain_ids(store: &ElementStore) -> Vec<ElementId> {
    iter_chain(store).map(|e| e.id.clone()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn delivery_order_does_not_matter(
        seed in prop::collection::vec((any::<u8>(), any::<u16>()), 1..60),
        shuffle_a in any::<u64>(),
        shuffle_b in any::<u64>(),
    ) {
        let ops = build_history(&seed);

        let a = replay(&shuffled(&ops, shuffle_a.max(1)));
        let b = replay(&shuffled(&ops, shuffle_b.max(1)));

        prop_assert_eq!(chain_ids(&a), chain_ids(&b));
        prop_assert_eq!(to_text(&a), to_text(&b));
    }

    #[test]
    fn duplicated_delivery_is_idempotent(
        seed in prop::collection::vec((any::<u8>(), any::<u16>()), 1..40),
        shuffle in any::<u64>(),
    ) {
        let ops = build_history(&seed);

        let once = replay(&ops);

        // Same order, but every op delivered twice in a row.
        let mut doubled = Vec::new();
        for op in shuffled(&ops, shuffle.max(1)) {
            doubled.push(op.clone());
            doubled.push(op);
        }
        let twice = replay(&doubled);

        prop_assert_eq!(chain_ids(&once), chain_ids(&twice));
        prop_assert_eq!(to_text(&once), to_text(&twice));
    }

    #[test]
    fn mapping_matches_chain_after_any_history(
        seed in prop::collection::vec((any::<u8>(), any::<u16>()), 1..60),
        shuffle in any::<u64>(),
    ) {
        let ops = build_history(&seed);
        let store = replay(&shuffled(&ops, shuffle.max(1)));

        let mapping = rebuild_mapping(&store);
        prop_assert_eq!(mapping.to_text(&store), to_text(&store));
        prop_assert_eq!(mapping.len(), store.live_len());
    }
}
