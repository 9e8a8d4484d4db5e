//! Chain traversal and the derived views of the sequence.
//!
//! Walking the chain from the head via `next`, skipping tombstones, and
//! concatenating values reproduces the editor's visible text exactly. That
//! equivalence is the core correctness property; [`check_consistency`] tests
//! it without aborting the session when it fails.

use tracing::error;

use crate::element::Element;
use crate::mapping::Mapping;
use crate::store::ElementStore;

/// Iterates the chain in logical order, tombstones included.
pub fn iter_chain(store: &ElementStore) -> ChainIter<'_> {
    ChainIter {
        store,
        cursor: store.head().cloned(),
        visited: 0,
    }
}

pub struct ChainIter<'a> {
    store: &'a ElementStore,
    cursor: Option<crate::id::ElementId>,
    visited: usize,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        // The chain is acyclic by construction; the bound turns a violated
        // invariant into a truncated walk instead of a hang.
        if self.visited > self.store.len() {
            error!("chain traversal exceeded element count, aborting walk");
            return None;
        }
        let id = self.cursor.take()?;
        let element = self.store.get(&id)?;
        self.cursor = element.next.clone();
        self.visited += 1;
        Some(element)
    }
}

/// The visible text: chain order, tombstones skipped.
pub fn to_text(store: &ElementStore) -> String {
    iter_chain(store)
        .filter(|e| !e.deleted)
        .map(|e| e.value)
        .collect()
}

/// Rebuilds the positional mapping from a full chain traversal. Used on
/// recovery and by consistency checks; normal operation maintains the
/// mapping incrementally.
pub fn rebuild_mapping(store: &ElementStore) -> Mapping {
    let mut mapping = Mapping::new();
    let (mut line, mut col) = (0usize, 0usize);
    for element in iter_chain(store) {
        if element.deleted {
            continue;
        }
        mapping.insert_at(line, col, element.id.clone());
        if element.is_line_break() {
            line += 1;
            col = 0;
        } else {
            col += 1;
        }
    }
    mapping
}

/// Links one remotely created element into the chain.
///
/// The op declares an anchor (`prev_id`, or the document head when `None`).
/// Starting there, we advance past any existing successor whose id sorts
/// greater than the incoming id before splicing. Concurrent inserts after a
/// common anchor therefore land in one deterministic order — the chain
/// converges for any delivery order of a fixed op set.
///
/// Fails with [`CrdtError::DuplicateId`] when the id is already present (the
/// caller treats that as a duplicate delivery) and [`CrdtError::NotFound`]
/// when the anchor is unknown (the caller buffers the op; links are never
/// written from an unresolved anchor).
pub fn integrate_remote(
    store: &mut ElementStore,
    id: crate::id::ElementId,
    prev_id: Option<&crate::id::ElementId>,
    value: char,
    deleted: bool,
) -> Result<(), crate::error::CrdtError> {
    use crate::error::CrdtError;

    if store.contains(&id) {
        return Err(CrdtError::DuplicateId(id));
    }

    let (mut pred, mut succ) = match prev_id {
        Some(anchor) => {
            let element = store
                .get(anchor)
                .ok_or_else(|| CrdtError::NotFound(anchor.clone()))?;
            (Some(anchor.clone()), element.next.clone())
        }
        None => (None, store.head().cloned()),
    };

    while let Some(candidate) = &succ {
        if *candidate > id {
            let next = store
                .get(candidate)
                .ok_or_else(|| CrdtError::NotFound(candidate.clone()))?
                .next
                .clone();
            pred = succ.clone();
            succ = next;
        } else {
            break;
        }
    }

    store.insert(Element::new(
        id.clone(),
        pred.clone(),
        succ.clone(),
        value,
        deleted,
    ))?;
    if let Some(p) = &pred {
        store.set_next(p, Some(id.clone()))?;
    }
    if let Some(s) = &succ {
        store.set_prev(s, Some(id))?;
    }
    Ok(())
}

/// A detected mismatch between the chain's derived text and the editor's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    pub chain: String,
    pub editor: String,
}

/// Compares the chain-derived text against the editor surface. Divergence is
/// recoverable: it is reported, never thrown.
pub fn check_consistency(store: &ElementStore, editor_text: &str) -> Option<Divergence> {
    let chain = to_text(store);
    if chain == editor_text {
        None
    } else {
        Some(Divergence {
            chain,
            editor: editor_text.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::LINE_BREAK;
    use crate::id::ElementId;

    fn id(n: u64) -> ElementId {
        ElementId::new("t", n, 0)
    }

    fn chain_of(store: &mut ElementStore, text: &str) -> Vec<ElementId> {
        let ids: Vec<_> = (0..text.chars().count()).map(|n| id(n as u64 + 1)).collect();
        for (n, ch) in text.chars().enumerate() {
            let prev = n.checked_sub(1).map(|p| ids[p].clone());
            let next = ids.get(n + 1).cloned();
            store
                .insert(Element::new(ids[n].clone(), prev, next, ch, false))
                .unwrap();
        }
        ids
    }

    #[test]
    fn text_skips_tombstones_forever() {
        let mut store = ElementStore::new();
        let ids = chain_of(&mut store, "abc");
        store.mark_deleted(&ids[1]).unwrap();
        assert_eq!(to_text(&store), "ac");
        assert!(store.contains(&ids[1]));
    }

    #[test]
    fn rebuild_matches_traversal_order() {
        let mut store = ElementStore::new();
        let ids = chain_of(&mut store, "ab\ncd");
        let mapping = rebuild_mapping(&store);
        assert_eq!(mapping.line_count(), 2);
        assert_eq!(mapping.position_of(&ids[3]), Some((1, 0)));
        assert_eq!(mapping.to_text(&store), "ab\ncd");
        assert_eq!(mapping.to_text(&store), to_text(&store));
    }

    #[test]
    fn rebuild_after_deleting_break() {
        let mut store = ElementStore::new();
        let ids = chain_of(&mut store, "ab\ncd");
        let brk = ids
            .iter()
            .find(|i| store.get(i).unwrap().value == LINE_BREAK)
            .unwrap()
            .clone();
        store.mark_deleted(&brk).unwrap();
        let mapping = rebuild_mapping(&store);
        assert_eq!(mapping.line_count(), 1);
        assert_eq!(mapping.to_text(&store), "abcd");
    }

    #[test]
    fn integrate_orders_same_anchor_inserts_deterministically() {
        // Anchor A with existing successor b_2; a_5 and c_1 arrive anchored
        // at A, in either order. The final chain must be identical.
        let anchor = ElementId::new("x", 0, 0);
        let b2 = ElementId::new("b", 2, 0);
        let a5 = ElementId::new("a", 5, 0);
        let c1 = ElementId::new("c", 1, 0);

        let build = |first: &ElementId, second: &ElementId| {
            let mut store = ElementStore::new();
            store
                .insert(Element::new(anchor.clone(), None, Some(b2.clone()), 'A', false))
                .unwrap();
            store
                .insert(Element::new(b2.clone(), Some(anchor.clone()), None, 'B', false))
                .unwrap();
            let value = |id: &ElementId| if id == &a5 { 'a' } else { 'c' };
            integrate_remote(&mut store, first.clone(), Some(&anchor), value(first), false)
                .unwrap();
            integrate_remote(&mut store, second.clone(), Some(&anchor), value(second), false)
                .unwrap();
            (
                to_text(&store),
                iter_chain(&store).map(|e| e.id.clone()).collect::<Vec<_>>(),
            )
        };

        let (text_ab, chain_ab) = build(&a5, &c1);
        let (text_ba, chain_ba) = build(&c1, &a5);
        assert_eq!(text_ab, text_ba);
        assert_eq!(chain_ab, chain_ba);
        // The newest same-anchor insert (a, clock 5) sits nearest the anchor;
        // ids run descending away from it (a_5, b_2, c_1).
        assert_eq!(chain_ab[0], anchor);
        assert_eq!(text_ab, "AaBc");
    }

    #[test]
    fn integrate_duplicate_and_unknown_anchor() {
        let mut store = ElementStore::new();
        let ids = chain_of(&mut store, "ab");

        let dup = integrate_remote(&mut store, ids[0].clone(), None, 'a', false);
        assert!(matches!(dup, Err(crate::error::CrdtError::DuplicateId(_))));

        let missing = id(99);
        let orphan = integrate_remote(&mut store, id(50), Some(&missing), 'x', false);
        assert_eq!(orphan, Err(crate::error::CrdtError::NotFound(missing)));
        // Nothing was linked in.
        assert_eq!(to_text(&store), "ab");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn integrate_at_virtual_head() {
        let mut store = ElementStore::new();
        let ids = chain_of(&mut store, "ab");

        // An id older than everything present walks past the whole chain.
        integrate_remote(&mut store, id(0), None, 'x', false).unwrap();
        assert_eq!(to_text(&store), "abx");

        // Newer id than the head becomes the new head.
        let newer = id(10);
        integrate_remote(&mut store, newer.clone(), None, 'y', false).unwrap();
        assert_eq!(store.head(), Some(&newer));
        assert_eq!(to_text(&store), "yabx");
        assert_eq!(store.get(&ids[0]).unwrap().prev, Some(newer));
    }

    #[test]
    fn consistency_check_reports_divergence() {
        let mut store = ElementStore::new();
        chain_of(&mut store, "abc");
        assert_eq!(check_consistency(&store, "abc"), None);
        let divergence = check_consistency(&store, "abx").unwrap();
        assert_eq!(divergence.chain, "abc");
        assert_eq!(divergence.editor, "abx");
    }
}
