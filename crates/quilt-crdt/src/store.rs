//! The element store: every element ever created for a session, tombstones
//! included, keyed by id. The head is tracked explicitly and updated on
//! insert rather than rediscovered by scanning.

use std::collections::HashMap;

use crate::element::Element;
use crate::error::{CrdtError, Result};
use crate::id::ElementId;

#[derive(Debug, Clone, Default)]
pub struct ElementStore {
    elements: HashMap<ElementId, Element>,
    head: Option<ElementId>,
    live: usize,
}

impl ElementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ElementId) -> Option<&Element> {
        self.elements.get(id)
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.elements.contains_key(id)
    }

    /// The unique element whose `prev` is none, if any element exists.
    pub fn head(&self) -> Option<&ElementId> {
        self.head.as_ref()
    }

    /// Total number of elements, tombstones included.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Number of non-tombstoned elements.
    pub fn live_len(&self) -> usize {
        self.live
    }

    /// Inserts a fully linked element. Fails with [`CrdtError::DuplicateId`]
    /// if the id is already present; remote callers must check existence
    /// first to keep replayed delivery idempotent.
    pub fn insert(&mut self, element: Element) -> Result<()> {
        if self.elements.contains_key(&element.id) {
            return Err(CrdtError::DuplicateId(element.id));
        }
        if element.prev.is_none() {
            self.head = Some(element.id.clone());
        }
        if !element.deleted {
            self.live += 1;
        }
        self.elements.insert(element.id.clone(), element);
        Ok(())
    }

    /// Sets the tombstone flag. Idempotent: deleting twice is a no-op.
    pub fn mark_deleted(&mut self, id: &ElementId) -> Result<()> {
        let element = self
            .elements
            .get_mut(id)
            .ok_or_else(|| CrdtError::NotFound(id.clone()))?;
        if !element.deleted {
            element.deleted = true;
            self.live -= 1;
        }
        Ok(())
    }

    /// Rewrites an element's successor link during a splice.
    pub fn set_next(&mut self, id: &ElementId, next: Option<ElementId>) -> Result<()> {
        let element = self
            .elements
            .get_mut(id)
            .ok_or_else(|| CrdtError::NotFound(id.clone()))?;
        element.next = next;
        Ok(())
    }

    /// Rewrites an element's predecessor link during a splice.
    pub fn set_prev(&mut self, id: &ElementId, prev: Option<ElementId>) -> Result<()> {
        let element = self
            .elements
            .get_mut(id)
            .ok_or_else(|| CrdtError::NotFound(id.clone()))?;
        element.prev = prev;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> ElementId {
        ElementId::new("t", n, 0)
    }

    #[test]
    fn insert_tracks_head_and_live_count() {
        let mut store = ElementStore::new();
        store
            .insert(Element::new(id(1), None, None, 'a', false))
            .unwrap();
        assert_eq!(store.head(), Some(&id(1)));
        assert_eq!(store.live_len(), 1);

        // Splice a new head in front.
        store
            .insert(Element::new(id(2), None, Some(id(1)), 'b', false))
            .unwrap();
        store.set_prev(&id(1), Some(id(2))).unwrap();
        assert_eq!(store.head(), Some(&id(2)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn duplicate_insert_fails() {
        let mut store = ElementStore::new();
        store
            .insert(Element::new(id(1), None, None, 'a', false))
            .unwrap();
        let err = store
            .insert(Element::new(id(1), None, None, 'a', false))
            .unwrap_err();
        assert_eq!(err, CrdtError::DuplicateId(id(1)));
    }

    #[test]
    fn mark_deleted_is_idempotent_and_keeps_element() {
        let mut store = ElementStore::new();
        store
            .insert(Element::new(id(1), None, None, 'a', false))
            .unwrap();
        store.mark_deleted(&id(1)).unwrap();
        store.mark_deleted(&id(1)).unwrap();
        assert_eq!(store.live_len(), 0);
        assert!(store.get(&id(1)).unwrap().deleted);

        assert_eq!(
            store.mark_deleted(&id(9)).unwrap_err(),
            CrdtError::NotFound(id(9))
        );
    }
}
