//! Remote reconciliation: integrating ops from other replicas into the
//! chain and reflecting them back through the editor surface.

use quilt_crdt::{sequence, CrdtError, ElementId, ElementOp, Inbound, LINE_BREAK};
use tracing::{debug, warn};

use crate::editor::{ChangeOrigin, EditorSurface, Pos};
use crate::session::{Notice, Workspace};

impl<E: EditorSurface> Workspace<E> {
    /// Route one socket payload: job logs to the notice surface,
    /// element ops into reconciliation.
    pub fn apply_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Job(log) => self.notices.push(Notice::JobOutput(log)),
            Inbound::Element(op) => self.apply_remote(op),
        }
    }

    /// Integrate one remote element op. Echoes of our own ops only
    /// acknowledge the pending cache; application is idempotent, so
    /// re-delivery after a resend is harmless.
    pub fn apply_remote(&mut self, op: ElementOp) {
        if self.pending.acknowledge(&op.id, op.deleted) {
            return;
        }
        if op.deleted {
            self.remote_delete(op);
        } else {
            self.remote_insert(op);
        }
    }

    fn remote_insert(&mut self, op: ElementOp) {
        if self.store.contains(&op.id) {
            debug!(id = %op.id, "duplicate remote insert dropped");
            return;
        }
        let value = match op.value() {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "malformed remote insert dropped");
                return;
            }
        };

        match sequence::integrate_remote(&mut self.store, op.id.clone(), op.prev_id.as_ref(), value, false)
        {
            Ok(()) => {}
            Err(CrdtError::NotFound(anchor)) => {
                debug!(id = %op.id, %anchor, "deferring remote insert, anchor unknown");
                self.deferred.entry(anchor).or_default().push(op);
                return;
            }
            Err(e) => {
                warn!(error = %e, "remote insert rejected");
                return;
            }
        }

        let pos = self.visible_insert_pos(&op.id);
        let event = self
            .editor
            .apply_edit(&value.to_string(), pos, pos, ChangeOrigin::RemoteInput(op.id.clone()));
        self.handle_change(event);

        self.release_deferred(&op.id);
    }

    fn remote_delete(&mut self, op: ElementOp) {
        let element = match self.store.get(&op.id) {
            Some(element) => element,
            // Unknown delete: during history replay the insert this
            // deletes may never arrive. Integrate it as a tombstone so
            // later ops can still anchor on it.
            None => {
                let value = match op.value() {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(error = %e, "malformed remote delete dropped");
                        return;
                    }
                };
                match sequence::integrate_remote(
                    &mut self.store,
                    op.id.clone(),
                    op.prev_id.as_ref(),
                    value,
                    true,
                ) {
                    Ok(()) => self.release_deferred(&op.id),
                    Err(CrdtError::NotFound(anchor)) => {
                        debug!(id = %op.id, %anchor, "deferring remote delete, anchor unknown");
                        self.deferred.entry(anchor).or_default().push(op);
                    }
                    Err(e) => warn!(error = %e, "remote delete rejected"),
                }
                return;
            }
        };
        if element.deleted {
            debug!(id = %op.id, "duplicate remote delete dropped");
            return;
        }

        let was_break = element.is_line_break();
        if let Err(e) = self.store.mark_deleted(&op.id) {
            warn!(error = %e, "remote delete failed");
            return;
        }
        let Some((line, col)) = self.mapping.position_of(&op.id) else {
            warn!(id = %op.id, "deleted element missing from the mapping");
            return;
        };
        let to = if was_break {
            Pos::new(line + 1, 0)
        } else {
            Pos::new(line, col + 1)
        };
        let event = self.editor.apply_edit(
            "",
            Pos::new(line, col),
            to,
            ChangeOrigin::RemoteDelete(op.id.clone()),
        );
        self.handle_change(event);
    }

    /// Editor position for a freshly integrated element: one past its
    /// nearest live predecessor, start of the next line after a break,
    /// or the very beginning when only tombstones precede it.
    fn visible_insert_pos(&self, id: &ElementId) -> Pos {
        let mut cursor = self.store.get(id).and_then(|e| e.prev.clone());
        while let Some(prev_id) = cursor {
            match self.store.get(&prev_id) {
                Some(prev) if prev.deleted => cursor = prev.prev.clone(),
                Some(prev) => {
                    if let Some((line, col)) = self.mapping.position_of(&prev_id) {
                        return if prev.value == LINE_BREAK {
                            Pos::new(line + 1, 0)
                        } else {
                            Pos::new(line, col + 1)
                        };
                    }
                    warn!(id = %prev_id, "live predecessor missing from the mapping");
                    return Pos::new(0, 0);
                }
                None => {
                    warn!(id = %prev_id, "chain link to unknown id");
                    return Pos::new(0, 0);
                }
            }
        }
        Pos::new(0, 0)
    }

    /// Re-apply ops that were waiting for `anchor` to exist.
    fn release_deferred(&mut self, anchor: &ElementId) {
        if let Some(waiting) = self.deferred.remove(anchor) {
            for op in waiting {
                self.apply_remote(op);
            }
        }
    }

    /// Count of remote ops still parked on unknown anchors.
    pub fn deferred_len(&self) -> usize {
        self.deferred.values().map(Vec::len).sum()
    }
}
