//! The operation pipeline: every editor event funnels through here,
//! one at a time, so chain, mapping and editor never interleave.

use quilt_crdt::{sequence, Element, ElementId, ElementOp, LINE_BREAK};
use tracing::{debug, warn};

use crate::editor::{ChangeEvent, ChangeOrigin, EditorSurface, Pos};
use crate::session::{Notice, Workspace};

/// Most recent events kept for the divergence report.
const OP_HISTORY_LIMIT: usize = 512;

impl<E: EditorSurface> Workspace<E> {
    /// Entry point for every editor event, local or remote echo.
    ///
    /// Spanning deletions are resolved to their affected ids up front,
    /// before the mapping shifts underneath them. Everything else is
    /// queued and drained in order.
    pub fn handle_change(&mut self, event: ChangeEvent) {
        match event.origin {
            ChangeOrigin::Ignore => return,
            ChangeOrigin::Paste => self.enqueue_paste(event),
            ChangeOrigin::Delete => {
                let ids = self.affected_ids(event.from, event.to);
                if ids.len() > 1 {
                    for id in ids {
                        self.delete_by_id(&id);
                    }
                } else {
                    self.queue.push_back(event);
                }
            }
            _ => self.queue.push_back(event),
        }
        if !self.draining {
            self.drain();
        }
    }

    fn drain(&mut self) {
        self.draining = true;
        while let Some(event) = self.queue.pop_front() {
            if self.consistency_checks {
                self.op_history.push(event.clone());
                if self.op_history.len() > OP_HISTORY_LIMIT {
                    let excess = self.op_history.len() - OP_HISTORY_LIMIT;
                    self.op_history.drain(..excess);
                }
            }
            self.apply_event(event);
        }
        self.draining = false;
        self.clean_stray_carriage_returns();
        if self.consistency_checks {
            self.verify();
        }
    }

    fn apply_event(&mut self, event: ChangeEvent) {
        match event.origin.clone() {
            ChangeOrigin::Input => self.apply_input(event),
            ChangeOrigin::Delete => self.apply_delete(event),
            ChangeOrigin::RemoteInput(id) => {
                if let Err(e) = self
                    .mapping
                    .update(event.from.line, event.from.col, id, &mut self.store)
                {
                    warn!(error = %e, "remote echo could not update mapping");
                }
            }
            ChangeOrigin::RemoteDelete(_) => {
                self.mapping
                    .remove_at(event.from.line, event.from.col, &self.store);
            }
            ChangeOrigin::Paste | ChangeOrigin::Ignore => {}
        }
    }

    /// A paste is one editor event but many elements. Decompose it into
    /// per-character input events so each gets its own id and anchor.
    fn enqueue_paste(&mut self, event: ChangeEvent) {
        let mut line = event.from.line;
        let mut col = event.from.col;
        for (i, segment) in event.inserted.iter().enumerate() {
            if i > 0 {
                self.queue.push_back(ChangeEvent {
                    from: Pos::new(line, col),
                    to: Pos::new(line, col),
                    inserted: vec![String::new(), String::new()],
                    removed: vec![String::new()],
                    origin: ChangeOrigin::Input,
                });
                line += 1;
                col = 0;
            }
            for value in segment.chars() {
                self.queue.push_back(ChangeEvent {
                    from: Pos::new(line, col),
                    to: Pos::new(line, col),
                    inserted: vec![value.to_string()],
                    removed: vec![String::new()],
                    origin: ChangeOrigin::Input,
                });
                col += 1;
            }
        }
    }

    fn apply_input(&mut self, event: ChangeEvent) {
        // A line break arrives as two empty fragments.
        if event.inserted.len() > 1 {
            self.local_insert(event.from.line, event.from.col, LINE_BREAK);
            return;
        }
        let Some(segment) = event.inserted.first() else {
            return;
        };
        // Auto-indent can deliver several characters in one keystroke.
        for (offset, value) in segment.chars().enumerate() {
            self.local_insert(event.from.line, event.from.col + offset, value);
        }
    }

    fn local_insert(&mut self, line: usize, col: usize, value: char) {
        let mut id = self.ids.next();
        while self.store.contains(&id) {
            id = self.ids.next();
        }

        let prev = self.mapping.preceding_id(line, col).cloned();
        let next = match &prev {
            Some(p) => match self.store.get(p) {
                Some(element) => element.next.clone(),
                None => {
                    warn!(prev = %p, "mapping points at an id missing from the store");
                    return;
                }
            },
            // No live predecessor: the new element becomes the head,
            // in front of any leading tombstones.
            None => self.store.head().cloned(),
        };

        let element = Element::new(id.clone(), prev.clone(), next.clone(), value, false);
        if let Err(e) = self.store.insert(element.clone()) {
            warn!(error = %e, "local insert collided with an existing id");
            return;
        }
        if let Some(p) = &prev {
            if let Err(e) = self.store.set_next(p, Some(id.clone())) {
                debug_assert!(false, "predecessor vanished mid-splice: {e}");
                warn!(error = %e, "predecessor link update failed");
            }
        }
        if let Some(n) = &next {
            if let Err(e) = self.store.set_prev(n, Some(id.clone())) {
                debug_assert!(false, "successor vanished mid-splice: {e}");
                warn!(error = %e, "successor link update failed");
            }
        }
        if let Err(e) = self.mapping.update(line, col, id, &mut self.store) {
            warn!(error = %e, "mapping update failed after local insert");
        }

        let op = ElementOp::from_element(&self.identity.session_id, &self.identity.user_id, &element);
        self.pending.push(op.clone());
        self.outbox.push(op);
    }

    fn apply_delete(&mut self, event: ChangeEvent) {
        let Pos { line, col } = event.from;
        let Some(id) = self.mapping.get(line, col).cloned() else {
            // Nothing mapped there, e.g. backspace in an empty snippet.
            return;
        };
        if let Err(e) = self.store.mark_deleted(&id) {
            warn!(error = %e, "delete target missing from the store");
            return;
        }
        self.mapping.remove_at(line, col, &self.store);
        if let Some(element) = self.store.get(&id) {
            let op =
                ElementOp::from_element(&self.identity.session_id, &self.identity.user_id, element);
            self.pending.push(op.clone());
            self.outbox.push(op);
        }
    }

    /// Resolve the ids covered by the span `[from, to)` by walking the
    /// mapping cell by cell, wrapping at line ends.
    fn affected_ids(&self, from: Pos, to: Pos) -> Vec<ElementId> {
        let mut ids = Vec::new();
        let (mut line, mut col) = (from.line, from.col);
        loop {
            if line > to.line || (line == to.line && col >= to.col) {
                break;
            }
            match self.mapping.get(line, col) {
                Some(id) => {
                    ids.push(id.clone());
                    col += 1;
                }
                None => {
                    if col == 0 || line >= to.line {
                        break;
                    }
                    line += 1;
                    col = 0;
                }
            }
        }
        ids
    }

    /// Delete one element located by id instead of position. Spanning
    /// deletions use this so earlier removals shifting the mapping
    /// cannot skew later ones. These ops skip the pending cache: their
    /// effect is derivable from the ids already being tombstoned.
    fn delete_by_id(&mut self, id: &ElementId) {
        let Some((line, col)) = self.mapping.position_of(id) else {
            debug!(%id, "spanning delete target already gone");
            return;
        };
        if let Err(e) = self.store.mark_deleted(id) {
            warn!(error = %e, "spanning delete target missing from the store");
            return;
        }
        self.mapping.remove_at(line, col, &self.store);
        if let Some(element) = self.store.get(id) {
            let op =
                ElementOp::from_element(&self.identity.session_id, &self.identity.user_id, element);
            self.outbox.push(op);
        }
    }

    /// Pasted text can smuggle carriage returns into the buffer; strip
    /// them so columns keep matching mapping cells.
    fn clean_stray_carriage_returns(&mut self) {
        for line in 0..self.editor.line_count() {
            let strays: Vec<usize> = match self.editor.line(line) {
                Some(text) => text
                    .chars()
                    .enumerate()
                    .filter(|(_, c)| *c == '\r')
                    .map(|(col, _)| col)
                    .collect(),
                None => Vec::new(),
            };
            for col in strays.into_iter().rev() {
                self.editor.apply_edit(
                    "",
                    Pos::new(line, col),
                    Pos::new(line, col + 1),
                    ChangeOrigin::Ignore,
                );
            }
        }
    }

    fn verify(&mut self) {
        if let Some(divergence) = sequence::check_consistency(&self.store, &self.editor.text()) {
            let history = serde_json::to_string(&self.op_history).unwrap_or_default();
            warn!(
                chain = %divergence.chain,
                editor = %divergence.editor,
                %history,
                "replica state diverged"
            );
            self.notices.push(Notice::Divergence {
                chain: divergence.chain,
                editor: divergence.editor,
            });
            self.op_history.clear();
        }
    }
}
