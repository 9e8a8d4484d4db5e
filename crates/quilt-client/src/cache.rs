use quilt_crdt::{ElementId, ElementOp};

/// Operations sent to the worker but not yet echoed back.
///
/// Every single-element local operation lands here before it goes out
/// on the wire. When the worker broadcasts an op back, the matching
/// entry is acknowledged and dropped. Whatever is still cached when a
/// connection is re-established is flushed again, which together with
/// idempotent remote application makes resends harmless.
#[derive(Debug, Default)]
pub struct PendingCache {
    ops: Vec<ElementOp>,
}

impl PendingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: ElementOp) {
        self.ops.push(op);
    }

    /// Drop the first cached op matching the echoed id and delete flag.
    /// Returns whether anything was acknowledged.
    pub fn acknowledge(&mut self, id: &ElementId, deleted: bool) -> bool {
        match self
            .ops
            .iter()
            .position(|op| op.id == *id && op.deleted == deleted)
        {
            Some(at) => {
                self.ops.remove(at);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<ElementOp> {
        self.ops.clone()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
