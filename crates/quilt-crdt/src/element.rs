use crate::id::ElementId;

/// The value marking a line break in the sequence.
pub const LINE_BREAK: char = '\n';

/// One atomic unit of snippet content: a single character or a line break.
///
/// Elements are never destroyed. Deletion only sets the tombstone flag, so
/// the chain keeps its shape for anchoring concurrent remote inserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub id: ElementId,
    /// Logical predecessor; `None` marks the chain head.
    pub prev: Option<ElementId>,
    /// Logical successor; `None` marks the chain tail.
    pub next: Option<ElementId>,
    pub value: char,
    pub deleted: bool,
}

impl Element {
    pub fn new(
        id: ElementId,
        prev: Option<ElementId>,
        next: Option<ElementId>,
        value: char,
        deleted: bool,
    ) -> Self {
        Self {
            id,
            prev,
            next,
            value,
            deleted,
        }
    }

    pub fn is_line_break(&self) -> bool {
        self.value == LINE_BREAK
    }
}
