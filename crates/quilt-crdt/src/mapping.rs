//! The positional mapping: a derived 2-D index from editor (line, column)
//! coordinates to element ids.
//!
//! Only non-tombstoned elements appear here, in chain-traversal order. Line
//! breaks are themselves cells and terminate the line they sit on. The
//! mapping is a cache: it can always be rebuilt from the chain (see
//! [`crate::sequence::rebuild_mapping`]), and is maintained incrementally on
//! every mutation for performance.

use tracing::debug;

use crate::element::LINE_BREAK;
use crate::error::{CrdtError, Result};
use crate::id::ElementId;
use crate::store::ElementStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    lines: Vec<Vec<ElementId>>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, line: usize, col: usize) -> Option<&ElementId> {
        self.lines.get(line)?.get(col)
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn line_len(&self, line: usize) -> Option<usize> {
        self.lines.get(line).map(Vec::len)
    }

    /// Total number of cells across all lines.
    pub fn len(&self) -> usize {
        self.lines.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(Vec::is_empty)
    }

    pub fn lines(&self) -> &[Vec<ElementId>] {
        &self.lines
    }

    /// The id logically immediately before `(line, col)`: the previous column
    /// on the same line, else the last cell of the nearest earlier non-empty
    /// line, else none at the document start.
    pub fn preceding_id(&self, line: usize, col: usize) -> Option<&ElementId> {
        if col > 0 {
            return self.lines.get(line)?.get(col - 1);
        }
        let upto = line.min(self.lines.len());
        self.lines[..upto]
            .iter()
            .rev()
            .find_map(|cells| cells.last())
    }

    /// Splices `id` into the cell at `(line, col)`, shifting later cells
    /// right. A missing line is auto-extended; a column beyond the line end
    /// is a caller contract violation.
    pub fn insert_at(&mut self, line: usize, col: usize, id: ElementId) {
        while self.lines.len() <= line {
            self.lines.push(Vec::new());
        }
        let cells = &mut self.lines[line];
        debug_assert!(col <= cells.len(), "column {col} out of range");
        let col = col.min(cells.len());
        cells.insert(col, id);
    }

    /// The composite insertion routine.
    ///
    /// When a cell already occupies `(line, col)` and the new value is a line
    /// break, the line is split: a new line is spliced in after the current
    /// one, the occupied tail moves there, and any now-orphaned leading
    /// whitespace ids on the new line (stray auto-indent artifacts) are
    /// reclaimed by tombstoning them. The id is then inserted at the cell.
    pub fn update(
        &mut self,
        line: usize,
        col: usize,
        id: ElementId,
        store: &mut ElementStore,
    ) -> Result<()> {
        let value = store
            .get(&id)
            .ok_or_else(|| CrdtError::NotFound(id.clone()))?
            .value;

        while self.lines.len() <= line {
            self.lines.push(Vec::new());
        }

        if value == LINE_BREAK && self.lines[line].get(col).is_some() {
            let tail = self.lines[line].split_off(col);
            self.lines.insert(line + 1, tail);
            self.strip_leading_indent(line + 1, store)?;
        }

        self.insert_at(line, col, id);
        Ok(())
    }

    /// Removes the cell at `(line, col)`, shifting later cells left, and
    /// returns the removed id.
    ///
    /// Removing a line-break cell merges the following line onto this one,
    /// keeping cell order equal to chain order. A line left empty is dropped.
    pub fn remove_at(
        &mut self,
        line: usize,
        col: usize,
        store: &ElementStore,
    ) -> Option<ElementId> {
        let cells = self.lines.get_mut(line)?;
        if col >= cells.len() {
            return None;
        }
        let id = cells.remove(col);

        let was_break = store.get(&id).is_some_and(|e| e.is_line_break());
        if was_break && line + 1 < self.lines.len() {
            let following = self.lines.remove(line + 1);
            self.lines[line].extend(following);
        }
        if self.lines[line].is_empty() {
            self.lines.remove(line);
        }
        Some(id)
    }

    /// Locates `id` by linear scan. Used for remote deletions and resync.
    pub fn position_of(&self, id: &ElementId) -> Option<(usize, usize)> {
        for (line, cells) in self.lines.iter().enumerate() {
            if let Some(col) = cells.iter().position(|c| c == id) {
                return Some((line, col));
            }
        }
        None
    }

    /// Concatenates every cell's value in order. Must equal the chain's
    /// derived text at all times.
    pub fn to_text(&self, store: &ElementStore) -> String {
        let mut text = String::new();
        for cells in &self.lines {
            for id in cells {
                if let Some(element) = store.get(id) {
                    text.push(element.value);
                }
            }
        }
        text
    }

    /// Drops the leading run of whitespace cells on `line`, tombstoning the
    /// corresponding elements.
    fn strip_leading_indent(&mut self, line: usize, store: &mut ElementStore) -> Result<()> {
        let cells = &mut self.lines[line];
        let mut stripped = 0;
        while let Some(id) = cells.first() {
            let is_indent = store
                .get(id)
                .is_some_and(|e| e.value == '\t' || e.value == ' ');
            if !is_indent {
                break;
            }
            let id = cells.remove(0);
            store.mark_deleted(&id)?;
            stripped += 1;
        }
        if stripped > 0 {
            debug!(line, stripped, "reclaimed orphaned indentation");
        }
        Ok(())
    }
}
