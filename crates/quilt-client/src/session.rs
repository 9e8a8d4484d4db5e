//! Session state: one [`Workspace`] per open snippet.

use std::collections::{HashMap, VecDeque};

use quilt_crdt::{
    sequence, Element, ElementId, ElementOp, ElementStore, IdGenerator, JobLog, Mapping,
};
use tracing::warn;

use crate::cache::PendingCache;
use crate::editor::{ChangeEvent, ChangeOrigin, EditorSurface, Pos};

/// Identity of this replica within a session.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub session_id: String,
    pub user_id: String,
}

/// State changes the surrounding application should surface to the user.
#[derive(Debug, Clone)]
pub enum Notice {
    Disconnected,
    Reconnected,
    NoWorker,
    Divergence { chain: String, editor: String },
    JobOutput(JobLog),
}

/// Everything one replica of a snippet owns: the element chain, the
/// derived positional mapping, the editor surface, and the outbound
/// bookkeeping. The operation pipeline and remote reconciliation are
/// implemented as further `impl` blocks in [`crate::pipeline`] and
/// [`crate::remote`].
pub struct Workspace<E: EditorSurface> {
    pub(crate) identity: SessionIdentity,
    pub(crate) store: ElementStore,
    pub(crate) mapping: Mapping,
    pub(crate) ids: IdGenerator,
    pub(crate) editor: E,
    pub(crate) pending: PendingCache,
    pub(crate) queue: VecDeque<ChangeEvent>,
    pub(crate) draining: bool,
    /// Remote ops waiting for their anchor element to arrive.
    pub(crate) deferred: HashMap<ElementId, Vec<ElementOp>>,
    pub(crate) outbox: Vec<ElementOp>,
    pub(crate) notices: Vec<Notice>,
    pub(crate) consistency_checks: bool,
    /// Drained events kept for the divergence report. Only populated
    /// when consistency checks are on.
    pub(crate) op_history: Vec<ChangeEvent>,
}

impl<E: EditorSurface> Workspace<E> {
    pub fn new(identity: SessionIdentity, editor: E, consistency_checks: bool) -> Self {
        let ids = IdGenerator::new(identity.user_id.clone());
        Self {
            identity,
            store: ElementStore::new(),
            mapping: Mapping::new(),
            ids,
            editor,
            pending: PendingCache::new(),
            queue: VecDeque::new(),
            draining: false,
            deferred: HashMap::new(),
            outbox: Vec::new(),
            notices: Vec::new(),
            consistency_checks,
            op_history: Vec::new(),
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    pub fn store(&self) -> &ElementStore {
        &self.store
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn text(&self) -> String {
        self.editor.text()
    }

    /// Ops produced since the last take, in send order.
    pub fn take_outbox(&mut self) -> Vec<ElementOp> {
        std::mem::take(&mut self.outbox)
    }

    /// Put taken-but-unsent ops back at the front of the outbox,
    /// keeping send order intact.
    pub fn requeue_outbox(&mut self, ops: Vec<ElementOp>) {
        self.outbox.splice(0..0, ops);
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn pending_ops(&self) -> Vec<ElementOp> {
        self.pending.snapshot()
    }

    /// Apply local typing at `pos`. Multi-character or multi-line text
    /// goes through paste decomposition.
    pub fn insert_local(&mut self, pos: Pos, text: &str) {
        if text.is_empty() {
            return;
        }
        let origin = if text.chars().nth(1).is_some() {
            ChangeOrigin::Paste
        } else {
            ChangeOrigin::Input
        };
        let event = self.editor.apply_edit(text, pos, pos, origin);
        self.handle_change(event);
    }

    /// Delete the span `[from, to)` from the local editor.
    pub fn delete_local(&mut self, from: Pos, to: Pos) {
        if from == to {
            return;
        }
        let event = self.editor.apply_edit("", from, to, ChangeOrigin::Delete);
        self.handle_change(event);
    }

    /// Seed the replica from a persisted session snapshot: elements in
    /// chain order, head first. Replaces editor content wholesale.
    pub fn load_snapshot(&mut self, elements: Vec<Element>) {
        for element in elements {
            if let Err(e) = self.store.insert(element) {
                warn!(error = %e, "skipping snapshot element");
            }
        }
        self.mapping = sequence::rebuild_mapping(&self.store);
        let text = sequence::to_text(&self.store);
        let end = self.editor.end();
        self.editor
            .apply_edit(&text, Pos::new(0, 0), end, ChangeOrigin::Ignore);
    }
}
