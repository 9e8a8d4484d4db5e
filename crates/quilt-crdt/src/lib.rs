//! quilt-crdt: the replicated sequence core of Quilt.
//!
//! A snippet is a doubly-linked chain of single-character [`Element`]s with
//! tombstone deletion. Every element carries a globally ordered [`ElementId`];
//! concurrent inserts after the same anchor are tie-broken by that order, so
//! the chain converges regardless of delivery order.
//!
//! - **store**: all elements (tombstones included) keyed by id, with an
//!   explicitly maintained head pointer.
//! - **mapping**: the derived, tombstone-free (line, column) index editors
//!   operate in, kept in lockstep with the chain.
//! - **sequence**: chain traversal, derived text, and consistency checks.
//! - **wire**: the JSON records exchanged with workers and peers.
//!
//! This crate is synchronous and IO-free; the client crate owns the pipeline
//! and network plumbing around it.

pub mod element;
pub mod error;
pub mod id;
pub mod mapping;
pub mod sequence;
pub mod store;
pub mod wire;

pub use element::{Element, LINE_BREAK};
pub use error::{CrdtError, Result};
pub use id::{ElementId, IdGenerator};
pub use mapping::Mapping;
pub use store::ElementStore;
pub use wire::{ElementOp, Inbound, JobLog, JobRecord, RecoverResponse, SessionSnapshot};
