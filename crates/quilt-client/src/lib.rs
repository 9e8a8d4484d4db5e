//! Collaborative snippet editor client.
//!
//! One [`client::CollabClient`] joins a session via the app server,
//! keeps a [`session::Workspace`] convergent with every other replica
//! through the element-chain CRDT in `quilt-crdt`, and survives worker
//! loss by replaying the session history.

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod editor;
pub mod error;
pub mod pipeline;
pub mod recovery;
pub mod remote;
pub mod session;
pub mod transport;

pub use client::{CollabClient, Command};
pub use config::ClientConfig;
pub use editor::{ChangeEvent, ChangeOrigin, EditorSurface, Pos, TextBuffer};
pub use error::{ClientError, Result};
pub use session::{Notice, SessionIdentity, Workspace};
