//! Element identifiers.
//!
//! An id is `client + millisecond clock + per-millisecond sequence`, written
//! on the wire as `"{client}_{clock}_{seq}"`. Ids are immutable, globally
//! unique with overwhelming probability, and totally ordered by
//! `(clock, client, seq)` — the order used to tie-break concurrent inserts
//! after a common anchor.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CrdtError;

/// Globally comparable identifier for one sequence element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ElementId {
    client: String,
    clock: u64,
    seq: u32,
}

impl ElementId {
    pub fn new(client: impl Into<String>, clock: u64, seq: u32) -> Self {
        Self {
            client: client.into(),
            clock,
            seq,
        }
    }

    /// The issuing client's identity.
    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }
}

impl Ord for ElementId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.clock
            .cmp(&other.clock)
            .then_with(|| self.client.cmp(&other.client))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for ElementId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.client, self.clock, self.seq)
    }
}

impl FromStr for ElementId {
    type Err = CrdtError;

    /// Parses the wire form. The client part may itself contain underscores,
    /// so the two numeric fields are taken from the right.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || CrdtError::MalformedId(s.to_string());

        let (rest, seq) = s.rsplit_once('_').ok_or_else(malformed)?;
        let (client, clock) = rest.rsplit_once('_').ok_or_else(malformed)?;
        if client.is_empty() {
            return Err(malformed());
        }

        let clock: u64 = clock.parse().map_err(|_| malformed())?;
        let seq: u32 = seq.parse().map_err(|_| malformed())?;

        Ok(Self::new(client, clock, seq))
    }
}

impl TryFrom<String> for ElementId {
    type Error = CrdtError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ElementId> for String {
    fn from(id: ElementId) -> Self {
        id.to_string()
    }
}

/// Per-replica id source. Every id returned is strictly greater, under the
/// total order, than all ids this replica has issued before.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    client: String,
    last_clock: u64,
    seq: u32,
}

impl IdGenerator {
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            last_clock: 0,
            seq: 0,
        }
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn next(&mut self) -> ElementId {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        if now > self.last_clock {
            self.last_clock = now;
            self.seq = 0;
        } else {
            // Same millisecond (or a clock step backwards): disambiguate.
            self.seq += 1;
        }
        ElementId::new(self.client.clone(), self.last_clock, self.seq)
    }
}
