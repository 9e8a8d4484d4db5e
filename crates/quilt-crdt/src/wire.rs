//! Wire records exchanged with the worker and, through it, with peers.
//!
//! Field names match the legacy JSON protocol exactly (`SessionID`, `ID`,
//! `PrevID`, ...). The empty string is the wire sentinel for an absent link —
//! it is translated to `None` at the boundary and never treated as an id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::element::Element;
use crate::error::{CrdtError, Result};
use crate::id::ElementId;

mod opt_id {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::id::ElementId;

    pub fn serialize<S: Serializer>(
        value: &Option<ElementId>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(id) => serializer.serialize_str(&id.to_string()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<ElementId>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse().map(Some).map_err(serde::de::Error::custom)
    }
}

/// One element operation on the wire: an insertion (`Deleted == false`) or a
/// deletion of a previously inserted element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementOp {
    #[serde(rename = "SessionID")]
    pub session_id: String,
    #[serde(rename = "ClientID", default)]
    pub client_id: String,
    #[serde(rename = "ID")]
    pub id: ElementId,
    #[serde(rename = "PrevID", with = "opt_id")]
    pub prev_id: Option<ElementId>,
    #[serde(rename = "Text")]
    pub text: String,
    #[serde(rename = "Deleted")]
    pub deleted: bool,
}

impl ElementOp {
    pub fn from_element(session_id: &str, client_id: &str, element: &Element) -> Self {
        Self {
            session_id: session_id.to_string(),
            client_id: client_id.to_string(),
            id: element.id.clone(),
            prev_id: element.prev.clone(),
            text: element.value.to_string(),
            deleted: element.deleted,
        }
    }

    /// The single character this op carries.
    pub fn value(&self) -> Result<char> {
        let mut chars = self.text.chars();
        let value = chars
            .next()
            .ok_or_else(|| CrdtError::Protocol(format!("empty Text in op {}", self.id)))?;
        if chars.next().is_some() {
            return Err(CrdtError::Protocol(format!(
                "multi-character Text {:?} in op {}",
                self.text, self.id
            )));
        }
        Ok(value)
    }
}

/// A remote-execution job record, routed to the job-log surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(rename = "JobID")]
    pub job_id: String,
    #[serde(rename = "SessionID")]
    pub session_id: String,
    #[serde(rename = "Snippet")]
    pub snippet: String,
    #[serde(rename = "Done")]
    pub done: bool,
}

/// A job-log notification: job record plus its captured output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLog {
    #[serde(rename = "Job")]
    pub job: JobRecord,
    #[serde(rename = "Output")]
    pub output: String,
}

/// Every message a worker can push over the socket. Malformed payloads are a
/// protocol error, never silently misrouted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Job(JobLog),
    Element(ElementOp),
}

impl Inbound {
    pub fn parse(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| CrdtError::Protocol(format!("unrecognized payload: {e}")))
    }
}

/// One element as persisted in the worker's session snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotElement {
    #[serde(rename = "PrevID", with = "opt_id")]
    pub prev_id: Option<ElementId>,
    #[serde(rename = "NextID", with = "opt_id")]
    pub next_id: Option<ElementId>,
    #[serde(rename = "Text")]
    pub text: String,
    #[serde(rename = "Deleted")]
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(rename = "CRDT", default)]
    pub crdt: HashMap<String, SnapshotElement>,
}

/// Response of `GET /session`: the full persisted element map plus the log of
/// past execution jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(rename = "SessionRecord")]
    pub session_record: SessionRecord,
    #[serde(rename = "LogRecord", default)]
    pub log_record: Vec<JobLog>,
}

impl SessionSnapshot {
    /// Translates the snapshot map into elements in chain order, head first.
    /// Tombstoned elements are kept: they carry the chain's shape.
    pub fn into_elements(self) -> Result<Vec<Element>> {
        let mut by_id: HashMap<ElementId, SnapshotElement> = HashMap::new();
        for (raw_id, snap) in self.session_record.crdt {
            by_id.insert(raw_id.parse()?, snap);
        }
        if by_id.is_empty() {
            return Ok(Vec::new());
        }

        let head = by_id
            .iter()
            .find(|(_, snap)| snap.prev_id.is_none())
            .map(|(id, _)| id.clone())
            .ok_or_else(|| CrdtError::Protocol("snapshot has no head element".into()))?;

        let mut elements = Vec::with_capacity(by_id.len());
        let mut cursor = Some(head);
        while let Some(id) = cursor {
            if elements.len() > by_id.len() {
                return Err(CrdtError::Protocol("snapshot chain contains a cycle".into()));
            }
            let snap = by_id
                .get(&id)
                .ok_or_else(|| CrdtError::Protocol(format!("snapshot link to unknown id {id}")))?;
            let value = snap.text.chars().next().ok_or_else(|| {
                CrdtError::Protocol(format!("empty Text in snapshot element {id}"))
            })?;
            cursor = snap.next_id.clone();
            elements.push(Element::new(
                id,
                snap.prev_id.clone(),
                snap.next_id.clone(),
                value,
                snap.deleted,
            ));
        }

        if elements.len() != by_id.len() {
            warn!(
                reachable = elements.len(),
                total = by_id.len(),
                "snapshot contains elements unreachable from head"
            );
        }
        Ok(elements)
    }
}

/// Response of `GET /recover`: the session history as replayable element ops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverResponse {
    #[serde(rename = "Session", default)]
    pub session: Vec<ElementOp>,
    #[serde(rename = "LogRecord", default)]
    pub log_record: Vec<JobLog>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_op_uses_legacy_field_names() {
        let op = ElementOp {
            session_id: "s1".into(),
            client_id: "alice".into(),
            id: ElementId::new("alice", 7, 0),
            prev_id: None,
            text: "x".into(),
            deleted: false,
        };
        let json: serde_json::Value = serde_json::to_value(&op).unwrap();
        assert_eq!(json["SessionID"], "s1");
        assert_eq!(json["ClientID"], "alice");
        assert_eq!(json["ID"], "alice_7_0");
        assert_eq!(json["PrevID"], "");
        assert_eq!(json["Text"], "x");
        assert_eq!(json["Deleted"], false);
    }

    #[test]
    fn empty_prev_id_is_none() {
        let raw = r#"{"SessionID":"s1","ClientID":"bob","ID":"bob_9_0","PrevID":"","Text":"\n","Deleted":false}"#;
        let op: ElementOp = serde_json::from_str(raw).unwrap();
        assert_eq!(op.prev_id, None);
        assert_eq!(op.value().unwrap(), '\n');

        let raw = r#"{"SessionID":"s1","ClientID":"bob","ID":"bob_9_1","PrevID":"bob_9_0","Text":"a","Deleted":true}"#;
        let op: ElementOp = serde_json::from_str(raw).unwrap();
        assert_eq!(op.prev_id, Some(ElementId::new("bob", 9, 0)));
        assert!(op.deleted);
    }

    #[test]
    fn inbound_routes_jobs_and_elements() {
        let job = r#"{"Job":{"JobID":"j1","SessionID":"s1","Snippet":"print","Done":true},"Output":"ok"}"#;
        assert!(matches!(Inbound::parse(job).unwrap(), Inbound::Job(_)));

        let element = r#"{"SessionID":"s1","ClientID":"c","ID":"c_1_0","PrevID":"","Text":"a","Deleted":false}"#;
        assert!(matches!(
            Inbound::parse(element).unwrap(),
            Inbound::Element(_)
        ));

        assert!(Inbound::parse(r#"{"nonsense":1}"#).is_err());
        assert!(Inbound::parse("not json").is_err());
    }

    #[test]
    fn snapshot_walks_chain_from_head() {
        let raw = r#"{
            "SessionRecord": {"CRDT": {
                "a_2_0": {"PrevID": "a_1_0", "NextID": "a_3_0", "Text": "b", "Deleted": true},
                "a_1_0": {"PrevID": "", "NextID": "a_2_0", "Text": "a", "Deleted": false},
                "a_3_0": {"PrevID": "a_2_0", "NextID": "", "Text": "c", "Deleted": false}
            }},
            "LogRecord": []
        }"#;
        let snapshot: SessionSnapshot = serde_json::from_str(raw).unwrap();
        let elements = snapshot.into_elements().unwrap();
        let values: String = elements.iter().map(|e| e.value).collect();
        assert_eq!(values, "abc");
        assert!(elements[0].prev.is_none());
        assert!(elements[1].deleted);
    }

    #[test]
    fn snapshot_without_head_is_protocol_error() {
        let raw = r#"{
            "SessionRecord": {"CRDT": {
                "a_1_0": {"PrevID": "a_9_0", "NextID": "", "Text": "a", "Deleted": false}
            }}
        }"#;
        let snapshot: SessionSnapshot = serde_json::from_str(raw).unwrap();
        assert!(snapshot.into_elements().is_err());
    }
}
