//! HTTP surface of the app server and the session workers.

use serde::Deserialize;
use tracing::{debug, warn};

use quilt_crdt::{RecoverResponse, SessionSnapshot};

use crate::config::ClientConfig;
use crate::error::Result;

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    #[serde(rename = "WorkerIP", default)]
    worker_ip: String,
}

/// Thin client for worker registration and session state fetches.
#[derive(Debug, Clone)]
pub struct WorkerApi {
    http: reqwest::Client,
    app_server: String,
}

impl WorkerApi {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            app_server: config.app_server.trim_end_matches('/').to_string(),
        })
    }

    /// Ask the app server for a worker owning this session. `None`
    /// means no worker is currently available and the caller should
    /// retry later.
    pub async fn register(&self, user_id: &str, session_id: &str) -> Result<Option<String>> {
        let response: RegisterResponse = self
            .http
            .post(format!("{}/register", self.app_server))
            .query(&[("userID", user_id), ("sessionID", session_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if response.worker_ip.is_empty() {
            return Ok(None);
        }
        debug!(worker = %response.worker_ip, "registered with worker");
        Ok(Some(response.worker_ip))
    }

    /// Fetch the persisted session snapshot from its worker.
    pub async fn fetch_session(&self, worker: &str, session_id: &str) -> Result<SessionSnapshot> {
        let snapshot = self
            .http
            .get(format!("http://{worker}/session"))
            .query(&[("sessionID", session_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(snapshot)
    }

    /// Fetch the session's op history for replay after a reconnect.
    pub async fn fetch_recover(&self, worker: &str, session_id: &str) -> Result<RecoverResponse> {
        let history = self
            .http
            .get(format!("http://{worker}/recover"))
            .query(&[("sessionID", session_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(history)
    }

    /// Tell the worker this replica is leaving. Best effort: a failure
    /// only costs the worker an idle-session timeout.
    pub async fn close_session(&self, worker: &str, user_id: &str, session_id: &str) {
        let result = self
            .http
            .post(format!("http://{worker}/session"))
            .query(&[("userID", user_id), ("sessionID", session_id)])
            .send()
            .await;
        if let Err(e) = result {
            warn!(error = %e, "session close notification failed");
        }
    }
}
