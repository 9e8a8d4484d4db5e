//! Connection-loss state machine. The event loop drives it; it decides
//! what reconnection work is due and keeps the user-facing alerts
//! idempotent across repeated socket failures.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::api::WorkerApi;
use crate::error::Result;
use crate::session::Notice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connected,
    Disconnected,
    Recovering,
}

/// What to do when a (re)opened socket reports `Opened`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAction {
    /// First connection of this replica: seed from the session snapshot.
    InitSession,
    /// Reconnection: resend whatever the pending cache still holds.
    FlushPending,
}

pub struct RecoveryController {
    state: ConnState,
    connected_before: bool,
    alerted: bool,
    retry_interval: Duration,
}

impl RecoveryController {
    pub fn new(retry_interval: Duration) -> Self {
        Self {
            state: ConnState::Disconnected,
            connected_before: false,
            alerted: false,
            retry_interval,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnState::Connected
    }

    /// The socket dropped. Returns the `Disconnected` notice exactly
    /// once per outage, however many close/error events the socket
    /// produces on its way down.
    pub fn on_transport_lost(&mut self, reason: &str) -> Option<Notice> {
        warn!(%reason, "connection to worker lost");
        self.state = ConnState::Disconnected;
        if self.alerted {
            None
        } else {
            self.alerted = true;
            Some(Notice::Disconnected)
        }
    }

    pub fn begin_recovery(&mut self) {
        self.state = ConnState::Recovering;
    }

    /// The socket (re)opened. Decides between snapshot init and pending
    /// flush, and clears the outage alert.
    pub fn on_transport_open(&mut self) -> OpenAction {
        self.state = ConnState::Connected;
        self.alerted = false;
        if self.connected_before {
            OpenAction::FlushPending
        } else {
            self.connected_before = true;
            OpenAction::InitSession
        }
    }

    /// Re-register until the app server hands out a worker address.
    /// Flat interval, no cap: the session outlives any worker outage.
    /// Emits `NoWorker` through `notify` the first time a round comes
    /// back empty.
    pub async fn acquire_worker(
        &self,
        api: &WorkerApi,
        user_id: &str,
        session_id: &str,
        mut notify: impl FnMut(Notice),
    ) -> Result<String> {
        let mut no_worker_reported = false;
        loop {
            match api.register(user_id, session_id).await {
                Ok(Some(worker)) => {
                    info!(%worker, "worker assigned");
                    return Ok(worker);
                }
                Ok(None) => {
                    if !no_worker_reported {
                        no_worker_reported = true;
                        notify(Notice::NoWorker);
                    }
                    info!("no worker available, retrying");
                }
                Err(e) => {
                    warn!(error = %e, "worker registration failed, retrying");
                }
            }
            sleep(self.retry_interval).await;
        }
    }
}
