//! The client event loop: one task, one consumer, every state mutation
//! funnels through it. Editor commands, socket traffic and recovery all
//! interleave here and nowhere else.

use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{error, info, warn};

use quilt_crdt::Inbound;

use crate::api::WorkerApi;
use crate::config::ClientConfig;
use crate::editor::{EditorSurface, Pos, TextBuffer};
use crate::error::Result;
use crate::recovery::{OpenAction, RecoveryController};
use crate::session::{Notice, SessionIdentity, Workspace};
use crate::transport::{TransportEvent, WsTransport};

/// What the surrounding application can ask the client to do.
#[derive(Debug, Clone)]
pub enum Command {
    /// Insert text. `pos: None` appends at the end of the snippet.
    Insert { pos: Option<Pos>, text: String },
    /// Delete the span `[from, to)`.
    Delete { from: Pos, to: Pos },
    /// Leave the session and shut down.
    Close,
}

pub struct CollabClient {
    config: ClientConfig,
    api: WorkerApi,
    workspace: Workspace<TextBuffer>,
    recovery: RecoveryController,
    worker: String,
    transport: Option<WsTransport>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    notices: mpsc::UnboundedSender<Notice>,
    text: watch::Sender<String>,
}

impl CollabClient {
    /// Register with the app server, join the session's worker and
    /// return the client plus its notice stream and a watch over the
    /// rendered snippet text.
    pub async fn connect(
        config: ClientConfig,
        user_id: String,
        session_id: String,
    ) -> Result<(
        Self,
        mpsc::UnboundedReceiver<Notice>,
        watch::Receiver<String>,
    )> {
        let api = WorkerApi::new(&config)?;
        let recovery = RecoveryController::new(config.retry_interval);
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let (text_tx, text_rx) = watch::channel(String::new());
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        let forward = notices_tx.clone();
        let worker = recovery
            .acquire_worker(&api, &user_id, &session_id, move |notice| {
                let _ = forward.send(notice);
            })
            .await?;

        let identity = SessionIdentity {
            session_id,
            user_id,
        };
        let workspace = Workspace::new(identity, TextBuffer::new(), config.consistency_checks);

        let mut client = Self {
            config,
            api,
            workspace,
            recovery,
            worker,
            transport: None,
            transport_tx,
            transport_rx,
            notices: notices_tx,
            text: text_tx,
        };
        client.connect_transport().await;
        Ok((client, notices_rx, text_rx))
    }

    /// Drive the session until `Close` (or the command channel drops).
    pub async fn run(&mut self, mut commands: mpsc::UnboundedReceiver<Command>) -> Result<()> {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(Command::Close) => {
                        self.shutdown().await;
                        return Ok(());
                    }
                    Some(Command::Insert { pos, text }) => {
                        let at = pos.unwrap_or_else(|| self.workspace.editor().end());
                        self.workspace.insert_local(at, &text);
                        self.after_workspace_activity().await;
                    }
                    Some(Command::Delete { from, to }) => {
                        self.workspace.delete_local(from, to);
                        self.after_workspace_activity().await;
                    }
                },
                event = self.transport_rx.recv() => {
                    // The loop holds a sender clone, so recv never ends.
                    if let Some(event) = event {
                        self.on_transport_event(event).await?;
                    }
                }
            }
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::Opened => {
                match self.recovery.on_transport_open() {
                    OpenAction::InitSession => self.init_session().await,
                    OpenAction::FlushPending => {
                        self.flush_pending().await;
                        let _ = self.notices.send(Notice::Reconnected);
                    }
                }
                self.after_workspace_activity().await;
            }
            TransportEvent::Message(payload) => {
                match Inbound::parse(&payload) {
                    Ok(inbound) => self.workspace.apply_inbound(inbound),
                    Err(e) => warn!(error = %e, "dropping unparseable frame"),
                }
                self.after_workspace_activity().await;
            }
            TransportEvent::Closed(reason) | TransportEvent::Error(reason) => {
                self.transport = None;
                if let Some(notice) = self.recovery.on_transport_lost(&reason) {
                    let _ = self.notices.send(notice);
                }
                self.recover().await;
            }
        }
        Ok(())
    }

    /// First connection: seed the replica from the persisted snapshot.
    async fn init_session(&mut self) {
        let identity = self.workspace.identity().clone();
        let snapshot = loop {
            match self
                .api
                .fetch_session(&self.worker, &identity.session_id)
                .await
            {
                Ok(snapshot) => break snapshot,
                Err(e) => {
                    warn!(error = %e, "session snapshot fetch failed, retrying");
                    sleep(self.config.retry_interval).await;
                }
            }
        };
        for log in &snapshot.log_record {
            let _ = self.notices.send(Notice::JobOutput(log.clone()));
        }
        match snapshot.into_elements() {
            Ok(elements) => {
                info!(elements = elements.len(), "session initialized");
                self.workspace.load_snapshot(elements);
            }
            Err(e) => error!(error = %e, "session snapshot rejected"),
        }
    }

    /// Lost the worker: re-register, replay the session history through
    /// reconciliation, reconnect. Loops until all three succeed.
    async fn recover(&mut self) {
        self.recovery.begin_recovery();
        let identity = self.workspace.identity().clone();
        loop {
            let forward = self.notices.clone();
            let worker = match self
                .recovery
                .acquire_worker(&self.api, &identity.user_id, &identity.session_id, move |n| {
                    let _ = forward.send(n);
                })
                .await
            {
                Ok(worker) => worker,
                Err(e) => {
                    warn!(error = %e, "worker acquisition failed, retrying");
                    sleep(self.config.retry_interval).await;
                    continue;
                }
            };
            self.worker = worker;

            match self
                .api
                .fetch_recover(&self.worker, &identity.session_id)
                .await
            {
                Ok(history) => {
                    info!(ops = history.session.len(), "replaying session history");
                    for op in history.session {
                        self.workspace.apply_remote(op);
                    }
                    for log in history.log_record {
                        let _ = self.notices.send(Notice::JobOutput(log));
                    }
                    self.after_workspace_activity().await;
                }
                Err(e) => {
                    warn!(error = %e, "history fetch failed, retrying");
                    sleep(self.config.retry_interval).await;
                    continue;
                }
            }

            self.connect_transport().await;
            return;
        }
    }

    /// Dial the current worker's socket, retrying on the flat interval.
    /// The resulting `Opened` event drives snapshot init or pending
    /// flush back on the main loop.
    async fn connect_transport(&mut self) {
        let identity = self.workspace.identity().clone();
        loop {
            match WsTransport::connect(
                &self.worker,
                &identity.user_id,
                &identity.session_id,
                self.transport_tx.clone(),
            )
            .await
            {
                Ok(transport) => {
                    self.transport = Some(transport);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "socket dial failed, retrying");
                    sleep(self.config.retry_interval).await;
                }
            }
        }
    }

    /// Resend everything the worker never echoed back. Remote
    /// application is idempotent, so over-sending is safe.
    async fn flush_pending(&mut self) {
        let ops = self.workspace.pending_ops();
        if ops.is_empty() {
            return;
        }
        info!(ops = ops.len(), "flushing pending operations");
        if let Some(transport) = self.transport.as_mut() {
            for op in &ops {
                if let Err(e) = transport.send(op).await {
                    warn!(error = %e, "pending flush interrupted");
                    return;
                }
            }
        }
    }

    /// Forward notices, ship the outbox, publish the rendered text.
    ///
    /// The outbox is only taken while connected: ops made during an
    /// outage (spanning deletes have no pending-cache copy) stay
    /// queued and go out after the pending flush on reconnect.
    async fn after_workspace_activity(&mut self) {
        for notice in self.workspace.take_notices() {
            let _ = self.notices.send(notice);
        }
        if self.recovery.is_connected() && self.transport.is_some() {
            let mut ops = self.workspace.take_outbox().into_iter();
            if let Some(transport) = self.transport.as_mut() {
                while let Some(op) = ops.next() {
                    if let Err(e) = transport.send(&op).await {
                        warn!(error = %e, "send failed, ops stay queued");
                        let mut unsent = vec![op];
                        unsent.extend(ops);
                        self.workspace.requeue_outbox(unsent);
                        break;
                    }
                }
            }
        } else if self.workspace.outbox_len() > 0 {
            info!(
                ops = self.workspace.outbox_len(),
                "outbound paused while disconnected"
            );
        }
        self.text.send_replace(self.workspace.text());
    }

    async fn shutdown(&mut self) {
        let identity = self.workspace.identity().clone();
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.api
            .close_session(&self.worker, &identity.user_id, &identity.session_id)
            .await;
        info!("session closed");
    }

    pub fn text_snapshot(&self) -> String {
        self.workspace.text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use quilt_crdt::ElementOp;
    use tokio_tungstenite::tungstenite::Message;

    fn offline_client() -> (CollabClient, mpsc::UnboundedReceiver<Notice>) {
        let config = ClientConfig::default();
        let api = WorkerApi::new(&config).expect("http client");
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let (text_tx, _) = watch::channel(String::new());
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let workspace = Workspace::new(
            SessionIdentity {
                session_id: "s1".to_string(),
                user_id: "alice".to_string(),
            },
            TextBuffer::new(),
            false,
        );
        let client = CollabClient {
            recovery: RecoveryController::new(config.retry_interval),
            config,
            api,
            workspace,
            worker: "127.0.0.1:0".to_string(),
            transport: None,
            transport_tx,
            transport_rx,
            notices: notices_tx,
            text: text_tx,
        };
        (client, notices_rx)
    }

    #[tokio::test]
    async fn outbox_survives_an_outage() {
        let (mut client, _notices) = offline_client();

        client.workspace.insert_local(Pos::new(0, 0), "abcd");
        client.after_workspace_activity().await;
        assert_eq!(client.workspace.outbox_len(), 4);

        // Spanning deletes live only in the outbox; they must not be
        // dropped while the socket is down.
        client
            .workspace
            .delete_local(Pos::new(0, 1), Pos::new(0, 3));
        client.after_workspace_activity().await;

        assert_eq!(client.workspace.outbox_len(), 6);
        let deletes = client
            .workspace
            .take_outbox()
            .into_iter()
            .filter(|op| op.deleted)
            .count();
        assert_eq!(deletes, 2);
    }

    #[tokio::test]
    async fn reconnect_drains_the_accumulated_outbox() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream)
                .await
                .expect("handshake");
            let mut frames = Vec::new();
            while frames.len() < 2 {
                match ws.next().await.expect("frame").expect("frame ok") {
                    Message::Text(text) => frames.push(text),
                    _ => {}
                }
            }
            frames
        });

        let (mut client, _notices) = offline_client();
        client.workspace.insert_local(Pos::new(0, 0), "abcd");
        client.workspace.take_outbox();
        client
            .workspace
            .delete_local(Pos::new(0, 1), Pos::new(0, 3));
        client.after_workspace_activity().await;
        assert_eq!(client.workspace.outbox_len(), 2);

        let transport = WsTransport::connect(
            &addr.to_string(),
            "alice",
            "s1",
            client.transport_tx.clone(),
        )
        .await
        .expect("dial");
        client.transport = Some(transport);
        client.recovery.on_transport_open();
        client.after_workspace_activity().await;
        assert_eq!(client.workspace.outbox_len(), 0);

        let frames = server.await.expect("server task");
        for frame in frames {
            let op: ElementOp = serde_json::from_str(&frame).expect("op");
            assert!(op.deleted);
        }
    }
}
