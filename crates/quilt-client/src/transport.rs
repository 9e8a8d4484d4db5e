//! WebSocket boundary. The read half is pumped into an `mpsc` channel
//! so the client's single consumer loop stays the only place state is
//! touched; the write half lives behind [`WsTransport::send`].

use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use quilt_crdt::ElementOp;

use crate::error::{ClientError, Result};

/// What the socket read pump reports back to the event loop.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed(String),
    Error(String),
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub struct WsTransport {
    sink: WsSink,
}

impl WsTransport {
    /// Connect to a worker's session socket and spawn the read pump.
    /// Events, including the initial `Opened`, arrive on `events`.
    pub async fn connect(
        worker: &str,
        user_id: &str,
        session_id: &str,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self> {
        let url = format!("ws://{worker}/ws?userID={user_id}&sessionID={session_id}");
        let (stream, _) = connect_async(&url)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let (sink, mut read) = stream.split();

        let _ = events.send(TransportEvent::Opened);
        tokio::spawn(async move {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(payload))) => {
                        if events.send(TransportEvent::Message(payload)).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "close frame".to_string());
                        let _ = events.send(TransportEvent::Closed(reason));
                        return;
                    }
                    Some(Ok(other)) => {
                        debug!(frame = ?other, "ignoring non-text frame");
                    }
                    Some(Err(e)) => {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                    None => {
                        let _ = events.send(TransportEvent::Closed("stream ended".to_string()));
                        return;
                    }
                }
            }
        });

        Ok(Self { sink })
    }

    /// Serialize one element op and push it onto the socket.
    pub async fn send(&mut self, op: &ElementOp) -> Result<()> {
        let payload = serde_json::to_string(op)?;
        self.sink
            .send(Message::Text(payload))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    pub async fn close(mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
    }
}
