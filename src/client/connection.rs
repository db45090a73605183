// WebSocket connection management for Parley
// Contains connect, disconnect, and the reader/writer tasks for ChatClient

use futures_util::{SinkExt, StreamExt};
use log::{error, info};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex as TokioMutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{ChatClient, ClientError, ClientShared};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Enum for representing client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Connected,
    Disconnected,
}

impl ChatClient {
    /// Open the transport and start the reader and writer tasks. Fails
    /// fast when the endpoint refuses; retry policy belongs to the
    /// supervisor, not here.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let ws = open(url).await?;
        info!("Connected to chat engine at {}", url);
        let (mut sink, mut stream) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(100);
        let (state_tx, _state_rx) = watch::channel(ClientState::Connected);
        let shared = Arc::new(ClientShared::new(state_tx));

        // Writer: drains queued frames until every sender is gone, then
        // closes the sink.
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    error!("Failed to send command frame: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader: one dispatch per inbound frame, run to completion, in
        // arrival order. A close frame or transport error ends the
        // session and fails whatever is still pending.
        let reader_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => reader_shared.dispatch(&text).await,
                    Ok(Message::Close(_)) => {
                        info!("Engine closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Transport error: {}", e);
                        break;
                    }
                }
            }
            reader_shared.shutdown().await;
        });

        Ok(ChatClient {
            corr_id: AtomicU64::new(0),
            next_subscription: AtomicU64::new(0),
            shared,
            outbound: TokioMutex::new(Some(outbound_tx)),
        })
    }

    /// Close the transport and mark the client unusable. Suspended
    /// `await_response` callers resolve with `Disconnected` rather than
    /// hanging.
    pub async fn disconnect(&self) {
        info!("Disconnecting from chat engine");
        self.outbound.lock().await.take();
        self.shared.shutdown().await;
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.state_tx.borrow() == ClientState::Connected
    }

    /// Watch the connection state; the supervisor uses this to observe
    /// the transport closing underneath it.
    pub fn state(&self) -> watch::Receiver<ClientState> {
        self.shared.state_tx.subscribe()
    }
}

async fn open(url: &str) -> Result<WsStream, ClientError> {
    let (ws, _) = connect_async(url).await.map_err(|e| ClientError::Connect {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    Ok(ws)
}
