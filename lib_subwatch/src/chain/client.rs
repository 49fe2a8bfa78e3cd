//! # Streaming Node Client
//!
//! The opaque streaming capability the connection supervisor drives. The
//! trait pair keeps the supervisor testable; the production implementation
//! speaks WebSocket to the node and pumps frames into a channel from a
//! background task, so consumers read a plain event sequence instead of
//! wiring callbacks.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::chain::operations::RawOperation;
use crate::chain::ChainError;

/// One item delivered by an active subscription.
#[derive(Debug)]
pub enum StreamEvent {
    /// An operation observed on a monitored account.
    Operation(RawOperation),
    /// The connection is gone; the supervisor must reconnect.
    Disconnected(String),
}

/// Factory for fresh upstream connections. Every connection attempt builds
/// a new client from scratch; stale state from a failed attempt is never
/// reused.
pub trait NodeConnector: Send + Sync {
    /// The connection type produced by this connector.
    type Conn: NodeConnection;

    /// Establishes a connection and subscribes to the operation streams of
    /// the given accounts.
    async fn connect(&self, accounts: &[String]) -> Result<Self::Conn, ChainError>;
}

/// An established, subscribed connection delivering an unbounded event
/// sequence. The sequence is not restartable; after a disconnect the
/// supervisor discards the connection and asks the connector for a new one.
pub trait NodeConnection: Send {
    /// The event channel. `None` from `recv` means the connection's pump
    /// task is gone and counts as a disconnect.
    fn events(&mut self) -> &mut mpsc::Receiver<StreamEvent>;

    /// Best-effort close; never fails.
    async fn close(&mut self);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;

/// WebSocket implementation of [`NodeConnector`].
#[derive(Debug, Clone)]
pub struct WsNodeConnector {
    ws_url: String,
}

impl WsNodeConnector {
    /// Creates a connector for the given `wss://` endpoint.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self { ws_url: ws_url.into() }
    }
}

impl NodeConnector for WsNodeConnector {
    type Conn = WsNodeConnection;

    async fn connect(&self, accounts: &[String]) -> Result<WsNodeConnection, ChainError> {
        tracing::info!(url = %self.ws_url, "connecting to node stream");
        let (stream, _) = connect_async(&self.ws_url).await?;
        let (mut write, read) = stream.split();

        // One subscription per account of interest.
        for (id, account) in accounts.iter().enumerate() {
            let subscribe = json!({
                "method": "subscribe.account_operations",
                "params": { "account": account },
                "id": id + 1,
            });
            write.send(Message::Text(subscribe.to_string().into())).await?;
        }
        tracing::info!(accounts = ?accounts, "node stream subscriptions opened");

        let (tx, rx) = mpsc::channel(256);
        let token = CancellationToken::new();
        let pump_token = token.clone();
        tokio::spawn(pump_frames(read, tx, pump_token));

        Ok(WsNodeConnection {
            events: rx,
            write,
            token,
        })
    }
}

/// Reads frames off the socket and forwards operations into the channel.
/// Any terminal condition (read error, remote close, stream end) is
/// reported as a single `Disconnected` event and the task exits.
async fn pump_frames(
    mut read: futures_util::stream::SplitStream<WsStream>,
    tx: mpsc::Sender<StreamEvent>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(op) = RawOperation::from_frame(text.as_str()) {
                        if tx.send(StreamEvent::Operation(op)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    let _ = tx
                        .send(StreamEvent::Disconnected("closed by remote host".into()))
                        .await;
                    break;
                }
                Some(Err(e)) => {
                    let _ = tx.send(StreamEvent::Disconnected(e.to_string())).await;
                    break;
                }
                _ => {}
            }
        }
    }
}

/// An active WebSocket subscription.
pub struct WsNodeConnection {
    events: mpsc::Receiver<StreamEvent>,
    write: WsSink,
    token: CancellationToken,
}

impl NodeConnection for WsNodeConnection {
    fn events(&mut self) -> &mut mpsc::Receiver<StreamEvent> {
        &mut self.events
    }

    async fn close(&mut self) {
        self.token.cancel();
        let _ = self.write.send(Message::Close(None)).await;
    }
}
