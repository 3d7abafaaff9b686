use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};
use url::Url;

use super::{ChannelError, Frame};

/// Receive side of the push connection to the backend. Frames come out in
/// the order the socket delivered them. There is no retry: once the socket
/// closes, [`ConnectionChannel::recv`] returns `None` for good.
pub struct ConnectionChannel {
    rx: mpsc::UnboundedReceiver<Frame>,
    connected: Arc<AtomicBool>,
    ws_task: Option<tokio::task::JoinHandle<()>>,
}

impl ConnectionChannel {
    pub async fn connect(url: &Url) -> Result<Self, ChannelError> {
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| ChannelError::Connect(format!("{url}: {err}")))?;
        debug!(target = "preview.channel", url = %url, "push channel connected");

        let (tx_in, rx_in) = mpsc::unbounded_channel::<Frame>();
        let connected = Arc::new(AtomicBool::new(true));
        let connected_clone = connected.clone();
        let ws_task = tokio::spawn(async move {
            read_websocket(ws_stream, tx_in).await;
            connected_clone.store(false, Ordering::SeqCst);
        });

        Ok(Self {
            rx: rx_in,
            connected,
            ws_task: Some(ws_task),
        })
    }

    /// Channel fed by an in-process sender instead of a socket. The channel
    /// counts as connected until every sender is dropped.
    pub fn detached(rx: mpsc::UnboundedReceiver<Frame>) -> Self {
        Self {
            rx,
            connected: Arc::new(AtomicBool::new(true)),
            ws_task: None,
        }
    }

    pub async fn recv(&mut self) -> Option<Frame> {
        let frame = self.rx.recv().await;
        if frame.is_none() {
            self.connected.store(false, Ordering::SeqCst);
        }
        frame
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for ConnectionChannel {
    fn drop(&mut self) {
        if let Some(task) = self.ws_task.take() {
            task.abort();
        }
    }
}

async fn read_websocket(
    mut ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    tx_in: mpsc::UnboundedSender<Frame>,
) {
    while let Some(msg) = ws_stream.next().await {
        let frame = match msg {
            Ok(Message::Text(text)) => {
                trace!(target = "preview.channel", kind = "text", len = text.len(), "frame in");
                Frame::Text(text)
            }
            Ok(Message::Binary(data)) => {
                trace!(target = "preview.channel", kind = "binary", len = data.len(), "frame in");
                Frame::Binary(data)
            }
            Ok(Message::Close(reason)) => {
                debug!(target = "preview.channel", reason = ?reason, "push channel closed by peer");
                break;
            }
            // Ping/pong are answered by tungstenite itself.
            Ok(_) => continue,
            Err(err) => {
                match &err {
                    WsError::ConnectionClosed
                    | WsError::AlreadyClosed
                    | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                        debug!(target = "preview.channel", "push channel closed: {err}");
                    }
                    _ => {
                        warn!(target = "preview.channel", "push channel error: {err}");
                    }
                }
                break;
            }
        };
        if tx_in.send(frame).is_err() {
            break;
        }
    }
}
