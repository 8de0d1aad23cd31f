use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::SyncError;

/// A connected, message-oriented session with the presence server.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), SyncError>;

    /// Next text message; `None` once the peer closed the session.
    /// Must be cancel-safe, it is polled inside `select!`.
    async fn recv(&mut self) -> Option<Result<String, SyncError>>;

    async fn close(&mut self) -> Result<(), SyncError>;
}

/// Opens transports. Called again for every reconnect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, SyncError>;
}

pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, SyncError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|err| SyncError::Connect(err.to_string()))?;
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), SyncError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|err| SyncError::Transport(err.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(err) => return Some(Err(SyncError::Transport(err.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        self.stream
            .close(None)
            .await
            .map_err(|err| SyncError::Transport(err.to_string()))
    }
}
