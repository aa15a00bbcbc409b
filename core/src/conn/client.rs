// Client side of the framed channel (rendezvous endpoints, direct probe)

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{frame::coding::CloseCode, Message},
    MaybeTlsStream, WebSocketStream,
};

use super::{close_code_error, FrameConn};
use crate::error::TransferError;

/// A websocket opened by this process.
pub struct WsClientConn {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    url: String,
}

impl WsClientConn {
    /// Open `url` (`ws://host:port/path`).
    pub async fn connect(url: &str) -> Result<Self, TransferError> {
        let (ws, _response) = connect_async(url).await?;
        tracing::debug!("Connected to {}", url);
        Ok(Self {
            ws,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for WsClientConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClientConn").field("url", &self.url).finish()
    }
}

#[async_trait]
impl FrameConn for WsClientConn {
    async fn write(&mut self, frame: Vec<u8>) -> Result<(), TransferError> {
        self.ws.send(Message::Binary(frame)).await?;
        Ok(())
    }

    async fn read(&mut self) -> Result<Vec<u8>, TransferError> {
        loop {
            let msg = match self.ws.next().await {
                Some(msg) => msg?,
                None => return Err(TransferError::TransportClosed),
            };

            match msg {
                Message::Binary(bytes) => return Ok(bytes),
                Message::Text(text) => return Ok(text.into_bytes()),
                Message::Close(frame) => {
                    let code = frame
                        .map(|f| u16::from(f.code))
                        .unwrap_or_else(|| u16::from(CloseCode::Normal));
                    return Err(close_code_error(code));
                }
                // Pings are answered by tungstenite on the next poll
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransferError> {
        match self.ws.close(None).await {
            Ok(()) => Ok(()),
            Err(e) => match TransferError::from(e) {
                TransferError::TransportClosed => Ok(()),
                other => Err(other),
            },
        }
    }
}
