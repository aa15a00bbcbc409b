// Server side of the framed channel (rendezvous handlers, direct listener)

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use warp::ws::{Message, WebSocket};

use super::FrameConn;
use crate::error::TransferError;

/// What an inbound websocket message means to the framing layer.
pub(crate) enum Inbound {
    Frame(Vec<u8>),
    Skip,
    Closed,
}

pub(crate) fn classify(msg: Message) -> Inbound {
    if msg.is_binary() || msg.is_text() {
        Inbound::Frame(msg.into_bytes())
    } else if msg.is_close() {
        Inbound::Closed
    } else {
        Inbound::Skip
    }
}

/// A websocket accepted by one of our warp routes.
pub struct WarpConn {
    ws: WebSocket,
}

impl WarpConn {
    pub fn new(ws: WebSocket) -> Self {
        Self { ws }
    }

    /// Hand back the socket, e.g. to split it for the relay pump.
    pub fn into_inner(self) -> WebSocket {
        self.ws
    }

    /// Close with an application code the client maps back to an error.
    pub async fn reject(mut self, code: u16, reason: &'static str) {
        let _ = self.ws.send(Message::close_with(code, reason)).await;
        let _ = self.ws.close().await;
    }
}

#[async_trait]
impl FrameConn for WarpConn {
    async fn write(&mut self, frame: Vec<u8>) -> Result<(), TransferError> {
        self.ws.send(Message::binary(frame)).await?;
        Ok(())
    }

    async fn read(&mut self) -> Result<Vec<u8>, TransferError> {
        while let Some(msg) = self.ws.next().await {
            match classify(msg?) {
                Inbound::Frame(bytes) => return Ok(bytes),
                Inbound::Closed => return Err(TransferError::TransportClosed),
                Inbound::Skip => continue,
            }
        }
        Err(TransferError::TransportClosed)
    }

    async fn close(&mut self) -> Result<(), TransferError> {
        // Closing an already-closed socket is not an error worth reporting
        if let Err(e) = SinkExt::close(&mut self.ws).await {
            tracing::debug!("Websocket close failed: {}", e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::Filter;

    #[tokio::test]
    async fn test_close_through_mutable_reference() {
        let route = warp::ws().map(|ws: warp::ws::Ws| {
            ws.on_upgrade(|socket| async move {
                let mut conn = WarpConn::new(socket);
                conn.write(b"bye".to_vec()).await.unwrap();
                conn.close().await.unwrap();
                // A second close on the same socket is still Ok
                conn.close().await.unwrap();
            })
        });

        let mut client = warp::test::ws().handshake(route).await.unwrap();
        let msg = client.recv().await.unwrap();
        assert_eq!(msg.as_bytes(), b"bye");
        client.recv_closed().await.unwrap();
    }
}
