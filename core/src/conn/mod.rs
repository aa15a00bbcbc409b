//! Framed message channel.
//!
//! A [`FrameConn`] moves whole binary frames over a websocket. Control
//! messages are one JSON object per frame; after PAKE the channel is wrapped
//! in a [`SecureConn`] so every frame is sealed before it is written.

mod client;
#[cfg(test)]
pub(crate) mod memory;
mod secure;
mod server;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::error::TransferError;
use crate::protocol::ControlMessage;

pub use client::WsClientConn;
pub use secure::SecureConn;
pub use server::WarpConn;
pub(crate) use server::{classify, Inbound};

/// Websocket close code: no mailbox exists for the presented hash.
pub const CLOSE_NO_SUCH_MAILBOX: u16 = 4001;
/// Websocket close code: the mailbox already has a receiver.
pub const CLOSE_MAILBOX_OCCUPIED: u16 = 4002;
/// Websocket close code: no receiver arrived while the sender waited.
pub const CLOSE_RECEIVER_TIMEOUT: u16 = 4003;

/// Map an application close code back to the error it reports.
pub(crate) fn close_code_error(code: u16) -> TransferError {
    match code {
        CLOSE_NO_SUCH_MAILBOX => TransferError::NoSuchMailbox,
        CLOSE_MAILBOX_OCCUPIED => TransferError::MailboxOccupied,
        CLOSE_RECEIVER_TIMEOUT => TransferError::ReceiverTimeout,
        _ => TransferError::TransportClosed,
    }
}

/// A full-duplex binary frame transport.
#[async_trait]
pub trait FrameConn: Send {
    /// Send one frame. Fails with `TransportClosed` once the peer is gone.
    async fn write(&mut self, frame: Vec<u8>) -> Result<(), TransferError>;

    /// Wait for the next frame and return its payload.
    async fn read(&mut self) -> Result<Vec<u8>, TransferError>;

    /// Start a clean close.
    async fn close(&mut self) -> Result<(), TransferError>;
}

#[async_trait]
impl<C: FrameConn + ?Sized> FrameConn for Box<C> {
    async fn write(&mut self, frame: Vec<u8>) -> Result<(), TransferError> {
        (**self).write(frame).await
    }

    async fn read(&mut self) -> Result<Vec<u8>, TransferError> {
        (**self).read().await
    }

    async fn close(&mut self) -> Result<(), TransferError> {
        (**self).close().await
    }
}

/// Serialize `msg` into a single frame.
pub async fn write_msg<C, M>(conn: &mut C, msg: &M) -> Result<(), TransferError>
where
    C: FrameConn + ?Sized,
    M: ControlMessage + Sync,
{
    let frame = msg.to_bytes()?;
    conn.write(frame).await
}

/// Read one frame and decode it as `M`.
pub async fn read_msg<C, M>(conn: &mut C) -> Result<M, TransferError>
where
    C: FrameConn + ?Sized,
    M: ControlMessage,
{
    let frame = conn.read().await?;
    M::from_bytes(&frame)
}

/// Read one control message and insist on its type.
///
/// A peer error report is surfaced as `PeerError` instead of a type mismatch.
pub async fn read_expect<C, M>(conn: &mut C, expected: M::Kind) -> Result<M, TransferError>
where
    C: FrameConn + ?Sized,
    M: ControlMessage,
{
    let msg: M = read_msg(conn).await?;
    if msg.kind() == expected {
        return Ok(msg);
    }
    if let Some(reason) = msg.peer_error() {
        return Err(TransferError::PeerError(reason));
    }
    Err(TransferError::UnexpectedMessage {
        family: M::FAMILY,
        expected: expected.into(),
        got: msg.ordinal(),
    })
}

/// Bound `fut` by `limit`, reporting `what` on expiry.
pub async fn deadline<T, F>(limit: Duration, what: &'static str, fut: F) -> Result<T, TransferError>
where
    F: Future<Output = Result<T, TransferError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransferError::Timeout(what)),
    }
}

// ============================================================================
// TESTS
// ============================================================================
