//! The send procedure shared by the direct and relay paths.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;

use crate::conn::{deadline, read_expect, write_msg, FrameConn};
use crate::error::TransferError;
use crate::events::{EventSink, TransferEvent};
use crate::protocol::{chunk_size, TransferMessage, TransferMessageType as Kind};

/// Boxed payload source.
pub type PayloadReader = Box<dyn AsyncRead + Send + Unpin>;

/// The payload, claimed by whichever path gets to stream it first.
#[derive(Clone)]
pub(crate) struct SharedPayload {
    reader: Arc<Mutex<Option<PayloadReader>>>,
    size: i64,
}

impl SharedPayload {
    pub(crate) fn new(reader: PayloadReader, size: i64) -> Self {
        Self {
            reader: Arc::new(Mutex::new(Some(reader))),
            size,
        }
    }

    pub(crate) fn size(&self) -> i64 {
        self.size
    }

    async fn take(&self) -> Result<PayloadReader, TransferError> {
        self.reader.lock().await.take().ok_or_else(|| {
            TransferError::Io(io::Error::new(
                io::ErrorKind::Other,
                "payload was already streamed",
            ))
        })
    }
}

/// Fill `buf` from `reader`, stopping early only at EOF.
async fn read_chunk(reader: &mut PayloadReader, buf: &mut [u8]) -> Result<usize, TransferError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Stream the payload over an established, encrypted transfer channel.
///
/// `RequestPayload` -> payload frames -> `PayloadSent` -> `PayloadAck` ->
/// `Closing` -> `ClosingAck`.
pub(crate) async fn send_payload<C>(
    conn: &mut C,
    payload: &SharedPayload,
    events: &EventSink,
    io_timeout: Duration,
) -> Result<u64, TransferError>
where
    C: FrameConn + ?Sized,
{
    deadline(
        io_timeout,
        "payload request",
        read_expect::<_, TransferMessage>(conn, Kind::ReceiverRequestPayload),
    )
    .await?;

    let mut reader = payload.take().await?;
    let mut buf = vec![0u8; chunk_size(payload.size())];
    let mut sent = 0u64;

    loop {
        let n = read_chunk(&mut reader, &mut buf).await?;
        if n == 0 {
            break;
        }
        conn.write(buf[..n].to_vec()).await?;
        sent += n as u64;
        events.emit(TransferEvent::Progress { bytes: sent });
    }

    if sent != payload.size().max(0) as u64 {
        tracing::warn!(
            "Payload source produced {} bytes, {} were advertised",
            sent,
            payload.size()
        );
    }

    write_msg(conn, &TransferMessage::new(Kind::SenderPayloadSent)).await?;
    deadline(
        io_timeout,
        "payload ack",
        read_expect::<_, TransferMessage>(conn, Kind::ReceiverPayloadAck),
    )
    .await?;

    write_msg(conn, &TransferMessage::new(Kind::SenderClosing)).await?;
    deadline(
        io_timeout,
        "closing ack",
        read_expect::<_, TransferMessage>(conn, Kind::ReceiverClosingAck),
    )
    .await?;

    tracing::debug!("Sent {} payload bytes", sent);
    Ok(sent)
}

/// Tell the peer why we are giving up. Failures are ignored.
pub(crate) async fn report_error<C>(conn: &mut C, err: &TransferError)
where
    C: FrameConn + ?Sized,
{
    let _ = write_msg(conn, &TransferMessage::error(err.to_string())).await;
}
