//! Post-handshake relay pump.
//!
//! Once PAKE has been brokered the rendezvous stops interpreting traffic:
//! every frame an endpoint sends is forwarded as-is to the peer's queue, and
//! everything queued for the endpoint is written back out. The only frame the
//! pump looks at is the endpoint's own `*ToRendezvousClose`.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use super::mailbox::{Mailbox, Side};
use crate::conn::{classify, Inbound};
use crate::protocol::{RendezvousMessage, RendezvousMessageType};

/// Why a pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpEnd {
    /// The endpoint sent its close message.
    CloseSignal,
    /// The peer's pump (or shutdown) fired the mailbox quit signal.
    Quit,
    /// The endpoint's websocket closed.
    TransportClosed,
    /// The peer's queue is gone.
    PeerGone,
    /// No frame moved in either direction within the I/O timeout.
    Idle,
    Error(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

fn close_kind(side: Side) -> RendezvousMessageType {
    match side {
        Side::Sender => RendezvousMessageType::SenderToRendezvousClose,
        Side::Receiver => RendezvousMessageType::ReceiverToRendezvousClose,
    }
}

/// True iff `frame` is a plaintext close message for `side`.
fn is_close_signal(frame: &[u8], side: Side) -> bool {
    if frame.first() != Some(&b'{') {
        return false;
    }
    serde_json::from_slice::<RendezvousMessage>(frame)
        .map(|msg| msg.kind == close_kind(side))
        .unwrap_or(false)
}

async fn forward_inbound(
    mut stream: SplitStream<WebSocket>,
    mailbox: Arc<Mailbox>,
    side: Side,
) -> (PumpEnd, u64) {
    let peer = mailbox.peer_queue(side);
    let mut bytes_in = 0u64;
    while let Some(msg) = stream.next().await {
        let frame = match msg {
            Ok(msg) => match classify(msg) {
                Inbound::Frame(frame) => frame,
                Inbound::Skip => continue,
                Inbound::Closed => return (PumpEnd::TransportClosed, bytes_in),
            },
            Err(e) => return (PumpEnd::Error(e.to_string()), bytes_in),
        };

        if is_close_signal(&frame, side) {
            return (PumpEnd::CloseSignal, bytes_in);
        }

        bytes_in += frame.len() as u64;
        mailbox.touch();
        if peer.send(frame).await.is_err() {
            return (PumpEnd::PeerGone, bytes_in);
        }
    }
    (PumpEnd::TransportClosed, bytes_in)
}

async fn write_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: Vec<u8>,
    io_timeout: Duration,
) -> Result<(), String> {
    match tokio::time::timeout(io_timeout, sink.send(Message::binary(frame))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("write timed out".to_string()),
    }
}

/// Shuttle frames for one endpoint until close, quit, idleness or transport
/// failure.
///
/// Reads carry no per-endpoint deadline: the receiver is legitimately silent
/// while the sender streams. Instead the whole mailbox is idle once no frame
/// has moved either way for `io_timeout`.
///
/// On return the mailbox quit signal has fired, so the peer's pump winds
/// down too. Frames already queued for this endpoint when quit fires are
/// still delivered before the socket is closed.
pub async fn pump(
    ws: WebSocket,
    mut inbox: mpsc::Receiver<Vec<u8>>,
    mailbox: Arc<Mailbox>,
    side: Side,
    io_timeout: Duration,
) -> (PumpEnd, PumpStats) {
    let (mut sink, stream) = ws.split();
    let mut quit = mailbox.subscribe_quit();
    let mut stats = PumpStats::default();

    tracing::debug!("Relay pump started for {} of {}", side, mailbox.tag());
    mailbox.touch();

    let mut reader = tokio::spawn(forward_inbound(stream, mailbox.clone(), side));

    let end = if mailbox.is_quit() {
        reader.abort();
        PumpEnd::Quit
    } else {
        loop {
            tokio::select! {
                joined = &mut reader => {
                    break match joined {
                        Ok((end, bytes_in)) => {
                            stats.bytes_in = bytes_in;
                            end
                        }
                        Err(e) => PumpEnd::Error(e.to_string()),
                    };
                }
                frame = inbox.recv() => {
                    let Some(frame) = frame else {
                        reader.abort();
                        break PumpEnd::PeerGone;
                    };
                    let len = frame.len() as u64;
                    if let Err(e) = write_frame(&mut sink, frame, io_timeout).await {
                        reader.abort();
                        break PumpEnd::Error(e);
                    }
                    stats.bytes_out += len;
                    mailbox.touch();
                }
                _ = tokio::time::sleep_until(mailbox.idle_deadline(io_timeout)) => {
                    // The peer may have moved a frame while we slept
                    if mailbox.idle_deadline(io_timeout) <= tokio::time::Instant::now() {
                        reader.abort();
                        break PumpEnd::Idle;
                    }
                }
                _ = quit.changed() => {
                    reader.abort();
                    break PumpEnd::Quit;
                }
            }
        }
    };

    // Deliver whatever the peer queued before it went away
    if matches!(end, PumpEnd::Quit | PumpEnd::CloseSignal) {
        while let Ok(frame) = inbox.try_recv() {
            let len = frame.len() as u64;
            if write_frame(&mut sink, frame, io_timeout).await.is_err() {
                break;
            }
            stats.bytes_out += len;
        }
    }

    mailbox.quit();
    let _ = sink.close().await;

    match &end {
        PumpEnd::Error(e) => tracing::warn!(
            "Relay pump for {} of {} failed: {} ({} bytes in, {} bytes out)",
            side,
            mailbox.tag(),
            e,
            stats.bytes_in,
            stats.bytes_out
        ),
        other => tracing::info!(
            "Relay pump for {} of {} stopped: {:?} ({} bytes in, {} bytes out)",
            side,
            mailbox.tag(),
            other,
            stats.bytes_in,
            stats.bytes_out
        ),
    }

    (end, stats)
}
