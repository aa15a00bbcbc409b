//! Per-connection state machines for `/establish-sender` and
//! `/establish-receiver`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use warp::ws::WebSocket;

use super::mailbox::{MailboxGuard, Side};
use super::relay::pump;
use super::server::RendezvousState;
use crate::conn::{
    deadline, read_expect, write_msg, FrameConn, WarpConn, CLOSE_MAILBOX_OCCUPIED,
    CLOSE_NO_SUCH_MAILBOX, CLOSE_RECEIVER_TIMEOUT,
};
use crate::error::TransferError;
use crate::password::short_hash;
use crate::protocol::{ControlMessage, RendezvousMessage, RendezvousMessageType as Kind};

/// How the sender's wait for a receiver ended.
enum Wait {
    Arrived,
    TimedOut,
    Quit,
    SenderSpoke(Result<Vec<u8>, TransferError>),
}

/// Wait for the next frame from the peer's side of the mailbox.
async fn next_from_peer(
    inbox: &mut mpsc::Receiver<Vec<u8>>,
    quit: &mut watch::Receiver<bool>,
    limit: Duration,
    what: &'static str,
) -> Result<Vec<u8>, TransferError> {
    if *quit.borrow() {
        return Err(TransferError::TransportClosed);
    }
    tokio::select! {
        frame = deadline(limit, what, async { inbox.recv().await.ok_or(TransferError::TransportClosed) }) => frame,
        _ = quit.changed() => Err(TransferError::TransportClosed),
    }
}

pub(crate) async fn establish_sender(ws: WebSocket, state: Arc<RendezvousState>) {
    match sender_session(WarpConn::new(ws), &state).await {
        Ok(()) => {}
        Err(TransferError::ReceiverTimeout) => {
            tracing::info!("Sender session ended without a receiver");
        }
        Err(e) if e.is_disconnect() => tracing::debug!("Sender disconnected: {}", e),
        Err(e) => tracing::warn!("Sender session failed: {}", e),
    }
}

async fn sender_session(mut conn: WarpConn, state: &RendezvousState) -> Result<(), TransferError> {
    let io = state.config.io_timeout;

    // 1. Bind an ID; it is released whenever this task ends
    let lease = state.ids.lease();
    tracing::debug!("Bound id {}", lease.id());
    deadline(io, "bind", write_msg(&mut conn, &RendezvousMessage::bind(lease.id()))).await?;

    // 2. Establish the mailbox
    let establish: RendezvousMessage =
        deadline(io, "sender establish", read_expect(&mut conn, Kind::SenderToRendezvousEstablish))
            .await?;
    let hash = establish.password_hash()?.to_string();
    let (mailbox, mut slot) = match state.mailboxes.create(&hash) {
        Ok(created) => created,
        Err(e) => {
            conn.reject(CLOSE_MAILBOX_OCCUPIED, "mailbox occupied").await;
            return Err(e.into());
        }
    };
    let guard = MailboxGuard::new(state.mailboxes.clone(), mailbox.clone());
    let mut quit = mailbox.subscribe_quit();

    // 3. Wait for a receiver, or for the sender to go away
    let waited = tokio::select! {
        arrived = tokio::time::timeout(state.config.receiver_timeout, &mut slot.receiver_arrived) => {
            match arrived {
                Ok(Ok(())) => Wait::Arrived,
                Ok(Err(_)) => Wait::Quit,
                Err(_) => Wait::TimedOut,
            }
        }
        _ = quit.changed() => Wait::Quit,
        early = conn.read() => Wait::SenderSpoke(early),
    };
    match waited {
        Wait::Arrived => {}
        Wait::TimedOut => {
            tracing::info!(
                "No receiver for mailbox {} within {:?}",
                short_hash(&hash),
                state.config.receiver_timeout
            );
            conn.reject(CLOSE_RECEIVER_TIMEOUT, "receiver timeout").await;
            return Err(TransferError::ReceiverTimeout);
        }
        Wait::Quit => {
            let _ = conn.close().await;
            return Err(TransferError::TransportClosed);
        }
        Wait::SenderSpoke(Err(e)) => {
            tracing::debug!("Sender left mailbox {} before a receiver arrived", short_hash(&hash));
            return Err(e);
        }
        Wait::SenderSpoke(Ok(frame)) => {
            let got: RendezvousMessage = RendezvousMessage::from_bytes(&frame)?;
            let _ = conn.close().await;
            if got.kind == Kind::SenderToRendezvousClose {
                tracing::debug!("Sender withdrew mailbox {}", short_hash(&hash));
                return Ok(());
            }
            // Nothing else is legal from the sender until Ready
            return Err(TransferError::UnexpectedMessage {
                family: RendezvousMessage::FAMILY,
                expected: Kind::RendezvousToSenderReady.into(),
                got: got.ordinal(),
            });
        }
    }

    // 4. Ready
    deadline(io, "ready", write_msg(&mut conn, &RendezvousMessage::new(Kind::RendezvousToSenderReady))).await?;

    // 5. PAKE: A out, B back
    let pake_a: RendezvousMessage =
        deadline(io, "sender pake", read_expect(&mut conn, Kind::SenderToRendezvousPake)).await?;
    mailbox.forward(Side::Sender, pake_a.into_pake_bytes()?).await?;

    let pake_b = next_from_peer(&mut slot.inbox, &mut quit, io, "receiver pake").await?;
    deadline(
        io,
        "pake relay",
        write_msg(&mut conn, &RendezvousMessage::pake(Kind::RendezvousToSenderPake, pake_b)),
    )
    .await?;

    // 6. Salt
    let salt: RendezvousMessage =
        deadline(io, "salt", read_expect(&mut conn, Kind::SenderToRendezvousSalt)).await?;
    mailbox.forward(Side::Sender, salt.into_salt()?).await?;

    // 7. Relay
    tracing::debug!("Mailbox {} entering relay", mailbox.tag());
    pump(conn.into_inner(), slot.inbox, mailbox, Side::Sender, io).await;
    drop(guard);
    Ok(())
}

pub(crate) async fn establish_receiver(ws: WebSocket, state: Arc<RendezvousState>) {
    match receiver_session(WarpConn::new(ws), &state).await {
        Ok(()) => {}
        Err(e @ (TransferError::NoSuchMailbox | TransferError::MailboxOccupied)) => {
            tracing::info!("Receiver rejected: {}", e)
        }
        Err(e) if e.is_disconnect() => tracing::debug!("Receiver disconnected: {}", e),
        Err(e) => tracing::warn!("Receiver session failed: {}", e),
    }
}

async fn receiver_session(
    mut conn: WarpConn,
    state: &RendezvousState,
) -> Result<(), TransferError> {
    let io = state.config.io_timeout;

    // 1. Find the sender's mailbox
    let establish: RendezvousMessage = deadline(
        io,
        "receiver establish",
        read_expect(&mut conn, Kind::ReceiverToRendezvousEstablish),
    )
    .await?;
    let hash = establish.password_hash()?.to_string();

    // 2. Claim it; this wakes the sender
    let (mailbox, mut inbox) = match state.mailboxes.claim(&hash) {
        Ok(claimed) => claimed,
        Err(e) => {
            let err = TransferError::from(e);
            let code = match err {
                TransferError::NoSuchMailbox => CLOSE_NO_SUCH_MAILBOX,
                _ => CLOSE_MAILBOX_OCCUPIED,
            };
            conn.reject(code, "rejected").await;
            return Err(err);
        }
    };
    let guard = MailboxGuard::new(state.mailboxes.clone(), mailbox.clone());
    let mut quit = mailbox.subscribe_quit();

    // 3. Sender's PAKE message
    let pake_a = next_from_peer(&mut inbox, &mut quit, io, "sender pake").await?;
    deadline(
        io,
        "pake relay",
        write_msg(&mut conn, &RendezvousMessage::pake(Kind::RendezvousToReceiverPake, pake_a)),
    )
    .await?;

    // 4. Receiver's PAKE message
    let pake_b: RendezvousMessage =
        deadline(io, "receiver pake", read_expect(&mut conn, Kind::ReceiverToRendezvousPake))
            .await?;
    mailbox.forward(Side::Receiver, pake_b.into_pake_bytes()?).await?;

    // 5. Salt
    let salt = next_from_peer(&mut inbox, &mut quit, io, "salt").await?;
    deadline(
        io,
        "salt relay",
        write_msg(&mut conn, &RendezvousMessage::salt(Kind::RendezvousToReceiverSalt, salt)),
    )
    .await?;

    // 6. Relay
    tracing::debug!("Mailbox {} entering relay", mailbox.tag());
    pump(conn.into_inner(), inbox, mailbox, Side::Receiver, io).await;
    drop(guard);
    Ok(())
}
