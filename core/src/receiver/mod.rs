//! Receiver engine.
//!
//! rendezvous handshake -> PAKE -> direct probe -> mode negotiation ->
//! consume payload.

mod probe;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::config::ClientConfig;
use crate::conn::{deadline, read_expect, write_msg, FrameConn, SecureConn, WsClientConn};
use crate::crypto::{Cipher, Pake, PakeRole};
use crate::error::TransferError;
use crate::events::{EventSink, TransferEvent, TransferType};
use crate::password::{short_hash, Password};
use crate::protocol::{
    RendezvousMessage, RendezvousMessageType as Rv, TransferMessage, TransferMessageType as Tx,
};
use crate::version::ensure_compatible;

use probe::probe_direct;

/// Receives one payload for a known password.
#[derive(Debug, Clone)]
pub struct Receiver {
    config: ClientConfig,
    events: EventSink,
}

impl Receiver {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            events: EventSink::none(),
        }
    }

    /// Report mode and progress on `events`.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Run a complete transfer, writing the payload into `sink`.
    pub async fn receive<W>(&self, password: &str, sink: &mut W) -> Result<TransferType, TransferError>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let password = Password::parse(password)?;
        if let Some(version) = self.config.version {
            ensure_compatible(&self.config.rendezvous_addr, version, self.config.io_timeout).await?;
        }
        let io = self.config.io_timeout;

        // 1. Establish, with PAKE initialising alongside
        let mut conn = WsClientConn::connect(&self.config.endpoint("establish-receiver")).await?;
        let pake = Pake::start_blocking(PakeRole::Receiver, password.to_string());
        let hash = password.hash();
        write_msg(&mut conn, &RendezvousMessage::establish(Rv::ReceiverToRendezvousEstablish, hash.clone()))
            .await?;
        tracing::info!("Joined mailbox {}", short_hash(&hash));

        // 2. PAKE and salt
        let offer: RendezvousMessage =
            deadline(io, "sender pake", read_expect(&mut conn, Rv::RendezvousToReceiverPake)).await?;
        let pake = Pake::join(pake).await?;
        let reply = pake.message().to_vec();
        let session_key = pake.finish(&offer.into_pake_bytes()?)?;
        write_msg(&mut conn, &RendezvousMessage::pake(Rv::ReceiverToRendezvousPake, reply)).await?;

        let salt: RendezvousMessage =
            deadline(io, "salt", read_expect(&mut conn, Rv::RendezvousToReceiverSalt)).await?;
        let cipher = Cipher::new(&session_key, &salt.into_salt()?)?;
        tracing::debug!("PAKE complete");

        let mut rendezvous = SecureConn::new(conn, cipher.clone());
        let result = self.negotiate_and_receive(&mut rendezvous, cipher, sink).await;

        // Best effort: in direct mode the mailbox is already gone
        let _ = write_msg(rendezvous.raw(), &RendezvousMessage::new(Rv::ReceiverToRendezvousClose)).await;
        let _ = rendezvous.close().await;
        result
    }

    async fn negotiate_and_receive<W>(
        &self,
        rendezvous: &mut SecureConn<WsClientConn>,
        cipher: Cipher,
        sink: &mut W,
    ) -> Result<TransferType, TransferError>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let io = self.config.io_timeout;

        // 3. Handshake
        write_msg(rendezvous, &TransferMessage::new(Tx::ReceiverHandshake)).await?;
        let handshake: TransferMessage = deadline(
            io,
            "sender handshake",
            read_expect(rendezvous, Tx::SenderHandshake),
        )
        .await?;
        let (ip, port) = handshake.direct_address()?;
        if let Some(size) = handshake.payload.payload_size {
            tracing::debug!("Sender advertises {} bytes", size);
        }

        // 4. Try the direct path first
        let direct = if self.config.force_relay {
            Err(TransferError::DirectProbeFailed)
        } else {
            let url = format!("ws://{}:{}/portal", ip, port);
            probe_direct(
                &url,
                self.config.probe_initial_backoff,
                self.config.probe_deadline,
            )
            .await
        };

        let (mode, mut direct_conn) = match direct {
            Ok(direct) => {
                write_msg(rendezvous, &TransferMessage::new(Tx::ReceiverDirectCommunication)).await?;
                write_msg(rendezvous.raw(), &RendezvousMessage::new(Rv::ReceiverToRendezvousClose))
                    .await?;
                let _ = rendezvous.close().await;
                (TransferType::Direct, Some(SecureConn::new(direct, cipher)))
            }
            Err(_) => {
                write_msg(rendezvous, &TransferMessage::new(Tx::ReceiverRelayCommunication)).await?;
                deadline(
                    io,
                    "relay ack",
                    read_expect::<_, TransferMessage>(rendezvous, Tx::SenderRelayAck),
                )
                .await?;
                (TransferType::Relay, None)
            }
        };

        // 5. Report the mode
        tracing::info!("Transfer mode: {}", mode);
        self.events.emit(TransferEvent::Mode(mode));

        let transfer: &mut SecureConn<WsClientConn> = match direct_conn.as_mut() {
            Some(direct) => direct,
            None => rendezvous,
        };

        // 6-7. Payload and closing handshake
        let received = receive_payload(transfer, sink, &self.events, io).await?;
        tracing::info!("Received {} payload bytes", received);
        if mode == TransferType::Direct {
            let _ = transfer.close().await;
        }
        Ok(mode)
    }
}

/// Consume payload frames until `SenderPayloadSent`, then acknowledge and
/// close.
///
/// A decrypted frame counts as control only if it parses as a transfer
/// message; everything else is payload.
async fn receive_payload<C, W>(
    conn: &mut C,
    sink: &mut W,
    events: &EventSink,
    io_timeout: std::time::Duration,
) -> Result<u64, TransferError>
where
    C: FrameConn + ?Sized,
    W: AsyncWrite + Send + Unpin,
{
    write_msg(conn, &TransferMessage::new(Tx::ReceiverRequestPayload)).await?;

    let mut received = 0u64;
    loop {
        let frame = conn.read().await?;
        match TransferMessage::sniff(&frame) {
            Some(msg) if msg.kind == Tx::SenderPayloadSent => break,
            Some(msg) if msg.kind == Tx::TransferError => {
                return Err(TransferError::PeerError(
                    msg.payload.error.unwrap_or_else(|| "unspecified".to_string()),
                ));
            }
            _ => {
                sink.write_all(&frame).await?;
                received += frame.len() as u64;
                events.emit(TransferEvent::Progress { bytes: received });
            }
        }
    }
    sink.flush().await?;

    write_msg(conn, &TransferMessage::new(Tx::ReceiverPayloadAck)).await?;
    deadline(
        io_timeout,
        "closing",
        read_expect::<_, TransferMessage>(conn, Tx::SenderClosing),
    )
    .await?;
    write_msg(conn, &TransferMessage::new(Tx::ReceiverClosingAck)).await?;
    Ok(received)
}
