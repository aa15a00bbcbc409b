//! Sender engine.
//!
//! rendezvous handshake -> PAKE -> direct listener -> mode negotiation ->
//! stream payload.

mod direct;
mod stream;

use tokio::io::AsyncRead;

use crate::config::ClientConfig;
use crate::conn::{
    deadline, read_expect, read_msg, write_msg, FrameConn, SecureConn, WsClientConn,
};
use crate::crypto::{generate_salt, Cipher, Pake, PakeRole};
use crate::error::TransferError;
use crate::events::{EventSink, TransferEvent, TransferType};
use crate::net::local_ipv4;
use crate::password::{short_hash, Password};
use crate::protocol::{
    ControlMessage, RendezvousMessage, RendezvousMessageType as Rv, TransferMessage,
    TransferMessageType as Tx,
};
use crate::version::ensure_compatible;

use direct::DirectListener;
use stream::{report_error, send_payload, SharedPayload};

pub use stream::PayloadReader;

/// Sends one payload to whoever presents the generated password.
#[derive(Debug, Clone)]
pub struct Sender {
    config: ClientConfig,
    events: EventSink,
}

impl Sender {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            events: EventSink::none(),
        }
    }

    /// Report password, mode and progress on `events`.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Run a complete transfer of `payload_size` bytes read from `payload`.
    ///
    /// The password is delivered as [`TransferEvent::Password`] as soon as
    /// the rendezvous has assigned an id.
    pub async fn send<R>(&self, payload: R, payload_size: i64) -> Result<TransferType, TransferError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        if let Some(version) = self.config.version {
            ensure_compatible(&self.config.rendezvous_addr, version, self.config.io_timeout).await?;
        }

        let payload = SharedPayload::new(Box::new(payload), payload_size);
        let io = self.config.io_timeout;

        // 1. Bind and establish
        let mut conn = WsClientConn::connect(&self.config.endpoint("establish-sender")).await?;
        let bind: RendezvousMessage =
            deadline(io, "bind", read_expect(&mut conn, Rv::RendezvousToSenderBind)).await?;
        let password = Password::generate(bind.id()?);
        let hash = password.hash();
        write_msg(&mut conn, &RendezvousMessage::establish(Rv::SenderToRendezvousEstablish, hash.clone()))
            .await?;
        tracing::info!("Mailbox {} established", short_hash(&hash));
        self.events.emit(TransferEvent::Password(password.to_string()));

        // 2. PAKE, started while we wait for the receiver
        let pake = Pake::start_blocking(PakeRole::Sender, password.to_string());
        // A receiver timeout arrives as a close with its own code
        read_expect::<_, RendezvousMessage>(&mut conn, Rv::RendezvousToSenderReady).await?;

        let pake = Pake::join(pake).await?;
        write_msg(
            &mut conn,
            &RendezvousMessage::pake(Rv::SenderToRendezvousPake, pake.message().to_vec()),
        )
        .await?;
        let reply: RendezvousMessage =
            deadline(io, "receiver pake", read_expect(&mut conn, Rv::RendezvousToSenderPake)).await?;
        let session_key = pake.finish(&reply.into_pake_bytes()?)?;

        let salt = generate_salt();
        write_msg(&mut conn, &RendezvousMessage::salt(Rv::SenderToRendezvousSalt, salt.to_vec()))
            .await?;
        tracing::debug!("PAKE complete");

        // 3. Everything from here on is sealed
        let cipher = Cipher::new(&session_key, &salt)?;
        let mut secure = SecureConn::new(conn, cipher.clone());

        let result = self.negotiate_and_send(&mut secure, cipher, payload).await;
        if let Err(e) = &result {
            if !e.is_disconnect() {
                report_error(&mut secure, e).await;
            }
        }

        // Best effort: the receiver may already have torn the mailbox down
        let _ = write_msg(secure.raw(), &RendezvousMessage::new(Rv::SenderToRendezvousClose)).await;
        let _ = secure.close().await;
        result
    }

    async fn negotiate_and_send(
        &self,
        secure: &mut SecureConn<WsClientConn>,
        cipher: Cipher,
        payload: SharedPayload,
    ) -> Result<TransferType, TransferError> {
        let io = self.config.io_timeout;

        // 4. Offer a direct path
        let mut listener =
            DirectListener::start(cipher, payload.clone(), self.events.clone(), io)?;
        let ip = self.config.advertise_ip.unwrap_or_else(local_ipv4);

        // 5. Handshake
        deadline(
            io,
            "receiver handshake",
            read_expect::<_, TransferMessage>(secure, Tx::ReceiverHandshake),
        )
        .await?;
        write_msg(
            secure,
            &TransferMessage::sender_handshake(ip.to_string(), listener.port(), payload.size()),
        )
        .await?;

        // 6. Receiver picks the mode
        let choice: TransferMessage = deadline(io, "mode choice", read_msg(secure)).await?;
        match choice.kind {
            Tx::ReceiverDirectCommunication => {
                tracing::info!("Transfer mode: direct");
                self.events.emit(TransferEvent::Mode(TransferType::Direct));
                // The relay may already be closing; the receiver does not wait for this
                let _ = write_msg(secure, &TransferMessage::new(Tx::SenderDirectAck)).await;
                let sent = listener.finish().await?;
                tracing::info!("Direct transfer complete: {} bytes", sent);
                Ok(TransferType::Direct)
            }
            Tx::ReceiverRelayCommunication => {
                tracing::info!("Transfer mode: relay");
                listener.stop().await;
                self.events.emit(TransferEvent::Mode(TransferType::Relay));
                write_msg(secure, &TransferMessage::new(Tx::SenderRelayAck)).await?;
                let sent = send_payload(secure, &payload, &self.events, io).await?;
                tracing::info!("Relay transfer complete: {} bytes", sent);
                Ok(TransferType::Relay)
            }
            _ => match choice.peer_error() {
                Some(reason) => Err(TransferError::PeerError(reason)),
                None => Err(TransferError::UnexpectedMessage {
                    family: TransferMessage::FAMILY,
                    expected: Tx::ReceiverDirectCommunication.into(),
                    got: choice.ordinal(),
                }),
            },
        }
    }
}
