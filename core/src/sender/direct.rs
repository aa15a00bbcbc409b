//! Direct-transfer listener.
//!
//! Offers a cut-through path at `ws://<sender-ip>:<port>/portal`. The first
//! connection gets the payload over a channel keyed with the rendezvous
//! session's key and salt; no second PAKE is run. Later connections are
//! turned away.

use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use warp::Filter;

use super::stream::{report_error, send_payload, SharedPayload};
use crate::conn::{FrameConn, SecureConn, WarpConn};
use crate::crypto::Cipher;
use crate::error::TransferError;
use crate::events::EventSink;

struct Portal {
    cipher: Cipher,
    payload: SharedPayload,
    events: Mutex<EventSink>,
    io_timeout: Duration,
    accepted: AtomicBool,
    done: Mutex<Option<oneshot::Sender<Result<u64, TransferError>>>>,
}

async fn serve_portal(ws: warp::ws::WebSocket, portal: Arc<Portal>) {
    let mut conn = WarpConn::new(ws);
    if portal.accepted.swap(true, Ordering::SeqCst) {
        tracing::debug!("Turning away a second direct connection");
        let _ = conn.close().await;
        return;
    }

    tracing::info!("Direct connection accepted");
    let events = portal.events.lock().clone();
    let mut conn = SecureConn::new(conn, portal.cipher.clone());
    let result = send_payload(&mut conn, &portal.payload, &events, portal.io_timeout).await;
    if let Err(e) = &result {
        report_error(&mut conn, e).await;
    }
    let _ = conn.close().await;

    if let Some(done) = portal.done.lock().take() {
        let _ = done.send(result);
    }
}

/// A running direct listener.
pub(crate) struct DirectListener {
    addr: SocketAddr,
    portal: Arc<Portal>,
    done: Option<oneshot::Receiver<Result<u64, TransferError>>>,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl DirectListener {
    /// Bind an OS-chosen port on all interfaces and start serving.
    pub(crate) fn start(
        cipher: Cipher,
        payload: SharedPayload,
        events: EventSink,
        io_timeout: Duration,
    ) -> Result<Self, TransferError> {
        let (done_tx, done_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let portal = Arc::new(Portal {
            cipher,
            payload,
            events: Mutex::new(events),
            io_timeout,
            accepted: AtomicBool::new(false),
            done: Mutex::new(Some(done_tx)),
        });
        let portal_filter = warp::any().map({
            let portal = portal.clone();
            move || portal.clone()
        });

        let route = warp::path("portal")
            .and(warp::path::end())
            .and(warp::ws())
            .and(portal_filter)
            .map(|ws: warp::ws::Ws, portal: Arc<Portal>| {
                ws.on_upgrade(move |socket| serve_portal(socket, portal))
            });

        let (addr, serve) = warp::serve(route).try_bind_with_graceful_shutdown(
            (Ipv4Addr::UNSPECIFIED, 0),
            async {
                let _ = shutdown_rx.await;
            },
        )?;
        tracing::debug!("Direct listener on {}", addr);

        Ok(Self {
            addr,
            portal,
            done: Some(done_rx),
            shutdown: Some(shutdown_tx),
            server: Some(tokio::spawn(serve)),
        })
    }

    pub(crate) fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait for the direct transfer to finish, then stop listening.
    pub(crate) async fn finish(mut self) -> Result<u64, TransferError> {
        let done = self.done.take().ok_or(TransferError::TransportClosed)?;
        let result = done.await.unwrap_or(Err(TransferError::TransportClosed));
        self.stop().await;
        result
    }

    /// Stop listening without waiting for a transfer.
    pub(crate) async fn stop(&mut self) {
        self.release();
        if let Some(server) = self.server.take() {
            let _ = server.await;
        }
        tracing::debug!("Direct listener on {} stopped", self.addr);
    }

    /// Signal shutdown and let go of the event sink, so nobody waiting on
    /// the event stream is held up by a server task still winding down.
    fn release(&mut self) {
        *self.portal.events.lock() = EventSink::none();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl Drop for DirectListener {
    fn drop(&mut self) {
        self.release();
    }
}
