//! Rendezvous HTTP surface and lifecycle.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use warp::Filter;

use super::handlers;
use super::ids::IdSet;
use super::mailbox::Mailboxes;
use crate::error::TransferError;
use crate::version::Version;

/// Rendezvous server configuration
#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    /// How long a sender waits for its receiver
    pub receiver_timeout: Duration,
    /// Bound on every control read and every write
    pub io_timeout: Duration,
    /// Grace period for open mailboxes after shutdown is requested
    pub shutdown_drain: Duration,
    /// Per-direction mailbox queue depth, in frames
    pub mailbox_buffer: usize,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            receiver_timeout: Duration::from_secs(30),
            io_timeout: Duration::from_secs(30),
            shutdown_drain: Duration::from_secs(5),
            mailbox_buffer: 10,
        }
    }
}

/// State shared by every connection of one server instance.
#[derive(Debug)]
pub struct RendezvousState {
    pub config: RendezvousConfig,
    pub ids: IdSet,
    pub mailboxes: Mailboxes,
}

/// The rendezvous server
#[derive(Debug, Clone)]
pub struct RendezvousServer {
    state: Arc<RendezvousState>,
}

impl RendezvousServer {
    /// Create a new rendezvous server with default configuration
    pub fn new() -> Self {
        Self::with_config(RendezvousConfig::default())
    }

    /// Create a new rendezvous server with custom configuration
    pub fn with_config(config: RendezvousConfig) -> Self {
        let mailboxes = Mailboxes::new(config.mailbox_buffer);
        Self {
            state: Arc::new(RendezvousState {
                config,
                ids: IdSet::new(),
                mailboxes,
            }),
        }
    }

    pub fn config(&self) -> &RendezvousConfig {
        &self.state.config
    }

    pub fn ids(&self) -> &IdSet {
        &self.state.ids
    }

    pub fn mailboxes(&self) -> &Mailboxes {
        &self.state.mailboxes
    }

    fn routes(
        &self,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone + Send + Sync + 'static
    {
        let state_filter = warp::any().map({
            let state = self.state.clone();
            move || state.clone()
        });

        let sender_route = warp::path("establish-sender")
            .and(warp::path::end())
            .and(warp::ws())
            .and(state_filter.clone())
            .map(|ws: warp::ws::Ws, state: Arc<RendezvousState>| {
                ws.on_upgrade(move |socket| handlers::establish_sender(socket, state))
            })
            .boxed();

        let receiver_route = warp::path("establish-receiver")
            .and(warp::path::end())
            .and(warp::ws())
            .and(state_filter)
            .map(|ws: warp::ws::Ws, state: Arc<RendezvousState>| {
                ws.on_upgrade(move |socket| handlers::establish_receiver(socket, state))
            })
            .boxed();

        let ping_route = warp::path("ping")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| "pong")
            .boxed();

        let version_route = warp::path("version")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| warp::reply::json(&Version::current()))
            .boxed();

        sender_route
            .or(receiver_route)
            .or(ping_route)
            .or(version_route)
    }

    /// Bind `addr` and return the bound address plus the serving future.
    ///
    /// The future completes once `signal` has fired, connections have had
    /// `shutdown_drain` to finish, and every remaining mailbox has been told
    /// to quit.
    pub fn bind<F>(
        &self,
        addr: SocketAddr,
        signal: F,
    ) -> Result<(SocketAddr, impl Future<Output = ()> + Send + 'static), TransferError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (bound, serve) =
            warp::serve(self.routes()).try_bind_with_graceful_shutdown(addr, signal)?;
        tracing::info!("Rendezvous listening on {}", bound);

        let state = self.state.clone();
        let run = async move {
            serve.await;
            drain(&state).await;
        };
        Ok((bound, run))
    }

    /// Serve until `signal` fires, then drain and stop.
    pub async fn run_until<F>(&self, addr: SocketAddr, signal: F) -> Result<(), TransferError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (_, run) = self.bind(addr, signal)?;
        run.await;
        Ok(())
    }
}

impl Default for RendezvousServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn drain(state: &RendezvousState) {
    let open = state.mailboxes.len();
    if open > 0 {
        tracing::info!(
            "Shutdown requested; draining {} mailbox(es) for up to {:?}",
            open,
            state.config.shutdown_drain
        );
        let until = tokio::time::Instant::now() + state.config.shutdown_drain;
        while !state.mailboxes.is_empty() && tokio::time::Instant::now() < until {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    if !state.mailboxes.is_empty() {
        tracing::warn!(
            "Closing {} mailbox(es) still open after drain",
            state.mailboxes.len()
        );
    }
    state.mailboxes.quit_all();
    tracing::info!("Rendezvous stopped");
}
