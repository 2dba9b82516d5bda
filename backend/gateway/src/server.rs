//! Transport Listener.
//!
//! Binds the relay port and hands every accepted connection to its own
//! session task.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{debug, info, instrument, warn};

use eventchat_core::{IdentityGateway, MessageStore};

use crate::broadcast::BroadcastEngine;
use crate::registry::ConnectionRegistry;
use crate::session;

/// Pause after a failed `accept` so a persistent error (e.g. fd exhaustion)
/// does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Per-session limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Longest accepted line, in bytes. Longer lines end the session.
    pub max_frame_bytes: usize,
    /// Deadline for writing one frame to a client.
    pub write_timeout: Option<Duration>,
    /// Deadline for the next frame from a client.
    pub idle_timeout: Option<Duration>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 64 * 1024,
            write_timeout: Some(Duration::from_secs(10)),
            idle_timeout: None,
        }
    }
}

/// State shared by every session.
#[derive(Clone)]
pub struct GatewayState {
    pub identity: Arc<dyn IdentityGateway>,
    pub store: Arc<dyn MessageStore>,
    pub registry: ConnectionRegistry,
    pub broadcaster: BroadcastEngine,
    pub config: GatewayConfig,
}

impl GatewayState {
    pub fn new(
        identity: Arc<dyn IdentityGateway>,
        store: Arc<dyn MessageStore>,
        config: GatewayConfig,
    ) -> Self {
        let registry = ConnectionRegistry::new();
        let broadcaster = BroadcastEngine::new(registry.clone(), Arc::clone(&store));
        Self {
            identity,
            store,
            registry,
            broadcaster,
            config,
        }
    }
}

/// Bind `addr` and serve until `shutdown` resolves.
///
/// Failing to bind is the only fatal error of the relay.
#[instrument(skip(state, shutdown))]
pub async fn start_server(
    addr: SocketAddr,
    state: GatewayState,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind chat relay to {addr}"))?;
    info!("Chat relay listening on {}", listener.local_addr()?);
    serve(listener, state, shutdown).await
}

/// Accept connections on an already bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: GatewayState,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Chat relay shutting down");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Client connected");
                    tokio::spawn(session::handle_connection(stream, peer, state.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}
