use crate::connection::WorkerConnection;
use crate::registry::ConnectionRegistry;
use rendr_common::{RendrError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, warn};

/// TCP listener that worker processes connect back to.
pub struct Listener {
    listener: TcpListener,
}

impl Listener {
    /// Binds the listener to the specified address.
    ///
    /// # Arguments
    /// * `bind_addr` - The address to bind to (e.g., "127.0.0.1:6543")
    pub async fn bind(bind_addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| RendrError::Bind {
                addr: bind_addr.to_string(),
                source,
            })?;

        Ok(Self { listener })
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the socket fails or the task is aborted.
    ///
    /// Every accepted stream becomes a [`WorkerConnection`] registered in
    /// `registry`. An accept error ends the loop quietly.
    pub async fn accept_loop(self, registry: Arc<ConnectionRegistry>, max_frame_size: usize) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    debug!("Accept loop stopped: {}", e);
                    return;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                warn!(%peer, "Failed to set TCP_NODELAY: {}", e);
            }
            WorkerConnection::spawn(registry.next_id(), stream, peer, &registry, max_frame_size);
        }
    }
}
