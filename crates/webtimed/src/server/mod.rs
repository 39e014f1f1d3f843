//! Unix socket server for the webtime daemon.
//!
//! The server:
//! - Listens on a Unix socket for host and control connections
//! - Spawns a ConnectionHandler for each client
//! - Forwards engine directives to every subscribed host
//! - Supports graceful shutdown via CancellationToken
//!
//! ```text
//! ┌─────────────────┐
//! │  DaemonServer   │
//! │  UnixListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  EngineHandle   │
//! │   (per client)  │     │                 │
//! └─────────────────┘     └────────┬────────┘
//!         ▲                        │ HostDirective
//!         │  INSTALL_RULES etc.    ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │   subscribers   │◀────│   broadcaster   │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Server errors are logged and allow continued operation

mod connection;

pub use connection::{
    write_message, ConnectionError, ConnectionHandler, Subscriber, SubscriberWriter,
    SubscribersMap, MAX_SUBSCRIBERS,
};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use webtime_protocol::DaemonMessage;

use crate::engine::EngineHandle;
use crate::host::{HostDirective, HostPresence};

pub struct DaemonServer {
    socket_path: PathBuf,
    engine: EngineHandle,
    cancel_token: CancellationToken,
    connection_counter: AtomicU64,
    subscribers: SubscribersMap,
    idle_threshold_secs: u64,
}

impl DaemonServer {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        engine: EngineHandle,
        cancel_token: CancellationToken,
        idle_threshold_secs: u64,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            engine,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            idle_threshold_secs,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Listens for connections until the cancellation token fires.
    pub async fn run(&self) -> Result<(), ServerError> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| ServerError::SocketSetup {
                path: self.socket_path.clone(),
                error: e.to_string(),
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| ServerError::SocketSetup {
                    path: self.socket_path.clone(),
                    error: e.to_string(),
                })?;
            }
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| ServerError::SocketSetup {
                path: self.socket_path.clone(),
                error: e.to_string(),
            })?;

        info!(socket = %self.socket_path.display(), "Daemon server listening");

        self.spawn_directive_broadcaster();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    fn handle_connection(&self, stream: tokio::net::UnixStream, connection_number: u64) {
        let (reader, writer) = stream.into_split();
        let engine = self.engine.clone();
        let subscribers = Arc::clone(&self.subscribers);
        let presence = self.engine.host_presence().clone();
        let idle_threshold_secs = self.idle_threshold_secs;

        tokio::spawn(async move {
            let handler = ConnectionHandler::new(
                reader,
                writer,
                engine,
                Arc::clone(&subscribers),
                connection_number,
                idle_threshold_secs,
            );

            let client_id = handler.run().await;

            if let Some(id) = client_id {
                let mut subs = subscribers.write().await;
                if subs.remove(&id).is_some() {
                    presence.set(subs.len());
                    debug!(client_id = %id, "Removed disconnected subscriber");
                }
            }
        });
    }

    /// Forwards every engine directive to the subscribed hosts.
    fn spawn_directive_broadcaster(&self) {
        let mut directive_rx = self.engine.subscribe_directives();
        let subscribers = Arc::clone(&self.subscribers);
        let presence = self.engine.host_presence().clone();
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Directive broadcaster shutting down");
                        break;
                    }

                    result = directive_rx.recv() => {
                        match result {
                            Ok(directive) => {
                                broadcast_directive(&subscribers, &presence, directive).await
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                // Rule installs are full replacements; the next one catches up.
                                warn!(skipped = n, "Directive broadcaster lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("Directive channel closed");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    async fn cleanup(&self) {
        self.subscribers.write().await.clear();
        self.engine.host_presence().set(0);

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }

        info!("Server cleanup complete");
    }
}

/// Writes one directive to every subscriber, dropping the ones that fail.
async fn broadcast_directive(
    subscribers: &SubscribersMap,
    presence: &HostPresence,
    directive: HostDirective,
) {
    let msg = DaemonMessage::from(directive);

    let subs = subscribers.read().await;
    let mut failed_clients = Vec::new();

    for (client_id, sub) in subs.iter() {
        if let Err(e) = write_message(&sub.writer, &msg).await {
            debug!(client_id = %client_id, error = %e, "Failed to send directive");
            failed_clients.push(client_id.clone());
        }
    }

    drop(subs);

    if !failed_clients.is_empty() {
        let mut subs = subscribers.write().await;
        for client_id in failed_clients {
            subs.remove(&client_id);
            debug!(client_id = %client_id, "Removed failed subscriber");
        }
        presence.set(subs.len());
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let err = ServerError::SocketSetup {
            path: PathBuf::from("/tmp/test.sock"),
            error: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("/tmp/test.sock"));
        assert!(err.to_string().contains("permission denied"));
    }
}
