//! Control server implementation

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use herald_common::Signal;
use tokio::{
    net::{UnixListener, UnixStream},
    sync::broadcast,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    ControlError, PROTOCOL_VERSION, Request, Response, Result,
    frame::{MAX_REQUEST_SIZE, read_frame, write_frame},
};

/// How long a connection may take to send its request or accept the response
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Handler trait for processing control requests
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle a request and return a response
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be processed
    async fn handle_request(&self, request: Request) -> Result<Response>;
}

/// Control server for managing herald via Unix domain socket
pub struct ControlServer {
    socket_path: String,
    handler: Arc<dyn CommandHandler>,
}

impl ControlServer {
    /// Create a new control server
    ///
    /// # Errors
    ///
    /// Returns an error if the socket path is empty
    pub fn new(socket_path: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Result<Self> {
        let socket_path = socket_path.into();
        if socket_path.trim().is_empty() {
            return Err(ControlError::InvalidSocketPath(
                "socket path is empty".to_string(),
            ));
        }

        Ok(Self {
            socket_path,
            handler,
        })
    }

    #[must_use]
    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    /// Start the control server
    ///
    /// Runs until a shutdown signal is received.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another running instance owns the socket
    /// - The socket cannot be bound
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<()> {
        let socket_path = Path::new(&self.socket_path);
        if socket_path.exists() {
            if UnixStream::connect(socket_path).await.is_ok() {
                return Err(ControlError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!(
                        "Socket already in use by running instance: {}",
                        self.socket_path
                    ),
                )));
            }
            // Left behind by a crashed process
            info!("Removing stale socket file: {}", self.socket_path);
            tokio::fs::remove_file(socket_path).await?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        #[cfg(unix)]
        {
            let metadata = tokio::fs::metadata(&self.socket_path).await?;
            let mut perms = metadata.permissions();
            perms.set_mode(0o600);
            tokio::fs::set_permissions(&self.socket_path, perms).await?;
            info!(
                "Control socket created with mode 0600 (owner only): {}",
                self.socket_path
            );
        }
        #[cfg(not(unix))]
        {
            info!("Control server listening on: {}", self.socket_path);
        }

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let handler = Arc::clone(&self.handler);
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, handler).await {
                                    error!("Error handling control connection: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            error!("Error accepting control connection: {e}");
                        }
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            info!("Control server shutting down");
                            break;
                        }
                        Err(e) => {
                            error!("Control server shutdown channel error: {e}");
                            break;
                        }
                    }
                }
            }
        }

        if socket_path.exists() {
            debug!("Removing socket file: {}", self.socket_path);
            let _ = tokio::fs::remove_file(socket_path).await;
        }

        Ok(())
    }

    /// Serve requests on one connection until the client hangs up
    async fn handle_connection(
        mut stream: UnixStream,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<()> {
        loop {
            let request: Request =
                match tokio::time::timeout(IO_TIMEOUT, read_frame(&mut stream, MAX_REQUEST_SIZE))
                    .await
                    .map_err(|_| ControlError::Timeout)?
                {
                    Ok(request) => request,
                    Err(ControlError::ConnectionClosed) => return Ok(()),
                    Err(e) => return Err(e),
                };

            trace!("Received request: {request:?}");

            let response = if request.is_version_compatible() {
                match handler.handle_request(request).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("Error handling request: {e}");
                        Response::error(e.to_string())
                    }
                }
            } else {
                warn!(
                    "Rejecting request with protocol version {} (expected {PROTOCOL_VERSION})",
                    request.version
                );
                Response::error_with_code(
                    "INCOMPATIBLE_VERSION",
                    format!(
                        "Incompatible protocol version: client={}, server={PROTOCOL_VERSION}",
                        request.version
                    ),
                )
            };

            trace!("Sending response: {response:?}");

            tokio::time::timeout(IO_TIMEOUT, write_frame(&mut stream, &response))
                .await
                .map_err(|_| ControlError::Timeout)??;
        }
    }
}
