//! Client for connecting to the control socket

use std::{path::Path, sync::Arc, time::Duration};

use tokio::{net::UnixStream, sync::Mutex};
use tracing::{debug, warn};

use crate::{
    ControlError, PROTOCOL_VERSION, Request, Response, ResponsePayload, Result,
    frame::{MAX_RESPONSE_SIZE, read_frame, write_frame},
};

/// Client for communicating with the herald control server
pub struct ControlClient {
    socket_path: String,
    timeout: Duration,
    /// Reused across requests when set, reconnecting if it breaks
    persistent_connection: Option<Arc<Mutex<Option<UnixStream>>>>,
}

impl ControlClient {
    /// Create a new control client with the given socket path
    #[must_use]
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Duration::from_secs(10),
            persistent_connection: None,
        }
    }

    /// Set the request timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Keep one connection open across requests, as `--watch` does
    #[must_use]
    pub fn with_persistent_connection(mut self) -> Self {
        self.persistent_connection = Some(Arc::new(Mutex::new(None)));
        self
    }

    async fn connect(&self) -> Result<UnixStream> {
        debug!("Connecting to control socket: {}", self.socket_path);
        let stream = UnixStream::connect(&self.socket_path).await?;
        Ok(stream)
    }

    /// Send a request and receive a response
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Connection fails
    /// - Protocol error occurs
    /// - Request times out
    /// - Server returns an error
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        tokio::time::timeout(self.timeout, self.send_request_internal(request))
            .await
            .map_err(|_| ControlError::Timeout)?
    }

    async fn send_request_internal(&self, request: Request) -> Result<Response> {
        if let Some(persistent) = &self.persistent_connection {
            self.send_request_persistent(request, persistent).await
        } else {
            let mut stream = self.connect().await?;
            Self::send_and_receive(&mut stream, &request).await
        }
    }

    async fn send_request_persistent(
        &self,
        request: Request,
        persistent: &Arc<Mutex<Option<UnixStream>>>,
    ) -> Result<Response> {
        let mut guard = persistent.lock().await;

        let result = if let Some(stream) = guard.as_mut() {
            Self::send_and_receive(stream, &request).await
        } else {
            let mut stream = self.connect().await?;
            let result = Self::send_and_receive(&mut stream, &request).await;
            if result.is_ok() {
                *guard = Some(stream);
            }
            result
        };

        // Server errors are answers, not a broken connection
        match result {
            Err(ControlError::ServerError { .. }) | Ok(_) => result,
            Err(_) => {
                warn!(
                    "Persistent connection failed, reconnecting to {}",
                    self.socket_path
                );
                *guard = None;

                let mut stream = self.connect().await?;
                let result = Self::send_and_receive(&mut stream, &request).await;
                if result.is_ok() {
                    *guard = Some(stream);
                }
                result
            }
        }
    }

    async fn send_and_receive(stream: &mut UnixStream, request: &Request) -> Result<Response> {
        write_frame(stream, request).await?;
        let response: Response = read_frame(stream, MAX_RESPONSE_SIZE).await?;

        if !response.is_version_compatible() {
            return Err(ControlError::IncompatibleVersion {
                peer: response.version,
                local: PROTOCOL_VERSION,
            });
        }

        if let ResponsePayload::Error { code, message } = response.payload {
            return Err(ControlError::ServerError { code, message });
        }

        Ok(response)
    }

    /// Check if the control socket exists
    ///
    /// # Errors
    ///
    /// Returns an error if the socket file does not exist
    pub fn check_socket_exists(&self) -> Result<()> {
        let path = Path::new(&self.socket_path);
        if !path.exists() {
            return Err(ControlError::InvalidSocketPath(format!(
                "Socket does not exist: {}",
                self.socket_path
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ControlClient::new("/tmp/test.sock");
        assert_eq!(client.socket_path, "/tmp/test.sock");
        assert_eq!(client.timeout, Duration::from_secs(10));
        assert!(client.persistent_connection.is_none());
    }

    #[test]
    fn test_client_builder_chain() {
        let client = ControlClient::new("/tmp/test.sock")
            .with_timeout(Duration::from_secs(5))
            .with_persistent_connection();
        assert_eq!(client.timeout, Duration::from_secs(5));
        assert!(client.persistent_connection.is_some());
    }

    #[test]
    fn test_missing_socket_is_reported() {
        let client = ControlClient::new("/nonexistent/herald.sock");
        assert!(matches!(
            client.check_socket_exists(),
            Err(ControlError::InvalidSocketPath(_))
        ));
    }
}
