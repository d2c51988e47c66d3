use std::{
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};

use herald_common::{Signal, audit::AuditConfig, internal, logging, tracing};
use herald_control::{ControlServer, DEFAULT_CONTROL_SOCKET};
use herald_dispatch::{AuditTrail, DispatchConfig, Dispatcher, EmailProcessor};
use herald_metrics::MetricsConfig;
use herald_store::StoreConfig;
use herald_transport::TransportConfig;
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::control_handler::HeraldControlHandler;

/// Where the configuration is looked for when `HERALD_CONFIG` is unset
pub const DEFAULT_CONFIG_PATHS: [&str; 2] =
    ["./herald.config.ron", "/etc/herald/herald.config.ron"];

/// Control socket settings
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_socket")]
    pub socket: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            socket: default_socket(),
        }
    }
}

const fn default_true() -> bool {
    true
}

fn default_socket() -> String {
    DEFAULT_CONTROL_SOCKET.to_string()
}

/// The whole process, as described by `herald.config.ron`
///
/// ```ron
/// Herald (
///     store: Sqlite((url: "sqlite:///var/lib/herald/herald.db")),
///     dispatch: (sender: "news@example.com", batch_size: 50),
///     control: (socket: "/run/herald/herald.sock"),
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Herald {
    #[serde(default)]
    store: StoreConfig,
    #[serde(default)]
    transport: TransportConfig,
    #[serde(default)]
    dispatch: DispatchConfig,
    #[serde(default)]
    audit: AuditConfig,
    #[serde(default)]
    metrics: MetricsConfig,
    #[serde(default)]
    control: ControlConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Find the configuration file using the following precedence:
/// 1. `env_path`, normally the `HERALD_CONFIG` environment variable
/// 2. ./herald.config.ron (current working directory)
/// 3. /etc/herald/herald.config.ron (system-wide config)
pub fn find_config_file(env_path: Option<String>) -> anyhow::Result<PathBuf> {
    if let Some(env_path) = env_path {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "HERALD_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = DEFAULT_CONFIG_PATHS
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
    {
        return Ok(path.to_path_buf());
    }

    let paths_tried = DEFAULT_CONFIG_PATHS
        .iter()
        .map(|p| format!("  - {p}"))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - HERALD_CONFIG environment variable\n{paths_tried}"
    )
}

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl Herald {
    /// Parse a RON configuration
    pub fn from_ron(content: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(content)?)
    }

    #[must_use]
    pub const fn dispatch(&self) -> &DispatchConfig {
        &self.dispatch
    }

    #[must_use]
    pub const fn control(&self) -> &ControlConfig {
        &self.control
    }

    /// Open the store and wire the dispatcher over it
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn build(&self) -> anyhow::Result<Dispatcher> {
        let store = self.store.open().await?;
        let audit = AuditTrail::spawn(store.clone(), self.audit.channel_capacity);
        let processor =
            EmailProcessor::new(self.dispatch.clone(), store, self.transport.build(), audit)?;

        Ok(Dispatcher::new(Arc::new(processor)))
    }

    /// Run the dispatcher, the recovery scheduler and the control socket
    /// until a shutdown signal arrives
    ///
    /// # Errors
    ///
    /// This function will return an error if the store cannot be opened, the
    /// configuration is invalid, or the control socket cannot be bound.
    pub async fn run(mut self) -> anyhow::Result<()> {
        logging::init();
        herald_common::audit::init(self.audit.clone());
        herald_metrics::init_metrics(&self.metrics)?;
        self.dispatch.apply_env_overrides();

        internal!("Controller running");

        let dispatcher = self.build().await?;
        let processor = dispatcher.processor().clone();
        let recovery = dispatcher.recovery().clone();

        let control = if self.control.enabled {
            let handler = Arc::new(HeraldControlHandler::new(Arc::new(dispatcher)));
            Some(ControlServer::new(&self.control.socket, handler)?)
        } else {
            internal!("Control socket disabled");
            None
        };

        let processor_shutdown = SHUTDOWN_BROADCAST.subscribe();
        let recovery_shutdown = SHUTDOWN_BROADCAST.subscribe();
        let control_shutdown = SHUTDOWN_BROADCAST.subscribe();

        let workers = async move {
            tokio::try_join!(
                async {
                    processor
                        .serve(processor_shutdown)
                        .await
                        .map_err(anyhow::Error::from)
                },
                async {
                    recovery
                        .serve(recovery_shutdown)
                        .await
                        .map_err(anyhow::Error::from)
                },
                async {
                    match &control {
                        Some(server) => server
                            .serve(control_shutdown)
                            .await
                            .map_err(anyhow::Error::from),
                        None => Ok(()),
                    }
                },
            )
            .map(|_| ())
        };

        let ret = tokio::select! {
            r = workers => {
                r
            }
            r = shutdown() => {
                r
            }
        };

        internal!("Shutting down...");

        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let herald = Herald::from_ron("Herald ()").expect("parse");

        assert!(herald.control().enabled);
        assert_eq!(herald.control().socket, DEFAULT_CONTROL_SOCKET);
        assert_eq!(herald.dispatch().batch_size, 50);
    }

    #[test]
    fn test_sections_parse() {
        let herald = Herald::from_ron(
            r#"Herald (
                store: Memory,
                dispatch: (sender: "news@example.com", batch_size: 10, concurrency: 2),
                audit: (redact_recipients: true),
                control: (enabled: false, socket: "/tmp/other.sock"),
            )"#,
        )
        .expect("parse");

        assert!(matches!(herald.store, StoreConfig::Memory));
        assert_eq!(herald.dispatch().sender, "news@example.com");
        assert_eq!(herald.dispatch().batch_size, 10);
        assert!(herald.audit.redact_recipients);
        assert!(!herald.control().enabled);
    }

    #[test]
    fn test_sample_config_parses() {
        let herald =
            Herald::from_ron(include_str!("../../herald.config.ron")).expect("sample parses");

        assert_eq!(herald.dispatch().sender, "news@example.com");
        assert!(herald.transport.smtp.is_some());
        assert!(herald.audit.redact_recipients);
        assert!(!herald.metrics.enabled);
    }

    #[test]
    fn test_missing_env_config_is_an_error() {
        let err = find_config_file(Some("/nonexistent/herald.config.ron".to_string()))
            .expect_err("missing");
        assert!(err.to_string().contains("HERALD_CONFIG"));
    }

    #[test]
    fn test_env_config_wins() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let path = file.path().to_string_lossy().to_string();

        assert_eq!(
            find_config_file(Some(path)).expect("found"),
            file.path().to_path_buf()
        );
    }

    #[tokio::test]
    async fn test_build_memory_dispatcher() {
        let herald = Herald::from_ron(
            r#"Herald (store: Memory, dispatch: (sender: "news@example.com"))"#,
        )
        .expect("parse");

        let dispatcher = herald.build().await.expect("build");
        assert_eq!(dispatcher.processor().get_status().queue_length, 0);
    }

    #[tokio::test]
    async fn test_invalid_dispatch_config_is_rejected() {
        let herald = Herald::from_ron("Herald (store: Memory, dispatch: (batch_size: 0))")
            .expect("parse");

        assert!(herald.build().await.is_err());
    }
}
