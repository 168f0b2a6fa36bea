//! Open/closed lifecycle of the single serial connection.
//!
//! [`PortHandle`] owns at most one open [`Transport`]. The transport is
//! shared as a [`SharedTransport`] so the line reader and the active sender
//! can both reach it; each takes the mutex only for one read or one write.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use ekglink_core::error::Result;
use ekglink_core::transport::{Connector, Transport};
use ekglink_core::types::PortConfig;

/// A transport shared between the reader task and the active sender.
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

struct OpenPort {
    config: PortConfig,
    transport: SharedTransport,
}

/// Owns the open/closed state of one serial connection.
pub struct PortHandle {
    connector: Arc<dyn Connector>,
    open: Option<OpenPort>,
}

impl PortHandle {
    /// Create a closed handle. Nothing is opened until [`PortHandle::open`].
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            open: None,
        }
    }

    /// Open the port described by `config`.
    ///
    /// If the handle is already open with an identical config this is a
    /// no-op returning the existing transport. If it is open with a
    /// different config, the old port is closed first.
    ///
    /// A fresh open waits `config.settle_delay` for the device to finish the
    /// reset the open triggers, then discards everything already buffered.
    /// On failure the handle stays closed; nothing is retried.
    pub async fn open(&mut self, config: &PortConfig) -> Result<SharedTransport> {
        if let Some(open) = &self.open {
            if open.config == *config && open.transport.lock().await.is_connected() {
                debug!(port = %config.path, "port already open");
                return Ok(open.transport.clone());
            }
            debug!(port = %open.config.path, "reopening port with new configuration");
            self.close().await?;
        }

        config.validate()?;
        let mut transport = self.connector.connect(config).await?;

        if !config.settle_delay.is_zero() {
            debug!(
                port = %config.path,
                settle_ms = config.settle_delay.as_millis(),
                "waiting for device to settle"
            );
            tokio::time::sleep(config.settle_delay).await;
        }

        if let Err(e) = transport.clear_buffers() {
            warn!(port = %config.path, error = %e, "failed to reset buffers after open");
            let _ = transport.close().await;
            return Err(e);
        }

        info!(port = %config.path, baud_rate = config.baud_rate, "port ready");
        let transport: SharedTransport = Arc::new(Mutex::new(transport));
        self.open = Some(OpenPort {
            config: config.clone(),
            transport: transport.clone(),
        });
        Ok(transport)
    }

    /// Close the port. Safe to call when already closed.
    ///
    /// Returns the path of the port that was closed, if any.
    pub async fn close(&mut self) -> Result<Option<String>> {
        let Some(open) = self.open.take() else {
            return Ok(None);
        };
        open.transport.lock().await.close().await?;
        info!(port = %open.config.path, "port closed");
        Ok(Some(open.config.path))
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Whether the handle is open with exactly `config`.
    pub fn is_open_with(&self, config: &PortConfig) -> bool {
        self.open.as_ref().is_some_and(|open| open.config == *config)
    }

    /// Config of the open port, if any.
    pub fn config(&self) -> Option<&PortConfig> {
        self.open.as_ref().map(|open| &open.config)
    }

    /// The open transport, if any.
    pub fn transport(&self) -> Option<SharedTransport> {
        self.open.as_ref().map(|open| open.transport.clone())
    }
}
