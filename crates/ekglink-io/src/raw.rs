//! Raw byte writes.
//!
//! The integers are range-checked as a whole before the port is touched, then
//! written in one call. No acknowledgement is expected.

use tokio::sync::broadcast;
use tracing::{debug, info};

use ekglink_core::error::Result;
use ekglink_core::events::LinkEvent;
use ekglink_core::types::ByteVector;

use crate::port::SharedTransport;

/// Writes a validated byte sequence to the device.
pub struct RawSender {
    transport: SharedTransport,
    event_tx: broadcast::Sender<LinkEvent>,
}

impl RawSender {
    pub fn new(transport: SharedTransport, event_tx: broadcast::Sender<LinkEvent>) -> Self {
        Self {
            transport,
            event_tx,
        }
    }

    /// Convert `values` to bytes, or fail naming the first out-of-range
    /// element. Performs no I/O.
    pub fn prepare(values: &ByteVector) -> Result<Vec<u8>> {
        let bytes = values.to_bytes()?;
        debug!(len = bytes.len(), "raw bytes validated");
        Ok(bytes)
    }

    /// Validate `values` and write them in a single call.
    ///
    /// Returns the number of bytes written. Nothing is written if any value
    /// is out of range.
    pub async fn send(&self, values: &ByteVector) -> Result<usize> {
        let bytes = Self::prepare(values)?;
        self.transport.lock().await.send(&bytes).await?;

        info!(bytes = bytes.len(), "raw bytes written");
        let _ = self.event_tx.send(LinkEvent::RawWritten { bytes: bytes.len() });
        Ok(bytes.len())
    }
}
