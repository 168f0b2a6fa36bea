//! Transport and connector traits for the device link.
//!
//! The [`Transport`] trait abstracts over the physical link to the
//! microcontroller. The serial implementation lives in `ekglink-transport`;
//! `ekglink-test-harness` provides a scripted mock for deterministic tests.
//!
//! The IO engine in `ekglink-io` never opens a port directly. It asks a
//! [`Connector`] for a fresh [`Transport`] every time the port is opened, so
//! the port configuration can change between exchanges and tests can swap in
//! a mock device.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::types::PortConfig;

/// Asynchronous byte-level transport to the device.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the device.
    ///
    /// Implementations must write every byte and flush before returning, so
    /// one `send()` call is one flushed write on the wire.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the device into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Will wait up to `timeout`
    /// for data to arrive; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if nothing arrives within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Number of inbound bytes that can be read without waiting.
    fn bytes_available(&self) -> Result<usize>;

    /// Discard everything buffered in both directions.
    ///
    /// Called once after the post-open settle delay so bytes produced by the
    /// device reset never reach the first exchange.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}

/// Factory that opens a [`Transport`] for a [`PortConfig`].
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open the port described by `config`.
    ///
    /// Failures must be reported as
    /// [`Error::PortOpen`](crate::error::Error::PortOpen) carrying the cause.
    async fn connect(&self, config: &PortConfig) -> Result<Box<dyn Transport>>;
}
