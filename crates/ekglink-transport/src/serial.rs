//! Serial port transport for the device link.
//!
//! This module provides [`SerialTransport`], which implements the
//! [`Transport`] trait for the USB virtual COM port the microcontroller
//! enumerates as, and [`SerialConnector`], the [`Connector`] the IO engine
//! uses to open it.
//!
//! Opening the port toggles DTR, which resets most development boards. The
//! lines are left at their OS defaults on purpose: the IO engine's settle
//! delay covers the reset.
//!
//! # Example
//!
//! ```no_run
//! use ekglink_core::transport::Transport;
//! use ekglink_core::types::PortConfig;
//! use ekglink_transport::SerialTransport;
//!
//! # async fn example() -> ekglink_core::Result<()> {
//! let config = PortConfig::new("/dev/ttyACM0", 115_200);
//! let mut transport = SerialTransport::open(&config).await?;
//!
//! // One little-endian float, written and flushed.
//! transport.send(&1.0f32.to_le_bytes()).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use ekglink_core::error::{Error, Result};
use ekglink_core::transport::{Connector, Transport};
use ekglink_core::types::PortConfig;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

/// Character framing of the serial line.
///
/// Defaults match the firmware: 8 data bits, 1 stop bit, no parity, no flow
/// control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    /// Number of data bits (typically 8)
    pub data_bits: DataBits,
    /// Number of stop bits (typically 1)
    pub stop_bits: StopBits,
    /// Parity checking (typically None)
    pub parity: Parity,
    /// Flow control (typically None)
    pub flow_control: FlowControl,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl From<DataBits> for tokio_serial::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => tokio_serial::DataBits::Five,
            DataBits::Six => tokio_serial::DataBits::Six,
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

/// Number of stop bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for tokio_serial::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Software => tokio_serial::FlowControl::Software,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

fn io_error(e: tokio_serial::Error) -> Error {
    Error::Io(e.into())
}

fn is_disconnect(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::BrokenPipe || e.kind() == std::io::ErrorKind::NotConnected
}

/// Serial port transport to the microcontroller.
pub struct SerialTransport {
    /// The underlying serial port stream
    port: Option<SerialStream>,
    /// Port name for logging/debugging
    port_name: String,
}

impl SerialTransport {
    /// Open a serial port with 8N1 framing and no flow control.
    pub async fn open(config: &PortConfig) -> Result<Self> {
        Self::open_with_settings(config, SerialSettings::default()).await
    }

    /// Open a serial port with explicit character framing.
    pub async fn open_with_settings(config: &PortConfig, settings: SerialSettings) -> Result<Self> {
        let port = config.path.as_str();
        tracing::debug!(
            port = %port,
            baud_rate = config.baud_rate,
            timeout_ms = config.open_poll_timeout.as_millis(),
            data_bits = ?settings.data_bits,
            stop_bits = ?settings.stop_bits,
            parity = ?settings.parity,
            flow_control = ?settings.flow_control,
            "Opening serial port"
        );

        let serial_stream = tokio_serial::new(port, config.baud_rate)
            .data_bits(settings.data_bits.into())
            .stop_bits(settings.stop_bits.into())
            .parity(settings.parity.into())
            .flow_control(settings.flow_control.into())
            .timeout(config.open_poll_timeout)
            .open_native_async()
            .map_err(|e| {
                tracing::error!(port = %port, error = %e, "Failed to open serial port");
                Error::PortOpen {
                    path: port.to_string(),
                    reason: e.to_string(),
                }
            })?;

        tracing::info!(port = %port, baud_rate = config.baud_rate, "Serial port opened successfully");

        Ok(Self {
            port: Some(serial_stream),
            port_name: port.to_string(),
        })
    }

    /// Get the name of the serial port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(
            port = %self.port_name,
            bytes = data.len(),
            data = ?data,
            "Sending data"
        );

        port.write_all(data).await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "Failed to send data");
            if is_disconnect(&e) {
                Error::ConnectionLost
            } else {
                Error::Io(e)
            }
        })?;

        // Every write is flushed; the device paces on individual values.
        port.flush().await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "Failed to flush serial port");
            Error::Io(e)
        })?;

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, port.read(buf)).await {
            Ok(Ok(0)) => {
                tracing::warn!(port = %self.port_name, "Serial port reported end of stream");
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => {
                tracing::trace!(
                    port = %self.port_name,
                    bytes = n,
                    data = ?&buf[..n],
                    "Received data"
                );
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(port = %self.port_name, error = %e, "Failed to receive data");
                if is_disconnect(&e) {
                    Err(Error::ConnectionLost)
                } else if e.kind() == std::io::ErrorKind::InvalidData {
                    // Framing or parity error on a single read; the line is still up.
                    Err(Error::Read(e.to_string()))
                } else {
                    Err(Error::Io(e))
                }
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    fn bytes_available(&self) -> Result<usize> {
        let port = self.port.as_ref().ok_or(Error::NotConnected)?;
        let n = port.bytes_to_read().map_err(io_error)?;
        Ok(n as usize)
    }

    fn clear_buffers(&mut self) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        port.clear(ClearBuffer::All).map_err(io_error)?;
        tracing::debug!(port = %self.port_name, "Cleared input and output buffers");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            tracing::debug!(port = %self.port_name, "Closing serial port");

            if let Err(e) = port.flush().await {
                tracing::warn!(
                    port = %self.port_name,
                    error = %e,
                    "Failed to flush before closing (continuing anyway)"
                );
            }

            tracing::info!(port = %self.port_name, "Serial port closed");
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.port.is_some() {
            tracing::debug!(port = %self.port_name, "SerialTransport dropped, closing port");
        }
    }
}

/// Opens [`SerialTransport`]s for the IO engine.
#[derive(Debug, Clone, Default)]
pub struct SerialConnector {
    settings: SerialSettings,
}

impl SerialConnector {
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self, config: &PortConfig) -> Result<Box<dyn Transport>> {
        let transport = SerialTransport::open_with_settings(config, self.settings).await?;
        Ok(Box::new(transport))
    }
}
