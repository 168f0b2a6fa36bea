//! Transport implementations for ekglink.
//!
//! This crate provides the concrete [`Transport`](ekglink_core::Transport)
//! and [`Connector`](ekglink_core::Connector) for the serial link:
//!
//! - [`SerialTransport`]: the USB virtual COM port of the microcontroller
//! - [`SerialConnector`]: opens a `SerialTransport` for a
//!   [`PortConfig`](ekglink_core::PortConfig)
//!
//! # Example
//!
//! ```no_run
//! use ekglink_core::{Connector, PortConfig};
//! use ekglink_transport::SerialConnector;
//!
//! # async fn example() -> ekglink_core::Result<()> {
//! let connector = SerialConnector::default();
//! let transport = connector.connect(&PortConfig::new("COM4", 115_200)).await?;
//! assert!(transport.is_connected());
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::{
    DataBits, FlowControl, Parity, SerialConnector, SerialSettings, SerialTransport, StopBits,
};
