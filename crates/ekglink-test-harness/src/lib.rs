//! ekglink-test-harness: Test utilities and a scripted mock device for
//! ekglink.
//!
//! This crate provides [`MockTransport`] for deterministic testing of the IO
//! engine without the microcontroller attached, and [`MockConnector`] to
//! hand it to the engine in place of a real serial port.

pub mod mock_serial;

pub use mock_serial::{MockConnector, MockTransport};
