//! ekglink-core: Core traits, types, and error definitions for ekglink.
//!
//! This crate defines the device-agnostic pieces of the serial bridge between
//! a host application and the EKG microcontroller. The IO engine, the serial
//! transport and the test harness all build on these types.
//!
//! # Key types
//!
//! - [`Transport`] / [`Connector`] -- byte-level channel and its factory
//! - [`LinkEvent`] -- observer stream notifications
//! - [`Sample`], [`AckBinary`], [`RowRecord`], [`ByteVector`] -- data model
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use events::{LinkEvent, Operation};
pub use transport::{Connector, Transport};
pub use types::*;
