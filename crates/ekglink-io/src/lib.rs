//! Serial transport and framing engine.
//!
//! One serial port, one background reader, at most one active sender. The
//! [`TransportCoordinator`] owns the port and the reader and serializes the
//! three exchange patterns the device understands:
//!
//! - a single sample of 4-byte floats answered by a two-byte binary ack;
//! - a stream of rows, each answered by one text line;
//! - a raw byte write with no answer.
//!
//! Everything that happens is published as a [`LinkEvent`] on a broadcast
//! stream; [`EventLog`] is a ready-made subscriber.
//!
//! # Architecture
//!
//! - [`codec`] -- float framing, report formatting, line assembly
//! - [`port`] -- open/close lifecycle of the single port
//! - [`reader`] -- background line reader and ack routing
//! - [`sample`], [`rows`], [`raw`] -- the three senders
//! - [`coordinator`] -- single-sender permit and lifecycle
//! - [`builder`] -- fluent construction of the coordinator
//! - [`log`] -- recorded event history
//!
//! [`LinkEvent`]: ekglink_core::events::LinkEvent

pub mod builder;
pub mod codec;
pub mod coordinator;
pub mod log;
pub mod port;
pub mod raw;
pub mod reader;
pub mod rows;
pub mod sample;

pub use builder::CoordinatorBuilder;
pub use coordinator::TransportCoordinator;
pub use log::{EventLog, LogEvent};
pub use port::{PortHandle, SharedTransport};
pub use raw::RawSender;
pub use reader::{AckTap, ReaderHandle, spawn_line_reader};
pub use rows::{RowStreamReport, RowStreamSender, parse_frame, read_rows};
pub use sample::SampleSender;
