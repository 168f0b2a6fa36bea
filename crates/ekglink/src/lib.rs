//! # ekglink -- Serial bridge to an EKG microcontroller
//!
//! `ekglink` sends ECG sample vectors to a microcontroller over a USB serial
//! link and collects its acknowledgements. It owns the single serial port,
//! runs a background reader for device output, and makes sure only one
//! exchange writes to the port at a time.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ekglink::{Sample, SendMode};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let link = ekglink::serial_builder("/dev/ttyACM0")
//!         .baud_rate(115_200)
//!         .build()?;
//!
//!     let sample = Sample::new(vec![0.0; 140])?;
//!     let ack = link.send_sample(&sample, SendMode::OneShot).await?;
//!     println!("status {} similarity {}", ack.status, ack.similarity);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                  | Purpose                                          |
//! |------------------------|--------------------------------------------------|
//! | `ekglink-core`         | `Transport`/`Connector` traits, data model, errors, events |
//! | `ekglink-transport`    | Serial transport over `tokio-serial`             |
//! | `ekglink-io`           | Framing, reader, senders, coordinator, event log |
//! | `ekglink-test-harness` | Scripted mock device for tests                   |
//! | **`ekglink`**          | This facade crate -- re-exports everything       |
//!
//! ## Exchanges
//!
//! - [`send_sample`](TransportCoordinator::send_sample): 4-byte
//!   little-endian floats, answered by `status` and `similarity` bytes.
//! - [`stream_rows`](TransportCoordinator::stream_rows): one frame per
//!   delimited row, each answered by a text line.
//! - [`send_raw`](TransportCoordinator::send_raw): range-checked bytes,
//!   written in one call.
//!
//! A request made while another exchange is running fails with
//! [`Error::Busy`]; it is never queued.
//!
//! ## Events
//!
//! Everything the link does is published as a [`LinkEvent`]. Each event
//! renders to the line a console would print:
//!
//! ```no_run
//! # async fn example(link: &ekglink::TransportCoordinator) {
//! let mut events = link.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{event}");
//! }
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Enables                                  | Default |
//! |----------|------------------------------------------|---------|
//! | `serial` | [`transport`] module and [`serial_builder`] | yes  |

pub use ekglink_core::*;

pub use ekglink_io::{
    CoordinatorBuilder, EventLog, LogEvent, RowStreamReport, TransportCoordinator, parse_frame,
    read_rows,
};

/// The IO engine: codec, port handle, reader, senders and coordinator.
pub mod io {
    pub use ekglink_io::*;
}

/// Serial port transport.
///
/// Provides [`SerialTransport`](transport::SerialTransport) and
/// [`SerialConnector`](transport::SerialConnector), with framing settings
/// (data bits, stop bits, parity, flow control) defaulting to 8N1.
#[cfg(feature = "serial")]
pub mod transport {
    pub use ekglink_transport::*;
}

/// Start a [`CoordinatorBuilder`] for a real serial port at `path` with 8N1
/// framing.
#[cfg(feature = "serial")]
pub fn serial_builder(path: &str) -> CoordinatorBuilder {
    let connector = ekglink_transport::SerialConnector::default();
    CoordinatorBuilder::new(std::sync::Arc::new(connector)).port(path)
}
