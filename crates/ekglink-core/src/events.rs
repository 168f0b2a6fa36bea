//! Observer stream events.
//!
//! Every outcome of the bridge, success or failure, is emitted as a
//! [`LinkEvent`] through a `tokio::sync::broadcast` channel. The display
//! layer subscribes and renders each event as exactly one line of text via
//! its [`Display`](std::fmt::Display) impl, so the log always shows recovery
//! state in order.

use std::fmt;

use crate::types::AckBinary;

/// Which sender an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Sample,
    RowStream,
    Raw,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Sample => f.write_str("sample send"),
            Operation::RowStream => f.write_str("row stream"),
            Operation::Raw => f.write_str("raw send"),
        }
    }
}

/// An event emitted by the IO engine.
///
/// Events are delivered on a best-effort basis through a bounded broadcast
/// channel; a consumer that falls behind by more than the channel capacity
/// misses the oldest events.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The port was opened and has settled.
    PortOpened { path: String, baud_rate: u32 },

    /// Opening the port failed. The handle is closed.
    PortOpenFailed { path: String, reason: String },

    /// The port was closed.
    PortClosed { path: String },

    /// The line reader started polling.
    ReaderStarted,

    /// The line reader stopped. Carries any unterminated text left in the
    /// carry-over buffer.
    ReaderStopped { unterminated: Option<String> },

    /// A complete line decoded by the reader, verbatim.
    Line(String),

    /// The reader hit a read error.
    ReadError { reason: String, fatal: bool },

    /// All sample values were written.
    SampleSent { values: usize, held_open: bool },

    /// Raw bytes of the binary acknowledgement.
    ReportBytes(AckBinary),

    /// Status byte of the binary acknowledgement.
    Status(u8),

    /// Similarity byte of the binary acknowledgement.
    Similarity(u8),

    /// One display row of the values that were sent.
    SampleValues(String),

    /// A row was too narrow and was skipped.
    RowSkipped {
        row: usize,
        columns: usize,
        required: usize,
    },

    /// Text acknowledgement for a transmitted row.
    RowAck { row: usize, text: String },

    /// The row stream consumed its whole source.
    RowStreamFinished { sent: usize, skipped: usize },

    /// The row stream stopped early.
    RowStreamAborted { reason: String },

    /// A raw byte sequence was written.
    RawWritten { bytes: usize },

    /// An operation failed.
    OperationFailed { operation: Operation, reason: String },

    /// An operation was rejected because another sender owns the port.
    Busy { operation: Operation },
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::PortOpened { path, baud_rate } => {
                write!(f, "[OK] Port {} opened at {} baud.", path, baud_rate)
            }
            LinkEvent::PortOpenFailed { path, reason } => {
                write!(f, "[ERROR] Could not open {}: {}", path, reason)
            }
            LinkEvent::PortClosed { .. } => f.write_str("[OK] Port closed."),
            LinkEvent::ReaderStarted => f.write_str("[OK] Reader started."),
            LinkEvent::ReaderStopped { unterminated: None } => {
                f.write_str("[OK] Reader stopped.")
            }
            LinkEvent::ReaderStopped {
                unterminated: Some(rest),
            } => write!(f, "[OK] Reader stopped (unterminated: {:?}).", rest),
            LinkEvent::Line(line) => f.write_str(line),
            LinkEvent::ReadError {
                reason,
                fatal: true,
            } => write!(f, "[ERROR] Read failed, reader stopped: {}", reason),
            LinkEvent::ReadError {
                reason,
                fatal: false,
            } => write!(f, "[WARN] Read failed: {}", reason),
            LinkEvent::SampleSent {
                held_open: true, ..
            } => f.write_str("[OK] All floats sent. Port is held open."),
            LinkEvent::SampleSent {
                held_open: false, ..
            } => f.write_str("[OK] All floats sent."),
            LinkEvent::ReportBytes(ack) => write!(
                f,
                "Report bytes: {:02X} {:02X}",
                ack.status, ack.similarity
            ),
            LinkEvent::Status(status) => write!(f, "Status: {}", status),
            LinkEvent::Similarity(similarity) => write!(f, "Similarity: {}", similarity),
            LinkEvent::SampleValues(row) => f.write_str(row),
            LinkEvent::RowSkipped {
                row,
                columns,
                required,
            } => write!(
                f,
                "[WARN] Row {}: {} columns, need {}. Skipped.",
                row, columns, required
            ),
            LinkEvent::RowAck { row, text } => write!(f, "[ROW {}] {}", row, text),
            LinkEvent::RowStreamFinished { sent, skipped } => write!(
                f,
                "[OK] Row stream finished: {} sent, {} skipped.",
                sent, skipped
            ),
            LinkEvent::RowStreamAborted { reason } => {
                write!(f, "[ERROR] Row stream aborted: {}", reason)
            }
            LinkEvent::RawWritten { bytes } => write!(f, "[OK] Wrote {} raw bytes.", bytes),
            LinkEvent::OperationFailed { operation, reason } => {
                write!(f, "[ERROR] {} failed: {}", operation, reason)
            }
            LinkEvent::Busy { operation } => write!(
                f,
                "[BUSY] {} rejected: another send is in progress.",
                operation
            ),
        }
    }
}
