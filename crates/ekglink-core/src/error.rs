//! Error types for ekglink.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Port lifecycle, receive-path, and
//! per-operation validation failures are all captured here.

/// The error type for all ekglink operations.
///
/// Variants follow the failure taxonomy of the serial bridge: a failed open
/// is fatal to that open only, a parse or range failure terminates only the
/// current operation, and a busy rejection leaves the active sender alone.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The serial port could not be opened. The handle stays closed.
    #[error("failed to open serial port {path}: {reason}")]
    PortOpen {
        /// Port identifier that was requested (e.g. `/dev/ttyACM0`, `COM4`).
        path: String,
        /// Underlying cause reported by the OS or driver.
        reason: String,
    },

    /// A read on the receive path failed.
    ///
    /// Whether the reader keeps running is decided by
    /// [`Error::is_transient`] on the originating error.
    #[error("read error: {0}")]
    Read(String),

    /// A delimited row is narrower than the device frame.
    ///
    /// Row-stream operations recover from this locally: the row is skipped
    /// and the stream continues.
    #[error("row {row}: {columns} columns, at least {required} required")]
    RowWidth {
        /// 1-based row number in the source.
        row: usize,
        /// Number of columns actually present.
        columns: usize,
        /// Minimum number of columns accepted.
        required: usize,
    },

    /// A token inside the device frame is not a floating-point number.
    ///
    /// Aborts the whole row-stream operation.
    #[error("row {row}, column {column}: cannot parse {token:?} as a float")]
    ValueParse {
        /// 1-based row number in the source.
        row: usize,
        /// 1-based column number within the row.
        column: usize,
        /// The offending token, verbatim.
        token: String,
    },

    /// A raw byte value is outside `0..=255`. Nothing was written.
    #[error("value {value} at index {index} is outside the byte range 0..=255")]
    ByteRange {
        /// Position of the first offending element.
        index: usize,
        /// The offending value.
        value: i64,
    },

    /// Another sender currently owns the port.
    #[error("another send is already in progress")]
    Busy,

    /// An invalid parameter was passed to an operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Timed out waiting for data.
    #[error("timeout waiting for data")]
    Timeout,

    /// No port is open.
    #[error("not connected")]
    NotConnected,

    /// The connection to the device was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if a read that failed with this error may simply be
    /// retried on the next poll cycle.
    ///
    /// Everything else is unrecoverable for the line reader, which reports
    /// the error once and exits.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout | Error::Read(_) => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
