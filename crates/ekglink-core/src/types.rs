//! Data model shared by the transport, the IO engine and the collaborator
//! layer.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Number of values in one device frame, agreed out-of-band with the firmware.
pub const SAMPLE_ARITY: usize = 140;

/// Minimum number of columns a delimited row needs to be transmitted.
pub const MIN_ROW_COLUMNS: usize = SAMPLE_ARITY;

/// Length of the binary acknowledgement sent after a sample.
pub const ACK_LEN: usize = 2;

/// Default baud rate of the device firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// How long the OS may take to hand back an opened port.
pub const DEFAULT_OPEN_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Wait after opening the port before any traffic. Opening the port resets
/// the microcontroller; this covers its boot time.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Sleep between two consecutive 4-byte values.
pub const DEFAULT_PACING: Duration = Duration::from_millis(1);

/// Sleep between two polls of an idle receive path.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Parameters for one open attempt.
///
/// The engine re-reads the current `PortConfig` before every open, so a
/// collaborator can switch port or baud rate between exchanges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    /// Port identifier (e.g. `/dev/ttyACM0` on Linux, `COM4` on Windows).
    pub path: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Upper bound for the OS-level open call.
    pub open_poll_timeout: Duration,
    /// Quiet period after a successful open, before the buffers are reset.
    pub settle_delay: Duration,
}

impl PortConfig {
    /// A config for `path` at `baud_rate` with default timings.
    pub fn new(path: &str, baud_rate: u32) -> Self {
        Self {
            path: path.to_string(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Reject configs that can never open.
    pub fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(Error::InvalidParameter("serial port path is empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(Error::InvalidParameter("baud rate must be positive".into()));
        }
        Ok(())
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            open_poll_timeout: DEFAULT_OPEN_POLL_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

/// Timing of the IO engine's suspension points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    /// Sleep after each 4-byte value is written and flushed.
    pub pacing: Duration,
    /// Sleep between polls when no input is available.
    pub poll_interval: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            pacing: DEFAULT_PACING,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// What happens to the port once an exchange completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendMode {
    /// Close the port right after the exchange.
    OneShot,
    /// Keep the port open for subsequent exchanges.
    #[default]
    Session,
}

/// One frame of 32-bit float values for the device.
///
/// Values pass through unchanged; no unit conversion happens anywhere in the
/// bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample(Vec<f32>);

impl Sample {
    /// Wrap `values`. The arity is the caller's business; only emptiness is
    /// rejected.
    pub fn new(values: Vec<f32>) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::InvalidParameter("sample is empty".into()));
        }
        Ok(Self(values))
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Two-byte acknowledgement returned by the device after a sample.
///
/// The meaning of both bytes belongs to the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckBinary {
    /// Byte 0.
    pub status: u8,
    /// Byte 1.
    pub similarity: u8,
}

impl AckBinary {
    pub fn from_bytes(bytes: [u8; ACK_LEN]) -> Self {
        Self {
            status: bytes[0],
            similarity: bytes[1],
        }
    }
}

/// A text acknowledgement: one decoded line, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckText(pub String);

impl fmt::Display for AckText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of a delimited source, split into raw tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRecord {
    /// 1-based row number in the source.
    pub row: usize,
    /// Trimmed tokens, in column order.
    pub tokens: Vec<String>,
}

impl RowRecord {
    /// Split a comma-delimited line into a record.
    pub fn parse_line(row: usize, line: &str) -> Self {
        let tokens = line.split(',').map(|t| t.trim().to_string()).collect();
        Self { row, tokens }
    }

    pub fn column_count(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the row carries enough columns for a device frame.
    pub fn is_wide_enough(&self) -> bool {
        self.column_count() >= MIN_ROW_COLUMNS
    }
}

/// Raw integers destined for the wire, each of which must fit in a byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteVector(pub Vec<i64>);

impl ByteVector {
    /// Convert to bytes, failing on the first element outside `0..=255`.
    ///
    /// The whole vector is checked before anything is returned, so a caller
    /// that only writes on `Ok` never writes a prefix.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.0
            .iter()
            .enumerate()
            .map(|(index, &value)| {
                u8::try_from(value).map_err(|_| Error::ByteRange { index, value })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<i64>> for ByteVector {
    fn from(values: Vec<i64>) -> Self {
        Self(values)
    }
}
