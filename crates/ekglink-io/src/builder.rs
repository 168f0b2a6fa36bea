//! CoordinatorBuilder -- fluent builder for [`TransportCoordinator`].
//!
//! Separates configuration from construction. Nothing is opened by
//! [`build()`](CoordinatorBuilder::build); the port is opened by the first
//! exchange.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ekglink_io::builder::CoordinatorBuilder;
//! # use ekglink_core::transport::Connector;
//!
//! # fn example(connector: Arc<dyn Connector>) -> ekglink_core::Result<()> {
//! let coordinator = CoordinatorBuilder::new(connector)
//!     .port("/dev/ttyACM0")
//!     .baud_rate(115_200)
//!     .settle_delay(Duration::from_secs(2))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ekglink_core::error::{Error, Result};
use ekglink_core::transport::Connector;
use ekglink_core::types::{LinkTiming, PortConfig};

use crate::coordinator::TransportCoordinator;

/// Default number of events buffered per subscriber before it lags.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Fluent builder for [`TransportCoordinator`].
pub struct CoordinatorBuilder {
    connector: Arc<dyn Connector>,
    config: PortConfig,
    timing: LinkTiming,
    event_capacity: usize,
}

impl CoordinatorBuilder {
    /// Start from default timings; the port path must be set before the
    /// first exchange.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        CoordinatorBuilder {
            connector,
            config: PortConfig::default(),
            timing: LinkTiming::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyACM0` or `COM4`).
    pub fn port(mut self, path: &str) -> Self {
        self.config.path = path.to_string();
        self
    }

    /// Set the baud rate (default: 115200).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.config.baud_rate = baud;
        self
    }

    /// Bound on the OS-level open call (default: 100ms).
    pub fn open_poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.open_poll_timeout = timeout;
        self
    }

    /// Quiet period after opening while the device reboots (default: 2s).
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.config.settle_delay = delay;
        self
    }

    /// Sleep after each 4-byte value (default: 1ms).
    pub fn pacing(mut self, pacing: Duration) -> Self {
        self.timing.pacing = pacing;
        self
    }

    /// Reader poll interval when idle (default: 50ms).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.timing.poll_interval = interval;
        self
    }

    /// Replace the whole port config at once.
    pub fn port_config(mut self, config: PortConfig) -> Self {
        self.config = config;
        self
    }

    /// Events buffered per subscriber (default: 256).
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<TransportCoordinator> {
        if self.event_capacity == 0 {
            return Err(Error::InvalidParameter(
                "event_capacity must be at least 1".into(),
            ));
        }
        if self.timing.poll_interval.is_zero() {
            return Err(Error::InvalidParameter(
                "poll_interval must be non-zero".into(),
            ));
        }
        Ok(TransportCoordinator::new(
            self.connector,
            self.config,
            self.timing,
            self.event_capacity,
        ))
    }
}
