//! Session log of observer events.
//!
//! [`EventLog`] records every [`LinkEvent`] with a sequence number and a
//! local timestamp. It renders to the same lines a console would show, and
//! can be cleared or exported to a text file.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ekglink_core::error::Result;
use ekglink_core::events::LinkEvent;

/// One recorded event.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    /// Position in the session, starting at 0. Not reset by [`EventLog::clear`].
    pub seq: u64,
    pub at: DateTime<Local>,
    pub event: LinkEvent,
}

#[derive(Debug, Default)]
struct LogState {
    next_seq: u64,
    entries: Vec<LogEvent>,
}

/// Shared, append-only (until cleared) record of events.
///
/// Cloning yields another handle to the same log.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    state: Arc<Mutex<LogState>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `event` and return its sequence number.
    pub fn record(&self, event: LinkEvent) -> u64 {
        let mut state = self.state();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(LogEvent {
            seq,
            at: Local::now(),
            event,
        });
        seq
    }

    /// Snapshot of the recorded events, oldest first.
    pub fn entries(&self) -> Vec<LogEvent> {
        self.state().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    pub fn clear(&self) {
        self.state().entries.clear();
        debug!("event log cleared");
    }

    /// One line per event, in emission order, each `\n`-terminated.
    pub fn render(&self) -> String {
        self.state()
            .entries
            .iter()
            .map(|entry| format!("{}\n", entry.event))
            .collect()
    }

    /// Write [`render()`](Self::render) to `path` as UTF-8.
    pub fn export(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.render())?;
        info!(path = %path.display(), entries = self.len(), "event log exported");
        Ok(())
    }

    /// Record everything from `events` until the sender side goes away.
    pub fn attach(&self, mut events: broadcast::Receiver<LinkEvent>) -> JoinHandle<()> {
        let log = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        log.record(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "event log fell behind, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
