//! Background line reader and acknowledgement routing.
//!
//! The reader is the only consumer of inbound bytes while the port is open.
//! It polls the transport, feeds everything through a [`LineAssembler`] and
//! emits each completed line as [`LinkEvent::Line`].
//!
//! Senders that need an acknowledgement register a claim on the shared
//! [`AckTap`] *before* they start writing:
//!
//! - a binary claim diverts the next [`ACK_LEN`] inbound bytes away from line
//!   assembly and hands them to the sender, however they are fragmented;
//! - a line claim receives a copy of the next completed line (the line is
//!   still emitted to the observer stream).
//!
//! Stopping is cooperative. The cancellation token is checked once per poll
//! cycle, so the task may run for up to one poll interval after
//! [`ReaderHandle::stop`] is called.
//!
//! Whenever the reader exits, any outstanding claim is dropped, so a sender
//! waiting on it sees its channel close instead of waiting forever.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use ekglink_core::error::{Error, Result};
use ekglink_core::events::LinkEvent;
use ekglink_core::types::{ACK_LEN, AckBinary};

use crate::codec::LineAssembler;
use crate::port::SharedTransport;

/// Largest chunk taken from the transport per poll.
const READ_CHUNK: usize = 256;

// ---------------------------------------------------------------------------
// Ack routing
// ---------------------------------------------------------------------------

enum AckClaim {
    Binary {
        received: Vec<u8>,
        reply: oneshot::Sender<AckBinary>,
    },
    Line {
        reply: oneshot::Sender<String>,
    },
}

/// Hand-off point between the reader and the sender waiting for an ack.
///
/// Holds at most one claim; registering a new claim replaces the old one.
#[derive(Clone, Default)]
pub struct AckTap {
    slot: Arc<Mutex<Option<AckClaim>>>,
}

impl AckTap {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<AckClaim>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the next [`ACK_LEN`] inbound bytes.
    pub fn claim_binary(&self) -> oneshot::Receiver<AckBinary> {
        let (reply, rx) = oneshot::channel();
        *self.slot() = Some(AckClaim::Binary {
            received: Vec::with_capacity(ACK_LEN),
            reply,
        });
        rx
    }

    /// Claim the next completed line.
    pub fn claim_line(&self) -> oneshot::Receiver<String> {
        let (reply, rx) = oneshot::channel();
        *self.slot() = Some(AckClaim::Line { reply });
        rx
    }

    /// Drop any outstanding claim.
    pub fn release(&self) {
        self.slot().take();
    }

    /// Whether a claim is outstanding.
    pub fn is_claimed(&self) -> bool {
        self.slot().is_some()
    }

    /// Take what a binary claim still needs from the front of `chunk` and
    /// return the rest.
    fn divert_binary<'a>(&self, chunk: &'a [u8]) -> &'a [u8] {
        let mut slot = self.slot();
        let Some(AckClaim::Binary { received, .. }) = slot.as_mut() else {
            return chunk;
        };
        let take = (ACK_LEN - received.len()).min(chunk.len());
        received.extend_from_slice(&chunk[..take]);
        if received.len() == ACK_LEN {
            if let Some(AckClaim::Binary { received, reply }) = slot.take() {
                let ack = AckBinary::from_bytes([received[0], received[1]]);
                debug!(status = ack.status, similarity = ack.similarity, "binary ack received");
                let _ = reply.send(ack);
            }
        }
        &chunk[take..]
    }

    /// Hand `line` to an outstanding line claim.
    fn offer_line(&self, line: &str) {
        let mut slot = self.slot();
        if matches!(slot.as_ref(), Some(AckClaim::Line { .. })) {
            if let Some(AckClaim::Line { reply }) = slot.take() {
                let _ = reply.send(line.to_string());
            }
        }
    }
}

/// Splits inbound chunks between ack claims and the observer stream.
struct InboundRouter {
    assembler: LineAssembler,
    tap: AckTap,
    event_tx: broadcast::Sender<LinkEvent>,
}

impl InboundRouter {
    fn route(&mut self, chunk: &[u8]) {
        let rest = self.tap.divert_binary(chunk);
        for line in self.assembler.push(rest) {
            debug!(line = %line, "line received");
            let _ = self.event_tx.send(LinkEvent::Line(line.clone()));
            self.tap.offer_line(&line);
        }
    }
}

// ---------------------------------------------------------------------------
// Reader task
// ---------------------------------------------------------------------------

/// How the reader task ended.
enum ReaderExit {
    /// Stopped on request. Carries input left without a terminator.
    Cancelled(Option<String>),
    /// Gave up after an unrecoverable error; already reported.
    Failed,
}

/// Handle to a running line reader.
pub struct ReaderHandle {
    cancel: CancellationToken,
    task: JoinHandle<ReaderExit>,
    event_tx: broadcast::Sender<LinkEvent>,
}

impl ReaderHandle {
    /// Whether the task is still polling.
    ///
    /// Turns `false` on its own after an unrecoverable read error.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the reader to stop without waiting for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Signal the reader to stop and wait until it has exited.
    pub async fn stop(self) {
        self.finish(true).await;
    }

    /// Like [`stop`](Self::stop), but a clean stop is not announced. Leftover
    /// unterminated input is still reported.
    pub async fn stop_quietly(self) {
        self.finish(false).await;
    }

    async fn finish(self, announce: bool) {
        self.cancel.cancel();
        match self.task.await {
            Ok(ReaderExit::Cancelled(Some(rest))) => {
                debug!(rest = %rest, "reader stopped with unterminated input");
                let _ = self.event_tx.send(LinkEvent::ReaderStopped {
                    unterminated: Some(rest),
                });
            }
            Ok(ReaderExit::Cancelled(None)) if announce => {
                let _ = self
                    .event_tx
                    .send(LinkEvent::ReaderStopped { unterminated: None });
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "line reader task did not exit cleanly"),
        }
    }
}

/// Spawn the line reader on `transport`.
pub fn spawn_line_reader(
    transport: SharedTransport,
    tap: AckTap,
    event_tx: broadcast::Sender<LinkEvent>,
    poll_interval: Duration,
) -> ReaderHandle {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(reader_loop(
        transport,
        tap,
        event_tx.clone(),
        poll_interval,
        cancel.clone(),
    ));
    ReaderHandle {
        cancel,
        task,
        event_tx,
    }
}

async fn reader_loop(
    transport: SharedTransport,
    tap: AckTap,
    event_tx: broadcast::Sender<LinkEvent>,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> ReaderExit {
    let mut router = InboundRouter {
        assembler: LineAssembler::new(),
        tap,
        event_tx: event_tx.clone(),
    };
    let mut buf = [0u8; READ_CHUNK];

    debug!("line reader started");
    let _ = event_tx.send(LinkEvent::ReaderStarted);

    let exit = loop {
        if cancel.is_cancelled() {
            debug!("line reader cancelled");
            break ReaderExit::Cancelled(router.assembler.into_remainder());
        }

        match poll_once(&transport, &mut buf, poll_interval).await {
            Ok(0) => tokio::time::sleep(poll_interval).await,
            Ok(n) => router.route(&buf[..n]),
            Err(e) if e.is_transient() => {
                warn!(error = %e, "transient read error");
                let _ = event_tx.send(LinkEvent::ReadError {
                    reason: e.to_string(),
                    fatal: false,
                });
                tokio::time::sleep(poll_interval).await;
            }
            Err(e) => {
                error!(error = %e, "unrecoverable read error, stopping reader");
                let _ = event_tx.send(LinkEvent::ReadError {
                    reason: e.to_string(),
                    fatal: true,
                });
                let _ = event_tx.send(LinkEvent::ReaderStopped {
                    unterminated: router.assembler.into_remainder(),
                });
                break ReaderExit::Failed;
            }
        }
    };

    // Nothing will fulfil a claim once the reader is gone.
    if router.tap.is_claimed() {
        debug!("dropping outstanding ack claim");
        router.tap.release();
    }
    exit
}

/// Read whatever is available without waiting for more.
///
/// Returns `Ok(0)` when nothing is pending.
async fn poll_once(
    transport: &SharedTransport,
    buf: &mut [u8],
    read_timeout: Duration,
) -> Result<usize> {
    let mut transport = transport.lock().await;
    let available = transport.bytes_available()?;
    if available == 0 {
        return Ok(0);
    }
    let want = available.min(buf.len());
    match transport.receive(&mut buf[..want], read_timeout).await {
        Err(Error::Timeout) => Ok(0),
        other => other,
    }
}
