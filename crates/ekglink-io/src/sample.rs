//! Single-sample exchange with a two-byte binary acknowledgement.
//!
//! The sample is written one 4-byte value at a time. Each write is flushed
//! and followed by the pacing delay, since the device's receive buffer drains
//! slower than the host can write. After the last value the sender waits for
//! exactly [`ACK_LEN`](ekglink_core::types::ACK_LEN) bytes: `status`, then
//! `similarity`.
//!
//! The wait has no timeout. A device that never answers blocks the sender
//! (and with it the single-sender lock) until data arrives or the line
//! reader gives up on the port, which fails the send with
//! [`Error::NotConnected`].

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, trace};

use ekglink_core::error::{Error, Result};
use ekglink_core::events::{LinkEvent, Operation};
use ekglink_core::types::{AckBinary, Sample};

use crate::codec::{self, encode_value};
use crate::port::SharedTransport;
use crate::reader::AckTap;

/// Write `values` in order, one flushed 4-byte write per value, sleeping
/// `pacing` after each.
///
/// The transport lock is taken per value so the reader keeps draining input
/// between writes.
pub(crate) async fn transmit_values(
    transport: &SharedTransport,
    values: &[f32],
    pacing: Duration,
) -> Result<()> {
    for (i, &value) in values.iter().enumerate() {
        transport.lock().await.send(&encode_value(value)).await?;
        trace!(index = i, value, "value written");
        if !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }
    }
    Ok(())
}

/// Sends one [`Sample`] and waits for its binary acknowledgement.
pub struct SampleSender {
    transport: SharedTransport,
    tap: AckTap,
    event_tx: broadcast::Sender<LinkEvent>,
    pacing: Duration,
}

impl SampleSender {
    pub fn new(
        transport: SharedTransport,
        tap: AckTap,
        event_tx: broadcast::Sender<LinkEvent>,
        pacing: Duration,
    ) -> Self {
        Self {
            transport,
            tap,
            event_tx,
            pacing,
        }
    }

    fn emit(&self, event: LinkEvent) {
        let _ = self.event_tx.send(event);
    }

    fn fail(&self, e: Error) -> Error {
        error!(error = %e, "sample send failed");
        self.emit(LinkEvent::OperationFailed {
            operation: Operation::Sample,
            reason: e.to_string(),
        });
        e
    }

    /// Transmit `sample` and return the device's acknowledgement.
    ///
    /// `held_open` only changes the wording of the report.
    pub async fn send(&self, sample: &Sample, held_open: bool) -> Result<AckBinary> {
        // Claim before the first write so no ack byte can reach the line
        // assembler.
        let ack_rx = self.tap.claim_binary();

        if let Err(e) = transmit_values(&self.transport, sample.values(), self.pacing).await {
            self.tap.release();
            return Err(self.fail(e));
        }
        debug!(values = sample.len(), "sample written, waiting for ack");

        let ack = ack_rx
            .await
            .map_err(|_| self.fail(Error::NotConnected))?;

        self.emit(LinkEvent::SampleSent {
            values: sample.len(),
            held_open,
        });
        self.emit(LinkEvent::ReportBytes(ack));
        self.emit(LinkEvent::Status(ack.status));
        self.emit(LinkEvent::Similarity(ack.similarity));
        for row in codec::format_values(sample.values()) {
            self.emit(LinkEvent::SampleValues(row));
        }

        Ok(ack)
    }
}
