//! TransportCoordinator -- the one entry point for every exchange.
//!
//! The coordinator owns the [`PortHandle`] and the line reader, and hands
//! out a single-sender permit. Only the permit holder writes to the port. A
//! request that arrives while another exchange holds the permit is rejected
//! with [`Error::Busy`] and a [`LinkEvent::Busy`] notification; nothing is
//! queued.
//!
//! The reader is not affected by a busy rejection and keeps running
//! alongside the active sender. Every lifecycle call that can reopen or
//! close the port, or stop the reader, waits for the permit first, so none
//! of them can happen mid-exchange.
//!
//! Lock order is always permit first, then link state.

use std::sync::{Arc, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard, broadcast};
use tracing::{debug, info, warn};

use ekglink_core::error::{Error, Result};
use ekglink_core::events::{LinkEvent, Operation};
use ekglink_core::transport::Connector;
use ekglink_core::types::{AckBinary, ByteVector, LinkTiming, PortConfig, RowRecord, Sample, SendMode};

use crate::port::{PortHandle, SharedTransport};
use crate::raw::RawSender;
use crate::reader::{AckTap, ReaderHandle, spawn_line_reader};
use crate::rows::{RowStreamReport, RowStreamSender};
use crate::sample::SampleSender;

struct LinkState {
    port: PortHandle,
    reader: Option<ReaderHandle>,
}

/// Serializes exchanges over one serial port and fans out their events.
///
/// Construct with [`CoordinatorBuilder`](crate::builder::CoordinatorBuilder).
pub struct TransportCoordinator {
    link: Mutex<LinkState>,
    sender_lock: Arc<Mutex<()>>,
    config: std::sync::Mutex<PortConfig>,
    timing: LinkTiming,
    tap: AckTap,
    event_tx: broadcast::Sender<LinkEvent>,
}

impl TransportCoordinator {
    /// `event_capacity` must be non-zero.
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        config: PortConfig,
        timing: LinkTiming,
        event_capacity: usize,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity);
        Self {
            link: Mutex::new(LinkState {
                port: PortHandle::new(connector),
                reader: None,
            }),
            sender_lock: Arc::new(Mutex::new(())),
            config: std::sync::Mutex::new(config),
            timing,
            tap: AckTap::new(),
            event_tx,
        }
    }

    /// Subscribe to every event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: LinkEvent) {
        let _ = self.event_tx.send(event);
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// The config the next open will use.
    pub fn port_config(&self) -> PortConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the port config. Takes effect at the next open; an already
    /// open port is reopened by the next exchange.
    pub fn set_port_config(&self, config: PortConfig) {
        debug!(port = %config.path, baud_rate = config.baud_rate, "port config updated");
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config;
    }

    pub fn timing(&self) -> LinkTiming {
        self.timing
    }

    // -----------------------------------------------------------------------
    // Port and reader lifecycle
    // -----------------------------------------------------------------------

    /// Open the port with the current config. No-op if already open with it.
    ///
    /// A config change reopens the port, so this waits for any active
    /// exchange to finish first.
    pub async fn open(&self) -> Result<()> {
        let _permit = self.sender_lock.lock().await;
        let mut link = self.link.lock().await;
        self.ensure_open(&mut link).await.map(|_| ())
    }

    pub async fn is_open(&self) -> bool {
        self.link.lock().await.port.is_open()
    }

    pub async fn is_reader_running(&self) -> bool {
        self.link
            .lock()
            .await
            .reader
            .as_ref()
            .is_some_and(ReaderHandle::is_running)
    }

    /// Whether an exchange currently holds the sender permit.
    pub fn is_busy(&self) -> bool {
        self.sender_lock.try_lock().is_err()
    }

    /// Open the port if needed and start the line reader if it is not
    /// already running. Waits for any active exchange to finish first.
    pub async fn start_reader(&self) -> Result<()> {
        let _permit = self.sender_lock.lock().await;
        let mut link = self.link.lock().await;
        let transport = self.ensure_open(&mut link).await?;
        self.ensure_reader(&mut link, transport);
        Ok(())
    }

    /// Stop the line reader, waiting for any active exchange to finish
    /// first. The port stays open.
    pub async fn stop_reader(&self) {
        let _permit = self.sender_lock.lock().await;
        let reader = self.link.lock().await.reader.take();
        if let Some(reader) = reader {
            reader.stop().await;
        }
    }

    /// Stop the reader and close the port, waiting for any active exchange
    /// to finish first. Safe to call when already closed.
    pub async fn close(&self) -> Result<()> {
        let _permit = self.sender_lock.lock().await;
        let mut link = self.link.lock().await;
        self.shutdown(&mut link, true).await
    }

    /// Teardown after a one-shot exchange. The caller holds the permit.
    ///
    /// The report is followed directly by the port closing; the reader's
    /// stop is only reported if it left unterminated input behind.
    async fn close_after_exchange(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        self.shutdown(&mut link, false).await
    }

    async fn shutdown(&self, link: &mut LinkState, announce_reader: bool) -> Result<()> {
        if let Some(reader) = link.reader.take() {
            if announce_reader {
                reader.stop().await;
            } else {
                reader.stop_quietly().await;
            }
        }
        if let Some(path) = link.port.close().await? {
            self.emit(LinkEvent::PortClosed { path });
        }
        Ok(())
    }

    async fn ensure_open(&self, link: &mut LinkState) -> Result<SharedTransport> {
        let config = self.port_config();

        if link.port.is_open_with(&config) {
            if let Some(transport) = link.port.transport() {
                if transport.lock().await.is_connected() {
                    return Ok(transport);
                }
            }
        }

        // The reader must not outlive the transport it polls.
        if link.port.is_open() {
            debug!(port = %config.path, "reopening port");
            self.shutdown(link, true).await?;
        }

        match link.port.open(&config).await {
            Ok(transport) => {
                self.emit(LinkEvent::PortOpened {
                    path: config.path.clone(),
                    baud_rate: config.baud_rate,
                });
                Ok(transport)
            }
            Err(e) => {
                warn!(port = %config.path, error = %e, "failed to open port");
                let reason = match &e {
                    Error::PortOpen { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                self.emit(LinkEvent::PortOpenFailed {
                    path: config.path.clone(),
                    reason,
                });
                Err(e)
            }
        }
    }

    fn ensure_reader(&self, link: &mut LinkState, transport: SharedTransport) {
        if link.reader.as_ref().is_some_and(ReaderHandle::is_running) {
            return;
        }
        link.reader = Some(spawn_line_reader(
            transport,
            self.tap.clone(),
            self.event_tx.clone(),
            self.timing.poll_interval,
        ));
    }

    // -----------------------------------------------------------------------
    // Exchanges
    // -----------------------------------------------------------------------

    fn acquire(&self, operation: Operation) -> Result<OwnedMutexGuard<()>> {
        self.sender_lock.clone().try_lock_owned().map_err(|_| {
            warn!(%operation, "rejected, another send is in progress");
            self.emit(LinkEvent::Busy { operation });
            Error::Busy
        })
    }

    /// Open the port and make sure the reader is there to collect acks.
    async fn prepare(&self) -> Result<SharedTransport> {
        let mut link = self.link.lock().await;
        let transport = self.ensure_open(&mut link).await?;
        self.ensure_reader(&mut link, transport.clone());
        Ok(transport)
    }

    /// Send one sample and wait for its binary acknowledgement.
    ///
    /// In [`SendMode::OneShot`] the port is closed afterwards, whether the
    /// exchange succeeded or not.
    pub async fn send_sample(&self, sample: &Sample, mode: SendMode) -> Result<AckBinary> {
        let _permit = self.acquire(Operation::Sample)?;
        let transport = self.prepare().await?;

        let sender = SampleSender::new(
            transport,
            self.tap.clone(),
            self.event_tx.clone(),
            self.timing.pacing,
        );
        let result = sender.send(sample, mode == SendMode::Session).await;

        if mode == SendMode::OneShot {
            let closed = self.close_after_exchange().await;
            let ack = result?;
            closed?;
            return Ok(ack);
        }
        result
    }

    /// Stream rows, one text acknowledgement each. The port stays open.
    pub async fn stream_rows<I>(&self, rows: I) -> Result<RowStreamReport>
    where
        I: IntoIterator<Item = Result<RowRecord>>,
        I::IntoIter: Send,
    {
        let _permit = self.acquire(Operation::RowStream)?;
        let transport = self.prepare().await?;

        info!("row stream started");
        RowStreamSender::new(
            transport,
            self.tap.clone(),
            self.event_tx.clone(),
            self.timing.pacing,
        )
        .stream(rows)
        .await
    }

    /// Write raw bytes. Out-of-range values fail before the port is opened.
    pub async fn send_raw(&self, values: &ByteVector) -> Result<usize> {
        let _permit = self.acquire(Operation::Raw)?;
        if let Err(e) = RawSender::prepare(values) {
            return Err(self.fail(Operation::Raw, e));
        }
        let transport = self.prepare().await?;

        RawSender::new(transport, self.event_tx.clone())
            .send(values)
            .await
            .map_err(|e| self.fail(Operation::Raw, e))
    }

    fn fail(&self, operation: Operation, e: Error) -> Error {
        warn!(%operation, error = %e, "operation failed");
        self.emit(LinkEvent::OperationFailed {
            operation,
            reason: e.to_string(),
        });
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CoordinatorBuilder;
    use ekglink_core::transport::Transport;
    use ekglink_test_harness::{MockConnector, MockTransport};
    use std::time::Duration;

    const FRAME_BYTES: usize = 140 * 4;

    fn coordinator() -> (Arc<TransportCoordinator>, MockConnector) {
        let connector = MockConnector::new(MockTransport::new());
        let coordinator = CoordinatorBuilder::new(Arc::new(connector.clone()))
            .port("mock0")
            .settle_delay(Duration::ZERO)
            .pacing(Duration::ZERO)
            .poll_interval(Duration::from_millis(2))
            .build()
            .unwrap();
        (Arc::new(coordinator), connector)
    }

    fn frame(seed: f32) -> Sample {
        Sample::new((0..140).map(|i| seed + i as f32).collect()).unwrap()
    }

    fn drain(rx: &mut broadcast::Receiver<LinkEvent>) -> Vec<LinkEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    async fn wait_until<F: Fn() -> bool>(cond: F) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn session_mode_keeps_port_and_reader() {
        let (coord, connector) = coordinator();
        let device = connector.device().clone();
        device.reply_after(FRAME_BYTES, &[0x01, 0x50]);
        device.reply_after(2 * FRAME_BYTES, &[0x02, 0x51]);

        let first = coord.send_sample(&frame(0.0), SendMode::Session).await.unwrap();
        let second = coord.send_sample(&frame(1.0), SendMode::Session).await.unwrap();

        assert_eq!((first.status, first.similarity), (1, 0x50));
        assert_eq!((second.status, second.similarity), (2, 0x51));
        assert_eq!(connector.open_count(), 1);
        assert!(coord.is_open().await);
        assert!(coord.is_reader_running().await);
        coord.close().await.unwrap();
    }

    #[tokio::test]
    async fn one_shot_closes_after_report() {
        let (coord, connector) = coordinator();
        let mut rx = coord.subscribe();
        connector.device().reply_after(FRAME_BYTES, &[0x00, 0x63]);

        coord.send_sample(&frame(0.0), SendMode::OneShot).await.unwrap();

        assert!(!coord.is_open().await);
        assert!(!coord.is_reader_running().await);
        assert!(!connector.device().is_connected());

        let events = drain(&mut rx);
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, LinkEvent::ReaderStopped { .. }))
        );
        let rendered: Vec<String> = events.iter().map(ToString::to_string).collect();
        let sent = rendered
            .iter()
            .position(|l| l == "[OK] All floats sent.")
            .unwrap();
        let closed = rendered
            .iter()
            .position(|l| l == "[OK] Port closed.")
            .unwrap();
        assert!(sent < closed);
        assert_eq!(rendered[sent + 1], "Report bytes: 00 63");
        assert!(matches!(events[closed - 1], LinkEvent::SampleValues(_)));
    }

    #[tokio::test]
    async fn second_sender_is_rejected_while_busy() {
        let (coord, connector) = coordinator();
        let device = connector.device().clone();
        let mut rx = coord.subscribe();

        // No reply is scripted, so this exchange blocks on its ack.
        let blocked = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.send_sample(&frame(0.0), SendMode::Session).await })
        };
        wait_until(|| device.sent_total() == FRAME_BYTES).await;
        assert!(coord.is_busy());

        let result = coord.send_raw(&ByteVector(vec![1, 2, 3])).await;
        assert!(matches!(result, Err(Error::Busy)));
        assert_eq!(device.sent_total(), FRAME_BYTES);

        // The reader is still serving: it completes the pending ack and
        // passes the following text on as a line.
        assert!(coord.is_reader_running().await);
        device.push_inbound(&[0x01, 0x02]);
        device.push_inbound(b"still here\n");
        let ack = blocked.await.unwrap().unwrap();
        assert_eq!((ack.status, ack.similarity), (1, 2));

        let mut saw_line = false;
        for _ in 0..200 {
            if drain(&mut rx).contains(&LinkEvent::Line("still here".into())) {
                saw_line = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(saw_line);
        assert!(!coord.is_busy());
        coord.close().await.unwrap();
    }

    #[tokio::test]
    async fn busy_rejection_emits_event() {
        let (coord, connector) = coordinator();
        let device = connector.device().clone();
        let mut rx = coord.subscribe();

        let blocked = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.send_sample(&frame(0.0), SendMode::Session).await })
        };
        wait_until(|| device.sent_total() == FRAME_BYTES).await;

        let rows: Vec<Result<RowRecord>> = vec![Ok(RowRecord::parse_line(1, "1,2"))];
        assert!(matches!(coord.stream_rows(rows).await, Err(Error::Busy)));
        assert!(drain(&mut rx).contains(&LinkEvent::Busy {
            operation: Operation::RowStream
        }));

        blocked.abort();
        let _ = blocked.await;
    }

    #[tokio::test]
    async fn close_waits_for_active_sender() {
        let (coord, connector) = coordinator();
        let device = connector.device().clone();
        let mut rx = coord.subscribe();

        let sending = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.send_sample(&frame(0.0), SendMode::Session).await })
        };
        wait_until(|| device.sent_total() == FRAME_BYTES).await;

        let closing = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.close().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!closing.is_finished());
        assert!(device.is_connected());

        device.push_inbound(&[0x01, 0x02]);
        let ack = sending.await.unwrap().unwrap();
        assert_eq!((ack.status, ack.similarity), (1, 2));
        closing.await.unwrap().unwrap();

        let events = drain(&mut rx);
        let sent = events
            .iter()
            .position(|e| matches!(e, LinkEvent::SampleSent { .. }))
            .unwrap();
        let closed = events
            .iter()
            .position(|e| matches!(e, LinkEvent::PortClosed { .. }))
            .unwrap();
        assert!(sent < closed);
        assert!(!coord.is_open().await);
    }

    #[tokio::test]
    async fn reopen_waits_for_active_sender() {
        let (coord, connector) = coordinator();
        let device = connector.device().clone();
        let mut rx = coord.subscribe();

        let sending = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.send_sample(&frame(0.0), SendMode::Session).await })
        };
        wait_until(|| device.sent_total() == FRAME_BYTES).await;

        coord.set_port_config(PortConfig {
            baud_rate: 9600,
            ..coord.port_config()
        });
        let starting = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.start_reader().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!starting.is_finished());
        assert_eq!(connector.open_count(), 1);
        assert!(
            !drain(&mut rx)
                .iter()
                .any(|e| matches!(e, LinkEvent::PortClosed { .. }))
        );

        device.push_inbound(&[0x03, 0x04]);
        let ack = sending.await.unwrap().unwrap();
        assert_eq!((ack.status, ack.similarity), (3, 4));
        starting.await.unwrap().unwrap();

        assert_eq!(connector.open_count(), 2);
        assert_eq!(connector.last_config().unwrap().baud_rate, 9600);
        assert!(coord.is_reader_running().await);
        coord.close().await.unwrap();
    }

    #[tokio::test]
    async fn read_failure_during_ack_wait_ends_exchange() {
        let (coord, connector) = coordinator();
        let device = connector.device().clone();
        let mut rx = coord.subscribe();

        let sending = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.send_sample(&frame(0.0), SendMode::Session).await })
        };
        wait_until(|| device.sent_total() == FRAME_BYTES).await;

        device.fail_reads(Some(std::io::ErrorKind::BrokenPipe));
        device.push_inbound(&[0x01]);

        let result = tokio::time::timeout(Duration::from_secs(2), sending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::NotConnected)));
        assert!(!coord.is_busy());
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            LinkEvent::OperationFailed {
                operation: Operation::Sample,
                ..
            }
        )));

        device.fail_reads(None);
        tokio::time::timeout(Duration::from_millis(500), coord.close())
            .await
            .unwrap()
            .unwrap();
        assert!(!coord.is_open().await);
    }

    #[tokio::test]
    async fn config_is_reread_before_open() {
        let (coord, connector) = coordinator();
        let device = connector.device().clone();
        device.reply_after(FRAME_BYTES, &[0, 0]);
        device.reply_after(2 * FRAME_BYTES, &[0, 0]);

        coord.send_sample(&frame(0.0), SendMode::Session).await.unwrap();
        coord.set_port_config(PortConfig {
            baud_rate: 9600,
            ..coord.port_config()
        });
        coord.send_sample(&frame(0.0), SendMode::Session).await.unwrap();

        assert_eq!(connector.open_count(), 2);
        assert_eq!(connector.last_config().unwrap().baud_rate, 9600);
        coord.close().await.unwrap();
    }

    #[tokio::test]
    async fn open_failure_is_reported_and_releases_permit() {
        let (coord, connector) = coordinator();
        let mut rx = coord.subscribe();
        connector.fail_with(Some("no such device"));

        let result = coord.send_sample(&frame(0.0), SendMode::Session).await;
        assert!(matches!(result, Err(Error::PortOpen { .. })));
        assert!(!coord.is_busy());
        assert!(!coord.is_open().await);
        assert!(drain(&mut rx).contains(&LinkEvent::PortOpenFailed {
            path: "mock0".into(),
            reason: "no such device".into(),
        }));
    }

    #[tokio::test]
    async fn raw_validation_precedes_open() {
        let (coord, connector) = coordinator();

        let result = coord.send_raw(&ByteVector(vec![0, 255, 256])).await;
        assert!(matches!(result, Err(Error::ByteRange { index: 2, .. })));
        assert_eq!(connector.open_count(), 0);

        assert_eq!(coord.send_raw(&ByteVector(vec![0, 255])).await.unwrap(), 2);
        assert_eq!(connector.device().sent_bytes(), vec![0x00, 0xFF]);
        coord.close().await.unwrap();
    }

    #[tokio::test]
    async fn rows_stream_through_coordinator() {
        let (coord, connector) = coordinator();
        connector.device().reply_after(FRAME_BYTES, b"ROW OK\n");
        let line = vec!["0.5"; 140].join(",");

        let rows: Vec<Result<RowRecord>> = vec![Ok(RowRecord::parse_line(1, &line))];
        let report = coord
            .stream_rows(rows)
            .await
            .unwrap();
        assert_eq!(report.sent, 1);
        assert!(coord.is_open().await);
        coord.close().await.unwrap();
    }

    #[tokio::test]
    async fn reader_lifecycle() {
        let (coord, connector) = coordinator();
        coord.start_reader().await.unwrap();
        assert!(coord.is_reader_running().await);

        coord.stop_reader().await;
        assert!(!coord.is_reader_running().await);
        assert!(coord.is_open().await);

        coord.close().await.unwrap();
        assert!(!connector.device().is_connected());
        coord.close().await.unwrap();
    }
}
