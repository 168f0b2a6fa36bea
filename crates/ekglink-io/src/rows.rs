//! Row streaming from a comma-delimited numeric source.
//!
//! Each row is checked for width, parsed, sent with the same framing and
//! pacing as a single sample, and acknowledged with one text line.
//!
//! Failures differ by kind:
//!
//! - a row with fewer than [`MIN_ROW_COLUMNS`] columns is reported and
//!   skipped, and the stream carries on;
//! - a token among the first [`SAMPLE_ARITY`] that is not a number aborts the
//!   whole stream before anything from that row is written.

use std::io::BufRead;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use ekglink_core::error::{Error, Result};
use ekglink_core::events::LinkEvent;
use ekglink_core::types::{AckText, MIN_ROW_COLUMNS, RowRecord, SAMPLE_ARITY};

use crate::port::SharedTransport;
use crate::reader::AckTap;
use crate::sample::transmit_values;

/// Outcome of a completed row stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowStreamReport {
    /// Rows written and acknowledged.
    pub sent: usize,
    /// Row numbers skipped for being too narrow.
    pub skipped: Vec<usize>,
}

/// Read comma-delimited rows from `reader`.
///
/// Blank lines are skipped. Row numbers are 1-based physical line numbers, so
/// they match what an editor shows for the source file.
pub fn read_rows<R: BufRead>(reader: R) -> impl Iterator<Item = Result<RowRecord>> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(i, line)| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(Ok(RowRecord::parse_line(i + 1, &line))),
            Err(e) => Some(Err(Error::Io(e))),
        })
}

/// Parse the first [`SAMPLE_ARITY`] tokens of `record`.
///
/// Extra columns are ignored. The caller checks width first.
pub fn parse_frame(record: &RowRecord) -> Result<Vec<f32>> {
    record
        .tokens
        .iter()
        .take(SAMPLE_ARITY)
        .enumerate()
        .map(|(i, token)| {
            token.parse::<f32>().map_err(|_| Error::ValueParse {
                row: record.row,
                column: i + 1,
                token: token.clone(),
            })
        })
        .collect()
}

/// Streams rows to the device, one text acknowledgement per row.
pub struct RowStreamSender {
    transport: SharedTransport,
    tap: AckTap,
    event_tx: broadcast::Sender<LinkEvent>,
    pacing: Duration,
}

impl RowStreamSender {
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

    fn abort(&self, e: Error) -> Error {
        error!(error = %e, "row stream aborted");
        self.emit(LinkEvent::RowStreamAborted {
            reason: e.to_string(),
        });
        e
    }

    /// Send every row of `rows` in order.
    ///
    /// Returns the report on completion, or the error that aborted the
    /// stream. Rows before the failing one have already been sent.
    pub async fn stream<I>(&self, rows: I) -> Result<RowStreamReport>
    where
        I: IntoIterator<Item = Result<RowRecord>>,
        I::IntoIter: Send,
    {
        let mut report = RowStreamReport::default();

        for record in rows {
            let record = record.map_err(|e| self.abort(e))?;

            if !record.is_wide_enough() {
                let reason = Error::RowWidth {
                    row: record.row,
                    columns: record.column_count(),
                    required: MIN_ROW_COLUMNS,
                };
                warn!(%reason, "skipping row");
                self.emit(LinkEvent::RowSkipped {
                    row: record.row,
                    columns: record.column_count(),
                    required: MIN_ROW_COLUMNS,
                });
                report.skipped.push(record.row);
                continue;
            }

            let values = parse_frame(&record).map_err(|e| self.abort(e))?;
            let ack = self.exchange(&values).await.map_err(|e| self.abort(e))?;

            debug!(row = record.row, ack = %ack, "row acknowledged");
            self.emit(LinkEvent::RowAck {
                row: record.row,
                text: ack.0,
            });
            report.sent += 1;
        }

        info!(
            sent = report.sent,
            skipped = report.skipped.len(),
            "row stream finished"
        );
        self.emit(LinkEvent::RowStreamFinished {
            sent: report.sent,
            skipped: report.skipped.len(),
        });
        Ok(report)
    }

    async fn exchange(&self, values: &[f32]) -> Result<AckText> {
        let line_rx = self.tap.claim_line();
        if let Err(e) = transmit_values(&self.transport, values, self.pacing).await {
            self.tap.release();
            return Err(e);
        }
        line_rx.await.map(AckText).map_err(|_| Error::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{ReaderHandle, spawn_line_reader};
    use ekglink_core::transport::Transport;
    use ekglink_test_harness::MockTransport;
    use std::io::Cursor;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    const FRAME_BYTES: usize = SAMPLE_ARITY * 4;

    fn csv_row(width: usize, seed: f32) -> String {
        (0..width)
            .map(|i| format!("{:.3}", seed + i as f32 * 0.01))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn records(lines: &[String]) -> Vec<Result<RowRecord>> {
        read_rows(Cursor::new(lines.join("\n"))).collect()
    }

    struct Bench {
        mock: MockTransport,
        sender: RowStreamSender,
        reader: ReaderHandle,
        events: broadcast::Receiver<LinkEvent>,
    }

    fn bench() -> Bench {
        let mock = MockTransport::new();
        let transport: SharedTransport =
            Arc::new(Mutex::new(Box::new(mock.clone()) as Box<dyn Transport>));
        let tap = AckTap::new();
        let (event_tx, events) = broadcast::channel(256);
        let reader = spawn_line_reader(
            transport.clone(),
            tap.clone(),
            event_tx.clone(),
            Duration::from_millis(2),
        );
        let sender = RowStreamSender::new(transport, tap, event_tx, Duration::ZERO);
        Bench {
            mock,
            sender,
            reader,
            events,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<LinkEvent>) -> Vec<LinkEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    // -----------------------------------------------------------------------
    // Source parsing
    // -----------------------------------------------------------------------

    #[test]
    fn read_rows_skips_blank_lines_keeps_numbering() {
        let rows: Vec<RowRecord> = read_rows(Cursor::new("1,2\n\n  \n3, 4 ,5\n"))
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row, 1);
        assert_eq!(rows[1].row, 4);
        assert_eq!(rows[1].tokens, vec!["3", "4", "5"]);
    }

    #[test]
    fn parse_frame_uses_first_columns_only() {
        let record = RowRecord::parse_line(1, &format!("{},extra,junk", csv_row(140, 0.0)));
        let values = parse_frame(&record).unwrap();
        assert_eq!(values.len(), SAMPLE_ARITY);
        assert_eq!(values[0], 0.0);
    }

    #[test]
    fn parse_frame_reports_column() {
        let mut tokens: Vec<String> = csv_row(140, 1.0).split(',').map(String::from).collect();
        tokens[2] = "abc".into();
        let record = RowRecord::parse_line(7, &tokens.join(","));

        match parse_frame(&record) {
            Err(Error::ValueParse { row, column, token }) => {
                assert_eq!((row, column), (7, 3));
                assert_eq!(token, "abc");
            }
            other => panic!("expected ValueParse, got {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Streaming
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn each_row_gets_its_own_ack() {
        let mut bench = bench();
        bench.mock.reply_after(FRAME_BYTES, b"ACK 1\r\n");
        bench.mock.reply_after(2 * FRAME_BYTES, b"ACK 2\r\n");

        let report = bench
            .sender
            .stream(records(&[csv_row(140, 0.0), csv_row(140, 1.0)]))
            .await
            .unwrap();

        assert_eq!(report.sent, 2);
        assert!(report.skipped.is_empty());
        assert_eq!(bench.mock.sent_total(), 2 * FRAME_BYTES);

        let acks: Vec<(usize, String)> = drain(&mut bench.events)
            .into_iter()
            .filter_map(|e| match e {
                LinkEvent::RowAck { row, text } => Some((row, text)),
                _ => None,
            })
            .collect();
        assert_eq!(acks, vec![(1, "ACK 1".into()), (2, "ACK 2".into())]);
        bench.reader.stop().await;
    }

    #[tokio::test]
    async fn narrow_row_warns_once_and_continues() {
        let mut bench = bench();
        bench.mock.reply_after(FRAME_BYTES, b"ok\n");

        let report = bench
            .sender
            .stream(records(&[csv_row(139, 0.0), csv_row(140, 1.0)]))
            .await
            .unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(report.skipped, vec![1]);
        assert_eq!(bench.mock.sent_total(), FRAME_BYTES);

        let events = drain(&mut bench.events);
        let warnings: Vec<&LinkEvent> = events
            .iter()
            .filter(|e| matches!(e, LinkEvent::RowSkipped { .. }))
            .collect();
        assert_eq!(
            warnings,
            vec![&LinkEvent::RowSkipped {
                row: 1,
                columns: 139,
                required: 140
            }]
        );
        assert!(events.contains(&LinkEvent::RowStreamFinished {
            sent: 1,
            skipped: 1
        }));
        bench.reader.stop().await;
    }

    #[tokio::test]
    async fn bad_token_aborts_remaining_rows() {
        let mut bench = bench();
        bench.mock.reply_after(FRAME_BYTES, b"ok\n");

        let mut bad: Vec<String> = csv_row(140, 2.0).split(',').map(String::from).collect();
        bad[2] = "abc".into();
        let rows = records(&[csv_row(140, 1.0), bad.join(","), csv_row(140, 3.0)]);

        let result = bench.sender.stream(rows).await;
        assert!(matches!(
            result,
            Err(Error::ValueParse {
                row: 2,
                column: 3,
                ..
            })
        ));
        assert_eq!(bench.mock.sent_total(), FRAME_BYTES);

        let events = drain(&mut bench.events);
        let aborts = events
            .iter()
            .filter(|e| matches!(e, LinkEvent::RowStreamAborted { .. }))
            .count();
        assert_eq!(aborts, 1);
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, LinkEvent::RowStreamFinished { .. }))
        );
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, LinkEvent::RowAck { .. }))
                .count(),
            1
        );
        bench.reader.stop().await;
    }

    #[tokio::test]
    async fn empty_source_finishes_immediately() {
        let mut bench = bench();
        let report = bench.sender.stream(Vec::<Result<RowRecord>>::new()).await.unwrap();
        assert_eq!(report, RowStreamReport::default());
        assert!(drain(&mut bench.events).contains(&LinkEvent::RowStreamFinished {
            sent: 0,
            skipped: 0
        }));
        bench.reader.stop().await;
    }
}
