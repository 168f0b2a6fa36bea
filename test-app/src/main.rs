// ekg-console -- command-line front end for the ekglink serial bridge.
//
// Sends ECG samples, delimited row files, or raw bytes to the device and
// prints every event the link reports, against real hardware or a mock
// device.
//
// Usage:
//   ekg-console --port /dev/ttyACM0 sample --data signals/regular.csv --label normal
//   ekg-console --port COM4 sample --data signals/anomaly.csv --label anomaly --hold-open
//   ekg-console --port COM4 rows --file recording.csv
//   ekg-console --port COM4 raw 0 17 255
//   ekg-console --port COM4 --log-out session.txt monitor --seconds 30
//   ekg-console --mock sample --data signals/regular.csv

mod dataset;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use ekglink::{
    ByteVector, CoordinatorBuilder, EventLog, LinkEvent, RowRecord, SendMode, TransportCoordinator,
    read_rows,
};
use ekglink_test_harness::{MockConnector, MockTransport};

use crate::dataset::Dataset;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// ekg-console -- talk to the EKG microcontroller from the command line.
#[derive(Parser)]
#[command(name = "ekg-console", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyACM0, COM4).
    /// Required unless --mock is used.
    #[arg(long)]
    port: Option<String>,

    /// Baud rate.
    #[arg(long, default_value_t = ekglink::DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Use a scripted mock device instead of a real serial port.
    /// The mock acknowledges every complete frame.
    #[arg(long)]
    mock: bool,

    /// Write the session log to this file on exit.
    #[arg(long)]
    log_out: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one random sample from a dataset and print the device's report.
    Sample {
        /// Dataset file: one sample per line, comma-delimited, no header.
        #[arg(long)]
        data: PathBuf,

        /// Name used in messages (e.g. normal, anomaly).
        #[arg(long, default_value = "normal")]
        label: String,

        /// Keep the port open after the exchange instead of closing it.
        #[arg(long)]
        hold_open: bool,
    },

    /// Stream every row of a delimited file, one acknowledgement per row.
    Rows {
        #[arg(long)]
        file: PathBuf,
    },

    /// Write raw byte values (0-255) in one call.
    Raw {
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<i64>,
    },

    /// Print device output for a while without sending anything.
    Monitor {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}

// ---------------------------------------------------------------------------
// Link construction
// ---------------------------------------------------------------------------

fn build_link(cli: &Cli, mock: Option<&MockTransport>) -> Result<TransportCoordinator> {
    let builder = match mock {
        Some(device) => {
            println!("Using mock device");
            CoordinatorBuilder::new(Arc::new(MockConnector::new(device.clone())))
                .port("mock0")
                .settle_delay(Duration::ZERO)
        }
        None => {
            let port = cli
                .port
                .as_deref()
                .context("--port is required when not using --mock")?;
            ekglink::serial_builder(port)
        }
    };
    builder
        .baud_rate(cli.baud)
        .build()
        .context("failed to build link")
}

/// Print every event as it arrives, until the link is dropped.
fn spawn_printer(mut events: broadcast::Receiver<LinkEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LinkEvent::Line(line)) => println!("> {}", line),
                Ok(event) => println!("{}", event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "console fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_sample(
    link: &TransportCoordinator,
    mock: Option<&MockTransport>,
    data: &Path,
    label: &str,
    hold_open: bool,
) -> Result<()> {
    let dataset = Dataset::load(data, label)?;
    println!("Loaded {} {} signals.", dataset.len(), dataset.label);

    let Some(sample) = dataset.pick() else {
        println!("No {} signals loaded.", dataset.label);
        return Ok(());
    };
    let sample = sample?;

    if let Some(device) = mock {
        device.reply_after(sample.len() * 4, &[0x01, 0x5A]);
    }

    let mode = if hold_open {
        SendMode::Session
    } else {
        SendMode::OneShot
    };
    link.send_sample(&sample, mode)
        .await
        .context("sample exchange failed")?;
    Ok(())
}

async fn cmd_rows(
    link: &TransportCoordinator,
    mock: Option<&MockTransport>,
    file: &Path,
) -> Result<()> {
    let source = File::open(file).with_context(|| format!("cannot open {}", file.display()))?;
    let rows: Vec<ekglink::Result<RowRecord>> = read_rows(BufReader::new(source)).collect();

    if let Some(device) = mock {
        let wide = rows
            .iter()
            .filter(|r| r.as_ref().is_ok_and(RowRecord::is_wide_enough))
            .count();
        for n in 1..=wide {
            device.reply_after(n * ekglink::SAMPLE_ARITY * 4, format!("ACK {}\n", n).as_bytes());
        }
    }

    let report = link.stream_rows(rows).await.context("row stream failed")?;
    debug!(sent = report.sent, skipped = ?report.skipped, "row stream report");
    Ok(())
}

async fn cmd_raw(link: &TransportCoordinator, values: &[i64]) -> Result<()> {
    link.send_raw(&ByteVector(values.to_vec()))
        .await
        .context("raw write failed")?;
    Ok(())
}

async fn cmd_monitor(link: &TransportCoordinator, seconds: u64) -> Result<()> {
    link.start_reader().await.context("cannot start reader")?;
    println!("Monitoring for {} seconds...", seconds);
    tokio::time::sleep(Duration::from_secs(seconds)).await;
    link.stop_reader().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "ekglink=info,ekglink_io=info,ekglink_transport=info,ekg_console=info",
                )
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mock = cli.mock.then(MockTransport::new);
    let link = build_link(&cli, mock.as_ref())?;

    let log = EventLog::new();
    let recorder = log.attach(link.subscribe());
    let printer = spawn_printer(link.subscribe());

    let result = match &cli.command {
        Command::Sample {
            data,
            label,
            hold_open,
        } => cmd_sample(&link, mock.as_ref(), data, label, *hold_open).await,
        Command::Rows { file } => cmd_rows(&link, mock.as_ref(), file).await,
        Command::Raw { values } => cmd_raw(&link, values).await,
        Command::Monitor { seconds } => cmd_monitor(&link, *seconds).await,
    };

    if let Err(e) = link.close().await {
        warn!(error = %e, "failed to close port");
    }

    // Dropping the link ends both event streams.
    drop(link);
    let _ = printer.await;
    let _ = recorder.await;

    if let Some(path) = &cli.log_out {
        log.export(path)
            .with_context(|| format!("cannot write log to {}", path.display()))?;
        println!("Log written to {}", path.display());
    }

    result
}
