//! Print everything the device says.
//!
//! Opens the port, starts the line reader, and prints each event with the
//! time since start. Useful for checking firmware boot messages and
//! diagnostic output without sending anything.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p ekglink --example monitor_lines -- /dev/ttyACM0
//! ```

use std::time::Duration;

use ekglink::LinkEvent;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyACM0".to_string());

    println!("Opening {}...", port);
    let link = ekglink::serial_builder(&port).build()?;
    let mut events = link.subscribe();
    link.start_reader().await?;
    println!("Monitoring for 30 seconds.\n");

    let start = tokio::time::Instant::now();
    let deadline = start + Duration::from_secs(30);

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) => {
                let elapsed = start.elapsed();
                let timestamp = format!("{:>6}.{:03}s", elapsed.as_secs(), elapsed.subsec_millis());
                match &event {
                    LinkEvent::Line(line) => println!("{}  > {}", timestamp, line),
                    other => println!("{}  {}", timestamp, other),
                }
                if matches!(event, LinkEvent::ReadError { fatal: true, .. }) {
                    break;
                }
            }
            Ok(Err(e)) => {
                eprintln!("event stream: {}", e);
                break;
            }
            Err(_) => break,
        }
    }

    link.close().await?;
    println!("\nDone.");
    Ok(())
}
