//! Mock serial device for deterministic testing of the IO engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait over shared state, so
//! a test keeps a clone of the mock while the engine owns another. The test
//! side scripts the device: inbound bytes can be pushed at any time, and
//! replies can be queued to appear once the host has written a given number
//! of bytes (the device answering a complete frame).
//!
//! # Example
//!
//! ```
//! use ekglink_test_harness::MockTransport;
//!
//! let mock = MockTransport::new();
//! // After one 4-byte float has been written, the device answers with a
//! // two-byte acknowledgement.
//! mock.reply_after(4, &[0x01, 0x5A]);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ekglink_core::error::{Error, Result};
use ekglink_core::transport::{Connector, Transport};
use ekglink_core::types::PortConfig;

/// A reply released once the host has written `after_bytes` bytes in total.
#[derive(Debug, Clone)]
struct Reply {
    after_bytes: usize,
    response: Vec<u8>,
}

#[derive(Debug)]
struct MockState {
    /// Bytes the device has "sent" that the host has not read yet.
    inbound: VecDeque<u8>,
    /// Scripted replies, ordered by `after_bytes`.
    replies: VecDeque<Reply>,
    /// Whether the transport is "connected".
    connected: bool,
    /// Log of every `send()` call.
    sent_log: Vec<Vec<u8>>,
    /// Total bytes written across all `send()` calls.
    sent_total: usize,
    /// Largest chunk a single `receive()` hands out.
    max_chunk: usize,
    /// When set, every `receive()` fails with this error kind.
    read_failure: Option<std::io::ErrorKind>,
    /// Number of `clear_buffers()` calls.
    clears: usize,
}

/// A scripted stand-in for the microcontroller's serial port.
///
/// Cloning yields another handle to the same device.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a new mock device in the connected state.
    pub fn new() -> Self {
        MockTransport {
            state: Arc::new(Mutex::new(MockState {
                inbound: VecDeque::new(),
                replies: VecDeque::new(),
                connected: true,
                sent_log: Vec::new(),
                sent_total: 0,
                max_chunk: usize::MAX,
                read_failure: None,
                clears: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `bytes` available to the host immediately.
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.state().inbound.extend(bytes.iter().copied());
    }

    /// Queue `response` to become readable once the host has written
    /// `after_bytes` bytes in total since the mock was created.
    pub fn reply_after(&self, after_bytes: usize, response: &[u8]) {
        let mut state = self.state();
        state.replies.push_back(Reply {
            after_bytes,
            response: response.to_vec(),
        });
        state
            .replies
            .make_contiguous()
            .sort_by_key(|r| r.after_bytes);
        Self::release_replies(&mut state);
    }

    fn release_replies(state: &mut MockState) {
        while state
            .replies
            .front()
            .is_some_and(|r| r.after_bytes <= state.sent_total)
        {
            if let Some(reply) = state.replies.pop_front() {
                state.inbound.extend(reply.response);
            }
        }
    }

    /// Every `send()` call, in order.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.state().sent_log.clone()
    }

    /// All bytes written so far, concatenated.
    pub fn sent_bytes(&self) -> Vec<u8> {
        self.state().sent_log.concat()
    }

    /// Number of bytes written so far.
    pub fn sent_total(&self) -> usize {
        self.state().sent_total
    }

    /// Number of inbound bytes not yet read by the host.
    pub fn pending_inbound(&self) -> usize {
        self.state().inbound.len()
    }

    /// Number of scripted replies not yet released.
    pub fn remaining_replies(&self) -> usize {
        self.state().replies.len()
    }

    /// Number of times the host reset the buffers.
    pub fn clear_count(&self) -> usize {
        self.state().clears
    }

    /// Limit how many bytes one `receive()` returns, to force fragmentation.
    pub fn set_max_chunk(&self, max_chunk: usize) {
        self.state().max_chunk = max_chunk.max(1);
    }

    /// Make every subsequent `receive()` fail with `kind` (or stop failing).
    pub fn fail_reads(&self, kind: Option<std::io::ErrorKind>) {
        self.state().read_failure = kind;
    }

    /// Set the connected state of the mock.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NotConnected`].
    pub fn set_connected(&self, connected: bool) {
        self.state().connected = connected;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.state();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        state.sent_log.push(data.to_vec());
        state.sent_total += data.len();
        Self::release_replies(&mut state);
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let mut state = self.state();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        if let Some(kind) = state.read_failure {
            return Err(Error::Io(kind.into()));
        }
        if state.inbound.is_empty() {
            return Err(Error::Timeout);
        }
        let n = buf.len().min(state.inbound.len()).min(state.max_chunk);
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn bytes_available(&self) -> Result<usize> {
        let state = self.state();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        Ok(state.inbound.len())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        let mut state = self.state();
        state.inbound.clear();
        state.clears += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.state().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }
}

#[derive(Debug, Default)]
struct ConnectorState {
    configs: Vec<PortConfig>,
    failure: Option<String>,
}

/// A [`Connector`] that always hands out the same [`MockTransport`].
///
/// Each successful connect marks the device connected again, the way
/// re-opening a real port would.
#[derive(Debug, Clone)]
pub struct MockConnector {
    device: MockTransport,
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    pub fn new(device: MockTransport) -> Self {
        Self {
            device,
            state: Arc::new(Mutex::new(ConnectorState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make subsequent connects fail with `reason` (or succeed again).
    pub fn fail_with(&self, reason: Option<&str>) {
        self.state().failure = reason.map(str::to_string);
    }

    /// Number of connect attempts, successful or not.
    pub fn open_count(&self) -> usize {
        self.state().configs.len()
    }

    /// Config of the most recent connect attempt.
    pub fn last_config(&self) -> Option<PortConfig> {
        self.state().configs.last().cloned()
    }

    pub fn device(&self) -> &MockTransport {
        &self.device
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, config: &PortConfig) -> Result<Box<dyn Transport>> {
        let failure = {
            let mut state = self.state();
            state.configs.push(config.clone());
            state.failure.clone()
        };
        if let Some(reason) = failure {
            return Err(Error::PortOpen {
                path: config.path.clone(),
                reason,
            });
        }
        self.device.set_connected(true);
        Ok(Box::new(self.device.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_transport_tracks_sent_data() {
        let mut mock = MockTransport::new();
        mock.send(&[0x01, 0x02]).await.unwrap();
        mock.send(&[0x03, 0x04]).await.unwrap();

        assert_eq!(mock.sent_data(), vec![vec![0x01, 0x02], vec![0x03, 0x04]]);
        assert_eq!(mock.sent_bytes(), vec![0x01, 0x02, 0x03, 0x04]);
        assert_eq!(mock.sent_total(), 4);
    }

    #[tokio::test]
    async fn mock_transport_reply_released_after_threshold() {
        let mut mock = MockTransport::new();
        mock.reply_after(8, &[0xAA, 0xBB]);

        mock.send(&[0; 4]).await.unwrap();
        assert_eq!(mock.bytes_available().unwrap(), 0);
        assert_eq!(mock.remaining_replies(), 1);

        mock.send(&[0; 4]).await.unwrap();
        assert_eq!(mock.bytes_available().unwrap(), 2);
        assert_eq!(mock.remaining_replies(), 0);

        let mut buf = [0u8; 8];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], &[0xAA, 0xBB]);
    }

    #[tokio::test]
    async fn mock_transport_receive_without_data_times_out() {
        let mut mock = MockTransport::new();
        let mut buf = [0u8; 8];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn mock_transport_max_chunk_fragments() {
        let mut mock = MockTransport::new();
        mock.push_inbound(b"ABCDE");
        mock.set_max_chunk(2);

        let mut buf = [0u8; 16];
        let n = mock.receive(&mut buf, Duration::ZERO).await.unwrap();
        assert_eq!(&buf[..n], b"AB");
        let n = mock.receive(&mut buf, Duration::ZERO).await.unwrap();
        assert_eq!(&buf[..n], b"CD");
        let n = mock.receive(&mut buf, Duration::ZERO).await.unwrap();
        assert_eq!(&buf[..n], b"E");
    }

    #[tokio::test]
    async fn mock_transport_clear_discards_inbound() {
        let mut mock = MockTransport::new();
        mock.push_inbound(b"boot noise");
        mock.clear_buffers().unwrap();
        assert_eq!(mock.pending_inbound(), 0);
        assert_eq!(mock.clear_count(), 1);
    }

    #[tokio::test]
    async fn mock_transport_read_failure() {
        let mut mock = MockTransport::new();
        mock.push_inbound(b"x");
        mock.fail_reads(Some(std::io::ErrorKind::BrokenPipe));
        let mut buf = [0u8; 4];
        let result = mock.receive(&mut buf, Duration::ZERO).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn mock_transport_disconnect() {
        let mut mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.close().await.unwrap();
        assert!(!mock.is_connected());

        let result = mock.send(&[0x01]).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn mock_connector_reconnects_shared_device() {
        let device = MockTransport::new();
        let connector = MockConnector::new(device.clone());

        let mut transport = connector
            .connect(&PortConfig::new("mock0", 9600))
            .await
            .unwrap();
        transport.send(&[0x42]).await.unwrap();
        transport.close().await.unwrap();
        assert!(!device.is_connected());

        let transport = connector
            .connect(&PortConfig::new("mock0", 115_200))
            .await
            .unwrap();
        assert!(transport.is_connected());
        assert_eq!(device.sent_bytes(), vec![0x42]);
        assert_eq!(connector.open_count(), 2);
        assert_eq!(connector.last_config().unwrap().baud_rate, 115_200);
    }

    #[tokio::test]
    async fn mock_connector_failure() {
        let connector = MockConnector::new(MockTransport::new());
        connector.fail_with(Some("permission denied"));

        let result = connector.connect(&PortConfig::new("mock0", 9600)).await;
        match result {
            Err(Error::PortOpen { path, reason }) => {
                assert_eq!(path, "mock0");
                assert_eq!(reason, "permission denied");
            }
            _ => panic!("expected PortOpen"),
        }
    }
}
