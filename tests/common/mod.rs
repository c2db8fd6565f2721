//! Test utilities for Chatlog integration tests.
//!
//! Provides:
//! - Temporary database fixture
//! - A minimal in-process MQTT 3.1.1 broker that accepts one client at a time
//! - Polling and raw HTTP helpers

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

use chatlog::config::Config;

pub const TOPIC: &str = "chat/messages";

/// Test fixture that manages a temporary database directory.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    /// Temporary directory for test database
    pub temp_dir: TempDir,
    /// Path to the database file
    pub db_path: PathBuf,
}

impl TestFixture {
    /// Create a new test fixture with a temporary database directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = temp_dir.path().join("chatlog.db");
        Self { temp_dir, db_path }
    }

    /// Loopback configuration pointing at the given broker port.
    pub fn config(&self, mqtt_port: u16) -> Config {
        Config {
            mqtt_port,
            mqtt_client_id: "chatlog-it".into(),
            reconnect_max_secs: 1,
            ..Config::test_config(self.db_path.clone())
        }
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for a condition to become true with timeout.
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Issue `GET path` over a fresh connection and return (status, body).
pub async fn http_get(addr: SocketAddr, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.expect("connect to read API");
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .expect("write request");

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.expect("read response");
    let text = String::from_utf8(raw).expect("utf-8 response");

    let (head, body) = text.split_once("\r\n\r\n").expect("malformed response");
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("status code");
    (status, body.to_string())
}

/// Minimal MQTT broker for driving the subscriber.
///
/// Connections are served one after another. The n-th connection is answered
/// with the n-th entry of `connack_codes` (0 once the list runs out). Payloads
/// queued with [`FakeBroker::publish`] are delivered on `chat/messages` after
/// the client subscribes. [`FakeBroker::drop_client`] closes the live
/// session so the next connection can be observed.
pub struct FakeBroker {
    pub port: u16,
    payloads: mpsc::UnboundedSender<Vec<u8>>,
    connections: Arc<AtomicUsize>,
    subscriptions: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
    kick: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl FakeBroker {
    pub async fn start() -> Self {
        Self::start_with_connack_codes(Vec::new()).await
    }

    pub async fn start_with_connack_codes(connack_codes: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind broker");
        let port = listener.local_addr().expect("broker addr").port();

        let (payloads, rx) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let subscriptions = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));
        let kick = Arc::new(Notify::new());

        let task_kick = Arc::clone(&kick);
        let counters = (
            Arc::clone(&connections),
            Arc::clone(&subscriptions),
            Arc::clone(&disconnects),
        );
        let handle = tokio::spawn(async move {
            let mut rx = rx;
            let (connections, subscriptions, disconnects) = counters;
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let index = connections.fetch_add(1, Ordering::SeqCst);
                let code = connack_codes.get(index).copied().unwrap_or(0);
                let _ = serve_client(
                    stream,
                    code,
                    &mut rx,
                    &subscriptions,
                    &disconnects,
                    &task_kick,
                )
                .await;
            }
        });

        Self {
            port,
            payloads,
            connections,
            subscriptions,
            disconnects,
            kick,
            handle,
        }
    }

    /// Close the current client connection without a DISCONNECT.
    pub fn drop_client(&self) {
        self.kick.notify_one();
    }

    /// Queue a payload for delivery on the chat topic.
    pub fn publish(&self, payload: impl Into<Vec<u8>>) {
        self.payloads
            .send(payload.into())
            .expect("broker task stopped");
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_client(
    mut stream: TcpStream,
    connack_code: u8,
    payloads: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    subscriptions: &AtomicUsize,
    disconnects: &Arc<AtomicUsize>,
    kick: &Notify,
) -> std::io::Result<()> {
    let (header, _) = read_packet(&mut stream).await?;
    assert_eq!(header >> 4, 1, "expected CONNECT");

    stream.write_all(&[0x20, 0x02, 0x00, connack_code]).await?;
    if connack_code != 0 {
        return Ok(());
    }

    // Wait for SUBSCRIBE and acknowledge it with QoS 0 granted.
    loop {
        let (header, body) = read_packet(&mut stream).await?;
        if header >> 4 == 8 {
            stream
                .write_all(&[0x90, 0x03, body[0], body[1], 0x00])
                .await?;
            subscriptions.fetch_add(1, Ordering::SeqCst);
            break;
        }
    }

    let (mut reader, writer) = stream.into_split();
    let writer = Arc::new(Mutex::new(writer));

    let ping_writer = Arc::clone(&writer);
    let disconnects = Arc::clone(disconnects);
    let mut reader_task = tokio::spawn(async move {
        while let Ok((header, _)) = read_packet(&mut reader).await {
            match header >> 4 {
                12 => {
                    let _ = ping_writer.lock().await.write_all(&[0xd0, 0x00]).await;
                }
                14 => {
                    disconnects.fetch_add(1, Ordering::SeqCst);
                    break;
                }
                _ => {}
            }
        }
    });

    loop {
        tokio::select! {
            payload = payloads.recv() => {
                let Some(payload) = payload else { break };
                let packet = publish_packet(TOPIC, &payload);
                writer.lock().await.write_all(&packet).await?;
            }
            _ = &mut reader_task => break,
            _ = kick.notified() => {
                reader_task.abort();
                break;
            }
        }
    }
    Ok(())
}

async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<(u8, Vec<u8>)> {
    let header = reader.read_u8().await?;
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = reader.read_u8().await?;
        len |= usize::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; len];
    reader.read_exact(&mut body).await?;
    Ok((header, body))
}

fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(2 + topic.len() + payload.len());
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    body.extend_from_slice(payload);

    let mut packet = vec![0x30];
    let mut remaining = body.len();
    loop {
        let mut byte = (remaining % 128) as u8;
        remaining /= 128;
        if remaining > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if remaining == 0 {
            break;
        }
    }
    packet.extend_from_slice(&body);
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_creates_temp_dir() {
        let fixture = TestFixture::new();
        assert!(fixture.temp_dir.path().exists());
        assert!(fixture.db_path.ends_with("chatlog.db"));
    }

    #[test]
    fn test_publish_packet_encodes_long_remaining_length() {
        let packet = publish_packet(TOPIC, &[b'x'; 200]);
        // 2 + 13 + 200 = 215 = 0xd7 -> [0xd7, 0x01]
        assert_eq!(&packet[..3], &[0x30, 0xd7, 0x01]);
        assert_eq!(packet.len(), 3 + 215);
    }
}
