//! Push-only reporting feed for dashboards.
//!
//! Clients connect over TCP and receive netstring-framed messages
//! (`<len>:<payload>,`). The first payload byte is the opcode. Snapshots
//! are JSON; call and link events are comma separated text.

use crate::config::ReportsConfig;
use crate::error::DmrlinkError;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Client asks for the configuration snapshot.
pub const CONFIG_REQ: u8 = 0x00;
/// Configuration snapshot.
pub const CONFIG_SND: u8 = 0x01;
/// Client asks for the bridge snapshot.
pub const BRIDGE_REQ: u8 = 0x02;
/// Bridge snapshot.
pub const BRIDGE_SND: u8 = 0x03;
/// Configuration changed.
pub const CONFIG_UPD: u8 = 0x04;
/// Bridge table changed.
pub const BRIDGE_UPD: u8 = 0x05;
/// Link event.
pub const LINK_EVENT: u8 = 0x06;
/// Call event.
pub const BRIDGE_EVENT: u8 = 0x07;

const FEED_DEPTH: usize = 256;
const MAX_NETSTRING: usize = 1 << 20;

/// Something the core wants the feed to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent {
    /// A call event, e.g. `GROUP VOICE,START,RX,...`.
    Bridge(String),
    /// A link event.
    Link(String),
    /// Peers or settings changed; push a fresh configuration snapshot.
    ConfigChanged,
    /// Memberships changed; push a fresh bridge snapshot.
    BridgesChanged,
}

impl ReportEvent {
    /// `GROUP VOICE,START,RX,<system>,<stream>,<peer>,<sub>,<slot>,<dst>`.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn call(
        kind: &str,
        phase: &str,
        dir: &str,
        system: &str,
        stream: u32,
        peer: u32,
        sub: u32,
        slot: u8,
        dst: u32,
        duration: Option<f64>,
    ) -> Self {
        let mut s = format!("{kind},{phase},{dir},{system},{stream},{peer},{sub},{slot},{dst}");
        if let Some(d) = duration {
            s.push_str(&format!(",{d:.2}"));
        }
        Self::Bridge(s)
    }
}

/// Frames `payload` as `<len>:<payload>,`.
#[must_use]
pub fn netstring(payload: &[u8]) -> Vec<u8> {
    let mut out = format!("{}:", payload.len()).into_bytes();
    out.extend_from_slice(payload);
    out.push(b',');
    out
}

/// Opcode followed by a body.
#[must_use]
pub fn message(opcode: u8, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(body.len() + 1);
    payload.push(opcode);
    payload.extend_from_slice(body);
    netstring(&payload)
}

/// Incremental netstring parser for client requests.
#[derive(Debug, Default)]
pub struct NetstringReader {
    buf: Vec<u8>,
}

impl NetstringReader {
    /// Appends received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete payload; `Err` means the stream is corrupt.
    ///
    /// # Errors
    ///
    /// Returns a description when the length prefix or trailer is invalid.
    pub fn next_payload(&mut self) -> Result<Option<Vec<u8>>, String> {
        let Some(colon) = self.buf.iter().position(|b| *b == b':') else {
            if self.buf.len() > 10 {
                return Err("netstring length too long".to_string());
            }
            return Ok(None);
        };
        let len: usize = std::str::from_utf8(&self.buf[..colon])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| "bad netstring length".to_string())?;
        if len > MAX_NETSTRING {
            return Err(format!("netstring of {len} bytes refused"));
        }
        let end = colon + 1 + len;
        if self.buf.len() <= end {
            return Ok(None);
        }
        if self.buf[end] != b',' {
            return Err("missing netstring trailer".to_string());
        }
        let payload = self.buf[colon + 1..end].to_vec();
        self.buf.drain(..=end);
        Ok(Some(payload))
    }
}

/// Whether `ip` may connect.
#[must_use]
pub fn client_allowed(clients: &[String], ip: IpAddr) -> bool {
    clients.iter().any(|c| c == "*" || c.parse::<IpAddr>().is_ok_and(|a| a == ip))
}

/// Core-side handle: keeps the latest snapshots and fans messages out to
/// connected clients.
#[derive(Debug, Clone)]
pub struct ReportHub {
    feed: broadcast::Sender<Arc<Vec<u8>>>,
    config: watch::Sender<Arc<Vec<u8>>>,
    bridges: watch::Sender<Arc<Vec<u8>>>,
}

impl Default for ReportHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportHub {
    /// A hub with empty snapshots.
    #[must_use]
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_DEPTH);
        let (config, _) = watch::channel(Arc::new(b"{}".to_vec()));
        let (bridges, _) = watch::channel(Arc::new(b"{}".to_vec()));
        Self { feed, config, bridges }
    }

    fn publish(&self, opcode: u8, body: &[u8]) {
        // No receivers is fine.
        let _ = self.feed.send(Arc::new(message(opcode, body)));
    }

    /// Stores a configuration snapshot and pushes it with `opcode`.
    pub fn push_config(&self, json: Vec<u8>, opcode: u8) {
        self.publish(opcode, &json);
        self.config.send_replace(Arc::new(json));
    }

    /// Stores a bridge snapshot and pushes it with `opcode`.
    pub fn push_bridges(&self, json: Vec<u8>, opcode: u8) {
        self.publish(opcode, &json);
        self.bridges.send_replace(Arc::new(json));
    }

    /// Pushes a call event.
    pub fn bridge_event(&self, text: &str) {
        self.publish(BRIDGE_EVENT, text.as_bytes());
    }

    /// Pushes a link event.
    pub fn link_event(&self, text: &str) {
        self.publish(LINK_EVENT, text.as_bytes());
    }

    /// Connected clients.
    #[must_use]
    pub fn clients(&self) -> usize {
        self.feed.receiver_count()
    }
}

/// Serves the feed until `shutdown_rx` changes or its sender is dropped.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn run_with_shutdown(
    listener: TcpListener,
    cfg: ReportsConfig,
    hub: ReportHub,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), DmrlinkError> {
    let local_addr = listener.local_addr().map_err(DmrlinkError::Io)?;
    info!("(REPORT) reporting server listening on {}", local_addr);
    let clients = Arc::new(cfg.clients);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        if !client_allowed(&clients, addr.ip()) {
                            warn!("(REPORT) invalid client connection from {}, dropping", addr);
                            drop(stream);
                            continue;
                        }
                        let hub = hub.clone();
                        let shutdown = shutdown_rx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, addr, hub, shutdown).await {
                                debug!("(REPORT) client {} closed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => warn!("(REPORT) failed to accept connection: {}", e),
                }
            }
            _ = shutdown_rx.changed() => {
                info!("(REPORT) shutting down reporting server");
                break;
            }
        }
    }
    Ok(())
}

async fn handle_client(
    mut stream: TcpStream,
    addr: SocketAddr,
    hub: ReportHub,
    mut shutdown: watch::Receiver<()>,
) -> Result<(), DmrlinkError> {
    info!("(REPORT) reporting client connected: {}", addr);
    let mut feed = hub.feed.subscribe();
    let config = Arc::clone(&hub.config.borrow());
    stream.write_all(&message(CONFIG_SND, &config)).await?;
    let bridges = Arc::clone(&hub.bridges.borrow());
    stream.write_all(&message(BRIDGE_SND, &bridges)).await?;

    let mut reader = NetstringReader::default();
    let mut buf = [0u8; 512];
    loop {
        tokio::select! {
            msg = feed.recv() => match msg {
                Ok(bytes) => stream.write_all(&bytes).await?,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("(REPORT) client {} lagging, {} messages skipped", addr, n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            n = stream.read(&mut buf) => {
                let n = n?;
                if n == 0 {
                    break;
                }
                reader.push(&buf[..n]);
                loop {
                    match reader.next_payload() {
                        Ok(Some(req)) => {
                            let reply = match req.first() {
                                Some(&CONFIG_REQ) => {
                                    let snap = Arc::clone(&hub.config.borrow());
                                    Some(message(CONFIG_SND, &snap))
                                }
                                Some(&BRIDGE_REQ) => {
                                    let snap = Arc::clone(&hub.bridges.borrow());
                                    Some(message(BRIDGE_SND, &snap))
                                }
                                other => {
                                    debug!("(REPORT) unknown request {:?} from {}", other, addr);
                                    None
                                }
                            };
                            if let Some(reply) = reply {
                                stream.write_all(&reply).await?;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("(REPORT) bad request from {}: {}", addr, e);
                            return Ok(());
                        }
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("(REPORT) reporting client disconnected: {}", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn netstring_framing() {
        assert_eq!(netstring(b"hello"), b"5:hello,".to_vec());
        assert_eq!(message(BRIDGE_EVENT, b"x"), b"2:\x07x,".to_vec());
    }

    #[test]
    fn reader_handles_split_and_batched_input() {
        let mut r = NetstringReader::default();
        r.push(b"1:\x00,1:");
        assert_eq!(r.next_payload().unwrap(), Some(vec![CONFIG_REQ]));
        assert_eq!(r.next_payload().unwrap(), None);
        r.push(b"\x02,");
        assert_eq!(r.next_payload().unwrap(), Some(vec![BRIDGE_REQ]));
    }

    #[test]
    fn reader_rejects_garbage() {
        let mut r = NetstringReader::default();
        r.push(b"x:abc,");
        assert!(r.next_payload().is_err());
        let mut r = NetstringReader::default();
        r.push(b"2:abX");
        assert!(r.next_payload().is_err());
    }

    #[test]
    fn call_event_text() {
        let ev = ReportEvent::call("GROUP VOICE", "END", "RX", "MASTER-A", 7, 312000, 3120001, 1, 91, Some(2.5));
        assert_eq!(
            ev,
            ReportEvent::Bridge("GROUP VOICE,END,RX,MASTER-A,7,312000,3120001,1,91,2.50".to_string())
        );
    }

    #[test]
    fn allowlist() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(client_allowed(&["*".to_string()], ip));
        assert!(client_allowed(&["10.0.0.1".to_string()], ip));
        assert!(!client_allowed(&["127.0.0.1".to_string()], ip));
    }

    #[tokio::test]
    async fn client_gets_snapshots_and_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = ReportHub::new();
        hub.push_config(b"{\"a\":1}".to_vec(), CONFIG_SND);
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let cfg = ReportsConfig {
            enabled: true,
            interval: 60,
            port: addr.port(),
            clients: vec!["127.0.0.1".to_string()],
        };
        let server = tokio::spawn(run_with_shutdown(listener, cfg, hub.clone(), shutdown_rx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut reader = NetstringReader::default();
        let mut got = Vec::new();
        let mut buf = [0u8; 256];
        while got.len() < 2 {
            let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            reader.push(&buf[..n]);
            while let Some(p) = reader.next_payload().unwrap() {
                got.push(p);
            }
        }
        assert_eq!(got[0], b"\x01{\"a\":1}".to_vec());
        assert_eq!(got[1][0], BRIDGE_SND);

        while hub.clients() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        hub.bridge_event("GROUP VOICE,START,RX,A,1,2,3,1,91");
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        reader.push(&buf[..n]);
        let ev = reader.next_payload().unwrap().unwrap();
        assert_eq!(ev[0], BRIDGE_EVENT);
        assert!(ev.ends_with(b"1,91"));

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
