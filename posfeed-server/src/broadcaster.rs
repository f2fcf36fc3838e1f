//! Live position broadcast over TCP.
//!
//! Clients connect to one listening port and receive the latest snapshot as a
//! newline delimited JSON object on every tick. Two subsystems share the
//! client set:
//!
//! - **accept**: adds every inbound connection to the set
//! - **tick**: serializes the latest snapshot once and writes it to every
//!   client without waiting; a client whose write fails, or whose socket
//!   buffer cannot take the whole message, is removed and its connection
//!   closed
//!
//! The tracker publishes through a [`BroadcastHandle`], a single slot that
//! always holds the newest snapshot. Snapshots replaced between two ticks are
//! never sent.
//!
//! ```rust,ignore
//! let broadcaster = Broadcaster::bind(addr, 20.0).await?;
//! sink.add(Box::new(broadcaster.handle()));
//! broadcaster.start(&subsys);
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use posfeed_core::Snapshot;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

use crate::sink::SnapshotConsumer;
use crate::{rate_to_period, PipelineError};

// Throughput is logged at most this often, and only with clients connected
const BROADCAST_LOG_INTERVAL: Duration = Duration::from_secs(1);

// Back off after a failed accept
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

type Latest = Option<Arc<Snapshot>>;

struct Client {
    addr: SocketAddr,
    stream: TcpStream,
}

/// Connected clients, guarded by one lock for add, iterate and remove
#[derive(Clone, Default)]
pub struct ClientSet {
    clients: Arc<Mutex<Vec<Client>>>,
}

impl ClientSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, stream: TcpStream, addr: SocketAddr) -> usize {
        let mut clients = self.clients.lock().await;
        clients.push(Client { addr, stream });
        clients.len()
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Write `message` to every client without blocking; evict the ones
    /// that failed or could not take all of it.
    ///
    /// Returns the number of clients still connected.
    pub async fn send_all(&self, key: &str, message: &[u8]) -> usize {
        let mut clients = self.clients.lock().await;

        clients.retain(|client| match client.stream.try_write(message) {
            Ok(n) if n == message.len() => true,
            Ok(n) => {
                log::warn!(
                    "{}: client {} too slow, took {} of {} bytes",
                    key,
                    client.addr,
                    n,
                    message.len()
                );
                false
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                log::warn!("{}: client {} too slow, send buffer full", key, client.addr);
                false
            }
            Err(e) => {
                log::warn!("{}: client {} disconnected: {}", key, client.addr, e);
                false
            }
        });
        clients.len()
    }

    /// Drop every connection
    pub async fn close_all(&self) {
        let mut clients = self.clients.lock().await;
        for client in clients.iter_mut() {
            let _ = client.stream.shutdown().await;
        }
        clients.clear();
    }
}

/// Publishing side of the single-slot latest snapshot
#[derive(Clone)]
pub struct BroadcastHandle {
    latest: Arc<watch::Sender<Latest>>,
}

impl BroadcastHandle {
    /// Replace the latest snapshot; the previous one is discarded if unsent
    pub fn update(&self, snapshot: Snapshot) {
        self.latest.send_replace(Some(Arc::new(snapshot)));
    }
}

impl SnapshotConsumer for BroadcastHandle {
    fn name(&self) -> &str {
        "broadcast"
    }

    fn consume(&mut self, snapshot: &Snapshot) -> Result<(), PipelineError> {
        self.update(snapshot.clone());
        Ok(())
    }
}

pub struct Broadcaster {
    acceptor: Acceptor,
    ticker: Ticker,
    handle: BroadcastHandle,
}

impl Broadcaster {
    /// Bind the listening socket; nothing runs until [`Broadcaster::start`]
    pub async fn bind(addr: SocketAddr, rate_hz: f64) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let key = format!("Broadcaster {}", listener.local_addr()?);
        let clients = ClientSet::new();
        let (tx, rx) = watch::channel(None);
        let period = rate_to_period(rate_hz);

        log::info!("{}: bound at {:.1} Hz", key, rate_hz);

        Ok(Broadcaster {
            acceptor: Acceptor {
                key: key.clone(),
                listener,
                clients: clients.clone(),
            },
            ticker: Ticker {
                key,
                clients,
                latest: rx,
                period,
                last_log: None,
            },
            handle: BroadcastHandle {
                latest: Arc::new(tx),
            },
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.acceptor.listener.local_addr()
    }

    pub fn handle(&self) -> BroadcastHandle {
        self.handle.clone()
    }

    pub fn clients(&self) -> ClientSet {
        self.acceptor.clients.clone()
    }

    /// Separate the two activities, for callers that drive them directly
    pub fn split(self) -> (Acceptor, Ticker) {
        (self.acceptor, self.ticker)
    }

    /// Run accept and tick as subsystems of `subsys`
    pub fn start(self, subsys: &SubsystemHandle) {
        let (acceptor, ticker) = self.split();
        subsys.start(SubsystemBuilder::new("broadcast accept", move |s| {
            acceptor.run(s)
        }));
        subsys.start(SubsystemBuilder::new("broadcast tick", move |s| ticker.run(s)));
    }
}

pub struct Acceptor {
    key: String,
    listener: TcpListener,
    clients: ClientSet,
}

impl Acceptor {
    /// Wait for one connection and add it to the client set
    pub async fn accept_next(&self) -> io::Result<SocketAddr> {
        let (stream, addr) = self.listener.accept().await?;
        let _ = stream.set_nodelay(true);
        let count = self.clients.add(stream, addr).await;
        log::info!("{}: client connected from {} ({} total)", self.key, addr, count);
        Ok(addr)
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), PipelineError> {
        log::info!("{}: listening for clients", self.key);

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    log::debug!("{}: shutdown, closing clients", self.key);
                    self.clients.close_all().await;
                    log::info!("{}: stopped", self.key);
                    return Ok(());
                },

                r = self.accept_next() => {
                    if let Err(e) = r {
                        log::warn!("{}: accept failed: {}", self.key, e);
                        sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
            }
        }
    }
}

pub struct Ticker {
    key: String,
    clients: ClientSet,
    latest: watch::Receiver<Latest>,
    period: Duration,
    last_log: Option<Instant>,
}

impl Ticker {
    /// Send the latest snapshot to every client once.
    ///
    /// Returns the number of clients that received it, 0 when no snapshot has
    /// been published yet.
    pub async fn tick(&mut self) -> usize {
        let latest = self.latest.borrow().clone();
        let Some(snapshot) = latest else {
            return 0;
        };

        let message = match snapshot.to_json_line() {
            Ok(m) => m,
            Err(e) => {
                log::error!("{}: {}", self.key, e);
                return 0;
            }
        };

        let delivered = self.clients.send_all(&self.key, &message).await;

        let now = Instant::now();
        let due = self
            .last_log
            .map_or(true, |t| now.duration_since(t) >= BROADCAST_LOG_INTERVAL);
        if due && delivered > 0 {
            log::info!(
                "{}: Broadcasted {} beacons to {} clients",
                self.key,
                snapshot.beacons.len(),
                delivered
            );
            self.last_log = Some(now);
        }

        delivered
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), PipelineError> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    log::debug!("{}: tick stopped", self.key);
                    return Ok(());
                },

                _ = ticker.tick() => {
                    self.tick().await;
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use posfeed_core::{BeaconType, Position, SnapshotEntry};
    use std::net::{Ipv4Addr, SocketAddrV4};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::time::timeout;

    fn loopback() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
    }

    fn snapshot(ts_pub: f64) -> Snapshot {
        Snapshot {
            ts_pub,
            beacons: vec![SnapshotEntry {
                beacon_type: BeaconType::Mobile,
                id: 3,
                pos: Position {
                    x: 1.0,
                    y: 2.0,
                    z: 0.0,
                },
                ts_mm: None,
                ts_read: 4.0,
            }],
        }
    }

    async fn wait_for_clients(clients: &ClientSet, n: usize) {
        for _ in 0..200 {
            if clients.len().await == n {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} clients", n);
    }

    async fn read_line(reader: &mut BufReader<TcpStream>) -> serde_json::Value {
        let mut line = String::new();
        timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .expect("no broadcast received")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_nothing_sent_before_first_update() {
        let broadcaster = Broadcaster::bind(loopback(), 20.0).await.unwrap();
        let (_acceptor, mut ticker) = broadcaster.split();
        assert_eq!(ticker.tick().await, 0);
    }

    #[tokio::test]
    async fn test_clients_receive_latest_snapshot() {
        let broadcaster = Broadcaster::bind(loopback(), 20.0).await.unwrap();
        let addr = broadcaster.local_addr().unwrap();
        let handle = broadcaster.handle();
        let clients = broadcaster.clients();
        let (acceptor, mut ticker) = broadcaster.split();
        tokio::spawn(async move { while acceptor.accept_next().await.is_ok() {} });

        let mut a = BufReader::new(TcpStream::connect(addr).await.unwrap());
        let mut b = BufReader::new(TcpStream::connect(addr).await.unwrap());
        wait_for_clients(&clients, 2).await;

        // Only the newest of several updates goes out
        handle.update(snapshot(1.0));
        handle.update(snapshot(2.0));
        assert_eq!(ticker.tick().await, 2);

        for reader in [&mut a, &mut b] {
            let value = read_line(reader).await;
            assert_eq!(value["ts_pub"], 2.0);
            assert_eq!(value["beacons"][0]["type"], "mobile");
            assert_eq!(value["beacons"][0]["id"], 3);
            assert_eq!(value["beacons"][0]["pos"]["y"], 2.0);
            assert!(value["beacons"][0]["ts_mm"].is_null());
        }
    }

    #[tokio::test]
    async fn test_failed_client_is_evicted() {
        let broadcaster = Broadcaster::bind(loopback(), 20.0).await.unwrap();
        let addr = broadcaster.local_addr().unwrap();
        let mut handle = broadcaster.handle();
        let clients = broadcaster.clients();
        let (acceptor, mut ticker) = broadcaster.split();
        tokio::spawn(async move { while acceptor.accept_next().await.is_ok() {} });

        let mut alive = BufReader::new(TcpStream::connect(addr).await.unwrap());
        let gone = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(&clients, 2).await;
        drop(gone);

        handle.consume(&snapshot(1.0)).unwrap();

        // The peer's reset surfaces on one of the next writes
        let mut remaining = 2;
        for _ in 0..50 {
            remaining = ticker.tick().await;
            let value = read_line(&mut alive).await;
            assert_eq!(value["ts_pub"], 1.0);
            if remaining == 1 {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(remaining, 1);
        assert_eq!(clients.len().await, 1);

        // The survivor keeps receiving
        handle.update(snapshot(5.0));
        assert_eq!(ticker.tick().await, 1);
        let mut latest = read_line(&mut alive).await;
        while latest["ts_pub"] != 5.0 {
            latest = read_line(&mut alive).await;
        }
    }

    #[tokio::test]
    async fn test_close_all() {
        let broadcaster = Broadcaster::bind(loopback(), 20.0).await.unwrap();
        let addr = broadcaster.local_addr().unwrap();
        let clients = broadcaster.clients();
        let (acceptor, _ticker) = broadcaster.split();
        tokio::spawn(async move { while acceptor.accept_next().await.is_ok() {} });

        let mut reader = BufReader::new(TcpStream::connect(addr).await.unwrap());
        wait_for_clients(&clients, 1).await;
        clients.close_all().await;
        assert!(clients.is_empty().await);

        let mut line = String::new();
        let n = timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_full_send_buffer_evicts_without_waiting() {
        let listener = TcpListener::bind(loopback()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let clients = ClientSet::new();

        // Never reads, so its receive window and our send buffer fill up
        let _stalled = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        clients.add(stream, peer).await;
        sleep(Duration::from_millis(20)).await;

        let message = vec![b'x'; 64 * 1024 * 1024];
        let started = Instant::now();
        assert_eq!(clients.send_all("test", &message).await, 0);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(clients.is_empty().await);
    }
}
