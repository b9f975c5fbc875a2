#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io::{self, ErrorKind};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::io::Cursor;
use futures_util::{AsyncWrite, StreamExt};
use libp2p_core::PeerId;
use libp2p_roster_relay::codec;
use libp2p_roster_relay::transport::{
    self, ChannelId, ChannelOpenError, DialError, Status, Transport,
};
use libp2p_roster_relay::{Config, Message};
use parking_lot::Mutex;
use tokio::time;

pub fn init_log() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> Config {
    Config::default().with_flush_delay(Duration::from_millis(10))
}

/// poll `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }

        time::sleep(Duration::from_millis(10)).await;
    }

    false
}

#[derive(Debug, Default)]
struct ChannelState {
    written: Vec<u8>,
    open: bool,
    fail_writes: bool,
    writer_taken: bool,
}

#[derive(Debug, Clone)]
pub struct MemoryChannel {
    id: ChannelId,
    protocol: String,
    state: Arc<Mutex<ChannelState>>,
}

impl MemoryChannel {
    pub fn fail_writes(&self) {
        self.state.lock().fail_writes = true;
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// every message written so far
    pub async fn messages(&self) -> Vec<Message> {
        let written = self.state.lock().written.clone();

        codec::decode::<Message, _>(Cursor::new(written), 1024 * 1024)
            .filter_map(|frame| async move { frame.ok() })
            .collect()
            .await
    }
}

impl transport::Channel for MemoryChannel {
    type Writer = MemoryWriter;

    fn id(&self) -> ChannelId {
        self.id
    }

    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn status(&self) -> Status {
        if self.state.lock().open {
            Status::Open
        } else {
            Status::Closed
        }
    }

    fn writer(&self) -> Option<Self::Writer> {
        let mut state = self.state.lock();
        if !state.open || state.writer_taken {
            return None;
        }
        state.writer_taken = true;

        Some(MemoryWriter {
            state: self.state.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MemoryWriter {
    state: Arc<Mutex<ChannelState>>,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.state.lock();
        if state.fail_writes || !state.open {
            return Poll::Ready(Err(io::Error::from(ErrorKind::BrokenPipe)));
        }

        state.written.extend_from_slice(buf);

        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConnection {
    peer_id: PeerId,
    pub id: u64,
    status: Arc<Mutex<Status>>,
    channels: Arc<Mutex<Vec<MemoryChannel>>>,
}

impl MemoryConnection {
    pub fn mark_closed(&self) {
        *self.status.lock() = Status::Closed;
    }
}

impl transport::Connection for MemoryConnection {
    type Channel = MemoryChannel;

    fn remote_peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn status(&self) -> Status {
        *self.status.lock()
    }

    fn channels(&self) -> Vec<Self::Channel> {
        self.channels.lock().clone()
    }
}

#[derive(Debug, Default)]
struct Peers {
    order: Vec<PeerId>,
    connections: HashMap<PeerId, Vec<MemoryConnection>>,
    reachable: HashSet<PeerId>,
}

/// an in-process connection registry which counts dials, channel opens and connection closes
#[derive(Debug, Default)]
pub struct MemoryTransport {
    peers: Mutex<Peers>,
    next_id: AtomicU64,
    dials: AtomicUsize,
    opens: AtomicUsize,
    closed_connections: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// the peer can be dialed
    pub fn add_reachable(&self, peer_id: PeerId) {
        self.peers.lock().reachable.insert(peer_id);
    }

    /// the peer connected to us
    pub fn connect(&self, peer_id: PeerId) -> MemoryConnection {
        self.add_reachable(peer_id);

        self.new_connection(peer_id)
    }

    /// drop every connection of the peer and make it unreachable
    pub fn disconnect(&self, peer_id: &PeerId) {
        let mut peers = self.peers.lock();
        peers.reachable.remove(peer_id);
        peers.order.retain(|id| id != peer_id);

        for connection in peers.connections.remove(peer_id).unwrap_or_default() {
            connection.mark_closed();
            for channel in connection.channels.lock().iter() {
                channel.state.lock().open = false;
            }
        }
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closed_connection_count(&self) -> usize {
        self.closed_connections.load(Ordering::SeqCst)
    }

    /// every channel ever opened to the peer for the protocol, oldest first
    pub fn channels(&self, peer_id: &PeerId, protocol: &str) -> Vec<MemoryChannel> {
        self.peers
            .lock()
            .connections
            .get(peer_id)
            .into_iter()
            .flatten()
            .flat_map(|connection| connection.channels.lock().clone())
            .filter(|channel| channel.protocol == protocol)
            .collect()
    }

    fn new_connection(&self, peer_id: PeerId) -> MemoryConnection {
        let connection = MemoryConnection {
            peer_id,
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            status: Arc::new(Mutex::new(Status::Open)),
            channels: Default::default(),
        };

        let mut peers = self.peers.lock();
        if !peers.order.contains(&peer_id) {
            peers.order.push(peer_id);
        }
        peers
            .connections
            .entry(peer_id)
            .or_default()
            .push(connection.clone());

        connection
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Channel = MemoryChannel;
    type Connection = MemoryConnection;

    fn connections(&self, peer_id: &PeerId) -> Vec<Self::Connection> {
        self.peers
            .lock()
            .connections
            .get(peer_id)
            .cloned()
            .unwrap_or_default()
    }

    fn peers(&self) -> Vec<PeerId> {
        self.peers.lock().order.clone()
    }

    async fn dial(&self, peer_id: &PeerId) -> Result<Self::Connection, DialError> {
        self.dials.fetch_add(1, Ordering::SeqCst);

        if !self.peers.lock().reachable.contains(peer_id) {
            return Err(DialError {
                peer_id: *peer_id,
                reason: "unreachable".to_string(),
            });
        }

        Ok(self.new_connection(*peer_id))
    }

    async fn open_channel(
        &self,
        connection: &Self::Connection,
        protocol: &str,
    ) -> Result<Self::Channel, ChannelOpenError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        if *connection.status.lock() != Status::Open {
            return Err(ChannelOpenError {
                peer_id: connection.peer_id,
                protocol: protocol.to_string(),
                reason: "connection closed".to_string(),
            });
        }

        let channel = MemoryChannel {
            id: ChannelId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            protocol: protocol.to_string(),
            state: Arc::new(Mutex::new(ChannelState {
                open: true,
                ..Default::default()
            })),
        };
        connection.channels.lock().push(channel.clone());

        Ok(channel)
    }

    async fn close_connection(&self, connection: &Self::Connection) {
        self.closed_connections.fetch_add(1, Ordering::SeqCst);

        connection.mark_closed();
    }

    async fn close_channel(&self, channel: &Self::Channel) {
        channel.state.lock().open = false;
    }
}
