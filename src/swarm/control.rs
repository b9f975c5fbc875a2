use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_channel::mpsc::UnboundedSender;
use futures_channel::oneshot;
use futures_util::AsyncWriteExt;
use libp2p_core::connection::ConnectionId;
use libp2p_core::{Multiaddr, PeerId};
use libp2p_swarm::NegotiatedSubstream;
use parking_lot::Mutex;
use tracing::{debug, instrument};

use super::event::ControlToBehaviourEvent;
use crate::transport::Channel as _;
use crate::transport::{self, ChannelId, ChannelOpenError, DialError, Status, Transport};

/// an outbound substream
#[derive(Debug, Clone)]
pub struct Channel {
    id: ChannelId,
    protocol: String,
    open: Arc<AtomicBool>,
    stream: Arc<Mutex<Option<NegotiatedSubstream>>>,
}

impl Channel {
    fn new(id: ChannelId, protocol: String, stream: NegotiatedSubstream) -> Self {
        Self {
            id,
            protocol,
            open: Arc::new(AtomicBool::new(true)),
            stream: Arc::new(Mutex::new(Some(stream))),
        }
    }

    fn close(&self) -> Option<NegotiatedSubstream> {
        self.open.store(false, Ordering::Release);

        self.stream.lock().take()
    }
}

impl transport::Channel for Channel {
    type Writer = NegotiatedSubstream;

    fn id(&self) -> ChannelId {
        self.id
    }

    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn status(&self) -> Status {
        if self.open.load(Ordering::Acquire) {
            Status::Open
        } else {
            Status::Closed
        }
    }

    fn writer(&self) -> Option<Self::Writer> {
        if self.status() == Status::Closed {
            return None;
        }

        self.stream.lock().take()
    }
}

/// a connection as it was when listed
#[derive(Debug, Clone)]
pub struct Connection {
    peer_id: PeerId,
    id: ConnectionId,
    remote_addr: Multiaddr,
    status: Status,
    channels: Vec<Channel>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> &Multiaddr {
        &self.remote_addr
    }
}

impl transport::Connection for Connection {
    type Channel = Channel;

    fn remote_peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn status(&self) -> Status {
        self.status
    }

    fn channels(&self) -> Vec<Self::Channel> {
        self.channels.clone()
    }
}

#[derive(Debug)]
struct ConnectionEntry {
    id: ConnectionId,
    remote_addr: Multiaddr,
    channels: Vec<Channel>,
}

/// established connections per peer, shared by the behaviour and its controls
#[derive(Debug, Default)]
pub(crate) struct Registry {
    peers: HashMap<PeerId, Vec<ConnectionEntry>>,
}

impl Registry {
    pub(crate) fn add_connection(
        &mut self,
        peer_id: PeerId,
        connection_id: ConnectionId,
        remote_addr: Multiaddr,
    ) {
        self.peers.entry(peer_id).or_default().push(ConnectionEntry {
            id: connection_id,
            remote_addr,
            channels: vec![],
        });
    }

    pub(crate) fn remove_connection(&mut self, peer_id: &PeerId, connection_id: ConnectionId) {
        let connections = match self.peers.get_mut(peer_id) {
            None => return,
            Some(connections) => connections,
        };

        connections.retain(|connection| {
            if connection.id != connection_id {
                return true;
            }

            for channel in &connection.channels {
                channel.close();
            }

            false
        });

        if connections.is_empty() {
            self.peers.remove(peer_id);
        }
    }

    pub(crate) fn is_open(&self, peer_id: &PeerId, connection_id: ConnectionId) -> bool {
        self.peers
            .get(peer_id)
            .map(|connections| connections.iter().any(|entry| entry.id == connection_id))
            .unwrap_or(false)
    }

    fn add_channel(&mut self, peer_id: &PeerId, connection_id: ConnectionId, channel: Channel) {
        match self.peers.get_mut(peer_id).and_then(|connections| {
            connections
                .iter_mut()
                .find(|entry| entry.id == connection_id)
        }) {
            None => {
                debug!(%peer_id, ?connection_id, "connection closed while opening channel");

                channel.close();
            }

            Some(entry) => entry.channels.push(channel),
        }
    }

    fn remove_channel(&mut self, peer_id: &PeerId, channel_id: ChannelId) {
        if let Some(connections) = self.peers.get_mut(peer_id) {
            for entry in connections {
                entry.channels.retain(|channel| channel.id != channel_id);
            }
        }
    }

    fn connections(&self, peer_id: &PeerId) -> Vec<Connection> {
        self.peers
            .get(peer_id)
            .map(|connections| {
                connections
                    .iter()
                    .map(|entry| Connection {
                        peer_id: *peer_id,
                        id: entry.id,
                        remote_addr: entry.remote_addr.clone(),
                        status: Status::Open,
                        channels: entry.channels.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn connection(&self, peer_id: &PeerId, connection_id: ConnectionId) -> Option<Connection> {
        self.connections(peer_id)
            .into_iter()
            .find(|connection| connection.id == connection_id)
    }

    fn peers(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }
}

/// [`Transport`] over a swarm running [`Behaviour`](super::Behaviour)
#[derive(Debug, Clone)]
pub struct Control {
    registry: Arc<Mutex<Registry>>,
    to_behaviour: UnboundedSender<ControlToBehaviourEvent>,
    next_channel_id: Arc<AtomicU64>,
}

impl Control {
    pub(crate) fn new(
        registry: Arc<Mutex<Registry>>,
        to_behaviour: UnboundedSender<ControlToBehaviourEvent>,
    ) -> Self {
        Self {
            registry,
            to_behaviour,
            next_channel_id: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait]
impl Transport for Control {
    type Channel = Channel;
    type Connection = Connection;

    fn connections(&self, peer_id: &PeerId) -> Vec<Self::Connection> {
        self.registry.lock().connections(peer_id)
    }

    fn peers(&self) -> Vec<PeerId> {
        self.registry.lock().peers()
    }

    #[instrument(level = "debug", skip(self), err)]
    async fn dial(&self, peer_id: &PeerId) -> Result<Self::Connection, DialError> {
        let dial_error = |reason: &str| DialError {
            peer_id: *peer_id,
            reason: reason.to_string(),
        };

        let (sender, receiver) = oneshot::channel();
        self.to_behaviour
            .unbounded_send(ControlToBehaviourEvent::Dial {
                peer_id: *peer_id,
                sender,
            })
            .map_err(|_| dial_error("behaviour is dropped"))?;

        let connection_id = receiver
            .await
            .map_err(|_| dial_error("behaviour is dropped"))??;

        self.registry
            .lock()
            .connection(peer_id, connection_id)
            .ok_or_else(|| dial_error("connection closed right after dial"))
    }

    #[instrument(level = "debug", skip(self), err)]
    async fn open_channel(
        &self,
        connection: &Self::Connection,
        protocol: &str,
    ) -> Result<Self::Channel, ChannelOpenError> {
        let open_error = |reason: String| ChannelOpenError {
            peer_id: connection.peer_id,
            protocol: protocol.to_string(),
            reason,
        };

        let (sender, receiver) = oneshot::channel();
        self.to_behaviour
            .unbounded_send(ControlToBehaviourEvent::OpenChannel {
                peer_id: connection.peer_id,
                connection_id: connection.id,
                protocol: protocol.to_string(),
                sender,
            })
            .map_err(|_| open_error("behaviour is dropped".to_string()))?;

        let stream = receiver
            .await
            .map_err(|_| open_error("connection is closed".to_string()))?
            .map_err(|err| open_error(err.to_string()))?;

        let channel_id = ChannelId(self.next_channel_id.fetch_add(1, Ordering::Relaxed));
        let channel = Channel::new(channel_id, protocol.to_string(), stream);

        self.registry
            .lock()
            .add_channel(&connection.peer_id, connection.id, channel.clone());

        Ok(channel)
    }

    async fn close_connection(&self, connection: &Self::Connection) {
        if let Err(err) = self
            .to_behaviour
            .unbounded_send(ControlToBehaviourEvent::CloseConnection {
                peer_id: connection.peer_id,
                connection_id: connection.id,
            })
        {
            debug!(
                %err,
                peer_id = %connection.peer_id,
                "close connection failed, behaviour is dropped"
            );
        }
    }

    async fn close_channel(&self, channel: &Self::Channel) {
        let stream = channel.close();

        {
            let mut registry = self.registry.lock();
            let peer_ids = registry.peers();
            for peer_id in peer_ids {
                registry.remove_channel(&peer_id, channel.id);
            }
        }

        if let Some(mut stream) = stream {
            if let Err(err) = stream.close().await {
                debug!(%err, channel_id = %channel.id, "close channel failed");
            }
        }
    }
}
