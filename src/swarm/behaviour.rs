use std::collections::{HashMap, VecDeque};
use std::io;
use std::io::ErrorKind;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_channel::mpsc::UnboundedReceiver;
use futures_channel::oneshot;
use futures_util::task::AtomicWaker;
use futures_util::StreamExt;
use libp2p_core::connection::ConnectionId;
use libp2p_core::{ConnectedPoint, Multiaddr, PeerId};
use libp2p_swarm::behaviour::{ConnectionClosed, ConnectionEstablished, DialFailure, FromSwarm};
use libp2p_swarm::dial_opts::{DialOpts, PeerCondition};
use libp2p_swarm::{
    CloseConnection, NetworkBehaviour, NetworkBehaviourAction, NotifyHandler, PollParameters,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument};

use super::control::Registry;
use super::event::{ConnectionHandlerInEvent, ConnectionHandlerOutEvent, ControlToBehaviourEvent};
use super::handler::ConnectionHandler;
use super::Event;
use crate::transport::DialError;

type DialSender = oneshot::Sender<Result<ConnectionId, DialError>>;

/// tracks the connections of every peer and carries out the [`Control`](super::Control)
/// requests: dial, open channel, close connection
#[derive(Debug)]
pub struct Behaviour {
    registry: Arc<Mutex<Registry>>,
    from_control: UnboundedReceiver<ControlToBehaviourEvent>,
    inbound_protocols: Vec<String>,
    addresses: HashMap<PeerId, Vec<Multiaddr>>,
    pending_dials: HashMap<PeerId, Vec<DialSender>>,
    pending_actions: VecDeque<
        NetworkBehaviourAction<
            <Self as NetworkBehaviour>::OutEvent,
            <Self as NetworkBehaviour>::ConnectionHandler,
        >,
    >,
    waker: AtomicWaker,
}

impl Behaviour {
    pub(crate) fn new(
        registry: Arc<Mutex<Registry>>,
        from_control: UnboundedReceiver<ControlToBehaviourEvent>,
        inbound_protocols: Vec<String>,
    ) -> Self {
        Self {
            registry,
            from_control,
            inbound_protocols,
            addresses: Default::default(),
            pending_dials: Default::default(),
            pending_actions: Default::default(),
            waker: Default::default(),
        }
    }

    /// remember an address the peer can be dialed on
    pub fn add_address(&mut self, peer_id: PeerId, addr: Multiaddr) {
        let addresses = self.addresses.entry(peer_id).or_default();
        if !addresses.contains(&addr) {
            addresses.push(addr);
        }
    }

    #[instrument(level = "debug", skip(self))]
    fn on_control_event(&mut self, event: ControlToBehaviourEvent) {
        match event {
            ControlToBehaviourEvent::Dial { peer_id, sender } => {
                let dialing = self.pending_dials.entry(peer_id).or_default();
                dialing.push(sender);
                if dialing.len() > 1 {
                    debug!(%peer_id, "peer is dialing, wait for it");

                    return;
                }

                let handler = self.new_handler();
                self.pending_actions.push_back(NetworkBehaviourAction::Dial {
                    opts: DialOpts::peer_id(peer_id)
                        .condition(PeerCondition::Always)
                        .build(),
                    handler,
                });
            }

            ControlToBehaviourEvent::OpenChannel {
                peer_id,
                connection_id,
                protocol,
                sender,
            } => {
                if !self.registry.lock().is_open(&peer_id, connection_id) {
                    let _ = sender.send(Err(io::Error::new(
                        ErrorKind::NotConnected,
                        format!("connection {connection_id:?} to {peer_id} is closed"),
                    )));

                    return;
                }

                self.pending_actions
                    .push_back(NetworkBehaviourAction::NotifyHandler {
                        peer_id,
                        handler: NotifyHandler::One(connection_id),
                        event: ConnectionHandlerInEvent::OpenChannel { protocol, sender },
                    });
            }

            ControlToBehaviourEvent::CloseConnection {
                peer_id,
                connection_id,
            } => {
                self.pending_actions
                    .push_back(NetworkBehaviourAction::CloseConnection {
                        peer_id,
                        connection: CloseConnection::One(connection_id),
                    });
            }
        }
    }
}

impl NetworkBehaviour for Behaviour {
    type ConnectionHandler = ConnectionHandler;
    type OutEvent = Event;

    fn new_handler(&mut self) -> Self::ConnectionHandler {
        ConnectionHandler::new(self.inbound_protocols.clone())
    }

    fn addresses_of_peer(&mut self, peer_id: &PeerId) -> Vec<Multiaddr> {
        self.addresses.get(peer_id).cloned().unwrap_or_default()
    }

    fn on_swarm_event(&mut self, event: FromSwarm<Self::ConnectionHandler>) {
        match event {
            FromSwarm::ConnectionEstablished(ConnectionEstablished {
                peer_id,
                connection_id,
                endpoint,
                other_established,
                ..
            }) => {
                let remote_addr = endpoint.get_remote_address().clone();
                if let ConnectedPoint::Dialer { address, .. } = endpoint {
                    self.add_address(peer_id, address.clone());
                }

                self.registry
                    .lock()
                    .add_connection(peer_id, connection_id, remote_addr.clone());

                if other_established == 0 {
                    info!(%peer_id, %remote_addr, "Connected to peer");

                    self.pending_actions
                        .push_back(NetworkBehaviourAction::GenerateEvent(
                            Event::PeerConnected {
                                peer_id,
                                remote_addr,
                            },
                        ));
                }

                if let Some(senders) = self.pending_dials.remove(&peer_id) {
                    for sender in senders {
                        let _ = sender.send(Ok(connection_id));
                    }

                    debug!(%peer_id, ?connection_id, "dial peer done");
                }

                self.waker.wake();
            }

            FromSwarm::ConnectionClosed(ConnectionClosed {
                peer_id,
                connection_id,
                remaining_established,
                ..
            }) => {
                self.registry
                    .lock()
                    .remove_connection(&peer_id, connection_id);

                debug!(%peer_id, ?connection_id, remaining_established, "connection closed");

                if remaining_established == 0 {
                    self.pending_actions
                        .push_back(NetworkBehaviourAction::GenerateEvent(
                            Event::PeerDisconnected { peer_id },
                        ));

                    self.waker.wake();
                }
            }

            FromSwarm::DialFailure(DialFailure {
                peer_id: Some(peer_id),
                error,
                ..
            }) => {
                error!(%peer_id, %error, "dial peer failed");

                if let Some(senders) = self.pending_dials.remove(&peer_id) {
                    for sender in senders {
                        let _ = sender.send(Err(DialError {
                            peer_id,
                            reason: error.to_string(),
                        }));
                    }
                }
            }

            _ => {}
        }
    }

    fn on_connection_handler_event(
        &mut self,
        peer_id: PeerId,
        _connection_id: ConnectionId,
        event: ConnectionHandlerOutEvent,
    ) {
        match event {
            ConnectionHandlerOutEvent::InboundChannel { protocol, stream } => {
                debug!(%peer_id, %protocol, "peer opened channel");

                self.pending_actions
                    .push_back(NetworkBehaviourAction::GenerateEvent(
                        Event::InboundChannel {
                            peer_id,
                            protocol,
                            stream,
                        },
                    ));
            }
        }

        self.waker.wake();
    }

    fn poll(
        &mut self,
        cx: &mut Context<'_>,
        _params: &mut impl PollParameters,
    ) -> Poll<NetworkBehaviourAction<Self::OutEvent, Self::ConnectionHandler>> {
        while let Poll::Ready(Some(event)) = self.from_control.poll_next_unpin(cx) {
            self.on_control_event(event);
        }

        if let Some(action) = self.pending_actions.pop_front() {
            return Poll::Ready(action);
        }

        self.waker.register(cx.waker());

        Poll::Pending
    }
}
