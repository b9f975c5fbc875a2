use std::io;

use futures_channel::oneshot;
use libp2p_core::connection::ConnectionId;
use libp2p_core::{Multiaddr, PeerId};
use libp2p_swarm::NegotiatedSubstream;
use thiserror::Error;

use crate::transport::DialError;

#[derive(Debug)]
pub enum Event {
    /// the first connection to the peer is established
    PeerConnected {
        peer_id: PeerId,
        remote_addr: Multiaddr,
    },

    /// the last connection to the peer is closed
    PeerDisconnected { peer_id: PeerId },

    /// the peer opened a channel on one of the inbound protocols
    InboundChannel {
        peer_id: PeerId,
        protocol: String,
        stream: NegotiatedSubstream,
    },
}

#[derive(Debug)]
pub(crate) enum ControlToBehaviourEvent {
    Dial {
        peer_id: PeerId,
        sender: oneshot::Sender<Result<ConnectionId, DialError>>,
    },

    OpenChannel {
        peer_id: PeerId,
        connection_id: ConnectionId,
        protocol: String,
        sender: oneshot::Sender<io::Result<NegotiatedSubstream>>,
    },

    CloseConnection {
        peer_id: PeerId,
        connection_id: ConnectionId,
    },
}

#[derive(Debug)]
pub enum ConnectionHandlerInEvent {
    OpenChannel {
        protocol: String,
        sender: oneshot::Sender<io::Result<NegotiatedSubstream>>,
    },
}

#[derive(Debug)]
pub enum ConnectionHandlerOutEvent {
    InboundChannel {
        protocol: String,
        stream: NegotiatedSubstream,
    },
}

#[derive(Debug, Error)]
pub enum ConnectionHandlerError {}
