use std::collections::VecDeque;
use std::io;
use std::io::ErrorKind;
use std::task::{Context, Poll};

use futures_channel::oneshot;
use futures_util::task::AtomicWaker;
use libp2p_swarm::handler::{
    ConnectionEvent, DialUpgradeError, FullyNegotiatedInbound, FullyNegotiatedOutbound,
    ListenUpgradeError,
};
use libp2p_swarm::{
    ConnectionHandlerEvent, ConnectionHandlerUpgrErr, KeepAlive, NegotiatedSubstream,
    SubstreamProtocol,
};
use tracing::{debug, instrument, warn};

use super::event::{ConnectionHandlerError, ConnectionHandlerInEvent, ConnectionHandlerOutEvent};
use super::upgrade::StreamUpgrade;

type SelfConnectionHandlerEvent = ConnectionHandlerEvent<
    <ConnectionHandler as libp2p_swarm::ConnectionHandler>::OutboundProtocol,
    <ConnectionHandler as libp2p_swarm::ConnectionHandler>::OutboundOpenInfo,
    <ConnectionHandler as libp2p_swarm::ConnectionHandler>::OutEvent,
    <ConnectionHandler as libp2p_swarm::ConnectionHandler>::Error,
>;

/// opens outbound channels on request and reports inbound ones
#[derive(Debug)]
pub struct ConnectionHandler {
    inbound_protocols: Vec<String>,
    pending_events: VecDeque<SelfConnectionHandlerEvent>,
    waker: AtomicWaker,
}

impl ConnectionHandler {
    pub fn new(inbound_protocols: Vec<String>) -> Self {
        Self {
            inbound_protocols,
            pending_events: Default::default(),
            waker: Default::default(),
        }
    }
}

impl libp2p_swarm::ConnectionHandler for ConnectionHandler {
    type InEvent = ConnectionHandlerInEvent;
    type OutEvent = ConnectionHandlerOutEvent;
    type Error = ConnectionHandlerError;
    type InboundProtocol = StreamUpgrade;
    type OutboundProtocol = StreamUpgrade;
    type InboundOpenInfo = ();
    type OutboundOpenInfo = oneshot::Sender<io::Result<NegotiatedSubstream>>;

    fn listen_protocol(&self) -> SubstreamProtocol<Self::InboundProtocol, Self::InboundOpenInfo> {
        SubstreamProtocol::new(StreamUpgrade::new(self.inbound_protocols.clone()), ())
    }

    fn connection_keep_alive(&self) -> KeepAlive {
        KeepAlive::Yes
    }

    #[instrument(level = "debug", skip(self, cx))]
    fn poll(&mut self, cx: &mut Context<'_>) -> Poll<SelfConnectionHandlerEvent> {
        if let Some(event) = self.pending_events.pop_front() {
            Poll::Ready(event)
        } else {
            self.waker.register(cx.waker());

            Poll::Pending
        }
    }

    #[instrument(level = "debug", skip(self))]
    fn on_behaviour_event(&mut self, event: Self::InEvent) {
        match event {
            ConnectionHandlerInEvent::OpenChannel { protocol, sender } => {
                self.pending_events
                    .push_back(ConnectionHandlerEvent::OutboundSubstreamRequest {
                        protocol: SubstreamProtocol::new(StreamUpgrade::new([protocol]), sender),
                    });
            }
        }

        self.waker.wake();
    }

    fn on_connection_event(
        &mut self,
        event: ConnectionEvent<
            Self::InboundProtocol,
            Self::OutboundProtocol,
            Self::InboundOpenInfo,
            Self::OutboundOpenInfo,
        >,
    ) {
        match event {
            ConnectionEvent::FullyNegotiatedInbound(FullyNegotiatedInbound {
                protocol: (stream, protocol),
                ..
            }) => {
                debug!(%protocol, "inbound channel negotiated");

                self.pending_events
                    .push_back(ConnectionHandlerEvent::Custom(
                        ConnectionHandlerOutEvent::InboundChannel { protocol, stream },
                    ));

                self.waker.wake();
            }

            ConnectionEvent::FullyNegotiatedOutbound(FullyNegotiatedOutbound {
                protocol: (stream, protocol),
                info: sender,
            }) => {
                if sender.send(Ok(stream)).is_err() {
                    debug!(%protocol, "channel open request is dropped");
                } else {
                    debug!(%protocol, "outbound channel negotiated");
                }
            }

            ConnectionEvent::AddressChange(_) => {}

            ConnectionEvent::DialUpgradeError(DialUpgradeError {
                error,
                info: sender,
            }) => {
                let err = match error {
                    ConnectionHandlerUpgrErr::Timeout => io::Error::from(ErrorKind::TimedOut),
                    _ => io::Error::new(ErrorKind::Other, error),
                };

                let _ = sender.send(Err(err));
            }

            ConnectionEvent::ListenUpgradeError(ListenUpgradeError { error, .. }) => {
                warn!(%error, "inbound channel negotiation failed");
            }
        }
    }
}
