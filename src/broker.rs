//! find or create the channel used to send a protocol's messages to a peer

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use libp2p_core::PeerId;
use parking_lot::Mutex;
use tap::TapFallible;
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::transport::{Channel, ChannelOpenError, Connection, DialError, Status, Transport};

#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("unreachable peer: {0}")]
    UnreachablePeer(
        #[from]
        #[source]
        DialError,
    ),

    #[error("channel open failed: {0}")]
    ChannelOpen(
        #[from]
        #[source]
        ChannelOpenError,
    ),
}

type SharedResolve<C> = Shared<BoxFuture<'static, Result<C, ResolveError>>>;

/// the channel broker
///
/// resolution picks the first open connection of the peer in the transport's listing order and
/// reuses its open channel for the protocol, opening one only when there is none. Concurrent
/// resolutions of the same peer and protocol share one attempt.
pub struct Broker<T: Transport> {
    transport: Arc<T>,
    in_flight: Mutex<HashMap<(PeerId, String), (u64, SharedResolve<T::Channel>)>>,
    next_resolve_id: AtomicU64,
}

impl<T: Transport> Broker<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            in_flight: Default::default(),
            next_resolve_id: AtomicU64::new(0),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// return a channel for the protocol whose connection was open when it was selected
    ///
    /// the channel may close at any time afterwards
    #[instrument(level = "debug", skip(self))]
    pub async fn resolve(
        &self,
        peer_id: &PeerId,
        protocol: &str,
    ) -> Result<T::Channel, ResolveError> {
        let key = (*peer_id, protocol.to_string());

        let (resolve_id, resolve) = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(&key) {
                Some((resolve_id, resolve)) => {
                    debug!("join in-flight resolve");

                    (*resolve_id, resolve.clone())
                }

                None => {
                    let resolve_id = self.next_resolve_id.fetch_add(1, Ordering::Relaxed);
                    let transport = self.transport.clone();
                    let (peer_id, protocol) = key.clone();
                    let resolve = async move {
                        resolve_channel(transport.as_ref(), &peer_id, &protocol).await
                    }
                    .boxed()
                    .shared();

                    in_flight.insert(key.clone(), (resolve_id, resolve.clone()));

                    (resolve_id, resolve)
                }
            }
        };

        let result = resolve.await;

        let mut in_flight = self.in_flight.lock();
        if matches!(in_flight.get(&key), Some((current, _)) if *current == resolve_id) {
            in_flight.remove(&key);
        }

        result
    }
}

async fn resolve_channel<T: Transport>(
    transport: &T,
    peer_id: &PeerId,
    protocol: &str,
) -> Result<T::Channel, ResolveError> {
    let mut selected = None;

    for connection in transport.connections(peer_id) {
        if connection.status() != Status::Open {
            debug!(%peer_id, "connection is not open, close it");

            transport.close_connection(&connection).await;

            continue;
        }

        let channel = connection
            .channels()
            .into_iter()
            .find(|channel| channel.protocol() == protocol && channel.status() == Status::Open);

        selected = Some((connection, channel));

        break;
    }

    let (connection, channel) = match selected {
        Some(selected) => selected,

        None => {
            debug!(%peer_id, "no open connection, dial peer");

            let connection = transport
                .dial(peer_id)
                .await
                .tap_err(|err| error!(%err, "dial peer failed"))?;

            debug!(%peer_id, "dial peer done");

            (connection, None)
        }
    };

    let channel = match channel {
        Some(channel) => {
            debug!(%peer_id, channel_id = %channel.id(), "reuse open channel");

            channel
        }

        None => {
            let channel = transport
                .open_channel(&connection, protocol)
                .await
                .tap_err(|err| error!(%err, "open channel failed"))?;

            debug!(%peer_id, channel_id = %channel.id(), "open channel done");

            channel
        }
    };

    Ok(channel)
}
