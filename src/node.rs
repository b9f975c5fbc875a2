//! the relay node: pipes, roster broadcast and inbound handlers over one transport

use std::sync::Arc;
use std::time::Duration;

use futures_util::AsyncRead;
use libp2p_core::PeerId;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, debug_span, info, Instrument};

use crate::broker::Broker;
use crate::config::Config;
use crate::inbound::{InboundRouter, LogHandler, MessageHandler};
use crate::pending::PendingQueue;
use crate::pipe::{PipeManager, SendError};
use crate::roster::Broadcaster;
use crate::swarm::{Control, Event};
use crate::transport::Transport;
use crate::Message;

/// the relay node
///
/// owns the pipe manager, the pending queue and the roster broadcaster over one [`Transport`]
pub struct Relay<T: Transport> {
    pipes: Arc<PipeManager<T>>,
    broadcaster: Arc<Broadcaster<T>>,
    router: InboundRouter,
    config: Config,
}

impl<T: Transport> Relay<T> {
    pub fn new(transport: Arc<T>, local_peer_id: PeerId, config: Config) -> Self {
        let pending = Arc::new(PendingQueue::new());
        let pipes = Arc::new(
            PipeManager::new(Broker::new(transport), pending, config.clone())
                .with_local_peer_id(local_peer_id),
        );
        let broadcaster = Arc::new(Broadcaster::new(pipes.clone(), &config.roster_protocol));

        let mut router = InboundRouter::new(config.max_frame_size);
        router.register(&config.roster_protocol, Arc::new(LogHandler));

        info!(%local_peer_id, "relay started");

        Self {
            pipes,
            broadcaster,
            router,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipes(&self) -> &Arc<PipeManager<T>> {
        &self.pipes
    }

    pub fn pending(&self) -> &Arc<PendingQueue> {
        self.pipes.pending()
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster<T>> {
        &self.broadcaster
    }

    pub fn register_handler(
        &mut self,
        protocol: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) {
        self.router.register(protocol, handler);
    }

    pub fn router(&self) -> &InboundRouter {
        &self.router
    }

    /// the only write entry point
    pub async fn send(
        &self,
        peer_id: &PeerId,
        protocol: &str,
        message: Message,
    ) -> Result<(), SendError> {
        self.pipes.send(peer_id, protocol, message).await
    }

    /// the peer has no connection left, tear down its pipes and their channels
    pub async fn peer_disconnected(&self, peer_id: &PeerId) -> usize {
        self.pipes.peer_disconnected(peer_id).await
    }

    /// decode a channel the remote opened, in a background task
    pub fn spawn_inbound<R>(&self, peer_id: PeerId, protocol: String, reader: R) -> JoinHandle<bool>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let router = self.router.clone();

        tokio::spawn(
            async move { router.handle(peer_id, &protocol, reader).await }
                .instrument(debug_span!("inbound", %peer_id)),
        )
    }

    /// run a roster broadcast every configured interval until the handle is aborted
    ///
    /// the first round runs one interval after start
    pub fn spawn_broadcast(&self) -> JoinHandle<()> {
        let broadcaster = self.broadcaster.clone();
        let period = self.config.broadcast_interval().max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let peers = broadcaster.tick().await;

                debug!(peers, "broadcast round done");
            }
        })
    }
}

impl Relay<Control> {
    /// react to an event of the swarm's [`Behaviour`](crate::swarm::Behaviour)
    pub fn handle_event(&self, event: Event) {
        match event {
            Event::PeerConnected {
                peer_id,
                remote_addr,
            } => {
                debug!(%peer_id, %remote_addr, "peer joins the roster");
            }

            Event::PeerDisconnected { peer_id } => {
                info!(%peer_id, "Disconnected from peer");

                let pipes = self.pipes.clone();
                tokio::spawn(
                    async move {
                        pipes.peer_disconnected(&peer_id).await;
                    }
                    .instrument(debug_span!("disconnect", %peer_id)),
                );
            }

            Event::InboundChannel {
                peer_id,
                protocol,
                stream,
            } => {
                self.spawn_inbound(peer_id, protocol, stream);
            }
        }
    }
}
