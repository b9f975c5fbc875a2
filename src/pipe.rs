//! buffered outbound pipes, one per peer, protocol and channel
//!
//! [`PipeManager::send`] never waits for the channel: it puts the serialized message into the
//! pipe's buffer and a drain task frames and writes it. A failed write closes the channel, evicts
//! the pipe and moves every undelivered message to the [`PendingQueue`].

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use asynchronous_codec::FramedWrite;
use bytes::Bytes;
use futures_channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use libp2p_core::PeerId;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time;
use tracing::{debug, debug_span, error, info, instrument, warn, Instrument};

use crate::broker::{Broker, ResolveError};
use crate::codec::{self, CodecError, FrameCodec};
use crate::config::{Config, ResolveFailurePolicy};
use crate::pending::{PendingMessage, PendingQueue};
use crate::transport::{Channel, ChannelId, Transport};
use crate::Message;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("resolve channel failed: {0}")]
    Resolve(
        #[from]
        #[source]
        ResolveError,
    ),

    #[error("encode message failed: {0}")]
    Encode(
        #[from]
        #[source]
        CodecError,
    ),
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PipeKey {
    pub peer_id: PeerId,
    pub protocol: String,
    pub channel_id: ChannelId,
}

impl Display for PipeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.peer_id, self.protocol, self.channel_id)
    }
}

#[derive(Debug)]
struct Pipe<C> {
    id: u64,
    sender: UnboundedSender<Bytes>,
    channel: C,
}

type Pipes<C> = Arc<Mutex<HashMap<PipeKey, Pipe<C>>>>;

/// the outbound pipe manager, owns the active pipe table
pub struct PipeManager<T: Transport> {
    broker: Broker<T>,
    pending: Arc<PendingQueue>,
    pipes: Pipes<T::Channel>,
    next_pipe_id: AtomicU64,
    local_peer_id: Option<PeerId>,
    config: Config,
}

impl<T: Transport> PipeManager<T> {
    pub fn new(broker: Broker<T>, pending: Arc<PendingQueue>, config: Config) -> Self {
        Self {
            broker,
            pending,
            pipes: Default::default(),
            next_pipe_id: AtomicU64::new(0),
            local_peer_id: None,
            config,
        }
    }

    /// stamp every object message with a `sender` field holding this peer id
    pub fn with_local_peer_id(mut self, local_peer_id: PeerId) -> Self {
        self.local_peer_id = Some(local_peer_id);
        self
    }

    pub fn broker(&self) -> &Broker<T> {
        &self.broker
    }

    pub fn pending(&self) -> &Arc<PendingQueue> {
        &self.pending
    }

    /// keys of the pipes currently alive
    pub fn active_pipes(&self) -> Vec<PipeKey> {
        self.pipes.lock().keys().cloned().collect()
    }

    /// queue a message for the peer
    ///
    /// resolve failures are logged and swallowed unless the config says to propagate them, write
    /// failures are never reported here
    #[instrument(level = "debug", skip(self, message))]
    pub async fn send(
        &self,
        peer_id: &PeerId,
        protocol: &str,
        mut message: Message,
    ) -> Result<(), SendError> {
        let channel = match self.broker.resolve(peer_id, protocol).await {
            Ok(channel) => channel,

            Err(err) => {
                return match self.config.on_resolve_failure {
                    ResolveFailurePolicy::Log => {
                        warn!(%peer_id, %protocol, %err, "resolve channel failed, drop message");

                        Ok(())
                    }

                    ResolveFailurePolicy::Propagate => Err(err.into()),
                };
            }
        };

        self.stamp_sender(&mut message);
        let payload = codec::serialize(&message)?;

        let key = PipeKey {
            peer_id: *peer_id,
            protocol: protocol.to_string(),
            channel_id: channel.id(),
        };
        let sender = self.pipe_sender(&key, channel);

        time::sleep(self.config.flush_delay()).await;

        if let Err(err) = sender.unbounded_send(payload) {
            warn!(%key, "pipe closed before write, keep message pending");

            self.pending.append(PendingMessage {
                peer_id: key.peer_id,
                protocol: key.protocol,
                payload: err.into_inner(),
            });
        } else {
            debug!(%key, "message buffered");
        }

        Ok(())
    }

    /// drop every pipe of the peer and close their channels
    ///
    /// the pipes leave the table before their channels are closed, so a concurrent send either
    /// still sees the old pipe and its message ends up delivered or pending, or resolves a fresh
    /// channel
    pub async fn peer_disconnected(&self, peer_id: &PeerId) -> usize {
        let removed = {
            let mut pipes = self.pipes.lock();
            let keys = pipes
                .keys()
                .filter(|key| key.peer_id == *peer_id)
                .cloned()
                .collect::<Vec<_>>();

            let removed = keys
                .iter()
                .filter_map(|key| pipes.remove(key))
                .collect::<Vec<_>>();

            removed
        };

        info!(%peer_id, removed = removed.len(), "remove pipes of disconnected peer");

        for pipe in &removed {
            pipe.sender.close_channel();

            self.broker.transport().close_channel(&pipe.channel).await;
        }

        removed.len()
    }

    fn stamp_sender(&self, message: &mut Message) {
        if let (Some(local_peer_id), Some(object)) = (self.local_peer_id, message.as_object_mut())
        {
            object.insert(
                "sender".to_string(),
                Message::String(local_peer_id.to_string()),
            );
        }
    }

    fn pipe_sender(&self, key: &PipeKey, channel: T::Channel) -> UnboundedSender<Bytes> {
        let mut pipes = self.pipes.lock();
        if let Some(pipe) = pipes.get(key) {
            if !pipe.sender.is_closed() {
                debug!(%key, pipe_id = pipe.id, "reuse pipe");

                return pipe.sender.clone();
            }
        }

        let pipe_id = self.next_pipe_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded();
        pipes.insert(
            key.clone(),
            Pipe {
                id: pipe_id,
                sender: sender.clone(),
                channel: channel.clone(),
            },
        );
        drop(pipes);

        debug!(%key, pipe_id, "create pipe");

        let drain = Drain {
            key: key.clone(),
            pipe_id,
            channel,
            receiver,
            transport: self.broker.transport().clone(),
            pipes: self.pipes.clone(),
            pending: self.pending.clone(),
            max_frame_size: self.config.max_frame_size,
        };
        tokio::spawn(drain.run().instrument(debug_span!("drain", %key, pipe_id)));

        sender
    }
}

/// the task moving one pipe's buffer into its channel
struct Drain<T: Transport> {
    key: PipeKey,
    pipe_id: u64,
    channel: T::Channel,
    receiver: UnboundedReceiver<Bytes>,
    transport: Arc<T>,
    pipes: Pipes<T::Channel>,
    pending: Arc<PendingQueue>,
    max_frame_size: usize,
}

impl<T: Transport> Drain<T> {
    async fn run(mut self) {
        let writer = match self.channel.writer() {
            None => {
                error!("channel writer is unavailable");

                self.fail(None).await;

                return;
            }

            Some(writer) => writer,
        };

        let mut framed = FramedWrite::new(writer, FrameCodec::new(self.max_frame_size));

        while let Some(payload) = self.receiver.next().await {
            if let Err(err) = framed.send(payload.clone()).await {
                error!(%err, "write to channel failed");

                self.fail(Some(payload)).await;

                return;
            }

            debug!("write message done");
        }

        debug!("pipe is removed, close channel");

        if let Err(err) = framed.close().await {
            debug!(%err, "close channel writer failed");
        }

        // the writer is gone, the channel can't carry another pipe
        self.transport.close_channel(&self.channel).await;
    }

    async fn fail(mut self, in_flight: Option<Bytes>) {
        self.transport.close_channel(&self.channel).await;

        {
            let mut pipes = self.pipes.lock();
            if matches!(pipes.get(&self.key), Some(pipe) if pipe.id == self.pipe_id) {
                pipes.remove(&self.key);
            }
        }

        self.receiver.close();

        let mut undelivered = in_flight.into_iter().collect::<Vec<_>>();
        while let Ok(Some(payload)) = self.receiver.try_next() {
            undelivered.push(payload);
        }

        warn!(count = undelivered.len(), "pipe failed, keep undelivered messages pending");

        let PipeKey {
            peer_id, protocol, ..
        } = self.key;
        self.pending
            .extend(undelivered.into_iter().map(|payload| PendingMessage {
                peer_id,
                protocol: protocol.clone(),
                payload,
            }));
    }
}
