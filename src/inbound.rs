//! per-protocol handlers for channels the remote side opened

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{pin_mut, AsyncRead, StreamExt};
use libp2p_core::PeerId;
use tracing::{debug, info, warn};

use crate::codec::{self, MalformedFrame};
use crate::Message;

/// receives the decoded messages of inbound channels
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(&self, peer_id: &PeerId, protocol: &str, message: Message);

    /// a frame which doesn't hold a message, decoding goes on after it
    fn on_malformed(&self, peer_id: &PeerId, protocol: &str, err: &MalformedFrame) {
        warn!(%peer_id, %protocol, %err, "skip malformed frame");
    }
}

/// print every message
#[derive(Debug, Default, Copy, Clone)]
pub struct LogHandler;

impl MessageHandler for LogHandler {
    fn on_message(&self, peer_id: &PeerId, protocol: &str, message: Message) {
        info!(%peer_id, %protocol, "> {message}");
    }
}

#[derive(Clone)]
pub struct InboundRouter {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    max_frame_size: usize,
}

impl InboundRouter {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            handlers: Default::default(),
            max_frame_size,
        }
    }

    /// register the handler of a protocol, replacing the previous one
    pub fn register(&mut self, protocol: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(protocol.into(), handler);
    }

    pub fn protocols(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// decode the channel until it ends, feeding its protocol's handler
    ///
    /// returns `false` without reading when no handler is registered for the protocol
    pub async fn handle<R>(&self, peer_id: PeerId, protocol: &str, reader: R) -> bool
    where
        R: AsyncRead + Unpin,
    {
        let handler = match self.handlers.get(protocol) {
            None => {
                warn!(%peer_id, %protocol, "no handler for inbound channel");

                return false;
            }

            Some(handler) => handler.clone(),
        };

        let frames = codec::decode::<Message, _>(reader, self.max_frame_size);
        pin_mut!(frames);

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(message) => handler.on_message(&peer_id, protocol, message),
                Err(err) => handler.on_malformed(&peer_id, protocol, &err),
            }
        }

        debug!(%peer_id, %protocol, "inbound channel ended");

        true
    }
}
