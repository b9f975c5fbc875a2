//! messages whose pipe failed before delivering them
//!
//! nothing redrives them automatically, they are kept for inspection and manual redrive

use std::collections::VecDeque;

use bytes::Bytes;
use libp2p_core::PeerId;
use parking_lot::Mutex;

use crate::codec::{self, MalformedFrame};
use crate::Message;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PendingMessage {
    pub peer_id: PeerId,
    pub protocol: String,
    /// the serialized message, without the length prefix
    pub payload: Bytes,
}

impl PendingMessage {
    pub fn message(&self) -> Result<Message, MalformedFrame> {
        codec::deserialize(self.payload.clone())
    }
}

/// unbounded FIFO of [`PendingMessage`]
#[derive(Debug, Default)]
pub struct PendingQueue {
    messages: Mutex<VecDeque<PendingMessage>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, message: PendingMessage) {
        self.messages.lock().push_back(message);
    }

    pub(crate) fn extend(&self, messages: impl IntoIterator<Item = PendingMessage>) {
        self.messages.lock().extend(messages);
    }

    /// take every queued message, oldest first
    pub fn drain(&self) -> Vec<PendingMessage> {
        self.messages.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn pending(peer_id: PeerId, seq: u64) -> PendingMessage {
        PendingMessage {
            peer_id,
            protocol: "/broadcast".to_string(),
            payload: codec::serialize(&json!({ "seq": seq })).unwrap(),
        }
    }

    #[test]
    fn drain_keeps_order_and_empties() {
        let queue = PendingQueue::new();
        let peer_id = PeerId::random();

        queue.append(pending(peer_id, 1));
        queue.extend([pending(peer_id, 2), pending(peer_id, 3)]);
        assert_eq!(queue.len(), 3);

        let drained = queue.drain();
        let seqs = drained
            .iter()
            .map(|message| message.message().unwrap()["seq"].as_u64().unwrap())
            .collect::<Vec<_>>();

        assert_eq!(seqs, [1, 2, 3]);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }
}
