//! periodically tell every connected peer which other peers are connected

use std::sync::Arc;

use futures_util::future;
use libp2p_core::PeerId;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::pipe::PipeManager;
use crate::transport::Transport;
use crate::Message;

/// the roster as one peer receives it: every connected peer except itself
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterPayload {
    pub peer_ids: Vec<String>,
}

impl RosterPayload {
    /// build the payload for `receiver` out of a snapshot of connected peers
    pub fn for_peer(snapshot: &[PeerId], receiver: &PeerId) -> Self {
        Self {
            peer_ids: snapshot
                .iter()
                .filter(|peer_id| *peer_id != receiver)
                .map(PeerId::to_string)
                .collect(),
        }
    }

    pub fn into_message(self) -> Message {
        serde_json::json!({ "peerIds": self.peer_ids })
    }

    pub fn from_message(message: Message) -> Result<Self, serde_json::Error> {
        serde_json::from_value(message)
    }
}

pub struct Broadcaster<T: Transport> {
    pipes: Arc<PipeManager<T>>,
    protocol: String,
}

impl<T: Transport> Broadcaster<T> {
    pub fn new(pipes: Arc<PipeManager<T>>, protocol: impl Into<String>) -> Self {
        Self {
            pipes,
            protocol: protocol.into(),
        }
    }

    /// run one broadcast round, returns how many peers were sent a roster
    ///
    /// the per-peer sends run concurrently and fail independently; no peers is not an error
    #[instrument(level = "debug", skip(self))]
    pub async fn tick(&self) -> usize {
        let snapshot = self.pipes.broker().transport().peers();
        if snapshot.is_empty() {
            debug!("no connected peer, skip broadcast");

            return 0;
        }

        let sends = snapshot.iter().map(|peer_id| {
            let payload = RosterPayload::for_peer(&snapshot, peer_id);

            async move {
                if let Err(err) = self
                    .pipes
                    .send(peer_id, &self.protocol, payload.into_message())
                    .await
                {
                    error!(%peer_id, %err, "send roster failed");
                }
            }
        });

        future::join_all(sends).await;

        debug!(peers = snapshot.len(), "broadcast roster done");

        snapshot.len()
    }
}
