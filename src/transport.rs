//! the boundary to the connection stack: whatever establishes, encrypts and multiplexes
//! connections implements [`Transport`], the relay core only consumes it

use std::fmt::{self, Debug, Display, Formatter};

use async_trait::async_trait;
use futures_util::AsyncWrite;
use libp2p_core::PeerId;
use thiserror::Error;

/// status of a connection or a channel
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Status {
    Open,
    Closed,
}

/// identifies a channel, unique within its connection
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ChannelId(pub u64);

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Error)]
#[error("dial {peer_id} failed: {reason}")]
pub struct DialError {
    pub peer_id: PeerId,
    pub reason: String,
}

#[derive(Debug, Clone, Error)]
#[error("open channel {protocol} to {peer_id} failed: {reason}")]
pub struct ChannelOpenError {
    pub peer_id: PeerId,
    pub protocol: String,
    pub reason: String,
}

/// a bidirectional byte stream scoped to one protocol, nested in a [`Connection`]
pub trait Channel: Debug + Clone + Send + Sync + 'static {
    type Writer: AsyncWrite + Send + Unpin + 'static;

    fn id(&self) -> ChannelId;

    fn protocol(&self) -> &str;

    fn status(&self) -> Status;

    /// hand out the write side of the channel
    ///
    /// returns `None` when the write side is gone, for example it was already handed to
    /// another writer or the channel is closed
    fn writer(&self) -> Option<Self::Writer>;
}

/// an established session to one peer
pub trait Connection: Debug + Clone + Send + Sync + 'static {
    type Channel: Channel;

    fn remote_peer_id(&self) -> PeerId;

    fn status(&self) -> Status;

    /// channels opened on this connection, in opening order
    fn channels(&self) -> Vec<Self::Channel>;
}

/// the connection registry and dialer the relay core runs on
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Channel: Channel;
    type Connection: Connection<Channel = Self::Channel>;

    /// live connections of the peer, in a stable order
    fn connections(&self, peer_id: &PeerId) -> Vec<Self::Connection>;

    /// peers which have at least one connection
    fn peers(&self) -> Vec<PeerId>;

    async fn dial(&self, peer_id: &PeerId) -> Result<Self::Connection, DialError>;

    async fn open_channel(
        &self,
        connection: &Self::Connection,
        protocol: &str,
    ) -> Result<Self::Channel, ChannelOpenError>;

    async fn close_connection(&self, connection: &Self::Connection);

    async fn close_channel(&self, channel: &Self::Channel);
}
