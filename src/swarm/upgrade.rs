use std::convert::Infallible;
use std::future::{ready, Ready};

use libp2p_core::upgrade::ProtocolName;
use libp2p_core::UpgradeInfo;
use libp2p_swarm::NegotiatedSubstream;

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct StreamProtocol(pub String);

impl ProtocolName for StreamProtocol {
    fn protocol_name(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// negotiate one of the protocols and hand the bare substream over
#[derive(Debug, Clone)]
pub struct StreamUpgrade {
    protocols: Vec<StreamProtocol>,
}

impl StreamUpgrade {
    pub fn new(protocols: impl IntoIterator<Item = String>) -> Self {
        Self {
            protocols: protocols.into_iter().map(StreamProtocol).collect(),
        }
    }
}

impl UpgradeInfo for StreamUpgrade {
    type Info = StreamProtocol;
    type InfoIter = Vec<Self::Info>;

    fn protocol_info(&self) -> Self::InfoIter {
        self.protocols.clone()
    }
}

impl libp2p_core::InboundUpgrade<NegotiatedSubstream> for StreamUpgrade {
    type Output = (NegotiatedSubstream, String);
    type Error = Infallible;
    type Future = Ready<Result<Self::Output, Self::Error>>;

    fn upgrade_inbound(self, socket: NegotiatedSubstream, info: Self::Info) -> Self::Future {
        ready(Ok((socket, info.0)))
    }
}

impl libp2p_core::OutboundUpgrade<NegotiatedSubstream> for StreamUpgrade {
    type Output = (NegotiatedSubstream, String);
    type Error = Infallible;
    type Future = Ready<Result<Self::Output, Self::Error>>;

    fn upgrade_outbound(self, socket: NegotiatedSubstream, info: Self::Info) -> Self::Future {
        ready(Ok((socket, info.0)))
    }
}
