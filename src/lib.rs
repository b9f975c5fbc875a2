#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! a libp2p relay node which keeps one buffered pipe per peer and protocol, reuses open
//! substreams instead of opening new ones, and periodically tells every connected peer who else
//! is connected

pub use self::config::{Config, ResolveFailurePolicy};
pub use self::node::Relay;

pub mod broker;
pub mod codec;
pub mod config;
pub mod inbound;
mod node;
pub mod pending;
pub mod pipe;
pub mod roster;
pub mod swarm;
pub mod transport;

/// structured message carried by every frame
///
/// numbers keep their textual form, so integers beyond the `f64` safe range survive a round trip
pub type Message = serde_json::Value;

pub(crate) const ROSTER_PROTOCOL: &str = "/broadcast";
pub(crate) const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;
