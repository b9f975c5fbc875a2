//! run the relay on a libp2p swarm
//!
//! [`Behaviour`] goes into the swarm, the paired [`Control`] is the
//! [`Transport`](crate::transport::Transport) handed to the [`Relay`](crate::Relay)

use std::sync::Arc;

use futures_channel::mpsc;

pub use self::behaviour::Behaviour;
pub use self::control::{Channel, Connection, Control};
pub use self::event::Event;
pub use self::upgrade::{StreamProtocol, StreamUpgrade};

mod behaviour;
mod control;
mod event;
mod handler;
mod upgrade;

/// create a behaviour which accepts channels on `inbound_protocols`, and its control
pub fn new<I, P>(inbound_protocols: I) -> (Behaviour, Control)
where
    I: IntoIterator<Item = P>,
    P: Into<String>,
{
    let registry: Arc<parking_lot::Mutex<control::Registry>> = Arc::new(Default::default());
    let (sender, receiver) = mpsc::unbounded();

    let behaviour = Behaviour::new(
        registry.clone(),
        receiver,
        inbound_protocols.into_iter().map(Into::into).collect(),
    );

    (behaviour, Control::new(registry, sender))
}
