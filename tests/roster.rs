use std::collections::HashSet;
use std::time::Duration;

use libp2p_core::PeerId;
use libp2p_roster_relay::roster::RosterPayload;
use libp2p_roster_relay::Relay;

use common::{eventually, test_config, MemoryTransport};

mod common;

async fn rosters(transport: &MemoryTransport, peer_id: &PeerId) -> Vec<HashSet<String>> {
    let mut rosters = vec![];
    for channel in transport.channels(peer_id, "/broadcast") {
        for message in channel.messages().await {
            let payload = RosterPayload::from_message(message).unwrap();
            rosters.push(payload.peer_ids.into_iter().collect());
        }
    }

    rosters
}

fn roster_of(peers: &[PeerId]) -> HashSet<String> {
    peers.iter().map(PeerId::to_string).collect()
}

#[tokio::test]
async fn every_peer_gets_the_others() {
    common::init_log();
    let transport = MemoryTransport::new();
    let (a, b, c) = (PeerId::random(), PeerId::random(), PeerId::random());
    for peer_id in [a, b, c] {
        transport.connect(peer_id);
    }
    let relay = Relay::new(transport.clone(), PeerId::random(), test_config());

    assert_eq!(relay.broadcaster().tick().await, 3);

    for (peer_id, expect) in [(a, [b, c]), (b, [a, c]), (c, [a, b])] {
        assert!(eventually(|| async { rosters(&transport, &peer_id).await.len() == 1 }).await);
        assert_eq!(rosters(&transport, &peer_id).await, [roster_of(&expect)]);
    }
}

#[tokio::test]
async fn disconnected_peer_leaves_the_roster() {
    let transport = MemoryTransport::new();
    let (a, b, c) = (PeerId::random(), PeerId::random(), PeerId::random());
    for peer_id in [a, b, c] {
        transport.connect(peer_id);
    }
    let relay = Relay::new(transport.clone(), PeerId::random(), test_config());
    relay.broadcaster().tick().await;

    transport.disconnect(&a);
    assert_eq!(relay.peer_disconnected(&a).await, 1);

    assert!(relay
        .pipes()
        .active_pipes()
        .iter()
        .all(|key| key.peer_id != a));
    assert_eq!(relay.broadcaster().tick().await, 2);

    for (peer_id, other) in [(b, c), (c, b)] {
        assert!(eventually(|| async { rosters(&transport, &peer_id).await.len() == 2 }).await);
        assert_eq!(
            rosters(&transport, &peer_id).await[1],
            roster_of(&[other])
        );
    }
    assert_eq!(transport.dial_count(), 0);
}

#[tokio::test]
async fn single_peer_gets_an_empty_roster() {
    let transport = MemoryTransport::new();
    let peer_id = PeerId::random();
    transport.connect(peer_id);
    let relay = Relay::new(transport.clone(), PeerId::random(), test_config());

    assert_eq!(relay.broadcaster().tick().await, 1);

    assert!(eventually(|| async { rosters(&transport, &peer_id).await.len() == 1 }).await);
    assert!(rosters(&transport, &peer_id).await[0].is_empty());
}

#[tokio::test]
async fn no_peers_sends_nothing() {
    let transport = MemoryTransport::new();
    let relay = Relay::new(transport.clone(), PeerId::random(), test_config());

    assert_eq!(relay.broadcaster().tick().await, 0);
    assert_eq!(transport.dial_count(), 0);
    assert_eq!(transport.open_count(), 0);
}

#[tokio::test]
async fn roster_is_stamped_with_the_relay() {
    let transport = MemoryTransport::new();
    let relay_id = PeerId::random();
    let peer_id = PeerId::random();
    transport.connect(peer_id);
    let relay = Relay::new(transport.clone(), relay_id, test_config());

    relay.broadcaster().tick().await;

    let channel = transport.channels(&peer_id, "/broadcast").remove(0);
    assert!(eventually(|| async { channel.messages().await.len() == 1 }).await);
    assert_eq!(
        channel.messages().await[0]["sender"],
        relay_id.to_string().as_str()
    );
}

#[tokio::test]
async fn broadcast_runs_on_interval() {
    let transport = MemoryTransport::new();
    let (a, b) = (PeerId::random(), PeerId::random());
    transport.connect(a);
    transport.connect(b);
    let relay = Relay::new(
        transport.clone(),
        PeerId::random(),
        test_config().with_broadcast_interval(Duration::from_millis(200)),
    );

    let broadcast = relay.spawn_broadcast();

    assert!(rosters(&transport, &a).await.is_empty());
    assert!(eventually(|| async { rosters(&transport, &b).await.len() >= 1 }).await);
    assert!(eventually(|| async { rosters(&transport, &a).await.len() >= 2 }).await);
    assert_eq!(transport.open_count(), 2);

    broadcast.abort();
}
