/// Full-runtime integration: spawned event loops over the in-memory
/// transport, exercising the send pipeline, relay forwarding, read
/// receipts and direct-path upgrades end-to-end.
use std::time::Duration;

use tokio::sync::mpsc;
use tom_overlay::{
    EnvelopeBuilder, Identity, MessageStatus, MessageType, NodeEvent, PeerInfo, PeerRole,
    RoleAnnounce, Runtime, RuntimeChannels, RuntimeConfig, ConnectionType,
};
use tom_transport::MemoryNetwork;

fn identity(seed: u8) -> Identity {
    Identity::from_seed(&[seed; 32])
}

fn peer_info(id: &Identity, username: &str) -> PeerInfo {
    PeerInfo::new(id.node_id(), username, tom_overlay::now_ms())
}

fn spawn(net: &MemoryNetwork, id: &Identity, username: &str) -> RuntimeChannels {
    let node = net.attach(id.node_id());
    let config = RuntimeConfig {
        username: username.to_string(),
        ..RuntimeConfig::default()
    };
    Runtime::spawn(node, id.clone(), config)
}

/// Wait until an event matching `pred` arrives, failing after `secs`.
async fn wait_for_event<F>(rx: &mut mpsc::Receiver<NodeEvent>, secs: u64, mut pred: F) -> NodeEvent
where
    F: FnMut(&NodeEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

/// Collect status changes until the message reaches `target` status.
async fn wait_for_status(
    rx: &mut mpsc::Receiver<tom_overlay::StatusChange>,
    message_id: &str,
    target: MessageStatus,
    secs: u64,
) -> Vec<MessageStatus> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    let mut seen = Vec::new();
    loop {
        let change = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {target:?}, saw {seen:?}"))
            .expect("status channel closed");
        if change.message_id == message_id {
            seen.push(change.current);
            if change.current == target {
                return seen;
            }
        }
    }
}

/// Scenario: A sends to C through relay B; status walks
/// pending → sent → relayed → delivered → read.
#[tokio::test]
async fn three_node_relay_with_full_status_pipeline() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();

    let alice = identity(1);
    let relay = identity(2);
    let bob = identity(3);

    let net = MemoryNetwork::new();
    let mut a = spawn(&net, &alice, "alice");
    let r = spawn(&net, &relay, "relay");
    let mut b = spawn(&net, &bob, "bob");

    // Everyone learns the topology via the bootstrap collaborator.
    a.handle.add_peer(peer_info(&relay, "relay")).await;
    a.handle.add_peer(peer_info(&bob, "bob")).await;
    r.handle.add_peer(peer_info(&alice, "alice")).await;
    r.handle.add_peer(peer_info(&bob, "bob")).await;
    b.handle.add_peer(peer_info(&alice, "alice")).await;
    b.handle.add_peer(peer_info(&relay, "relay")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The relay announces its role; A and C apply it verbatim.
    let announce = RoleAnnounce::new(&relay, vec![PeerRole::Relay], 1.0, tom_overlay::now_ms());
    let harness = net.attach(identity(9).node_id());
    for target in [alice.node_id(), bob.node_id()] {
        let env = EnvelopeBuilder::new(
            relay.node_id(),
            target,
            MessageType::RoleAssign,
            announce.to_bytes(),
        )
        .sign(&relay);
        harness.send_raw(target, &env.to_bytes().unwrap()).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    // ── A sends "hi" to C ──────────────────────────────────────────────
    a.handle.send_message(bob.node_id(), b"hi".to_vec()).await;

    let sent = wait_for_event(&mut a.events, 5, |e| {
        matches!(e, NodeEvent::MessageSent { .. })
    })
    .await;
    let (msg_id, direct) = match sent {
        NodeEvent::MessageSent {
            envelope_id,
            direct,
            ..
        } => (envelope_id, direct),
        _ => unreachable!(),
    };
    assert!(!direct, "message should go via the relay");

    // C delivers the plaintext.
    let delivered = tokio::time::timeout(Duration::from_secs(5), b.messages.recv())
        .await
        .expect("delivery timed out")
        .expect("message channel closed");
    assert_eq!(delivered.payload, b"hi");
    assert_eq!(delivered.from, alice.node_id());
    assert!(delivered.was_sealed);

    // A's pipeline reaches Delivered through Relayed.
    let statuses = wait_for_status(&mut a.status_changes, &msg_id, MessageStatus::Delivered, 5).await;
    assert!(statuses.contains(&MessageStatus::Sent));
    assert!(statuses.contains(&MessageStatus::Relayed));

    // ── C marks it read → A reaches Read, exactly once ────────────────
    assert!(b.handle.mark_read(delivered.envelope_id.clone()).await);
    let statuses = wait_for_status(&mut a.status_changes, &msg_id, MessageStatus::Read, 5).await;
    assert_eq!(statuses.last(), Some(&MessageStatus::Read));

    // Second mark_read is a no-op.
    assert!(!b.handle.mark_read(delivered.envelope_id.clone()).await);

    a.handle.shutdown().await;
    r.handle.shutdown().await;
    b.handle.shutdown().await;
}

/// Scenario: after an exchange, A upgrades to a direct path; a later
/// message goes direct; when B goes away, A falls back to relay.
#[tokio::test]
async fn direct_path_upgrade_and_loss() {
    let alice = identity(1);
    let bob = identity(2);

    let net = MemoryNetwork::new();
    let mut a = spawn(&net, &alice, "alice");
    let mut b = spawn(&net, &bob, "bob");

    a.handle.add_peer(peer_info(&bob, "bob")).await;
    b.handle.add_peer(peer_info(&alice, "alice")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // First exchange (no relays known → sent directly over the
    // transport, but no direct path is active yet).
    a.handle.send_message(bob.node_id(), b"first".to_vec()).await;
    let delivered = tokio::time::timeout(Duration::from_secs(5), b.messages.recv())
        .await
        .expect("delivery timed out")
        .unwrap();
    assert_eq!(delivered.payload, b"first");
    assert_eq!(
        a.handle.connection_type(bob.node_id()).await,
        ConnectionType::Relay
    );

    // Upgrade.
    a.handle.attempt_direct_path(bob.node_id()).await;
    wait_for_event(&mut a.events, 5, |e| {
        matches!(e, NodeEvent::DirectPathEstablished { .. })
    })
    .await;
    assert_eq!(
        a.handle.connection_type(bob.node_id()).await,
        ConnectionType::Direct
    );

    // Subsequent message goes direct.
    a.handle.send_message(bob.node_id(), b"x".to_vec()).await;
    let sent = wait_for_event(&mut a.events, 5, |e| {
        matches!(e, NodeEvent::MessageSent { .. })
    })
    .await;
    assert!(matches!(sent, NodeEvent::MessageSent { direct: true, .. }));

    // B goes away → A observes the loss and falls back to relay.
    b.handle.shutdown().await;
    wait_for_event(&mut a.events, 5, |e| {
        matches!(e, NodeEvent::DirectPathLost { .. })
    })
    .await;
    assert_eq!(
        a.handle.connection_type(bob.node_id()).await,
        ConnectionType::Relay
    );

    a.handle.shutdown().await;
}

/// An unreachable recipient with no relays fails the message.
#[tokio::test]
async fn unreachable_peer_fails_message() {
    let alice = identity(1);
    let ghost = identity(7);

    let net = MemoryNetwork::new();
    let mut a = spawn(&net, &alice, "alice");

    a.handle.send_message(ghost.node_id(), b"hello?".to_vec()).await;

    let rejected = wait_for_event(&mut a.events, 5, |e| {
        matches!(e, NodeEvent::MessageRejected { .. })
    })
    .await;
    match rejected {
        NodeEvent::MessageRejected { reason, .. } => assert_eq!(reason, "PEER_UNREACHABLE"),
        _ => unreachable!(),
    }

    a.handle.shutdown().await;
}
