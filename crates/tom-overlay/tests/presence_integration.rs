/// Presence integration: heartbeat tiers feeding the debounced offline
/// detector, driven with explicit clocks.
///
/// Spec seed scenario (1 s debounce): missing 800 ms then a heartbeat →
/// still online; missing 1200 ms → one offline event; back within
/// 500 ms → one online event; never a flap in between.
use tom_overlay::{
    HeartbeatMonitor, LivenessEvent, LivenessState, NodeId, OfflineDetector, PingStrategy,
};

fn node_id(seed: u8) -> NodeId {
    NodeId::from_bytes([seed; 32])
}

/// Drive monitor + detector one step: check tiers, feed the detector,
/// commit matured transitions.
fn step(
    monitor: &mut HeartbeatMonitor,
    detector: &mut OfflineDetector,
    now: u64,
) -> Vec<tom_overlay::PresenceTransition> {
    for event in monitor.check(now) {
        match event {
            LivenessEvent::PeerDeparted { node_id } => detector.observe(node_id, false, now),
            LivenessEvent::PeerBack { node_id } => detector.observe(node_id, true, now),
            LivenessEvent::PeerStale { .. } => {}
        }
    }
    detector.poll(now)
}

#[test]
fn short_gap_stays_online() {
    let peer = node_id(1);
    // Stale at 400 ms, departed at 800 ms of silence.
    let mut monitor = HeartbeatMonitor::new(400, PingStrategy::PerPeer);
    let mut detector = OfflineDetector::new(1000);

    monitor.record_heartbeat(peer, 0);
    detector.observe(peer, true, 0);

    // 800 ms of silence: departed tier reached, countdown starts...
    assert!(step(&mut monitor, &mut detector, 800).is_empty());

    // ...but a heartbeat lands before the window elapses.
    monitor.record_heartbeat(peer, 800);
    detector.observe(peer, true, 800);
    assert!(step(&mut monitor, &mut detector, 900).is_empty());
    assert!(step(&mut monitor, &mut detector, 2500).is_empty());
    assert_eq!(detector.reported(&peer), Some(true));
}

#[test]
fn long_gap_fires_exactly_one_offline_then_one_online() {
    let peer = node_id(1);
    let mut monitor = HeartbeatMonitor::new(400, PingStrategy::PerPeer);
    let mut detector = OfflineDetector::new(1000);

    monitor.record_heartbeat(peer, 0);
    detector.observe(peer, true, 0);

    // Silence. The departed edge fires at the first check past 800 ms.
    assert!(step(&mut monitor, &mut detector, 1200).is_empty());

    // Debounce window (1 s from the observation at t=1200) elapses.
    let transitions = step(&mut monitor, &mut detector, 2300);
    assert_eq!(transitions.len(), 1);
    assert!(!transitions[0].online);

    // Extra checks produce nothing new.
    assert!(step(&mut monitor, &mut detector, 2400).is_empty());

    // The peer comes back; one online event after the window.
    monitor.record_heartbeat(peer, 2500);
    assert!(step(&mut monitor, &mut detector, 2500).is_empty());
    let transitions = step(&mut monitor, &mut detector, 3600);
    assert_eq!(transitions.len(), 1);
    assert!(transitions[0].online);

    // Steady state: silence again only fires after both thresholds.
    assert!(step(&mut monitor, &mut detector, 3700).is_empty());
}

#[test]
fn liveness_tiers_reported_in_order() {
    let peer = node_id(1);
    let mut monitor = HeartbeatMonitor::new(400, PingStrategy::PerPeer);
    monitor.record_heartbeat(peer, 0);

    assert_eq!(monitor.liveness_at(&peer, 399), LivenessState::Alive);
    assert_eq!(monitor.liveness_at(&peer, 400), LivenessState::Stale);
    assert_eq!(monitor.liveness_at(&peer, 799), LivenessState::Stale);
    assert_eq!(monitor.liveness_at(&peer, 800), LivenessState::Departed);

    let events = monitor.check(450);
    assert_eq!(events, vec![LivenessEvent::PeerStale { node_id: peer }]);
    let events = monitor.check(900);
    assert_eq!(events, vec![LivenessEvent::PeerDeparted { node_id: peer }]);
}

#[test]
fn broadcast_strategy_emits_single_action() {
    let mut monitor = HeartbeatMonitor::new(400, PingStrategy::Broadcast);
    monitor.track_peer(node_id(1), 0);
    monitor.track_peer(node_id(2), 0);

    let actions = monitor.tick_send();
    assert_eq!(actions, vec![tom_overlay::presence::HeartbeatAction::Broadcast]);
}
