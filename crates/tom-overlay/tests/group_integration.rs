/// Group hub failover integration: deterministic elections across
/// members, backup precedence, degraded recovery.
use tom_overlay::{
    elect_hub, ElectionReason, GroupEvent, GroupManager, NodeId, PeerInfo, PeerRole, Topology,
};

const NOW: u64 = 1_708_000_000_000;

fn node_id(seed: u8) -> NodeId {
    NodeId::from_bytes([seed; 32])
}

fn relay_topology(seeds: &[u8]) -> Topology {
    let mut topo = Topology::with_threshold(3000);
    for &seed in seeds {
        topo.add_peer(PeerInfo::new(node_id(seed), "relay", NOW).with_roles(vec![PeerRole::Relay]));
    }
    topo
}

/// Spec scenario: hub `aaaa…` fails with candidates {bbbb…, cccc…,
/// dddd…}; with backup `cccc…` the backup wins, without it `bbbb…` does.
#[test]
fn election_prefers_backup_then_lowest_id() {
    let hub = node_id(0xaa);
    let topo = relay_topology(&[0xbb, 0xcc, 0xdd]);

    let mut mgr = GroupManager::new(node_id(0x01));
    let group_id = mgr.create_group("g", hub, &[], NOW).unwrap();

    // With backup cccc… → cccc… elected.
    mgr.set_backup_hub(&group_id, Some(node_id(0xcc)));
    let group = mgr.get(&group_id).unwrap();
    let result = elect_hub(group, &hub, &topo, NOW);
    assert_eq!(result.new_hub_id, Some(node_id(0xcc)));
    assert_eq!(result.reason, ElectionReason::Backup);

    // Without backup → lexicographically smallest bbbb….
    mgr.set_backup_hub(&group_id, None);
    let group = mgr.get(&group_id).unwrap();
    let result = elect_hub(group, &hub, &topo, NOW);
    assert_eq!(result.new_hub_id, Some(node_id(0xbb)));
    assert_eq!(result.reason, ElectionReason::Deterministic);
}

/// Two members running the failover independently converge on the same
/// hub and both groups reflect it.
#[test]
fn independent_members_converge() {
    let hub = node_id(0xaa);
    let topo = relay_topology(&[0xdd, 0xbb, 0xcc]);

    let mut member_a = GroupManager::new(node_id(0x01));
    let mut member_b = GroupManager::new(node_id(0x02));
    let ga = member_a.create_group("g", hub, &[node_id(0x02)], NOW).unwrap();
    let gb = member_b.create_group("g", hub, &[node_id(0x01)], NOW).unwrap();

    let ea = member_a.hub_unavailable(&ga, &hub, &topo, NOW);
    let eb = member_b.hub_unavailable(&gb, &hub, &topo, NOW);

    let hub_a = match &ea[..] {
        [GroupEvent::HubElected { new_hub_id, .. }] => *new_hub_id,
        other => panic!("unexpected events: {other:?}"),
    };
    let hub_b = match &eb[..] {
        [GroupEvent::HubElected { new_hub_id, .. }] => *new_hub_id,
        other => panic!("unexpected events: {other:?}"),
    };
    assert_eq!(hub_a, hub_b);
    assert_eq!(member_a.get(&ga).unwrap().hub_id, hub_b);
}

/// Hub and backup both gone: the group degrades, then recovers when a
/// relay appears.
#[test]
fn simultaneous_hub_and_backup_departure_degrades() {
    let hub = node_id(0xaa);
    let backup = node_id(0xbb);

    let mut mgr = GroupManager::new(node_id(0x01));
    let group_id = mgr.create_group("g", hub, &[], NOW).unwrap();
    mgr.set_backup_hub(&group_id, Some(backup));

    // Only the hub and the backup were relays, and both are offline.
    let mut topo = Topology::with_threshold(3000);
    topo.add_peer(PeerInfo::new(hub, "hub", 0).with_roles(vec![PeerRole::Relay]));
    topo.add_peer(PeerInfo::new(backup, "backup", 0).with_roles(vec![PeerRole::Relay]));

    let events = mgr.hub_unavailable(&group_id, &hub, &topo, NOW);
    assert_eq!(
        events,
        vec![GroupEvent::ElectionFailed {
            group_id: group_id.clone()
        }]
    );
    assert!(mgr.get(&group_id).unwrap().degraded);

    // A fresh relay joins → the degraded group elects it.
    topo.add_peer(PeerInfo::new(node_id(0xcc), "fresh", NOW).with_roles(vec![PeerRole::Relay]));
    let events = mgr.retry_degraded(&topo, NOW);
    assert_eq!(
        events,
        vec![GroupEvent::HubElected {
            group_id: group_id.clone(),
            new_hub_id: node_id(0xcc)
        }]
    );
    assert_eq!(mgr.get(&group_id).unwrap().hub_id, node_id(0xcc));
}

/// Several groups sharing a failed hub all migrate in one pass.
#[test]
fn all_groups_on_a_failed_hub_migrate() {
    let hub = node_id(0xaa);
    let topo = relay_topology(&[0xbb]);

    let mut mgr = GroupManager::new(node_id(0x01));
    let g1 = mgr.create_group("one", hub, &[], NOW).unwrap();
    let g2 = mgr.create_group("two", hub, &[], NOW).unwrap();

    for group_id in [&g1, &g2] {
        let events = mgr.hub_unavailable(group_id, &hub, &topo, NOW);
        assert_eq!(events.len(), 1);
        assert_eq!(mgr.get(group_id).unwrap().hub_id, node_id(0xbb));
    }
}
