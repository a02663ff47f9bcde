//! End-to-end lookups over in-process rings.
//!
//! 1. **Known ring**: the {1, 4, 9, 14} ring with M = 4
//! 2. **Agreement**: distributed runs report what a hop-by-hop trace predicts
//! 3. **Properties**: ring cycle, finger nearness and lookup liveness over
//!    random rings of 1 to 16 members

use chordring::{
    run_local_ring, run_local_ring_reporting, IdSpace, LookupReport, Membership, NodeConfig,
    NodeId, Ring, RingConfig,
};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn known_ring() -> RingConfig {
    RingConfig::new(4)
        .with_node(NodeConfig::new(1).with_lookups([10, 3]))
        .with_node(NodeConfig::new(4).with_lookups([15]))
        .with_node(NodeConfig::new(9))
        .with_node(NodeConfig::new(14).with_lookups([14, 0, 9]))
}

fn sorted(mut reports: Vec<LookupReport>) -> Vec<LookupReport> {
    reports.sort_by(|a, b| (a.key, &a.path).cmp(&(b.key, &b.path)));
    reports
}

fn ids(raw: &[u64]) -> Vec<NodeId> {
    raw.iter().copied().map(NodeId).collect()
}

// ============================================================================
// Known ring
// ============================================================================

#[tokio::test]
async fn known_ring_reports_expected_paths() {
    let outcomes = run_local_ring(&known_ring()).await.unwrap();
    assert_eq!(outcomes.len(), 4);

    let node1: Vec<String> = sorted(outcomes[0].reports.clone())
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(node1, vec!["Lookup 3: 1 -> 4", "Lookup 10: 1 -> 9 -> 14"]);

    assert_eq!(outcomes[1].reports[0].to_string(), "Lookup 15: 4 -> 14 -> 1");
    assert!(outcomes[2].reports.is_empty());

    let node14 = sorted(outcomes[3].reports.clone());
    let owners: Vec<Option<NodeId>> = node14.iter().map(LookupReport::owner).collect();
    assert_eq!(owners, vec![Some(NodeId(1)), Some(NodeId(9)), Some(NodeId(14))]);
}

#[tokio::test]
async fn every_node_sees_all_its_replies_and_work_adds_up() {
    let config = known_ring();
    let outcomes = run_local_ring(&config).await.unwrap();
    for (outcome, node) in outcomes.iter().zip(&config.nodes) {
        assert_eq!(outcome.id, NodeId(node.id));
        assert_eq!(outcome.reports.len(), node.lookups.len());
    }
    let handled: usize = outcomes.iter().map(|o| o.requests_handled).sum();
    let forwarded: usize = outcomes.iter().map(|o| o.forwarded).sum();
    let lookups: usize = config.nodes.iter().map(|n| n.lookups.len()).sum();
    // each lookup is handled once at its initiator plus once per forward
    assert_eq!(handled, lookups + forwarded);
}

#[tokio::test]
async fn reports_stream_out_as_replies_arrive() {
    let (sink, mut live) = tokio::sync::mpsc::unbounded_channel();
    let outcomes = run_local_ring_reporting(&known_ring(), sink).await.unwrap();

    let mut streamed = Vec::new();
    while let Some(report) = live.recv().await {
        streamed.push(report);
    }
    let collected: Vec<LookupReport> = outcomes
        .into_iter()
        .flat_map(|outcome| outcome.reports)
        .collect();
    assert_eq!(streamed.len(), 6);
    assert_eq!(sorted(streamed), sorted(collected));
}

#[tokio::test]
async fn single_node_ring_prints_id_twice() {
    let config = RingConfig::new(4).with_node(NodeConfig::new(7).with_lookups([7, 2]));
    let outcomes = run_local_ring(&config).await.unwrap();
    let lines: Vec<String> = sorted(outcomes[0].reports.clone())
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(lines, vec!["Lookup 2: 7 -> 7", "Lookup 7: 7 -> 7"]);
}

#[tokio::test]
async fn idle_ring_still_terminates() {
    let config = RingConfig::new(4)
        .with_node(NodeConfig::new(2))
        .with_node(NodeConfig::new(11));
    let outcomes = run_local_ring(&config).await.unwrap();
    assert!(outcomes.iter().all(|o| o.reports.is_empty()));
}

#[tokio::test]
async fn invalid_rings_fail_before_any_traffic() {
    let duplicate = RingConfig::new(4)
        .with_node(NodeConfig::new(2))
        .with_node(NodeConfig::new(2));
    assert!(run_local_ring(&duplicate).await.is_err());
    assert!(run_local_ring(&RingConfig::new(4)).await.is_err());
}

// ============================================================================
// Agreement between the distributed loop and a local trace
// ============================================================================

#[tokio::test]
async fn distributed_runs_match_traces_on_random_rings() {
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let nodes = 1 + (seed as usize % 16);
        let config = RingConfig::random(&mut rng, nodes, 6, 3).unwrap();
        let ring = config.ring().unwrap();
        let outcomes = run_local_ring(&config).await.unwrap();

        for (outcome, (id, keys)) in outcomes.iter().zip(config.lookups().unwrap()) {
            let expected: Vec<LookupReport> =
                keys.iter().map(|key| ring.trace(id, *key).unwrap()).collect();
            assert_eq!(sorted(outcome.reports.clone()), sorted(expected), "seed {}", seed);
        }
    }
}

#[test]
fn traces_are_deterministic() {
    let ring = known_ring().ring().unwrap();
    let first = ring.trace(NodeId(1), NodeId(10)).unwrap();
    for _ in 0..10 {
        assert_eq!(ring.trace(NodeId(1), NodeId(10)).unwrap(), first);
    }
}

// ============================================================================
// Properties over random rings
// ============================================================================

fn ring_strategy() -> impl Strategy<Value = (u32, Vec<u64>)> {
    (4u32..=8).prop_flat_map(|bits| {
        let size = 1u64 << bits;
        (
            Just(bits),
            prop::collection::btree_set(0..size, 1..=16)
                .prop_map(|set| set.into_iter().collect::<Vec<_>>()),
        )
    })
}

fn build(bits: u32, raw: &[u64]) -> Ring {
    Ring::new(Membership::new(IdSpace::new(bits).unwrap(), ids(raw)).unwrap()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn successors_form_a_single_cycle((bits, raw) in ring_strategy()) {
        let ring = build(bits, &raw);
        let start = NodeId(raw[0]);
        let mut current = start;
        let mut steps = 0;
        loop {
            let node = ring.node(current).unwrap();
            prop_assert_eq!(ring.node(node.successor).unwrap().predecessor, current);
            current = node.successor;
            steps += 1;
            if current == start {
                break;
            }
            prop_assert!(steps < raw.len());
        }
        prop_assert_eq!(steps, raw.len());
    }

    #[test]
    fn fingers_point_at_nearest_member((bits, raw) in ring_strategy()) {
        let ring = build(bits, &raw);
        let size = 1u64 << bits;
        for node in ring.nodes() {
            prop_assert_eq!(node.finger_table.len(), bits as usize);
            for finger in node.finger_table.entries() {
                prop_assert!(ring.membership().contains(finger.node));
                let distance = |m: u64| (m + size - finger.start.0) % size;
                let nearest = raw.iter().map(|m| distance(*m)).min().unwrap();
                prop_assert_eq!(distance(finger.node.0), nearest);
            }
        }
    }

    #[test]
    fn lookups_terminate_at_the_owner((bits, raw) in ring_strategy(), salt in any::<u64>()) {
        let ring = build(bits, &raw);
        let size = 1u64 << bits;
        for initiator in ids(&raw) {
            for step in 0..8u64 {
                let key = NodeId(salt.wrapping_add(step.wrapping_mul(37)) % size);
                let report = ring.trace(initiator, key).unwrap();
                prop_assert_eq!(report.path[0], initiator);
                prop_assert_eq!(report.owner(), Some(ring.membership().find_successor(key)));
                let visited = &report.path[..report.path.len() - 1];
                prop_assert!(visited.len() <= raw.len());
                for (i, node) in visited.iter().enumerate() {
                    prop_assert!(!visited[i + 1..].contains(node));
                }
            }
        }
    }
}
