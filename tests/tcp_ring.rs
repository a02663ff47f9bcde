use chordring::network::transport::{AddressBook, TcpTransport};
use chordring::{ChordPeer, NodeConfig, NodeId, RingConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ring_over_loopback_sockets() {
    let config = RingConfig::new(4)
        .with_node(NodeConfig::new(1).with_lookups([10, 5]))
        .with_node(NodeConfig::new(4).with_lookups([0]))
        .with_node(NodeConfig::new(9))
        .with_node(NodeConfig::new(14).with_lookups([13]));
    let ring = Arc::new(config.ring().unwrap());

    let mut listeners = Vec::new();
    for node in &config.nodes {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listeners.push((NodeId(node.id), listener));
    }
    let book: Arc<AddressBook<SocketAddr>> = Arc::new(
        listeners
            .iter()
            .map(|(id, listener)| (*id, listener.local_addr().unwrap()))
            .collect(),
    );

    let mut handles = Vec::new();
    for ((id, listener), (_, keys)) in listeners.into_iter().zip(config.lookups().unwrap()) {
        let transport = TcpTransport::from_listener(id, Arc::clone(&book), listener);
        let peer = ChordPeer::new(Arc::clone(&ring), transport, keys).unwrap();
        handles.push(tokio::spawn(peer.run()));
    }

    let mut lines = Vec::new();
    for handle in handles {
        let outcome = tokio::time::timeout(Duration::from_secs(20), handle)
            .await
            .expect("node did not terminate")
            .unwrap()
            .unwrap();
        let mut reports: Vec<String> = outcome.reports.iter().map(ToString::to_string).collect();
        reports.sort();
        lines.extend(reports);
    }

    assert_eq!(
        lines,
        vec![
            "Lookup 10: 1 -> 9 -> 14",
            "Lookup 5: 1 -> 4 -> 9",
            "Lookup 0: 4 -> 14 -> 1",
            "Lookup 13: 14 -> 9 -> 14",
        ]
    );
}

#[tokio::test]
async fn node_outside_the_ring_is_rejected() {
    let config = RingConfig::new(4)
        .with_node(NodeConfig::new(1).with_address("127.0.0.1:0"))
        .with_node(NodeConfig::new(4).with_address("127.0.0.1:0"));
    let result = chordring::run_tcp_node(&config, NodeId(5)).await;
    assert!(result.is_err());
}
