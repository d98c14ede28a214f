use crate::p2p::config::{BootNode, MAX_RECEIVE_WORKERS, P2pConfig};
use containers::NodeId;
use rstest::rstest;

const ID: &str = "0101010101010101010101010101010101010101010101010101010101010101";

#[test]
fn test_parse_boot_node() {
    let node: BootNode = format!("p2p://{ID}@10.0.0.1:30303").parse().unwrap();
    assert_eq!(node.node_id, NodeId([1; 32]));
    assert_eq!(node.addr, "10.0.0.1:30303".parse().unwrap());
}

#[rstest]
#[case::missing_scheme("0101@10.0.0.1:30303")]
#[case::missing_at("p2p://10.0.0.1:30303")]
#[case::short_id("p2p://0101@10.0.0.1:30303")]
#[case::bad_addr("p2p://0101010101010101010101010101010101010101010101010101010101010101@nowhere")]
fn test_reject_malformed_boot_node(#[case] input: &str) {
    assert!(input.parse::<BootNode>().is_err());
}

#[test]
fn test_invalid_boot_nodes_are_skipped() {
    let config = P2pConfig {
        boot_nodes: vec![
            format!("p2p://{ID}@10.0.0.1:30303"),
            "p2p://garbage".to_string(),
            "/definitely/not/a/file.yaml".to_string(),
        ],
        ..P2pConfig::default()
    };
    assert_eq!(config.boot_nodes().len(), 1);
}

#[test]
fn test_boot_nodes_from_yaml_file() {
    let path = std::env::temp_dir().join(format!("boot-nodes-{}.yaml", std::process::id()));
    std::fs::write(&path, format!("- p2p://{ID}@10.0.0.1:30303\n- p2p://{ID}@10.0.0.2:30303\n")).unwrap();

    let config = P2pConfig { boot_nodes: vec![path.display().to_string()], ..P2pConfig::default() };
    let nodes = config.boot_nodes();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[1].addr.ip().to_string(), "10.0.0.2");
}

#[test]
fn test_defaults() {
    let config = P2pConfig::default();
    assert_eq!(config.max_active_nodes, 128);
    assert_eq!(config.error_tolerance, 50);
    assert_eq!(config.send_queue_capacity, 10_000);
    assert_eq!(config.receive_queue_capacity, 50_000);
    assert_eq!(config.offer_timeout_ms, 100);
    assert!(config.receive_workers() >= 1 && config.receive_workers() <= MAX_RECEIVE_WORKERS);
}

#[test]
fn test_node_id_from_config() {
    let config = P2pConfig { node_id: Some(format!("0x{ID}")), ..P2pConfig::default() };
    assert_eq!(config.node_id().unwrap(), NodeId([1; 32]));

    let config = P2pConfig { node_id: Some("xyz".to_string()), ..P2pConfig::default() };
    assert!(config.node_id().is_err());
}
