//! E2E tests: require a node binary (anvil by default) on `PATH`.
//!
//! Run: `cargo test -p chainweb-network -- --ignored`
//! Override the node with `CHAINWEB_NODE=/path/to/anvil`.

use chainweb_core::{ChainId, Origin};
use chainweb_network::{ChainwebNetwork, NetworkConfig};

fn live_config(chains: usize, base_port: u16) -> NetworkConfig {
    let mut config = NetworkConfig::for_chains(chains)
        .unwrap()
        .with_base_port(base_port)
        .unwrap();
    if let Ok(program) = std::env::var("CHAINWEB_NODE") {
        config.node.program = program;
    }
    config.settle_delay_ms = 1500;
    config
}

#[tokio::test]
#[ignore]
async fn live_network_mines_with_catch_up() {
    let network = ChainwebNetwork::with_processes(live_config(2, 18545)).unwrap();
    network.start().await.expect("Failed to start nodes");

    for cid in network.chain_ids() {
        let chain = network.chain(cid).unwrap();
        assert_eq!(chain.chainweb_chain_id().await.unwrap(), cid);
    }

    let chain = network.chain(ChainId(0)).unwrap();
    chain.mine().await.unwrap();
    chain.mine().await.unwrap();

    let h0 = chain.block_number().await.unwrap();
    let h1 = network.chain(ChainId(1)).unwrap().block_number().await.unwrap();
    eprintln!("[e2e] heights after two mines: chain 0 = {h0}, chain 1 = {h1}");
    assert_eq!(h1 + 1, h0);

    network.stop().await;
}

#[tokio::test]
#[ignore]
async fn live_proof_for_missing_log_fails() {
    let network = ChainwebNetwork::with_processes(live_config(3, 18645)).unwrap();
    network.start().await.expect("Failed to start nodes");

    let chain = network.chain(ChainId(0)).unwrap();
    chain.mine().await.unwrap();

    let origin = Origin {
        source_chain_id: ChainId(0),
        origin_contract_address: Default::default(),
        block_height: chain.block_number().await.unwrap(),
        transaction_index: 0,
        event_index: 0,
    };
    let result = network.get_spv_proof(ChainId(2), &origin).await;
    eprintln!("[e2e] proof on empty block: {result:?}");
    assert!(result.is_err());

    network.stop().await;
}
