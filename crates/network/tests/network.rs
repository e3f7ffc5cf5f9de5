//! Network behavior against in-process nodes.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::SolValue;
use chainweb_core::error::ChainwebError;
use chainweb_core::{spv, ChainId, EventLog, Origin};
use chainweb_network::{ChainwebNetwork, NetworkConfig, SharedNetwork};
use chainweb_provider::{MemoryBackend, NodeBackend};
use std::sync::Arc;
use std::time::Duration;

fn config(chains: usize) -> NetworkConfig {
    let mut config = NetworkConfig::for_chains(chains).unwrap();
    config.automine_interval_ms = 10;
    config.spv.poll_interval_ms = 1;
    config
}

async fn started(chains: usize, backend: Arc<MemoryBackend>) -> ChainwebNetwork {
    let network = ChainwebNetwork::new(config(chains), backend as Arc<dyn NodeBackend>).unwrap();
    network.start().await.unwrap();
    for chain in network.chains() {
        chain.disable_automine();
    }
    network
}

async fn heights(network: &ChainwebNetwork) -> Vec<u64> {
    let mut heights = Vec::new();
    for chain in network.chains() {
        heights.push(chain.block_number().await.unwrap());
    }
    heights
}

fn word(v: u64) -> B256 {
    B256::from(U256::from(v))
}

/// A `CrossChainInitialized`-shaped log addressed to `target`.
fn transfer_log(target: u32, payload: &'static [u8]) -> EventLog {
    EventLog {
        address: Address::repeat_byte(0xaa),
        topics: vec![
            keccak256("CrossChainInitialized(uint32,address,uint64,bytes)"),
            word(u64::from(target)),
            Address::repeat_byte(0xbb).into_word(),
            word(1),
        ],
        data: Bytes::from_static(payload).abi_encode().into(),
        block_number: None,
        transaction_index: None,
        log_index: None,
        removed: false,
    }
}

/// Submits `log` on `source`, mines it, and returns its origin.
async fn emit(network: &ChainwebNetwork, backend: &MemoryBackend, source: u32, log: EventLog) -> Origin {
    let cid = ChainId(source);
    let node = backend.node(cid).unwrap();
    node.submit_transaction(vec![log]).unwrap();
    network.chain(cid).unwrap().mine().await.unwrap();

    let height = node.height().unwrap();
    let logs = network.chain(cid).unwrap().logs_at(height).await.unwrap();
    Origin::from_receipt_log(cid, &logs[0], 0).unwrap()
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_adjacency_target_is_config_error() {
    let mut config = config(2);
    config.chains.pop();
    let result = ChainwebNetwork::new(config, Arc::new(MemoryBackend::new()));
    assert!(matches!(result, Err(ChainwebError::Config(_))));
}

#[tokio::test]
async fn chains_follow_the_graph() {
    let network = ChainwebNetwork::new(config(10), Arc::new(MemoryBackend::new())).unwrap();
    assert_eq!(network.chain_ids().len(), 10);
    let chain = network.chain(ChainId(0)).unwrap();
    assert_eq!(chain.adjacent_ids(), vec![ChainId(2), ChainId(3), ChainId(5)]);
    assert!(matches!(
        network.chain(ChainId(10)),
        Err(ChainwebError::ChainNotFound(_))
    ));
}

#[tokio::test]
async fn failed_chain_start_stops_the_others() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_launch(ChainId(2));
    let network = ChainwebNetwork::new(config(3), backend.clone()).unwrap();

    let err = network.start().await.unwrap_err();
    assert!(matches!(err, ChainwebError::Lifecycle(_)));
    assert!(network.chains().all(|c| !c.is_running()));
}

#[tokio::test]
async fn every_chain_reports_its_own_id() {
    let backend = Arc::new(MemoryBackend::new());
    let network = started(3, backend).await;
    for cid in network.chain_ids() {
        let chain = network.chain(cid).unwrap();
        assert_eq!(chain.chainweb_chain_id().await.unwrap(), cid);
    }
    network.stop().await;
}

// ---------------------------------------------------------------------------
// Mining
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mining_catches_up_adjacent_chains() {
    let backend = Arc::new(MemoryBackend::new());
    let network = started(10, backend).await;
    let chain = network.chain(ChainId(0)).unwrap();

    for _ in 0..5 {
        let before = chain.block_number().await.unwrap();
        chain.mine().await.unwrap();
        assert_eq!(chain.block_number().await.unwrap(), before + 1);
        for adjacent in chain.adjacent_ids() {
            let height = network.chain(adjacent).unwrap().block_number().await.unwrap();
            assert!(height >= before, "chain {adjacent} at {height}, expected >= {before}");
        }
    }
    network.stop().await;
}

#[tokio::test]
async fn second_mine_on_two_chains_catches_up_the_neighbor() {
    let backend = Arc::new(MemoryBackend::new());
    let network = started(2, backend).await;
    let chain = network.chain(ChainId(0)).unwrap();

    chain.mine().await.unwrap();
    assert_eq!(heights(&network).await, vec![1, 0]);
    chain.mine().await.unwrap();
    assert_eq!(heights(&network).await, vec![2, 1]);
    network.stop().await;
}

#[tokio::test]
async fn far_behind_neighbor_is_caught_up_in_one_mine() {
    let backend = Arc::new(MemoryBackend::new());
    let network = started(2, backend).await;
    let chain = network.chain(ChainId(0)).unwrap();

    for _ in 0..70 {
        chain.make_block().await.unwrap();
    }
    chain.mine().await.unwrap();
    assert_eq!(heights(&network).await, vec![71, 70]);
    network.stop().await;

    let network = started(10, Arc::new(MemoryBackend::new())).await;
    let chain = network.chain(ChainId(0)).unwrap();
    for _ in 0..70 {
        chain.make_block().await.unwrap();
    }
    chain.mine().await.unwrap();
    assert_eq!(chain.block_number().await.unwrap(), 71);
    for adjacent in chain.adjacent_ids() {
        let height = network.chain(adjacent).unwrap().block_number().await.unwrap();
        assert_eq!(height, 70, "chain {adjacent}");
    }
    network.stop().await;
}

#[tokio::test]
async fn concurrent_mines_match_sequential_execution() {
    for chains in [2, 10] {
        let sequential = started(chains, Arc::new(MemoryBackend::new())).await;
        let a = sequential.chain(ChainId(0)).unwrap();
        a.mine().await.unwrap();
        a.mine().await.unwrap();
        let expected = heights(&sequential).await;
        sequential.stop().await;

        let backend = Arc::new(MemoryBackend::with_latency(Duration::from_millis(1)));
        let concurrent = started(chains, backend.clone()).await;
        let a = concurrent.chain(ChainId(0)).unwrap();
        let (r1, r2) = tokio::join!(a.mine(), a.mine());
        r1.unwrap();
        r2.unwrap();

        assert_eq!(heights(&concurrent).await, expected, "{chains} chains");
        let blocks = backend.node(ChainId(0)).unwrap().blocks_mined().unwrap();
        assert_eq!(blocks, 2);
        concurrent.stop().await;
    }
}

#[tokio::test]
async fn automine_mines_pending_transactions() {
    let backend = Arc::new(MemoryBackend::new());
    let network = ChainwebNetwork::new(config(2), backend.clone()).unwrap();
    network.start().await.unwrap();

    backend
        .node(ChainId(1))
        .unwrap()
        .submit_transaction(Vec::new())
        .unwrap();

    let chain = network.chain(ChainId(1)).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while chain.block_number().await.unwrap() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(!chain.has_pending().await.unwrap());
    network.stop().await;
}

// ---------------------------------------------------------------------------
// SPV
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_chain_transfer_proof() {
    let backend = Arc::new(MemoryBackend::new());
    let network = started(2, backend.clone()).await;

    let origin = emit(&network, &backend, 0, transfer_log(1, b"transfer 100")).await;
    assert_eq!(origin.transaction_index, 0);
    assert_eq!(origin.event_index, 0);

    let proof = network.get_spv_proof(ChainId(1), &origin).await.unwrap();

    let height = network.chain(ChainId(1)).unwrap().block_number().await.unwrap();
    assert!(height >= origin.block_height + 1);

    let msg = spv::verify_proof(&proof).unwrap();
    assert_eq!(msg.target_chain_id, ChainId(1));
    assert_eq!(msg.target_contract_address, Address::repeat_byte(0xbb));
    assert_eq!(msg.payload, Bytes::from_static(b"transfer 100"));
    assert_eq!(msg.origin, origin);
    network.stop().await;
}

#[tokio::test]
async fn proof_origin_hash_matches_and_tampering_is_detected() {
    let backend = Arc::new(MemoryBackend::new());
    let network = started(3, backend.clone()).await;
    let origin = emit(&network, &backend, 0, transfer_log(2, b"payload")).await;

    let proof = network.get_spv_proof(ChainId(2), &origin).await.unwrap();
    assert_eq!(
        spv::origin_hash_of_proof(&proof).unwrap(),
        ChainwebNetwork::compute_origin_hash(&origin)
    );

    let tampered = network.create_tampered_proof(ChainId(2), &origin).await.unwrap();
    assert!(spv::verify_proof(&tampered).is_err());

    // The installed verify stub agrees.
    let rpc = network.rpc(ChainId(2)).unwrap();
    let verify = chainweb_provider::contracts::VERIFY_ADDRESS;
    assert!(rpc.call(verify, proof).await.is_ok());
    assert!(rpc.call(verify, tampered).await.is_err());
    network.stop().await;
}

#[tokio::test]
async fn proof_waits_for_the_distance_threshold() {
    let backend = Arc::new(MemoryBackend::new());
    let network = started(20, backend.clone()).await;

    // Raise chain 0 well above everything else.
    let source = network.chain(ChainId(0)).unwrap();
    for _ in 0..3 {
        source.mine().await.unwrap();
    }
    let origin = emit(&network, &backend, 0, transfer_log(7, b"far")).await;

    let distance = network.graph().distance(ChainId(0), ChainId(7)).unwrap();
    assert_eq!(distance, 2);
    let target = network.chain(ChainId(7)).unwrap();
    assert!(target.block_number().await.unwrap() < origin.block_height + 2);

    network.get_spv_proof(ChainId(7), &origin).await.unwrap();
    assert!(target.block_number().await.unwrap() >= origin.block_height + u64::from(distance));
    network.stop().await;
}

#[tokio::test]
async fn proofs_are_idempotent() {
    let backend = Arc::new(MemoryBackend::new());
    let network = started(2, backend.clone()).await;
    let origin = emit(&network, &backend, 0, transfer_log(1, b"again")).await;

    let first = network.get_spv_proof(ChainId(1), &origin).await.unwrap();
    let second = network.get_spv_proof(ChainId(1), &origin).await.unwrap();
    assert_eq!(first, second);
    network.stop().await;
}

#[tokio::test]
async fn bounded_wait_times_out() {
    let backend = Arc::new(MemoryBackend::new());
    let mut config = config(10);
    config.spv.max_attempts = Some(0);
    let network = ChainwebNetwork::new(config, backend.clone()).unwrap();
    network.start().await.unwrap();
    for chain in network.chains() {
        chain.disable_automine();
    }

    let origin = emit(&network, &backend, 0, transfer_log(1, b"x")).await;
    let err = network.get_spv_proof(ChainId(1), &origin).await.unwrap_err();
    assert!(matches!(
        err,
        ChainwebError::SpvTimeout { target: ChainId(1), attempts: 0, .. }
    ));
    network.stop().await;
}

#[tokio::test]
async fn unknown_origin_is_log_not_found() {
    let backend = Arc::new(MemoryBackend::new());
    let network = started(2, backend.clone()).await;
    let mut origin = emit(&network, &backend, 0, transfer_log(1, b"x")).await;
    origin.event_index = 1;

    assert!(matches!(
        network.get_spv_proof(ChainId(1), &origin).await,
        Err(ChainwebError::LogNotFound { .. })
    ));
    network.stop().await;
}

#[tokio::test]
async fn two_topic_log_is_rejected() {
    let backend = Arc::new(MemoryBackend::new());
    let network = started(2, backend.clone()).await;
    let mut log = transfer_log(1, b"x");
    log.topics.truncate(2);
    let origin = emit(&network, &backend, 0, log).await;

    assert!(matches!(
        network.get_spv_proof(ChainId(1), &origin).await,
        Err(ChainwebError::UnexpectedTopics(2))
    ));
    network.stop().await;
}

// ---------------------------------------------------------------------------
// Shared network
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shared_network_starts_once_and_stops_after_last_user() {
    let backend = Arc::new(MemoryBackend::new());
    let network = Arc::new(ChainwebNetwork::new(config(2), backend.clone()).unwrap());
    let shared = Arc::new(SharedNetwork::new(network.clone()).unwrap());

    let (a, b) = tokio::join!(shared.acquire(), shared.acquire());
    a.unwrap();
    b.unwrap();
    assert_eq!(backend.launches(), 2);
    assert_eq!(shared.users().await, 2);

    shared.release().await;
    assert!(network.is_running());
    shared.release().await;
    assert!(network.chains().all(|c| !c.is_running()));
    assert!(!shared.is_running().await);
}

#[tokio::test]
async fn force_stop_runs_once() {
    let backend = Arc::new(MemoryBackend::new());
    let network = Arc::new(ChainwebNetwork::new(config(2), backend).unwrap());
    let shared = SharedNetwork::new(network.clone()).unwrap();

    shared.acquire().await.unwrap();
    shared.acquire().await.unwrap();
    shared.force_stop().await;
    assert!(!network.chains().any(|c| c.is_running()));
    assert_eq!(shared.users().await, 0);

    shared.force_stop().await;
    shared.release().await;
    assert!(!shared.is_running().await);
}

#[tokio::test]
async fn switch_chain_selects_active_rpc() {
    let backend = Arc::new(MemoryBackend::new());
    let network = Arc::new(ChainwebNetwork::new(config(3), backend).unwrap());
    let shared = SharedNetwork::new(network).unwrap();
    shared.acquire().await.unwrap();

    assert_eq!(shared.active_chain().unwrap(), ChainId(0));
    shared.switch_chain(ChainId(2)).unwrap();
    let rpc = shared.active_rpc().unwrap();
    let ret = rpc
        .call(*chainweb_provider::contracts::CHAIN_ID_ADDRESS, Bytes::new())
        .await
        .unwrap();
    assert_eq!(
        chainweb_provider::contracts::decode_chain_id(&ret).unwrap(),
        ChainId(2)
    );

    assert!(matches!(
        shared.switch_chain(ChainId(9)),
        Err(ChainwebError::ChainNotFound(_))
    ));
    shared.release().await;
}
