//! SPV proof codec.
//!
//! Wire format: `keccak256(payload) ++ payload`, where `payload` is the ABI
//! encoding of
//! `(uint32,address,uint64,bytes,(uint32,address,uint64,uint64,uint64))`.
//! The destination contract recomputes the hash over the payload, so any
//! modified byte is detected without a signature.

use crate::error::{ChainwebError, ChainwebResult};
use crate::types::{ChainId, CrossChainMessage, EventLog, Origin};
use alloy_primitives::{keccak256, Address, Bytes, B256};
use alloy_sol_types::{sol, SolValue};

sol! {
    struct OriginTuple {
        uint32 originChainId;
        address originContractAddress;
        uint64 originBlockHeight;
        uint64 originTransactionIndex;
        uint64 originEventIndex;
    }

    struct CrossChainMessageTuple {
        uint32 targetChainId;
        address targetContractAddress;
        uint64 operationType;
        bytes payload;
        OriginTuple origin;
    }
}

/// Topics of a cross-chain event: signature, target chain, target address,
/// operation type.
pub const EVENT_TOPIC_COUNT: usize = 4;

const HASH_LEN: usize = 32;

impl From<&Origin> for OriginTuple {
    fn from(o: &Origin) -> Self {
        Self {
            originChainId: o.source_chain_id.as_u32(),
            originContractAddress: o.origin_contract_address,
            originBlockHeight: o.block_height,
            originTransactionIndex: o.transaction_index,
            originEventIndex: o.event_index,
        }
    }
}

impl From<OriginTuple> for Origin {
    fn from(t: OriginTuple) -> Self {
        Self {
            source_chain_id: ChainId(t.originChainId),
            origin_contract_address: t.originContractAddress,
            block_height: t.originBlockHeight,
            transaction_index: t.originTransactionIndex,
            event_index: t.originEventIndex,
        }
    }
}

impl From<&CrossChainMessage> for CrossChainMessageTuple {
    fn from(m: &CrossChainMessage) -> Self {
        Self {
            targetChainId: m.target_chain_id.as_u32(),
            targetContractAddress: m.target_contract_address,
            operationType: m.operation_type,
            payload: m.payload.clone(),
            origin: OriginTuple::from(&m.origin),
        }
    }
}

impl From<CrossChainMessageTuple> for CrossChainMessage {
    fn from(t: CrossChainMessageTuple) -> Self {
        Self {
            target_chain_id: ChainId(t.targetChainId),
            target_contract_address: t.targetContractAddress,
            operation_type: t.operationType,
            payload: t.payload,
            origin: t.origin.into(),
        }
    }
}

/// `keccak256` of the fixed 5-word encoding of `origin`.
///
/// Destination contracts key replay protection on this value, so the layout
/// must match theirs bit for bit.
pub fn compute_origin_hash(origin: &Origin) -> B256 {
    keccak256(OriginTuple::from(origin).abi_encode())
}

/// Canonical ABI encoding of `msg` (without the hash prefix).
pub fn encode_message(msg: &CrossChainMessage) -> Vec<u8> {
    CrossChainMessageTuple::from(msg).abi_encode()
}

pub fn decode_message(payload: &[u8]) -> ChainwebResult<CrossChainMessage> {
    CrossChainMessageTuple::abi_decode(payload)
        .map(Into::into)
        .map_err(|e| ChainwebError::InvalidProof(format!("Failed to decode message: {e}")))
}

/// Builds the proof bytes for `msg`.
pub fn encode_proof(msg: &CrossChainMessage) -> Bytes {
    let payload = encode_message(msg);
    let hash = keccak256(&payload);

    let mut proof = Vec::with_capacity(HASH_LEN + payload.len());
    proof.extend_from_slice(hash.as_slice());
    proof.extend_from_slice(&payload);
    proof.into()
}

/// Checks the hash prefix and decodes the carried message.
///
/// Same acceptance rule as the verify precompile stub: at least one word,
/// and the first word equals the hash of the rest.
pub fn verify_proof(proof: &[u8]) -> ChainwebResult<CrossChainMessage> {
    if proof.len() < HASH_LEN {
        return Err(ChainwebError::InvalidProof(format!(
            "Proof too short: {} bytes",
            proof.len()
        )));
    }

    let (hash, payload) = proof.split_at(HASH_LEN);
    if keccak256(payload).as_slice() != hash {
        return Err(ChainwebError::InvalidProof("Hash mismatch".into()));
    }

    decode_message(payload)
}

/// Verifies `proof` and returns the origin hash the destination would record.
pub fn origin_hash_of_proof(proof: &[u8]) -> ChainwebResult<B256> {
    verify_proof(proof).map(|msg| compute_origin_hash(&msg.origin))
}

/// Returns a copy of `proof` with the middle byte flipped.
pub fn tamper_proof(proof: &[u8]) -> Bytes {
    let mut bytes = proof.to_vec();
    if let Some(b) = bytes.get_mut(proof.len() / 2) {
        *b ^= 0xff;
    }
    bytes.into()
}

/// Parses a `0x`-prefixed (or bare) hex proof.
pub fn proof_from_hex(s: &str) -> ChainwebResult<Bytes> {
    let s = s.trim();
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits)
        .map(Into::into)
        .map_err(|e| ChainwebError::InvalidProof(format!("Invalid hex: {e}")))
}

/// Low 20 bytes of a 32-byte word.
pub fn word_to_address(word: &B256) -> Address {
    Address::from_word(*word)
}

/// Low 8 bytes of a 32-byte word, failing if any higher byte is set.
pub fn word_to_u64(word: &B256) -> ChainwebResult<u64> {
    let (high, low) = word.as_slice().split_at(24);
    if high.iter().any(|b| *b != 0) {
        return Err(ChainwebError::InvalidProof(format!(
            "Topic {word} does not fit in 64 bits"
        )));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(low);
    Ok(u64::from_be_bytes(buf))
}

/// Rebuilds the cross-chain message described by a 4-topic event log.
///
/// Topic layout: `[signature, targetChainId, targetAddress, operationType]`;
/// the log data is the ABI encoding of a single `bytes` value. The origin
/// contract address is taken from the log itself.
pub fn message_from_log(log: &EventLog, origin: &Origin) -> ChainwebResult<CrossChainMessage> {
    if log.topics.len() != EVENT_TOPIC_COUNT {
        return Err(ChainwebError::UnexpectedTopics(log.topics.len()));
    }

    let target_chain_id = u32::try_from(word_to_u64(&log.topics[1])?)
        .map_err(|_| ChainwebError::InvalidProof("Target chain id exceeds 32 bits".into()))?;

    let payload = Bytes::abi_decode(&log.data)
        .map_err(|e| ChainwebError::InvalidProof(format!("Failed to decode event data: {e}")))?;

    Ok(CrossChainMessage {
        target_chain_id: ChainId(target_chain_id),
        target_contract_address: word_to_address(&log.topics[2]),
        operation_type: word_to_u64(&log.topics[3])?,
        payload,
        origin: Origin {
            origin_contract_address: log.address,
            ..*origin
        },
    })
}
