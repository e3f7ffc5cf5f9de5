//! System contracts installed on every chain at start.
//!
//! Two pieces of bytecode live at fixed addresses:
//! - the chain-id contract, returning the chainweb chain id kept in slot 0
//! - the SPV verify stub, standing in for a real proof-verification precompile

use crate::NodeRpc;
use alloy_primitives::{address, hex, keccak256, Address, Bytes, B256, U256};
use chainweb_core::error::{ChainwebError, ChainwebResult};
use chainweb_core::ChainId;
use std::sync::LazyLock;

/// `SLOAD(0)`, returned as a 4-byte big-endian `uint32`.
pub const CHAIN_ID_BYTE_CODE: Bytes = Bytes::from_static(&hex!("5f545f526004601cf3"));

/// Low 20 bytes of `keccak256("/Chainweb/Chain/Id/")`.
pub static CHAIN_ID_ADDRESS: LazyLock<Address> =
    LazyLock::new(|| Address::from_word(keccak256("/Chainweb/Chain/Id/")));

// FIXME: 0x421 may collide with a future Ethereum precompile; move to a
// hash-derived address once destination contracts accept one.
pub const VERIFY_ADDRESS: Address = address!("0000000000000000000000000000000000000421");

/// Returns `proof[32..]` when `keccak256(proof[32..]) == proof[..32]`, reverts
/// otherwise.
pub const VERIFY_BYTE_CODE: Bytes = Bytes::from_static(&hex!(
    "60203610601f5736601f1901806020608037806080205f3503601f576080f35b5f80fd"
));

/// Bytecode plus optional initial storage at a fixed address.
#[derive(Debug, Clone)]
pub struct SystemContract {
    pub name: &'static str,
    pub address: Address,
    pub code: Bytes,
    pub storage: Option<(U256, B256)>,
}

/// The system contracts for `chain`, in install order.
pub fn system_contracts(chain: ChainId) -> [SystemContract; 2] {
    [
        SystemContract {
            name: "chain-id",
            address: *CHAIN_ID_ADDRESS,
            code: CHAIN_ID_BYTE_CODE,
            storage: Some((U256::ZERO, B256::from(U256::from(chain.as_u32())))),
        },
        SystemContract {
            name: "spv-verify",
            address: VERIFY_ADDRESS,
            code: VERIFY_BYTE_CODE,
            storage: None,
        },
    ]
}

/// Installs every system contract on the node behind `rpc`.
pub async fn install(rpc: &dyn NodeRpc, chain: ChainId) -> ChainwebResult<()> {
    for contract in system_contracts(chain) {
        rpc.set_code(contract.address, contract.code).await?;
        if let Some((slot, value)) = contract.storage {
            rpc.set_storage_at(contract.address, slot, value).await?;
        }
        tracing::debug!(chain = %chain, contract = contract.name, address = %contract.address, "installed system contract");
    }
    Ok(())
}

/// Decodes the big-endian integer returned by the chain-id contract.
pub fn decode_chain_id(ret: &[u8]) -> ChainwebResult<ChainId> {
    if ret.is_empty() || ret.len() > 32 {
        return Err(ChainwebError::Rpc(format!(
            "Unexpected chain id return data of {} bytes",
            ret.len()
        )));
    }
    let value = U256::from_be_slice(ret);
    u32::try_from(value)
        .map(ChainId)
        .map_err(|_| ChainwebError::Rpc(format!("Chain id {value} exceeds 32 bits")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_id_address_is_hash_derived() {
        let word = keccak256("/Chainweb/Chain/Id/");
        assert_eq!(CHAIN_ID_ADDRESS.as_slice(), &word[12..]);
    }

    #[test]
    fn chain_id_slot_holds_chain_id() {
        let [cid, verify] = system_contracts(ChainId(7));
        let (slot, value) = cid.storage.unwrap();
        assert_eq!(slot, U256::ZERO);
        assert_eq!(value[31], 7);
        assert!(verify.storage.is_none());
        assert_eq!(verify.address, VERIFY_ADDRESS);
    }

    #[test]
    fn decodes_four_byte_and_word_returns() {
        assert_eq!(decode_chain_id(&[0, 0, 0, 5]).unwrap(), ChainId(5));
        assert_eq!(
            decode_chain_id(B256::from(U256::from(19u64)).as_slice()).unwrap(),
            ChainId(19)
        );
        assert!(decode_chain_id(&[]).is_err());
        assert!(decode_chain_id(&[1, 0, 0, 0, 0]).is_err());
    }
}
