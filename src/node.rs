//! Narrow async interface to the base-chain node, plus the address
//! codec the scanner needs. The node implementation (RPC, P2P, …) is
//! out of scope; anything satisfying [`BitcoinNode`] works, which also
//! keeps tests fully in-memory.
use async_trait::async_trait;
use bitcoin::{base58, BlockHash, Txid};

use crate::errors::NodeError;

/// Header-level block information.
#[derive(Debug, Clone)]
pub struct BlockInfo {
    /// Unix timestamp from the block header.
    pub time: u32,
    /// Hash of the parent block.
    pub previous_hash: BlockHash,
    /// Transaction ids in block order.
    pub tx_hashes: Vec<Txid>,
}

/// One input of a raw transaction.
#[derive(Debug, Clone)]
pub struct TxInput {
    /// Funding transaction.
    pub txid: Txid,
    /// Output index within the funding transaction.
    pub vout: u32,
    /// True for the block-subsidy input of a coinbase transaction.
    pub coinbase: bool,
}

/// One output of a raw transaction.
#[derive(Debug, Clone)]
pub struct TxOutput {
    /// Value in satoshis.
    pub value: i64,
    /// Raw scriptPubKey bytes.
    pub script: Vec<u8>,
}

/// A raw transaction as the scanner consumes it.
#[derive(Debug, Clone)]
pub struct RawTransaction {
    /// Transaction id.
    pub txid: Txid,
    /// Inputs in order.
    pub inputs: Vec<TxInput>,
    /// Outputs in order.
    pub outputs: Vec<TxOutput>,
}

/// What the core requires of the base-chain node.
#[async_trait]
pub trait BitcoinNode: Send + Sync {
    /// Height of the node's best chain tip.
    async fn get_block_count(&self) -> Result<u32, NodeError>;

    /// Block hash at an exact height on the best chain.
    async fn get_block_hash(&self, height: u32) -> Result<BlockHash, NodeError>;

    /// Header info and transaction list of a block.
    async fn get_block(&self, hash: BlockHash) -> Result<BlockInfo, NodeError>;

    /// A raw transaction by id, from a block or the mempool.
    async fn get_raw_transaction(&self, txid: Txid) -> Result<RawTransaction, NodeError>;
}

/// Base58check-encode a pubkey hash into an address under the
/// configured version byte.
pub fn encode_address(version: u8, hash160: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(version);
    payload.extend_from_slice(hash160);
    base58::encode_check(&payload)
}

/// Decode an address back into its pubkey hash, checking the version
/// byte. Returns `None` for foreign or malformed addresses.
pub fn decode_address(version: u8, address: &str) -> Option<[u8; 20]> {
    let payload = base58::decode_check(address).ok()?;
    if payload.len() != 21 || payload[0] != version {
        return None;
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..]);
    Some(hash)
}

/// Syntactic address validity under the configured version byte.
pub fn is_valid_address(version: u8, address: &str) -> bool {
    decode_address(version, address).is_some()
}
