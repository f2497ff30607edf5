//! Chain scanning: recognizing protocol transactions inside base-chain
//! blocks, following the chain tip through reorgs, and replaying stored
//! history.
//!
//! Payloads hide in transaction outputs three ways: OP_RETURN pushes,
//! fake 1-of-2 multisig outputs whose second "key" carries data, and
//! (once activated) pay-to-pubkey-hash outputs whose hash is an
//! RC4-encrypted chunk keyed by the first input's txid. Chunks from all
//! data outputs concatenate into one payload that must begin with the
//! configured prefix, except for burns, which are recognized by their
//! destination alone.
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::conservation;
use crate::errors::NodeError;
use crate::messages;
use crate::node::{encode_address, BitcoinNode, BlockInfo, RawTransaction};
use crate::store::{BlockRow, Ledger, TransactionRow};

const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// What the scanner extracted from one raw transaction.
struct TxInfo {
    source: String,
    destination: Option<String>,
    btc_amount: i64,
    fee: i64,
    data: Vec<u8>,
}

/// Drives a [`Ledger`] from a [`BitcoinNode`].
pub struct Scanner<N: BitcoinNode> {
    ledger: Ledger,
    node: N,
    config: Config,
}

impl<N: BitcoinNode> Scanner<N> {
    /// Build a scanner over an opened ledger.
    pub fn new(ledger: Ledger, node: N, config: Config) -> Self {
        Self {
            ledger,
            node,
            config,
        }
    }

    /// The underlying ledger.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Process every block the node has that the ledger does not,
    /// rolling back first if the stored chain no longer matches the
    /// node's. Returns once the tip is reached.
    pub async fn catch_up(&self) -> Result<()> {
        loop {
            let tip = self.node.get_block_count().await?;
            let next = match self.ledger.last_block()? {
                Some(last) => last.block_index + 1,
                None => self.config.block_first,
            };
            if next > tip {
                // The tip hash can change without the chain growing
                // past our stored height.
                let check = next.saturating_sub(1).min(tip);
                if check >= self.config.block_first {
                    if let Some(stored) = self.ledger.block_at(check)? {
                        let node_hash = self.node.get_block_hash(check).await?;
                        if stored.block_hash != node_hash.to_string() {
                            let ancestor = self.common_ancestor(check).await?;
                            warn!(ancestor, "chain reorganized, rolling back");
                            self.rollback(ancestor)?;
                            continue;
                        }
                    }
                }
                break;
            }
            let hash = self.node.get_block_hash(next).await?;
            let block = self.node.get_block(hash).await?;
            if let Some(parent) = self.ledger.block_at(next.saturating_sub(1))? {
                if parent.block_hash != block.previous_hash.to_string() {
                    let ancestor = self.common_ancestor(next - 1).await?;
                    warn!(ancestor, "chain reorganized, rolling back");
                    self.rollback(ancestor)?;
                    continue;
                }
            }
            self.apply_block(next, &hash.to_string(), &block).await?;
        }
        conservation::check(&self.ledger)?;
        Ok(())
    }

    /// Follow the chain forever, retrying on node failures.
    pub async fn follow(&self) -> Result<()> {
        loop {
            if let Err(e) = self.catch_up().await {
                match e.downcast_ref::<NodeError>() {
                    Some(NodeError::Unreachable(_)) | Some(NodeError::NotSynced) => {
                        warn!(error = %e, "node unavailable, retrying");
                    }
                    None => return Err(e),
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Highest stored height whose block hash the node still agrees
    /// with; the height below the first protocol block if nothing
    /// matches.
    async fn common_ancestor(&self, from: u32) -> Result<u32> {
        let mut height = from;
        while height >= self.config.block_first {
            if let Some(stored) = self.ledger.block_at(height)? {
                let node_hash = self.node.get_block_hash(height).await?;
                if stored.block_hash == node_hash.to_string() {
                    return Ok(height);
                }
            }
            height -= 1;
        }
        Ok(self.config.block_first - 1)
    }

    /// Truncate history above `height` and rebuild all derived state by
    /// replaying what remains.
    pub fn rollback(&self, height: u32) -> Result<()> {
        info!(height, "rolling back");
        self.ledger.delete_blocks_above(height)?;
        self.ledger.resync_tx_index()?;
        self.replay()
    }

    /// Rebuild all derived state from stored block and transaction
    /// history. The message log is reproduced from scratch, so a
    /// reparse of identical history is byte-identical.
    pub fn reparse(&self) -> Result<()> {
        info!("reparsing stored history");
        self.replay()
    }

    fn replay(&self) -> Result<()> {
        self.ledger.drop_derived_state()?;
        for block in self.ledger.all_blocks()? {
            let dbtx = self.ledger.begin()?;
            self.derive_block(block.block_index, block.block_time)?;
            dbtx.commit()?;
        }
        Ok(())
    }

    /// Extract, store, and parse one new block atomically.
    async fn apply_block(&self, height: u32, hash: &str, block: &BlockInfo) -> Result<()> {
        let mut extracted = Vec::new();
        for txid in &block.tx_hashes {
            let raw = self
                .node
                .get_raw_transaction(*txid)
                .await
                .with_context(|| format!("fetch transaction {txid}"))?;
            if let Some(tx_info) = self.extract(&raw, height).await? {
                extracted.push((txid.to_string(), tx_info));
            }
        }

        let dbtx = self.ledger.begin()?;
        self.ledger.insert_block(&BlockRow {
            block_index: height,
            block_hash: hash.to_string(),
            block_time: block.time,
        })?;
        for (tx_hash, t) in extracted {
            let tx_index = self.ledger.next_tx_index()?;
            self.ledger.insert_transaction(&TransactionRow {
                tx_index,
                tx_hash,
                block_index: height,
                block_hash: hash.to_string(),
                block_time: block.time,
                source: t.source,
                destination: t.destination,
                btc_amount: t.btc_amount,
                fee: t.fee,
                data: t.data,
                supported: true,
            })?;
        }
        self.derive_block(height, block.time)?;
        dbtx.commit()?;
        info!(height, "processed block");
        Ok(())
    }

    /// Run one stored block through the state machine: expiration
    /// sweeps first, then every stored transaction in order, with the
    /// periodic conservation gate.
    fn derive_block(&self, block_index: u32, block_time: u32) -> Result<()> {
        messages::order::expire_orders(&self.ledger, block_index)?;
        messages::order::expire_order_matches(&self.ledger, block_index)?;
        messages::bet::expire_bets(&self.ledger, block_index)?;
        messages::bet::expire_bet_matches(&self.ledger, &self.config, block_index, block_time)?;
        let every = self.config.conservation_every as i64;
        for tx in self.ledger.transactions_in_block(block_index)? {
            messages::handle(&self.ledger, &self.config, &tx)?;
            if every > 0 && (tx.tx_index + 1) % every == 0 {
                conservation::check(&self.ledger)?;
            }
        }
        Ok(())
    }

    /// Recognize a protocol transaction, or `None` for an ordinary one.
    ///
    /// The source is the unanimous single-signature input address;
    /// transactions with coinbase or non-p2pkh inputs, or inputs from
    /// different addresses, are ignored.
    async fn extract(&self, raw: &RawTransaction, height: u32) -> Result<Option<TxInfo>> {
        let rc4_allowed = self.config.p2pkh_data.at(height, self.config.testnet);
        let rc4_key = raw
            .inputs
            .first()
            .and_then(|i| hex::decode(i.txid.to_string()).ok())
            .unwrap_or_default();

        let mut data = Vec::new();
        let mut destination: Option<(String, i64)> = None;
        for out in &raw.outputs {
            if let Some(chunk) = op_return_payload(&out.script) {
                data.extend_from_slice(chunk);
                continue;
            }
            if let Some(chunk) = multisig_payload(&out.script) {
                data.extend_from_slice(&chunk);
                continue;
            }
            if let Some(hash) = p2pkh_hash(&out.script) {
                if rc4_allowed && !rc4_key.is_empty() {
                    if let Some(chunk) = rc4_chunk(&rc4_key, &hash) {
                        let accept = if data.is_empty() {
                            chunk.starts_with(&self.config.prefix)
                        } else {
                            true
                        };
                        if accept {
                            data.extend_from_slice(&chunk);
                            continue;
                        }
                    }
                }
                if destination.is_none() {
                    let address = encode_address(self.config.address_version, &hash);
                    destination = Some((address, out.value));
                }
            }
        }
        let (destination, btc_amount) = match destination {
            Some((a, v)) => (Some(a), v),
            None => (None, 0),
        };

        let burn = destination.as_deref() == Some(self.config.unspendable.as_str());
        if data.starts_with(&self.config.prefix) {
            data.drain(..self.config.prefix.len());
        } else if !burn {
            return Ok(None);
        } else {
            data.clear();
        }

        // Unanimous p2pkh source.
        let mut source: Option<String> = None;
        let mut inputs_value = 0i64;
        for input in &raw.inputs {
            if input.coinbase {
                return Ok(None);
            }
            let prev = self
                .node
                .get_raw_transaction(input.txid)
                .await
                .with_context(|| format!("fetch funding transaction {}", input.txid))?;
            let out = match prev.outputs.get(input.vout as usize) {
                Some(o) => o,
                None => return Ok(None),
            };
            inputs_value += out.value;
            let hash = match p2pkh_hash(&out.script) {
                Some(h) => h,
                None => return Ok(None),
            };
            let address = encode_address(self.config.address_version, &hash);
            match &source {
                None => source = Some(address),
                Some(s) if *s == address => {}
                Some(_) => return Ok(None),
            }
        }
        let source = match source {
            Some(s) => s,
            None => return Ok(None),
        };

        let outputs_value: i64 = raw.outputs.iter().map(|o| o.value).sum();
        Ok(Some(TxInfo {
            source,
            destination,
            btc_amount,
            fee: inputs_value - outputs_value,
            data,
        }))
    }
}

/// Hash160 of a standard pay-to-pubkey-hash script.
fn p2pkh_hash(script: &[u8]) -> Option<[u8; 20]> {
    if script.len() == 25
        && script[0] == 0x76 // OP_DUP
        && script[1] == 0xa9 // OP_HASH160
        && script[2] == 0x14
        && script[23] == 0x88 // OP_EQUALVERIFY
        && script[24] == 0xac // OP_CHECKSIG
    {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script[3..23]);
        return Some(hash);
    }
    None
}

/// Payload of an OP_RETURN output with a single direct push.
fn op_return_payload(script: &[u8]) -> Option<&[u8]> {
    if script.len() >= 2 && script[0] == 0x6a {
        let len = script[1] as usize;
        if len <= 75 && script.len() == 2 + len {
            return Some(&script[2..]);
        }
    }
    None
}

/// Payload hidden in the second key of a fake 1-of-2 bare multisig.
fn multisig_payload(script: &[u8]) -> Option<Vec<u8>> {
    // OP_1 <33-byte key> <33-byte key> OP_2 OP_CHECKMULTISIG
    if script.len() == 71
        && script[0] == 0x51
        && script[1] == 0x21
        && script[35] == 0x21
        && script[69] == 0x52
        && script[70] == 0xae
    {
        let key = &script[36..69];
        let len = key[0] as usize;
        if len >= 1 && len <= 32 {
            return Some(key[1..1 + len].to_vec());
        }
    }
    None
}

/// Decrypt a pay-to-pubkey-hash data chunk. The leading byte of the
/// decryption is the chunk length.
fn rc4_chunk(key: &[u8], hash: &[u8; 20]) -> Option<Vec<u8>> {
    let decrypted = rc4(key, hash);
    let len = decrypted[0] as usize;
    if len >= 1 && len <= 19 {
        return Some(decrypted[1..1 + len].to_vec());
    }
    None
}

fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut s: Vec<u8> = (0..=255).collect();
    let mut j = 0usize;
    for i in 0..256 {
        j = (j + s[i] as usize + key[i % key.len()] as usize) % 256;
        s.swap(i, j);
    }
    let mut out = Vec::with_capacity(data.len());
    let (mut i, mut j) = (0usize, 0usize);
    for &byte in data {
        i = (i + 1) % 256;
        j = (j + s[i] as usize) % 256;
        s.swap(i, j);
        let k = s[(s[i] as usize + s[j] as usize) % 256];
        out.push(byte ^ k);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p2pkh_script_round_trip() {
        let hash = [7u8; 20];
        let mut script = vec![0x76, 0xa9, 0x14];
        script.extend_from_slice(&hash);
        script.extend_from_slice(&[0x88, 0xac]);
        assert_eq!(p2pkh_hash(&script), Some(hash));
        assert_eq!(p2pkh_hash(&script[..24]), None);
    }

    #[test]
    fn op_return_payload_requires_single_push() {
        let script = [0x6a, 0x03, 0xaa, 0xbb, 0xcc];
        assert_eq!(op_return_payload(&script), Some(&[0xaa, 0xbb, 0xcc][..]));
        assert_eq!(op_return_payload(&[0x6a, 0x04, 0xaa]), None);
    }

    #[test]
    fn multisig_payload_reads_second_key() {
        let mut script = vec![0x51, 0x21];
        script.extend_from_slice(&[0u8; 33]);
        script.push(0x21);
        let mut key = vec![4u8, 0xde, 0xad, 0xbe, 0xef];
        key.resize(33, 0);
        script.extend_from_slice(&key);
        script.extend_from_slice(&[0x52, 0xae]);
        assert_eq!(
            multisig_payload(&script),
            Some(vec![0xde, 0xad, 0xbe, 0xef])
        );
    }

    #[test]
    fn rc4_is_its_own_inverse() {
        let key = b"0123456789abcdef";
        let plain = b"CNTRPRTY payload";
        let cipher = rc4(key, plain);
        assert_ne!(cipher.as_slice(), plain.as_slice());
        assert_eq!(rc4(key, &cipher), plain.to_vec());
    }
}
