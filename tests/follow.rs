//! Scanning blocks from a mock node: payload extraction in all three
//! encodings, expiration sweeps, reorg rollback, and reparse
//! determinism.
use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Txid};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sobrecapa::config::UNIT;
use sobrecapa::node::{decode_address, encode_address};
use sobrecapa::util::asset_id;
use sobrecapa::{BitcoinNode, BlockInfo, Config, Ledger, NodeError, RawTransaction, Scanner, TxInput, TxOutput};

const T0: u32 = 1_600_000_000;

fn test_config() -> Config {
    let mut config = Config::testnet();
    config.block_first = 100;
    config.burn_start = 100;
    config.burn_end = 1_100;
    config.max_burn = 100 * UNIT;
    config
}

fn block_hash(n: u8) -> BlockHash {
    BlockHash::from_byte_array([n; 32])
}

fn tx_hash(n: u8) -> Txid {
    Txid::from_byte_array([n; 32])
}

fn p2pkh_script(hash: &[u8; 20]) -> Vec<u8> {
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend_from_slice(hash);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

fn op_return_script(data: &[u8]) -> Vec<u8> {
    let mut script = vec![0x6a, data.len() as u8];
    script.extend_from_slice(data);
    script
}

fn multisig_script(chunk: &[u8]) -> Vec<u8> {
    let mut script = vec![0x51, 0x21];
    script.extend_from_slice(&[2u8; 33]);
    script.push(0x21);
    let mut key = vec![chunk.len() as u8];
    key.extend_from_slice(chunk);
    key.resize(33, 0);
    script.extend_from_slice(&key);
    script.extend_from_slice(&[0x52, 0xae]);
    script
}

/// ------- Minimal in-memory node -------
struct Inner {
    first: u32,
    chain: Mutex<Vec<(BlockHash, BlockInfo)>>,
    txs: Mutex<HashMap<Txid, RawTransaction>>,
}

#[derive(Clone)]
struct MockNode(Arc<Inner>);

impl MockNode {
    fn new(first: u32) -> Self {
        Self(Arc::new(Inner {
            first,
            chain: Mutex::new(Vec::new()),
            txs: Mutex::new(HashMap::new()),
        }))
    }

    fn add_tx(&self, tx: RawTransaction) {
        self.0.txs.lock().unwrap().insert(tx.txid, tx);
    }

    fn push_block(&self, hash: BlockHash, tx_hashes: Vec<Txid>) {
        let mut chain = self.0.chain.lock().unwrap();
        let previous_hash = chain.last().map_or(block_hash(0), |(h, _)| *h);
        let time = T0 + chain.len() as u32;
        chain.push((
            hash,
            BlockInfo {
                time,
                previous_hash,
                tx_hashes,
            },
        ));
    }

    fn truncate(&self, keep: usize) {
        self.0.chain.lock().unwrap().truncate(keep);
    }
}

#[async_trait]
impl BitcoinNode for MockNode {
    async fn get_block_count(&self) -> Result<u32, NodeError> {
        let chain = self.0.chain.lock().unwrap();
        Ok(self.0.first + chain.len() as u32 - 1)
    }

    async fn get_block_hash(&self, height: u32) -> Result<BlockHash, NodeError> {
        let chain = self.0.chain.lock().unwrap();
        chain
            .get((height - self.0.first) as usize)
            .map(|(h, _)| *h)
            .ok_or_else(|| NodeError::Unreachable(format!("no block at {height}")))
    }

    async fn get_block(&self, hash: BlockHash) -> Result<BlockInfo, NodeError> {
        let chain = self.0.chain.lock().unwrap();
        chain
            .iter()
            .find(|(h, _)| *h == hash)
            .map(|(_, info)| info.clone())
            .ok_or_else(|| NodeError::Unreachable(format!("no block {hash}")))
    }

    async fn get_raw_transaction(&self, txid: Txid) -> Result<RawTransaction, NodeError> {
        let txs = self.0.txs.lock().unwrap();
        txs.get(&txid)
            .cloned()
            .ok_or_else(|| NodeError::Unreachable(format!("no transaction {txid}")))
    }
}

/// ------- World construction -------
struct World {
    config: Config,
    node: MockNode,
    alice: String,
    bob_hash: [u8; 20],
    next_txid: u8,
}

impl World {
    fn new() -> Self {
        let config = test_config();
        let alice = encode_address(config.address_version, &[1u8; 20]);
        Self {
            node: MockNode::new(config.block_first),
            config,
            alice,
            bob_hash: [2u8; 20],
            next_txid: 0,
        }
    }

    fn bob(&self) -> String {
        encode_address(self.config.address_version, &self.bob_hash)
    }

    /// A confirmed p2pkh output paying alice, to spend from.
    fn fund(&mut self, value: i64) -> TxInput {
        self.next_txid += 1;
        let txid = tx_hash(0xf0 + self.next_txid);
        self.node.add_tx(RawTransaction {
            txid,
            inputs: Vec::new(),
            outputs: vec![TxOutput {
                value,
                script: p2pkh_script(&[1u8; 20]),
            }],
        });
        TxInput {
            txid,
            vout: 0,
            coinbase: false,
        }
    }

    fn protocol_tx(&mut self, n: u8, outputs: Vec<TxOutput>) -> Txid {
        let funding = self.fund(20 * UNIT);
        let txid = tx_hash(n);
        self.node.add_tx(RawTransaction {
            txid,
            inputs: vec![funding],
            outputs,
        });
        txid
    }

    fn payload(&self, type_id: u32, body: &[u8]) -> Vec<u8> {
        let mut data = self.config.prefix.clone();
        data.extend_from_slice(&type_id.to_be_bytes());
        data.extend_from_slice(body);
        data
    }

    /// Burn at 100, issuance at 101 (OP_RETURN), send to bob at 102
    /// (fake multisig).
    fn seed_chain(&mut self) {
        let burn_hash = decode_address(self.config.address_version, &self.config.unspendable)
            .expect("unspendable address decodes");
        let burn = self.protocol_tx(
            10,
            vec![TxOutput {
                value: 10 * UNIT,
                script: p2pkh_script(&burn_hash),
            }],
        );
        self.node.push_block(block_hash(100), vec![burn]);

        let mut body = Vec::new();
        body.extend_from_slice(&asset_id("TESTCOIN").unwrap().to_be_bytes());
        body.extend_from_slice(&(1_000 * UNIT as u64).to_be_bytes());
        body.extend_from_slice(&[1, 0]); // divisible, not callable
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&0f32.to_be_bytes());
        let data = self.payload(20, &body);
        let issuance = self.protocol_tx(
            11,
            vec![TxOutput {
                value: 0,
                script: op_return_script(&data),
            }],
        );
        self.node.push_block(block_hash(101), vec![issuance]);

        let mut body = Vec::new();
        body.extend_from_slice(&asset_id("TESTCOIN").unwrap().to_be_bytes());
        body.extend_from_slice(&(250 * UNIT as u64).to_be_bytes());
        let data = self.payload(0, &body);
        let send = self.protocol_tx(
            12,
            vec![
                TxOutput {
                    value: 5_430,
                    script: p2pkh_script(&self.bob_hash),
                },
                TxOutput {
                    value: 0,
                    script: multisig_script(&data),
                },
            ],
        );
        self.node.push_block(block_hash(102), vec![send]);
    }
}

#[tokio::test]
async fn catch_up_extracts_all_encodings() {
    let mut world = World::new();
    world.seed_chain();
    let scanner = Scanner::new(
        Ledger::new_in_memory().unwrap(),
        world.node.clone(),
        world.config.clone(),
    );
    scanner.catch_up().await.unwrap();

    let ledger = scanner.ledger();
    assert_eq!(ledger.last_block().unwrap().unwrap().block_index, 102);
    // 10 BTC burned at the window start earns 15 XCP; issuance costs 5.
    assert_eq!(
        ledger.balance(&world.alice, sobrecapa::config::XCP).unwrap(),
        10 * UNIT
    );
    assert_eq!(ledger.balance(&world.alice, "TESTCOIN").unwrap(), 750 * UNIT);
    assert_eq!(ledger.balance(&world.bob(), "TESTCOIN").unwrap(), 250 * UNIT);
}

#[tokio::test]
async fn reorg_rolls_back_and_replays() {
    let mut world = World::new();
    world.seed_chain();
    let scanner = Scanner::new(
        Ledger::new_in_memory().unwrap(),
        world.node.clone(),
        world.config.clone(),
    );
    scanner.catch_up().await.unwrap();
    assert_eq!(scanner.ledger().balance(&world.bob(), "TESTCOIN").unwrap(), 250 * UNIT);

    // The send block is orphaned by a longer branch without it.
    world.node.truncate(2);
    world.node.push_block(block_hash(202), Vec::new());
    world.node.push_block(block_hash(203), Vec::new());
    scanner.catch_up().await.unwrap();

    let ledger = scanner.ledger();
    assert_eq!(ledger.last_block().unwrap().unwrap().block_index, 103);
    assert_eq!(ledger.balance(&world.bob(), "TESTCOIN").unwrap(), 0);
    assert_eq!(ledger.balance(&world.alice, "TESTCOIN").unwrap(), 1_000 * UNIT);
}

#[tokio::test]
async fn same_height_reorg_is_detected() {
    let mut world = World::new();
    world.seed_chain();
    let scanner = Scanner::new(
        Ledger::new_in_memory().unwrap(),
        world.node.clone(),
        world.config.clone(),
    );
    scanner.catch_up().await.unwrap();
    assert_eq!(scanner.ledger().balance(&world.bob(), "TESTCOIN").unwrap(), 250 * UNIT);

    // The tip block is replaced without the chain getting any longer.
    world.node.truncate(2);
    world.node.push_block(block_hash(202), Vec::new());
    scanner.catch_up().await.unwrap();

    let ledger = scanner.ledger();
    let last = ledger.last_block().unwrap().unwrap();
    assert_eq!(last.block_index, 102);
    assert_eq!(last.block_hash, block_hash(202).to_string());
    assert_eq!(ledger.balance(&world.bob(), "TESTCOIN").unwrap(), 0);
    assert_eq!(ledger.balance(&world.alice, "TESTCOIN").unwrap(), 1_000 * UNIT);
}

#[tokio::test]
async fn reparse_reproduces_the_message_log() {
    let mut world = World::new();
    world.seed_chain();
    let scanner = Scanner::new(
        Ledger::new_in_memory().unwrap(),
        world.node.clone(),
        world.config.clone(),
    );
    scanner.catch_up().await.unwrap();

    let before = scanner.ledger().messages().unwrap();
    assert!(!before.is_empty());
    scanner.reparse().unwrap();
    let after = scanner.ledger().messages().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn expired_order_refunds_its_escrow() {
    let mut world = World::new();
    world.seed_chain();

    // An order with a one-block lifetime, then an empty block.
    let mut body = Vec::new();
    body.extend_from_slice(&asset_id("TESTCOIN").unwrap().to_be_bytes());
    body.extend_from_slice(&(100 * UNIT as u64).to_be_bytes());
    body.extend_from_slice(&asset_id("XCP").unwrap().to_be_bytes());
    body.extend_from_slice(&(UNIT as u64).to_be_bytes());
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&0u64.to_be_bytes());
    let data = world.payload(10, &body);
    let order = world.protocol_tx(
        13,
        vec![TxOutput {
            value: 0,
            script: op_return_script(&data),
        }],
    );
    world.node.push_block(block_hash(103), vec![order]);
    world.node.push_block(block_hash(104), Vec::new());

    let scanner = Scanner::new(
        Ledger::new_in_memory().unwrap(),
        world.node.clone(),
        world.config.clone(),
    );
    scanner.catch_up().await.unwrap();

    let ledger = scanner.ledger();
    assert_eq!(ledger.balance(&world.alice, "TESTCOIN").unwrap(), 750 * UNIT);
    let order_row = ledger.order_by_hash(&tx_hash(13).to_string()).unwrap().unwrap();
    assert_eq!(order_row.status, "expired");
}
