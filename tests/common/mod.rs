//! Shared helpers for driving the state machine directly.
use anyhow::Result;
use sobrecapa::config::UNIT;
use sobrecapa::store::TransactionRow;
use sobrecapa::{Config, Ledger};

/// Test network with a burn cap high enough to fund issuance fees.
pub fn test_config() -> Config {
    let mut config = Config::testnet();
    config.max_burn = 100 * UNIT;
    config
}

/// Composed payloads carry the prefix; stored transaction data does
/// not.
pub fn strip_prefix(config: &Config, data: Vec<u8>) -> Vec<u8> {
    data[config.prefix.len()..].to_vec()
}

/// Store and parse one synthetic protocol transaction.
#[allow(clippy::too_many_arguments)]
pub fn apply(
    ledger: &Ledger,
    config: &Config,
    block_index: u32,
    block_time: u32,
    source: &str,
    destination: Option<&str>,
    btc_amount: i64,
    data: Vec<u8>,
) -> Result<TransactionRow> {
    let tx_index = ledger.next_tx_index()?;
    let tx = TransactionRow {
        tx_index,
        tx_hash: format!("{:064x}", tx_index + 1),
        block_index,
        block_hash: format!("{block_index:064x}"),
        block_time,
        source: source.to_string(),
        destination: destination.map(str::to_string),
        btc_amount,
        fee: 10_000,
        data,
        supported: true,
    };
    ledger.insert_transaction(&tx)?;
    sobrecapa::messages::handle(ledger, config, &tx)?;
    Ok(tx)
}

/// Burn BTC for XCP at the given block.
pub fn burn(
    ledger: &Ledger,
    config: &Config,
    block_index: u32,
    source: &str,
    satoshis: i64,
) -> Result<()> {
    apply(
        ledger,
        config,
        block_index,
        1_600_000_000,
        source,
        Some(config.unspendable.as_str()),
        satoshis,
        Vec::new(),
    )?;
    Ok(())
}
