//! Proof of burn: BTC paid to the unspendable address becomes XCP.
//!
//! A burn has no payload; it is recognized by its destination alone,
//! so even a prefixless transaction to the unspendable address counts.
//! Burns are only valid inside the burn window, each address may burn
//! at most the lifetime cap (the excess is ignored, not refunded), and
//! the XCP multiplier decays linearly from 1.5 at the window's start
//! to 1.0 at its end.
use anyhow::Result;

use super::{message_data, MessageType};
use crate::config::{Config, MAX_INT, XCP};
use crate::errors::LedgerError;
use crate::store::{BurnRow, Ledger, TransactionRow};

/// XCP satoshis earned by burning `burned` satoshis at `block_index`.
fn earned(config: &Config, block_index: u32, burned: i64) -> i64 {
    let total_time = (config.burn_end - config.burn_start) as i128;
    let partial_time = (config.burn_end.saturating_sub(block_index)) as i128;
    let e = burned as i128 * (1000 * total_time + 500 * partial_time) / (1000 * total_time);
    e.clamp(0, MAX_INT as i128) as i64
}

/// Build a burn payload. The burn itself is carried by paying the
/// unspendable address; the payload only tags the transaction.
pub fn compose(
    ledger: &Ledger,
    config: &Config,
    source: &str,
    quantity: i64,
    at_block: u32,
) -> Result<Vec<u8>> {
    let mut problems = Vec::new();
    if quantity <= 0 {
        problems.push("non-positive quantity".to_string());
    }
    if at_block < config.burn_start || at_block > config.burn_end {
        problems.push("outside the burn window".to_string());
    }
    if !config.overburn && ledger.burned_by(source)? + quantity > config.max_burn {
        problems.push("would exceed the lifetime burn cap".to_string());
    }
    if !problems.is_empty() {
        return Err(LedgerError::Compose { problems }.into());
    }
    Ok(message_data(config, MessageType::Burn, &[]))
}

/// Apply a burn transaction.
pub fn parse(ledger: &Ledger, config: &Config, tx: &TransactionRow) -> Result<()> {
    let mut status = "valid".to_string();
    if tx.block_index < config.burn_start {
        status = "invalid: too early".to_string();
    } else if tx.block_index > config.burn_end {
        status = "invalid: too late".to_string();
    } else if tx.btc_amount <= 0 {
        status = "invalid: no BTC burned".to_string();
    }

    let mut burned = tx.btc_amount;
    if status == "valid" && !config.overburn {
        // The excess above the lifetime cap is simply forfeited.
        let remaining = config.max_burn - ledger.burned_by(&tx.source)?;
        burned = burned.min(remaining.max(0));
        if burned == 0 {
            status = "invalid: exceeded the lifetime burn cap".to_string();
        }
    }

    let mut minted = 0i64;
    if status == "valid" {
        minted = earned(config, tx.block_index, burned);
        ledger.credit(tx.block_index, &tx.source, XCP, minted, "burn", &tx.tx_hash)?;
    } else {
        burned = 0;
    }

    ledger.insert_burn(&BurnRow {
        tx_index: tx.tx_index,
        tx_hash: tx.tx_hash.clone(),
        block_index: tx.block_index,
        source: tx.source.clone(),
        burned,
        earned: minted,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplier_decays_from_1500_to_1000() {
        let config = Config::mainnet();
        assert_eq!(earned(&config, config.burn_start, 100_000_000), 150_000_000);
        assert_eq!(earned(&config, config.burn_end, 100_000_000), 100_000_000);
        let mid = config.burn_start + (config.burn_end - config.burn_start) / 2;
        assert_eq!(earned(&config, mid, 100_000_000), 125_000_000);
    }
}
