//! Feed broadcasts and the bet settlement they drive.
//!
//! Body: timestamp (u32), value (f64), fee fraction scaled by 1e8
//! (u32), free-form text. Timestamps must strictly increase per feed; a
//! text of "LOCK" (any case) locks the feed forever. The values -2 and -3
//! are sentinels: -2 cancels the feed's open bets, -3 drops its pending
//! bet matches. Any other valid broadcast is run against the feed's
//! pending matches: contracts-for-difference settle (or liquidate) by
//! the published value, equality bets settle once the deadline passes.
use anyhow::Result;

use super::{message_data, MessageType, Reader};
use crate::config::Config;
use crate::errors::LedgerError;
use crate::store::{BetMatchRow, BroadcastRow, Ledger, TransactionRow};

/// Bull/bear contract-for-difference bet types.
pub(crate) const BET_BULL_CFD: u16 = 0;
pub(crate) const BET_BEAR_CFD: u16 = 1;
/// Equality bet types.
pub(crate) const BET_EQUAL: u16 = 2;
pub(crate) const BET_NOT_EQUAL: u16 = 3;

fn fee_of(total: i64, fee_fraction_int: i64) -> i64 {
    ((total as i128 * fee_fraction_int as i128) / 100_000_000) as i64
}

/// Build a broadcast payload, refusing anything that could not parse as
/// valid.
pub fn compose(
    ledger: &Ledger,
    config: &Config,
    source: &str,
    timestamp: u32,
    value: f64,
    fee_fraction_int: i64,
    text: &str,
) -> Result<Vec<u8>> {
    let mut problems = Vec::new();
    if ledger.feed_locked(source)? {
        problems.push("locked feed".to_string());
    }
    if let Some(last) = ledger.last_broadcast(source)? {
        if timestamp <= last.timestamp {
            problems.push("feed timestamps not monotonically increasing".to_string());
        }
    }
    if !(0..=u32::MAX as i64).contains(&fee_fraction_int) {
        problems.push("fee fraction out of range".to_string());
    }
    if !problems.is_empty() {
        return Err(LedgerError::Compose { problems }.into());
    }
    let mut body = Vec::with_capacity(16 + text.len());
    body.extend_from_slice(&timestamp.to_be_bytes());
    body.extend_from_slice(&value.to_be_bytes());
    body.extend_from_slice(&(fee_fraction_int as u32).to_be_bytes());
    body.extend_from_slice(text.as_bytes());
    Ok(message_data(config, MessageType::Broadcast, &body))
}

/// Apply a broadcast transaction, then settle against it.
pub fn parse(ledger: &Ledger, _config: &Config, tx: &TransactionRow, body: &[u8]) -> Result<()> {
    let mut timestamp = 0u32;
    let mut value = 0.0f64;
    let mut fee_fraction_int = 0i64;
    let mut text = String::new();
    let mut status = "valid".to_string();

    let mut r = Reader::new(body);
    match (r.u32(), r.f64(), r.u32()) {
        (Some(ts), Some(v), Some(ff)) => {
            timestamp = ts;
            value = v;
            fee_fraction_int = ff as i64;
            text = String::from_utf8_lossy(r.rest()).into_owned();
        }
        _ => status = "invalid: could not unpack".to_string(),
    }

    if status == "valid" {
        if ledger.feed_locked(&tx.source)? {
            status = "invalid: locked feed".to_string();
        } else if let Some(last) = ledger.last_broadcast(&tx.source)? {
            if timestamp <= last.timestamp {
                status = "invalid: feed timestamps not monotonically increasing".to_string();
            }
        }
    }

    let locked = status == "valid" && text.trim().eq_ignore_ascii_case("LOCK");
    let valid = status == "valid";
    ledger.insert_broadcast(&BroadcastRow {
        tx_index: tx.tx_index,
        tx_hash: tx.tx_hash.clone(),
        block_index: tx.block_index,
        source: tx.source.clone(),
        timestamp,
        value,
        fee_fraction_int,
        text,
        locked,
        status,
    })?;
    if !valid || locked {
        return Ok(());
    }

    if value == -2.0 {
        for bet in ledger.open_bets_for_feed(&tx.source)? {
            super::bet::close_bet(ledger, tx.block_index, &bet, "dropped", &tx.tx_hash)?;
        }
        return Ok(());
    }
    if value == -3.0 {
        for m in ledger.pending_bet_matches(&tx.source)? {
            super::bet::refund_bet_match(ledger, tx.block_index, &m)?;
            ledger.update_bet_match_status(tx.block_index, &m.id, "dropped")?;
        }
        return Ok(());
    }

    for m in ledger.pending_bet_matches(&tx.source)? {
        settle(ledger, tx.block_index, &m, timestamp, value)?;
    }
    Ok(())
}

/// Settle one pending match against a published value, if it resolves.
fn settle(
    ledger: &Ledger,
    block_index: u32,
    m: &BetMatchRow,
    timestamp: u32,
    value: f64,
) -> Result<()> {
    let total = m.forward_quantity + m.backward_quantity;
    let fee = fee_of(total, m.fee_fraction_int);
    let escrow_less_fee = total - fee;

    let cfd = m.tx0_bet_type == BET_BULL_CFD || m.tx0_bet_type == BET_BEAR_CFD;
    if cfd {
        if m.initial_value == 0.0 {
            return Ok(());
        }
        let (bull_address, bull_escrow, bear_address) = if m.tx0_bet_type == BET_BULL_CFD {
            (&m.tx0_address, m.forward_quantity, &m.tx1_address)
        } else {
            (&m.tx1_address, m.backward_quantity, &m.tx0_address)
        };
        let leverage = m.leverage as f64 / 5040.0;
        let change = (value - m.initial_value) / m.initial_value;
        let raw = bull_escrow as f64 * (1.0 + leverage * change);
        let bull_credit = (raw.floor() as i64).clamp(0, escrow_less_fee);

        let status = if raw <= 0.0 {
            pay(ledger, block_index, bear_address, escrow_less_fee, &m.id)?;
            "settled: liquidated for bear"
        } else if raw >= escrow_less_fee as f64 {
            pay(ledger, block_index, bull_address, escrow_less_fee, &m.id)?;
            "settled: liquidated for bull"
        } else if timestamp >= m.deadline {
            pay(ledger, block_index, bull_address, bull_credit, &m.id)?;
            pay(ledger, block_index, bear_address, escrow_less_fee - bull_credit, &m.id)?;
            "settled"
        } else {
            return Ok(());
        };
        pay_fee(ledger, block_index, &m.feed_address, fee, &m.id)?;
        return ledger.update_bet_match_status(block_index, &m.id, status);
    }

    // Equality bets only resolve at the deadline.
    if timestamp < m.deadline {
        return Ok(());
    }
    let (equal_address, not_equal_address) = if m.tx0_bet_type == BET_EQUAL {
        (&m.tx0_address, &m.tx1_address)
    } else {
        (&m.tx1_address, &m.tx0_address)
    };
    let status = if value == m.target_value {
        pay(ledger, block_index, equal_address, escrow_less_fee, &m.id)?;
        "settled: for equal"
    } else {
        pay(ledger, block_index, not_equal_address, escrow_less_fee, &m.id)?;
        "settled: for notequal"
    };
    pay_fee(ledger, block_index, &m.feed_address, fee, &m.id)?;
    ledger.update_bet_match_status(block_index, &m.id, status)
}

fn pay(ledger: &Ledger, block_index: u32, address: &str, quantity: i64, event: &str) -> Result<()> {
    if quantity > 0 {
        ledger.credit(
            block_index,
            address,
            crate::config::XCP,
            quantity,
            "bet settled",
            event,
        )?;
    }
    Ok(())
}

fn pay_fee(ledger: &Ledger, block_index: u32, feed: &str, fee: i64, event: &str) -> Result<()> {
    if fee > 0 {
        ledger.credit(block_index, feed, crate::config::XCP, fee, "feed fee", event)?;
    }
    Ok(())
}
