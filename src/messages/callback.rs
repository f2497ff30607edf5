//! Callback of a callable asset by its issuer.
//!
//! Body: fraction called back (f64), asset id (u64). From the call
//! date on, the issuer may buy back a fraction of every outstanding
//! position at the call price, paid in XCP. The asset's open orders and
//! pending order matches are closed first so the called units are all
//! in free balances. Disabled on networks whose deployment never
//! activated callbacks.
use anyhow::Result;

use super::{message_data, MessageType, Reader};
use crate::config::{Config, XCP};
use crate::errors::LedgerError;
use crate::store::{CallbackRow, IssuanceRow, Ledger, TransactionRow};
use crate::util::{asset_id, asset_name};

fn validate(
    config: &Config,
    source: &str,
    fraction: f64,
    issuance: Option<&IssuanceRow>,
    block_time: u32,
) -> Vec<String> {
    let mut problems = Vec::new();
    if !config.callbacks_enabled {
        problems.push("callbacks disabled".to_string());
    }
    if !(fraction > 0.0 && fraction <= 1.0) {
        problems.push("fraction not in (0, 1]".to_string());
    }
    match issuance {
        None => problems.push("no such asset".to_string()),
        Some(i) => {
            if !i.callable {
                problems.push("asset is not callable".to_string());
            } else if block_time < i.call_date {
                problems.push("before the call date".to_string());
            }
            if i.issuer != source {
                problems.push("asset belongs to another address".to_string());
            }
        }
    }
    problems
}

/// XCP owed for calling back `units` at `call_price`. Asset units and
/// XCP satoshis share the same scale, divisible or not.
fn call_cost(units: i64, call_price: f64) -> i64 {
    (units as f64 * call_price).floor() as i64
}

/// Build a callback payload, refusing anything that could not parse as
/// valid.
pub fn compose(
    ledger: &Ledger,
    config: &Config,
    source: &str,
    fraction: f64,
    asset: &str,
    block_time: u32,
) -> Result<Vec<u8>> {
    let issuance = ledger.last_issuance(asset)?;
    let mut problems = validate(config, source, fraction, issuance.as_ref(), block_time);
    let id = match asset_id(asset) {
        Ok(id) => id,
        Err(e) => {
            problems.push(e.to_string());
            0
        }
    };
    if let Some(i) = &issuance {
        let mut cost = 0i64;
        for h in ledger.holders(asset)? {
            if h.address == source {
                continue;
            }
            cost += call_cost((h.quantity as f64 * fraction).floor() as i64, i.call_price);
        }
        if ledger.balance(source, XCP)? < cost {
            problems.push("insufficient funds".to_string());
        }
    }
    if !problems.is_empty() {
        return Err(LedgerError::Compose { problems }.into());
    }
    let mut body = Vec::with_capacity(16);
    body.extend_from_slice(&fraction.to_be_bytes());
    body.extend_from_slice(&id.to_be_bytes());
    Ok(message_data(config, MessageType::Callback, &body))
}

/// Apply a callback transaction.
pub fn parse(ledger: &Ledger, config: &Config, tx: &TransactionRow, body: &[u8]) -> Result<()> {
    let mut fraction = 0.0f64;
    let mut asset = None;
    let mut status = "valid".to_string();

    let mut r = Reader::new(body);
    match (r.f64(), r.u64(), r.done()) {
        (Some(f), Some(id), true) => {
            fraction = f;
            match asset_name(id) {
                Ok(name) => asset = Some(name),
                Err(_) => status = "invalid: bad asset id".to_string(),
            }
        }
        _ => status = "invalid: could not unpack".to_string(),
    }

    let issuance = match &asset {
        Some(a) => ledger.last_issuance(a)?,
        None => None,
    };
    if status == "valid" {
        let problems = validate(config, &tx.source, fraction, issuance.as_ref(), tx.block_time);
        if let Some(p) = problems.first() {
            status = format!("invalid: {p}");
        }
    }
    if status == "valid" {
        let a = asset.as_deref().unwrap_or_default();
        let call_price = issuance.as_ref().map(|i| i.call_price).unwrap_or(0.0);

        // Free the asset's escrowed units so every position can be
        // called from a balance.
        for order in ledger.open_orders_for_asset(a)? {
            super::order::close_order(ledger, tx.block_index, &order, "cancelled", &tx.tx_hash)?;
        }
        for m in ledger.pending_order_matches_for_asset(a)? {
            super::order::unwind_order_match(ledger, tx.block_index, &m, "cancelled")?;
        }

        let mut calls = Vec::new();
        let mut cost = 0i64;
        for h in ledger.holders(a)? {
            if h.address == tx.source || h.escrow.is_some() {
                continue;
            }
            let units = (h.quantity as f64 * fraction).floor() as i64;
            if units <= 0 {
                continue;
            }
            let owed = call_cost(units, call_price);
            cost += owed;
            calls.push((h.address, units, owed));
        }

        if ledger.balance(&tx.source, XCP)? < cost {
            status = "invalid: insufficient funds".to_string();
        } else {
            for (address, units, owed) in calls {
                ledger.debit(tx.block_index, &address, a, units, "callback", &tx.tx_hash)?;
                ledger.credit(tx.block_index, &tx.source, a, units, "callback", &tx.tx_hash)?;
                if owed > 0 {
                    ledger.debit(tx.block_index, &tx.source, XCP, owed, "callback", &tx.tx_hash)?;
                    ledger.credit(tx.block_index, &address, XCP, owed, "callback", &tx.tx_hash)?;
                }
            }
        }
    }

    ledger.insert_callback(&CallbackRow {
        tx_index: tx.tx_index,
        tx_hash: tx.tx_hash.clone(),
        block_index: tx.block_index,
        source: tx.source.clone(),
        fraction,
        asset,
        status,
    })
}
