//! Simple asset transfer.
//!
//! Body: asset id (u64), quantity (u64). A quantity exceeding the
//! sender's balance is clamped down to the full balance rather than
//! invalidated; the clamped quantity is what the send row records.
use anyhow::Result;

use super::{message_data, quantity, MessageType, Reader};
use crate::config::{Config, BTC};
use crate::errors::LedgerError;
use crate::store::{Ledger, SendRow, TransactionRow};
use crate::util::{asset_id, asset_name};

fn validate(asset: &str, qty: i64, destination: Option<&str>) -> Vec<String> {
    let mut problems = Vec::new();
    if asset == BTC {
        problems.push("cannot send BTC".to_string());
    }
    if qty <= 0 {
        problems.push("non-positive quantity".to_string());
    }
    if destination.is_none() {
        problems.push("no destination".to_string());
    }
    problems
}

/// Build a send payload, refusing anything that could not parse as
/// valid.
pub fn compose(
    ledger: &Ledger,
    config: &Config,
    source: &str,
    destination: &str,
    asset: &str,
    qty: i64,
) -> Result<Vec<u8>> {
    let mut problems = validate(asset, qty, Some(destination));
    let id = match asset_id(asset) {
        Ok(id) => id,
        Err(e) => {
            problems.push(e.to_string());
            0
        }
    };
    if asset != BTC && ledger.balance(source, asset)? < qty {
        problems.push("insufficient funds".to_string());
    }
    if !problems.is_empty() {
        return Err(LedgerError::Compose { problems }.into());
    }
    let mut body = Vec::with_capacity(16);
    body.extend_from_slice(&id.to_be_bytes());
    body.extend_from_slice(&(qty as u64).to_be_bytes());
    Ok(message_data(config, MessageType::Send, &body))
}

/// Apply a send transaction.
pub fn parse(ledger: &Ledger, _config: &Config, tx: &TransactionRow, body: &[u8]) -> Result<()> {
    let mut asset = None;
    let mut qty = 0i64;
    let mut status = "valid".to_string();

    let mut r = Reader::new(body);
    match (r.u64(), r.u64(), r.done()) {
        (Some(id), Some(raw), true) => {
            match asset_name(id) {
                Ok(name) => asset = Some(name),
                Err(_) => status = "invalid: bad asset id".to_string(),
            }
            match quantity(raw) {
                Some(q) => qty = q,
                None => status = "invalid: integer overflow".to_string(),
            }
        }
        _ => status = "invalid: could not unpack".to_string(),
    }

    if status == "valid" {
        let asset = asset.as_deref().unwrap_or_default();
        let problems = validate(asset, qty, tx.destination.as_deref());
        if let Some(p) = problems.first() {
            status = format!("invalid: {p}");
        }
    }

    if status == "valid" {
        // Oversends spend the whole balance instead of failing.
        let asset = asset.as_deref().unwrap_or_default();
        let held = ledger.balance(&tx.source, asset)?;
        if held < qty {
            qty = held;
        }
        if qty == 0 {
            status = "invalid: insufficient funds".to_string();
        }
    }

    if status == "valid" {
        let asset = asset.as_deref().unwrap_or_default();
        let destination = tx.destination.as_deref().unwrap_or_default();
        ledger.debit(tx.block_index, &tx.source, asset, qty, "send", &tx.tx_hash)?;
        ledger.credit(tx.block_index, destination, asset, qty, "send", &tx.tx_hash)?;
    }

    ledger.insert_send(&SendRow {
        tx_index: tx.tx_index,
        tx_hash: tx.tx_hash.clone(),
        block_index: tx.block_index,
        source: tx.source.clone(),
        destination: tx.destination.clone(),
        asset,
        quantity: qty,
        status,
    })
}
