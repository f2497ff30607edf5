//! Asset issuance: creation, reissuance, locking, and ownership
//! transfer.
//!
//! Two wire generations. The original body is asset id (u64), quantity
//! (u64), divisible (u8); the extended body appends callable (u8), call
//! date (u32), call price (f32), and a free-form description. A message
//! whose destination is set transfers ownership of the asset to that
//! destination and must carry a zero quantity. A description of exactly
//! "LOCK" freezes future issuance forever.
use anyhow::Result;

use super::{message_data, quantity, MessageType, Reader};
use crate::config::{Config, WireVariant, BTC, XCP};
use crate::errors::LedgerError;
use crate::store::{IssuanceRow, Ledger, TransactionRow};
use crate::util::{asset_id, asset_name};

struct Unpacked {
    asset: String,
    quantity: i64,
    divisible: bool,
    callable: bool,
    call_date: u32,
    call_price: f64,
    description: String,
}

fn unpack(body: &[u8], variant: WireVariant) -> Result<Unpacked, String> {
    let mut r = Reader::new(body);
    let (id, raw, div) = match (r.u64(), r.u64(), r.u8()) {
        (Some(id), Some(raw), Some(div)) => (id, raw, div != 0),
        _ => return Err("could not unpack".to_string()),
    };
    let asset = asset_name(id).map_err(|_| "bad asset id".to_string())?;
    let qty = quantity(raw).ok_or_else(|| "integer overflow".to_string())?;
    let mut out = Unpacked {
        asset,
        quantity: qty,
        divisible: div,
        callable: false,
        call_date: 0,
        call_price: 0.0,
        description: String::new(),
    };
    if variant == WireVariant::V1 {
        match (r.u8(), r.u32(), r.f32()) {
            (Some(callable), Some(date), Some(price)) => {
                out.callable = callable != 0;
                out.call_date = date;
                out.call_price = price as f64;
                out.description = String::from_utf8_lossy(r.rest()).into_owned();
            }
            _ => return Err("could not unpack".to_string()),
        }
    } else if !r.done() {
        return Err("could not unpack".to_string());
    }
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn validate(
    ledger: &Ledger,
    source: &str,
    asset: &str,
    qty: i64,
    divisible: bool,
    callable: bool,
    call_date: u32,
    call_price: f64,
    transfer: bool,
) -> Result<Vec<String>> {
    let mut problems = Vec::new();
    if asset == BTC || asset == XCP {
        problems.push(format!("cannot issue {asset}"));
    }
    if qty < 0 {
        problems.push("negative quantity".to_string());
    }
    if transfer && qty != 0 {
        problems.push("cannot issue and transfer at once".to_string());
    }
    match ledger.last_issuance(asset)? {
        Some(prev) => {
            if prev.issuer != source {
                problems.push("asset belongs to another address".to_string());
            }
            if prev.divisible != divisible {
                problems.push("divisibility mismatch".to_string());
            }
            if prev.callable != callable
                || prev.call_date != call_date
                || prev.call_price != call_price
            {
                problems.push("call terms mismatch".to_string());
            }
            if qty > 0 && ledger.asset_locked(asset)? {
                problems.push("locked asset".to_string());
            }
        }
        None => {
            if transfer {
                problems.push("cannot transfer an asset that does not exist".to_string());
            }
            if qty == 0 && !transfer {
                problems.push("zero quantity for a new asset".to_string());
            }
        }
    }
    // Cumulative supply over all valid issuances must stay representable.
    if qty > 0 && ledger.asset_issued(asset)?.checked_add(qty).is_none() {
        problems.push("total quantity overflow".to_string());
    }
    Ok(problems)
}

/// Build an issuance payload, refusing anything that could not parse as
/// valid.
#[allow(clippy::too_many_arguments)]
pub fn compose(
    ledger: &Ledger,
    config: &Config,
    source: &str,
    asset: &str,
    qty: i64,
    divisible: bool,
    callable: bool,
    call_date: u32,
    call_price: f64,
    description: &str,
    transfer: bool,
    at_block: u32,
) -> Result<Vec<u8>> {
    let mut problems = validate(
        ledger, source, asset, qty, divisible, callable, call_date, call_price, transfer,
    )?;
    let id = match asset_id(asset) {
        Ok(id) => id,
        Err(e) => {
            problems.push(e.to_string());
            0
        }
    };
    let fee = config.issuance_fee.at(at_block, config.testnet);
    if !transfer && ledger.balance(source, XCP)? < fee {
        problems.push("insufficient funds to pay issuance fee".to_string());
    }
    if !problems.is_empty() {
        return Err(LedgerError::Compose { problems }.into());
    }
    let mut body = Vec::with_capacity(26 + description.len());
    body.extend_from_slice(&id.to_be_bytes());
    body.extend_from_slice(&(qty as u64).to_be_bytes());
    body.push(divisible as u8);
    if config.issuance_format.at(at_block, config.testnet) == WireVariant::V1 {
        body.push(callable as u8);
        body.extend_from_slice(&call_date.to_be_bytes());
        body.extend_from_slice(&(call_price as f32).to_be_bytes());
        body.extend_from_slice(description.as_bytes());
    }
    Ok(message_data(config, MessageType::Issuance, &body))
}

/// Apply an issuance transaction.
pub fn parse(ledger: &Ledger, config: &Config, tx: &TransactionRow, body: &[u8]) -> Result<()> {
    let variant = config.issuance_format.at(tx.block_index, config.testnet);
    let transfer = tx.destination.is_some();
    let mut status = "valid".to_string();

    let mut unpacked = match unpack(body, variant) {
        Ok(u) => u,
        Err(reason) => {
            status = format!("invalid: {reason}");
            Unpacked {
                asset: String::new(),
                quantity: 0,
                divisible: true,
                callable: false,
                call_date: 0,
                call_price: 0.0,
                description: String::new(),
            }
        }
    };

    if status == "valid" {
        let problems = validate(
            ledger,
            &tx.source,
            &unpacked.asset,
            unpacked.quantity,
            unpacked.divisible,
            unpacked.callable,
            unpacked.call_date,
            unpacked.call_price,
            transfer,
        )?;
        if problems.iter().any(|p| p == "total quantity overflow") {
            unpacked.quantity = 0;
        }
        if let Some(p) = problems.first() {
            status = format!("invalid: {p}");
        }
    }

    let mut fee_paid = 0i64;
    if status == "valid" && !transfer {
        let fee = config.issuance_fee.at(tx.block_index, config.testnet);
        if ledger.balance(&tx.source, XCP)? < fee {
            status = "invalid: insufficient funds to pay issuance fee".to_string();
        } else if fee > 0 {
            ledger.debit(tx.block_index, &tx.source, XCP, fee, "issuance fee", &tx.tx_hash)?;
            fee_paid = fee;
        }
    }

    if status == "valid" && unpacked.quantity > 0 {
        ledger.credit(
            tx.block_index,
            &tx.source,
            &unpacked.asset,
            unpacked.quantity,
            "issuance",
            &tx.tx_hash,
        )?;
    }

    let locked = status == "valid" && unpacked.description.trim() == "LOCK";
    let issuer = if status == "valid" && transfer {
        tx.destination.clone().unwrap_or_else(|| tx.source.clone())
    } else {
        tx.source.clone()
    };
    ledger.insert_issuance(&IssuanceRow {
        tx_index: tx.tx_index,
        tx_hash: tx.tx_hash.clone(),
        block_index: tx.block_index,
        asset: unpacked.asset,
        quantity: unpacked.quantity,
        divisible: unpacked.divisible,
        source: tx.source.clone(),
        issuer,
        transfer,
        callable: unpacked.callable,
        call_date: unpacked.call_date,
        call_price: unpacked.call_price,
        description: unpacked.description,
        fee_paid,
        locked,
        status,
    })
}
