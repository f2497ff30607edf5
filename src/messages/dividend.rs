//! Dividends to the holders of an asset.
//!
//! Two wire generations. The original body is quantity per unit (u64)
//! and asset id (u64), paying in XCP; the extended body appends the id
//! of the asset to pay in. Which holdings qualify changed at the
//! dividend-policy height: originally free balances only (the payer
//! included), later every holding location with the payer excluded.
//! Dividends paid in BTC drop per-holder payouts below the dust size
//! and settle through the transaction's own outputs, never the ledger.
use anyhow::Result;

use super::{message_data, quantity, MessageType, Reader};
use crate::config::{Config, DividendPolicy, WireVariant, BTC, UNIT, XCP};
use crate::errors::LedgerError;
use crate::store::{DividendRow, Holder, Ledger, TransactionRow};
use crate::util::{asset_id, asset_name};

fn validate(asset: &str, quantity_per_unit: i64) -> Vec<String> {
    let mut problems = Vec::new();
    if asset == BTC || asset == XCP {
        problems.push(format!("cannot pay dividends to holders of {asset}"));
    }
    if quantity_per_unit <= 0 {
        problems.push("non-positive quantity per unit".to_string());
    }
    problems
}

/// Qualifying holders and the total payable, under the active policy.
/// BTC payouts below the dust size are dropped.
fn payouts(
    ledger: &Ledger,
    config: &Config,
    block_index: u32,
    source: &str,
    asset: &str,
    dividend_asset: &str,
    quantity_per_unit: i64,
) -> Result<Vec<(String, i64)>> {
    let divisible = ledger
        .last_issuance(asset)?
        .map(|i| i.divisible)
        .unwrap_or(true);
    let per = if divisible { UNIT } else { 1 };
    let policy = config.dividend_policy.at(block_index, config.testnet);
    let holders: Vec<Holder> = match policy {
        DividendPolicy::FreeBalancesIncludeIssuer => ledger
            .holders(asset)?
            .into_iter()
            .filter(|h| h.escrow.is_none())
            .collect(),
        DividendPolicy::AllHoldingsExcludeSource => ledger
            .holders(asset)?
            .into_iter()
            .filter(|h| h.address != source)
            .collect(),
    };
    let floor = if dividend_asset == BTC { config.dust_size } else { 1 };
    let mut out = Vec::new();
    for h in holders {
        let amount = ((h.quantity as i128 * quantity_per_unit as i128) / per as i128) as i64;
        if amount >= floor {
            out.push((h.address, amount));
        }
    }
    Ok(out)
}

/// Build a dividend payload, refusing anything that could not parse as
/// valid.
pub fn compose(
    ledger: &Ledger,
    config: &Config,
    source: &str,
    asset: &str,
    dividend_asset: &str,
    quantity_per_unit: i64,
    at_block: u32,
) -> Result<Vec<u8>> {
    let mut problems = validate(asset, quantity_per_unit);
    let variant = config.dividend_format.at(at_block, config.testnet);
    if variant == WireVariant::V0 && dividend_asset != XCP {
        problems.push("dividend asset not yet supported".to_string());
    }
    let mut ids = [0u64; 2];
    for (slot, name) in ids.iter_mut().zip([asset, dividend_asset]) {
        match asset_id(name) {
            Ok(id) => *slot = id,
            Err(e) => problems.push(e.to_string()),
        }
    }
    if ledger.last_issuance(asset)?.is_none() {
        problems.push("no such asset".to_string());
    }
    if problems.is_empty() {
        let total: i64 = payouts(
            ledger, config, at_block, source, asset, dividend_asset, quantity_per_unit,
        )?
        .iter()
        .map(|(_, q)| q)
        .sum();
        if total == 0 {
            problems.push("zero dividend".to_string());
        } else if dividend_asset != BTC && ledger.balance(source, dividend_asset)? < total {
            problems.push("insufficient funds".to_string());
        }
    }
    if !problems.is_empty() {
        return Err(LedgerError::Compose { problems }.into());
    }
    let mut body = Vec::with_capacity(24);
    body.extend_from_slice(&(quantity_per_unit as u64).to_be_bytes());
    body.extend_from_slice(&ids[0].to_be_bytes());
    if variant == WireVariant::V1 {
        body.extend_from_slice(&ids[1].to_be_bytes());
    }
    Ok(message_data(config, MessageType::Dividend, &body))
}

/// Apply a dividend transaction.
pub fn parse(ledger: &Ledger, config: &Config, tx: &TransactionRow, body: &[u8]) -> Result<()> {
    let variant = config.dividend_format.at(tx.block_index, config.testnet);
    let mut asset = None;
    let mut dividend_asset = None;
    let mut quantity_per_unit = 0i64;
    let mut status = "valid".to_string();

    let mut r = Reader::new(body);
    let fields = match variant {
        WireVariant::V0 => match (r.u64(), r.u64(), r.done()) {
            (Some(qpu), Some(id), true) => Some((qpu, id, None)),
            _ => None,
        },
        WireVariant::V1 => match (r.u64(), r.u64(), r.u64(), r.done()) {
            (Some(qpu), Some(id), Some(did), true) => Some((qpu, id, Some(did))),
            _ => None,
        },
    };
    match fields {
        Some((qpu_raw, id, did)) => {
            match quantity(qpu_raw) {
                Some(q) => quantity_per_unit = q,
                None => status = "invalid: integer overflow".to_string(),
            }
            match asset_name(id) {
                Ok(name) => asset = Some(name),
                Err(_) => status = "invalid: bad asset id".to_string(),
            }
            match did {
                None => dividend_asset = Some(XCP.to_string()),
                Some(did) => match asset_name(did) {
                    Ok(name) => dividend_asset = Some(name),
                    Err(_) => status = "invalid: bad dividend asset id".to_string(),
                },
            }
        }
        None => status = "invalid: could not unpack".to_string(),
    }

    if status == "valid" {
        let asset = asset.as_deref().unwrap_or_default();
        let problems = validate(asset, quantity_per_unit);
        if let Some(p) = problems.first() {
            status = format!("invalid: {p}");
        } else if ledger.last_issuance(asset)?.is_none() {
            status = "invalid: no such asset".to_string();
        }
    }

    if status == "valid" {
        let held_asset = asset.as_deref().unwrap_or_default();
        let paid_asset = dividend_asset.as_deref().unwrap_or_default();
        let shares = payouts(
            ledger,
            config,
            tx.block_index,
            &tx.source,
            held_asset,
            paid_asset,
            quantity_per_unit,
        )?;
        let total: i64 = shares.iter().map(|(_, q)| q).sum();
        if total == 0 {
            status = "invalid: zero dividend".to_string();
        } else if paid_asset == BTC {
            // The BTC legs ride the transaction's own outputs; the
            // ledger never tracks BTC.
        } else if ledger.balance(&tx.source, paid_asset)? < total {
            status = "invalid: insufficient funds".to_string();
        } else {
            ledger.debit(
                tx.block_index,
                &tx.source,
                paid_asset,
                total,
                "dividend",
                &tx.tx_hash,
            )?;
            for (address, amount) in shares {
                ledger.credit(
                    tx.block_index,
                    &address,
                    paid_asset,
                    amount,
                    "dividend",
                    &tx.tx_hash,
                )?;
            }
        }
    }

    ledger.insert_dividend(&DividendRow {
        tx_index: tx.tx_index,
        tx_hash: tx.tx_hash.clone(),
        block_index: tx.block_index,
        source: tx.source.clone(),
        asset,
        dividend_asset,
        quantity_per_unit,
        status,
    })
}
