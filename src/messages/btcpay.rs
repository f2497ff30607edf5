//! On-chain settlement of the BTC leg of a pending order match.
//!
//! Body: the two 32-byte order transaction hashes whose match is being
//! paid. The transaction itself must carry the BTC: its source,
//! destination, and amount are checked against the match before the
//! escrowed counter-asset is released.
use anyhow::Result;
use bitcoin::hashes::Hash;
use bitcoin::Txid;
use std::str::FromStr;

use super::{message_data, MessageType, Reader};
use crate::config::{Config, BTC};
use crate::errors::LedgerError;
use crate::store::{BtcPayRow, Ledger, OrderMatchRow, TransactionRow};

/// The BTC payer, payee, and amount a pending match is waiting for, or
/// `None` if the match has no BTC leg.
fn btc_leg(m: &OrderMatchRow) -> Option<(String, String, i64, String, i64)> {
    if m.forward_asset == BTC {
        // tx0 pays BTC, tx1's escrow is released to tx0.
        Some((
            m.tx0_address.clone(),
            m.tx1_address.clone(),
            m.forward_quantity,
            m.backward_asset.clone(),
            m.backward_quantity,
        ))
    } else if m.backward_asset == BTC {
        Some((
            m.tx1_address.clone(),
            m.tx0_address.clone(),
            m.backward_quantity,
            m.forward_asset.clone(),
            m.forward_quantity,
        ))
    } else {
        None
    }
}

/// Build a btcpay payload for a pending order match.
pub fn compose(ledger: &Ledger, config: &Config, source: &str, order_match_id: &str) -> Result<Vec<u8>> {
    let mut problems = Vec::new();
    let m = ledger.order_match(order_match_id)?;
    let mut hashes = ([0u8; 32], [0u8; 32]);
    match &m {
        None => problems.push("no such order match".to_string()),
        Some(m) => {
            if m.status != "pending" {
                problems.push(format!("order match is {}", m.status));
            }
            match btc_leg(m) {
                Some((payer, ..)) if payer == source => {}
                Some(_) => problems.push("source is not the BTC payer".to_string()),
                None => problems.push("order match has no BTC leg".to_string()),
            }
            match (Txid::from_str(&m.tx0_hash), Txid::from_str(&m.tx1_hash)) {
                (Ok(h0), Ok(h1)) => hashes = (h0.to_byte_array(), h1.to_byte_array()),
                _ => problems.push("malformed order match id".to_string()),
            }
        }
    }
    if !problems.is_empty() {
        return Err(LedgerError::Compose { problems }.into());
    }
    let mut body = Vec::with_capacity(64);
    body.extend_from_slice(&hashes.0);
    body.extend_from_slice(&hashes.1);
    Ok(message_data(config, MessageType::BtcPay, &body))
}

/// Apply a btcpay transaction.
pub fn parse(ledger: &Ledger, _config: &Config, tx: &TransactionRow, body: &[u8]) -> Result<()> {
    let mut order_match_id = None;
    let mut status = "valid".to_string();

    let mut r = Reader::new(body);
    match (r.hash32(), r.hash32(), r.done()) {
        (Some(h0), Some(h1), true) => {
            let tx0_hash = Txid::from_byte_array(h0).to_string();
            let tx1_hash = Txid::from_byte_array(h1).to_string();
            order_match_id = Some(format!("{tx0_hash}{tx1_hash}"));
        }
        _ => status = "invalid: could not unpack".to_string(),
    }

    if status == "valid" {
        let id = order_match_id.as_deref().unwrap_or_default();
        match ledger.order_match(id)? {
            None => status = "invalid: no such order match".to_string(),
            Some(m) if m.status != "pending" => {
                status = format!("invalid: order match is {}", m.status);
            }
            Some(m) => match btc_leg(&m) {
                None => status = "invalid: order match has no BTC leg".to_string(),
                Some((payer, payee, btc_quantity, escrow_asset, escrow_quantity)) => {
                    if tx.source != payer {
                        status = "invalid: wrong source".to_string();
                    } else if tx.destination.as_deref() != Some(payee.as_str()) {
                        status = "invalid: wrong destination".to_string();
                    } else if tx.btc_amount < btc_quantity {
                        status = "invalid: insufficient BTC".to_string();
                    } else {
                        ledger.credit(
                            tx.block_index,
                            &payer,
                            &escrow_asset,
                            escrow_quantity,
                            "btcpay",
                            &m.id,
                        )?;
                        ledger.update_order_match_status(tx.block_index, &m.id, "completed")?;
                    }
                }
            },
        }
    }

    ledger.insert_btcpay(&BtcPayRow {
        tx_index: tx.tx_index,
        tx_hash: tx.tx_hash.clone(),
        block_index: tx.block_index,
        source: tx.source.clone(),
        destination: tx.destination.clone(),
        btc_amount: tx.btc_amount,
        order_match_id,
        status,
    })
}
