//! Cancellation of an open order or bet.
//!
//! Body: the 32-byte hash of the offer's transaction. Only the offer's
//! own source may cancel it, and only while it is still open; the
//! remaining escrow is refunded.
use anyhow::Result;
use bitcoin::hashes::Hash;
use bitcoin::Txid;
use std::str::FromStr;

use super::{message_data, MessageType, Reader};
use crate::config::Config;
use crate::errors::LedgerError;
use crate::store::{CancelRow, Ledger, TransactionRow};

/// Build a cancel payload for one of the source's open offers.
pub fn compose(ledger: &Ledger, config: &Config, source: &str, offer_hash: &str) -> Result<Vec<u8>> {
    let mut problems = Vec::new();
    let order = ledger.order_by_hash(offer_hash)?;
    let bet = ledger.bet_by_hash(offer_hash)?;
    match (&order, &bet) {
        (None, None) => problems.push("no such open offer".to_string()),
        (Some(o), _) => {
            if o.source != source {
                problems.push("offer belongs to another address".to_string());
            }
            if o.status != "open" {
                problems.push(format!("offer is {}", o.status));
            }
        }
        (_, Some(b)) => {
            if b.source != source {
                problems.push("offer belongs to another address".to_string());
            }
            if b.status != "open" {
                problems.push(format!("offer is {}", b.status));
            }
        }
    }
    let hash = match Txid::from_str(offer_hash) {
        Ok(h) => h.to_byte_array(),
        Err(_) => {
            problems.push("malformed offer hash".to_string());
            [0u8; 32]
        }
    };
    if !problems.is_empty() {
        return Err(LedgerError::Compose { problems }.into());
    }
    Ok(message_data(config, MessageType::Cancel, &hash))
}

/// Apply a cancel transaction.
pub fn parse(ledger: &Ledger, _config: &Config, tx: &TransactionRow, body: &[u8]) -> Result<()> {
    let mut offer_hash = String::new();
    let mut status = "valid".to_string();

    let mut r = Reader::new(body);
    match (r.hash32(), r.done()) {
        (Some(h), true) => offer_hash = Txid::from_byte_array(h).to_string(),
        _ => status = "invalid: could not unpack".to_string(),
    }

    if status == "valid" {
        let order = ledger.order_by_hash(&offer_hash)?;
        let bet = ledger.bet_by_hash(&offer_hash)?;
        match (order, bet) {
            (Some(o), _) => {
                if o.source != tx.source {
                    status = "invalid: offer belongs to another address".to_string();
                } else if o.status != "open" {
                    status = format!("invalid: offer is {}", o.status);
                } else {
                    super::order::close_order(ledger, tx.block_index, &o, "cancelled", &tx.tx_hash)?;
                }
            }
            (None, Some(b)) => {
                if b.source != tx.source {
                    status = "invalid: offer belongs to another address".to_string();
                } else if b.status != "open" {
                    status = format!("invalid: offer is {}", b.status);
                } else {
                    super::bet::close_bet(ledger, tx.block_index, &b, "cancelled", &tx.tx_hash)?;
                }
            }
            (None, None) => status = "invalid: no such open offer".to_string(),
        }
    }

    ledger.insert_cancel(&CancelRow {
        tx_index: tx.tx_index,
        tx_hash: tx.tx_hash.clone(),
        block_index: tx.block_index,
        source: tx.source.clone(),
        offer_hash,
        status,
    })
}
