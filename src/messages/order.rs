//! Decentralized-exchange orders and the matching engine.
//!
//! Body: give asset id (u64), give quantity (u64), get asset id (u64),
//! get quantity (u64), expiration in blocks (u16), required BTC fee
//! (u64). Non-BTC give quantities are escrowed at open; BTC legs are
//! never escrowed, so a match touching BTC stays `pending` until a
//! BTCPay proves the on-chain payment, or expires.
use anyhow::Result;

use super::{message_data, quantity, MessageType, Reader};
use crate::config::{Config, BTC};
use crate::errors::LedgerError;
use crate::store::{Ledger, OrderMatchRow, OrderRow, OrderUpdate, TransactionRow};
use crate::util::{asset_id, asset_name, price, Fraction};

fn validate(
    give_asset: &str,
    give_quantity: i64,
    get_asset: &str,
    get_quantity: i64,
    expiration: u32,
    config: &Config,
) -> Vec<String> {
    let mut problems = Vec::new();
    if give_asset == get_asset {
        problems.push("trading an asset for itself".to_string());
    }
    if give_quantity <= 0 {
        problems.push("non-positive give quantity".to_string());
    }
    if get_quantity <= 0 {
        problems.push("non-positive get quantity".to_string());
    }
    if expiration == 0 || expiration > config.max_expiration as u32 {
        problems.push("invalid expiration".to_string());
    }
    problems
}

/// Build an order payload, refusing anything that could not parse as
/// valid.
#[allow(clippy::too_many_arguments)]
pub fn compose(
    ledger: &Ledger,
    config: &Config,
    source: &str,
    give_asset: &str,
    give_quantity: i64,
    get_asset: &str,
    get_quantity: i64,
    expiration: u32,
    fee_required: i64,
) -> Result<Vec<u8>> {
    let mut problems = validate(
        give_asset,
        give_quantity,
        get_asset,
        get_quantity,
        expiration,
        config,
    );
    if fee_required < 0 {
        problems.push("negative required fee".to_string());
    }
    let mut ids = [0u64; 2];
    for (slot, asset) in ids.iter_mut().zip([give_asset, get_asset]) {
        match asset_id(asset) {
            Ok(id) => *slot = id,
            Err(e) => problems.push(e.to_string()),
        }
    }
    if give_asset != BTC && ledger.balance(source, give_asset)? < give_quantity {
        problems.push("insufficient funds".to_string());
    }
    if !problems.is_empty() {
        return Err(LedgerError::Compose { problems }.into());
    }
    let mut body = Vec::with_capacity(42);
    body.extend_from_slice(&ids[0].to_be_bytes());
    body.extend_from_slice(&(give_quantity as u64).to_be_bytes());
    body.extend_from_slice(&ids[1].to_be_bytes());
    body.extend_from_slice(&(get_quantity as u64).to_be_bytes());
    body.extend_from_slice(&(expiration as u16).to_be_bytes());
    body.extend_from_slice(&(fee_required as u64).to_be_bytes());
    Ok(message_data(config, MessageType::Order, &body))
}

/// Apply an order transaction, then run the matching engine.
pub fn parse(ledger: &Ledger, config: &Config, tx: &TransactionRow, body: &[u8]) -> Result<()> {
    let mut give_asset = String::new();
    let mut get_asset = String::new();
    let mut give_quantity = 0i64;
    let mut get_quantity = 0i64;
    let mut expiration = 0u32;
    let mut fee_required = 0i64;
    let mut status = "valid".to_string();

    let mut r = Reader::new(body);
    match (r.u64(), r.u64(), r.u64(), r.u64(), r.u16(), r.u64(), r.done()) {
        (Some(give_id), Some(give_raw), Some(get_id), Some(get_raw), Some(exp), Some(fee_raw), true) => {
            match (asset_name(give_id), asset_name(get_id)) {
                (Ok(g), Ok(w)) => {
                    give_asset = g;
                    get_asset = w;
                }
                _ => status = "invalid: bad asset id".to_string(),
            }
            match (quantity(give_raw), quantity(get_raw), quantity(fee_raw)) {
                (Some(gq), Some(wq), Some(f)) => {
                    give_quantity = gq;
                    get_quantity = wq;
                    fee_required = f;
                }
                _ => status = "invalid: integer overflow".to_string(),
            }
            expiration = exp as u32;
        }
        _ => status = "invalid: could not unpack".to_string(),
    }

    if status == "valid" {
        let problems = validate(
            &give_asset,
            give_quantity,
            &get_asset,
            get_quantity,
            expiration,
            config,
        );
        if let Some(p) = problems.first() {
            status = format!("invalid: {p}");
        }
    }

    if status == "valid" && give_asset != BTC {
        // An order offering more than the balance is scaled down to the
        // full balance, get quantity adjusted at the stated price.
        let held = ledger.balance(&tx.source, &give_asset)?;
        if held < give_quantity {
            let ratio = price(get_quantity, give_quantity, tx.block_index, config)?;
            give_quantity = held;
            get_quantity = ratio.mul_floor(held);
        }
        if give_quantity == 0 || get_quantity == 0 {
            status = "invalid: insufficient funds".to_string();
        }
    }

    if status == "valid" && give_asset != BTC {
        ledger.debit(
            tx.block_index,
            &tx.source,
            &give_asset,
            give_quantity,
            "open order",
            &tx.tx_hash,
        )?;
    }

    let open = status == "valid";
    let mut order = OrderRow {
        tx_index: tx.tx_index,
        tx_hash: tx.tx_hash.clone(),
        block_index: tx.block_index,
        source: tx.source.clone(),
        give_asset,
        give_quantity,
        give_remaining: give_quantity,
        get_asset,
        get_quantity,
        get_remaining: get_quantity,
        expiration,
        expire_index: tx.block_index + expiration,
        fee_required,
        fee_required_remaining: fee_required,
        fee_provided: tx.fee,
        fee_provided_remaining: tx.fee,
        status: if open { "open".to_string() } else { status },
    };
    ledger.insert_order(&order)?;
    if open {
        match_orders(ledger, config, &mut order)?;
    }
    Ok(())
}

fn order_update(o: &OrderRow) -> OrderUpdate {
    OrderUpdate {
        tx_hash: o.tx_hash.clone(),
        give_remaining: o.give_remaining,
        get_remaining: o.get_remaining,
        fee_required_remaining: o.fee_required_remaining,
        fee_provided_remaining: o.fee_provided_remaining,
        status: o.status.clone(),
    }
}

/// Mark an order filled, refunding any sliver of escrow its last match
/// could not use.
fn fill_order(ledger: &Ledger, block_index: u32, o: &mut OrderRow) -> Result<()> {
    if o.give_asset != BTC && o.give_remaining > 0 {
        ledger.credit(
            block_index,
            &o.source,
            &o.give_asset,
            o.give_remaining,
            "filled",
            &o.tx_hash,
        )?;
        o.give_remaining = 0;
    }
    o.status = "filled".to_string();
    Ok(())
}

/// Match a just-opened order against the standing book.
///
/// Counterparties are taken best price first, ties by age. Trades with
/// no BTC leg settle immediately from escrow; a BTC leg leaves the
/// match pending and consumes required/provided BTC miner fees
/// proportionally, skipping counterparties that did not provide
/// enough.
fn match_orders(ledger: &Ledger, config: &Config, tx1: &mut OrderRow) -> Result<()> {
    let block_index = tx1.block_index;
    let tx1_price = price(tx1.get_quantity, tx1.give_quantity, block_index, config)?;
    if tx1_price.is_zero() {
        return Ok(());
    }
    let tx1_inverse = tx1_price.reciprocal()?;

    let mut book: Vec<(Fraction, OrderRow)> = Vec::new();
    for tx0 in ledger.open_orders_for_pair(&tx1.get_asset, &tx1.give_asset)? {
        if tx0.give_quantity <= 0 || tx0.get_quantity <= 0 {
            continue;
        }
        let p = price(tx0.get_quantity, tx0.give_quantity, block_index, config)?;
        book.push((p, tx0));
    }
    book.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.tx_index.cmp(&b.1.tx_index)));

    let mut tx1_dirty = false;
    for (tx0_price, mut tx0) in book {
        if tx1.give_remaining <= 0 || tx1.get_remaining <= 0 {
            break;
        }
        if tx0_price > tx1_inverse {
            break;
        }

        let forward = tx0.give_remaining.min(tx0_price.div_floor(tx1.give_remaining)?);
        let backward = tx0_price.mul_floor(forward);
        if forward == 0 || backward == 0 {
            continue;
        }

        let mut fee_paid = 0i64;
        if tx0.get_asset == BTC {
            // tx1 will pay BTC on-chain; it must carry its share of the
            // miner fee tx0 demanded.
            let share = Fraction::new(backward as i128, tx0.get_remaining as i128)?;
            let fee = share.mul_floor(tx0.fee_required_remaining);
            if tx1.fee_provided_remaining < fee {
                continue;
            }
            tx1.fee_provided_remaining -= fee;
            tx0.fee_required_remaining -= fee;
            fee_paid = fee;
        } else if tx0.give_asset == BTC {
            let share = Fraction::new(forward as i128, tx1.get_remaining as i128)?;
            let fee = share.mul_floor(tx1.fee_required_remaining);
            if tx0.fee_provided_remaining < fee {
                continue;
            }
            tx0.fee_provided_remaining -= fee;
            tx1.fee_required_remaining -= fee;
            fee_paid = fee;
        }
        tx1_dirty = true;

        tx0.give_remaining -= forward;
        tx0.get_remaining -= backward;
        tx1.give_remaining -= backward;
        tx1.get_remaining -= forward;

        if tx0.give_remaining <= 0 || tx0.get_remaining <= 0 {
            fill_order(ledger, block_index, &mut tx0)?;
        }
        ledger.update_order(block_index, &order_update(&tx0))?;

        let id = format!("{}{}", tx0.tx_hash, tx1.tx_hash);
        let btc_leg = tx0.give_asset == BTC || tx0.get_asset == BTC;
        if !btc_leg {
            ledger.credit(
                block_index,
                &tx1.source,
                &tx0.give_asset,
                forward,
                "order match",
                &id,
            )?;
            ledger.credit(
                block_index,
                &tx0.source,
                &tx1.give_asset,
                backward,
                "order match",
                &id,
            )?;
        }
        ledger.insert_order_match(&OrderMatchRow {
            id,
            tx0_index: tx0.tx_index,
            tx0_hash: tx0.tx_hash.clone(),
            tx0_address: tx0.source.clone(),
            tx1_index: tx1.tx_index,
            tx1_hash: tx1.tx_hash.clone(),
            tx1_address: tx1.source.clone(),
            forward_asset: tx0.give_asset.clone(),
            forward_quantity: forward,
            backward_asset: tx1.give_asset.clone(),
            backward_quantity: backward,
            tx0_block_index: tx0.block_index,
            tx1_block_index: tx1.block_index,
            block_index,
            match_expire_index: block_index + config.order_match_expire,
            fee_paid,
            status: if btc_leg { "pending" } else { "completed" }.to_string(),
        })?;
    }

    if tx1.give_remaining <= 0 || tx1.get_remaining <= 0 {
        fill_order(ledger, block_index, tx1)?;
        tx1_dirty = true;
    }
    if tx1_dirty {
        ledger.update_order(block_index, &order_update(tx1))?;
    }
    Ok(())
}

/// Close an open order, refunding its remaining escrow. Shared by
/// cancels, expirations, and callback cleanup.
pub(crate) fn close_order(
    ledger: &Ledger,
    block_index: u32,
    order: &OrderRow,
    status: &str,
    event: &str,
) -> Result<()> {
    if order.give_asset != BTC && order.give_remaining > 0 {
        ledger.credit(
            block_index,
            &order.source,
            &order.give_asset,
            order.give_remaining,
            "recredit give",
            event,
        )?;
    }
    let mut u = order_update(order);
    u.status = status.to_string();
    ledger.update_order(block_index, &u)
}

/// Expire open orders whose lifetime ended at or before this block.
pub(crate) fn expire_orders(ledger: &Ledger, block_index: u32) -> Result<()> {
    for order in ledger.expired_orders(block_index)? {
        close_order(ledger, block_index, &order, "expired", &order.tx_hash)?;
        ledger.insert_order_expiration(&crate::store::OrderExpirationRow {
            order_index: order.tx_index,
            order_hash: order.tx_hash.clone(),
            source: order.source.clone(),
            block_index,
        })?;
    }
    Ok(())
}

/// Undo a pending order match, refunding the escrowed legs. BTC legs
/// were never escrowed.
pub(crate) fn unwind_order_match(
    ledger: &Ledger,
    block_index: u32,
    m: &OrderMatchRow,
    status: &str,
) -> Result<()> {
    if m.forward_asset != BTC {
        ledger.credit(
            block_index,
            &m.tx0_address,
            &m.forward_asset,
            m.forward_quantity,
            &format!("order match {status}"),
            &m.id,
        )?;
    }
    if m.backward_asset != BTC {
        ledger.credit(
            block_index,
            &m.tx1_address,
            &m.backward_asset,
            m.backward_quantity,
            &format!("order match {status}"),
            &m.id,
        )?;
    }
    ledger.update_order_match_status(block_index, &m.id, status)
}

/// Expire pending order matches whose BTC payment never arrived,
/// refunding the escrowed legs.
pub(crate) fn expire_order_matches(ledger: &Ledger, block_index: u32) -> Result<()> {
    for m in ledger.expired_order_matches(block_index)? {
        unwind_order_match(ledger, block_index, &m, "expired")?;
        ledger.insert_order_match_expiration(&crate::store::OrderMatchExpirationRow {
            order_match_id: m.id.clone(),
            tx0_address: m.tx0_address.clone(),
            tx1_address: m.tx1_address.clone(),
            block_index,
        })?;
    }
    Ok(())
}
