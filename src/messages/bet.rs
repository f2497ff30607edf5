//! Feed-based wagers and their matching engine.
//!
//! Body: bet type (u16), deadline (u32), wager (u64), counterwager
//! (u64), target value (f64), leverage (u32), expiration in blocks
//! (u32). The fed-on address is the transaction's destination. Wagers
//! are escrowed in XCP; a match pairs complementary bet types with
//! identical deadline, leverage, target value, and fee fraction, and
//! records the feed's current value as the contract baseline.
use anyhow::Result;

use super::broadcast::{BET_BEAR_CFD, BET_BULL_CFD, BET_EQUAL, BET_NOT_EQUAL};
use super::{message_data, quantity, MessageType, Reader};
use crate::config::{Config, InverseOdds, XCP};
use crate::errors::LedgerError;
use crate::store::{BetMatchRow, BetRow, BetUpdate, Ledger, TransactionRow};
use crate::util::{price, Fraction};

/// The bet type that can be matched against `bet_type`.
fn counter_type(bet_type: u16) -> Option<u16> {
    Some(match bet_type {
        BET_BULL_CFD => BET_BEAR_CFD,
        BET_BEAR_CFD => BET_BULL_CFD,
        BET_EQUAL => BET_NOT_EQUAL,
        BET_NOT_EQUAL => BET_EQUAL,
        _ => return None,
    })
}

fn validate(
    bet_type: u16,
    wager: i64,
    counterwager: i64,
    target_value: f64,
    leverage: u32,
    expiration: u32,
    config: &Config,
) -> Vec<String> {
    let mut problems = Vec::new();
    if counter_type(bet_type).is_none() {
        problems.push("unknown bet type".to_string());
    }
    if wager <= 0 {
        problems.push("non-positive wager".to_string());
    }
    if counterwager <= 0 {
        problems.push("non-positive counterwager".to_string());
    }
    if target_value < 0.0 {
        problems.push("negative target value".to_string());
    }
    if (bet_type == BET_EQUAL || bet_type == BET_NOT_EQUAL) && leverage != 5040 {
        problems.push("leverage used with an equality bet".to_string());
    }
    if (bet_type == BET_BULL_CFD || bet_type == BET_BEAR_CFD) && leverage > 5040 {
        problems.push("leverage too high".to_string());
    }
    if (bet_type == BET_BULL_CFD || bet_type == BET_BEAR_CFD) && target_value != 0.0 {
        problems.push("target value used with a contract for difference".to_string());
    }
    if expiration == 0 || expiration > config.max_expiration as u32 {
        problems.push("invalid expiration".to_string());
    }
    problems
}

/// Build a bet payload, refusing anything that could not parse as
/// valid. The feed is addressed by sending the transaction to it.
#[allow(clippy::too_many_arguments)]
pub fn compose(
    ledger: &Ledger,
    config: &Config,
    source: &str,
    feed_address: &str,
    bet_type: u16,
    deadline: u32,
    wager: i64,
    counterwager: i64,
    target_value: f64,
    leverage: u32,
    expiration: u32,
) -> Result<Vec<u8>> {
    let mut problems = validate(
        bet_type,
        wager,
        counterwager,
        target_value,
        leverage,
        expiration,
        config,
    );
    if ledger.last_broadcast(feed_address)?.is_none() {
        problems.push("feed does not exist".to_string());
    }
    if ledger.feed_locked(feed_address)? {
        problems.push("locked feed".to_string());
    }
    if ledger.balance(source, XCP)? < wager {
        problems.push("insufficient funds".to_string());
    }
    if !problems.is_empty() {
        return Err(LedgerError::Compose { problems }.into());
    }
    let mut body = Vec::with_capacity(38);
    body.extend_from_slice(&bet_type.to_be_bytes());
    body.extend_from_slice(&deadline.to_be_bytes());
    body.extend_from_slice(&(wager as u64).to_be_bytes());
    body.extend_from_slice(&(counterwager as u64).to_be_bytes());
    body.extend_from_slice(&target_value.to_be_bytes());
    body.extend_from_slice(&leverage.to_be_bytes());
    body.extend_from_slice(&expiration.to_be_bytes());
    Ok(message_data(config, MessageType::Bet, &body))
}

/// Apply a bet transaction, then run the matching engine.
pub fn parse(ledger: &Ledger, config: &Config, tx: &TransactionRow, body: &[u8]) -> Result<()> {
    let mut bet_type = 0u16;
    let mut deadline = 0u32;
    let mut wager = 0i64;
    let mut counterwager = 0i64;
    let mut target_value = 0.0f64;
    let mut leverage = 5040u32;
    let mut expiration = 0u32;
    let mut status = "valid".to_string();

    let mut r = Reader::new(body);
    match (r.u16(), r.u32(), r.u64(), r.u64(), r.f64(), r.u32(), r.u32(), r.done()) {
        (Some(ty), Some(dl), Some(w), Some(cw), Some(tv), Some(lv), Some(exp), true) => {
            bet_type = ty;
            deadline = dl;
            target_value = tv;
            leverage = lv;
            expiration = exp;
            match (quantity(w), quantity(cw)) {
                (Some(w), Some(cw)) => {
                    wager = w;
                    counterwager = cw;
                }
                _ => status = "invalid: integer overflow".to_string(),
            }
        }
        _ => status = "invalid: could not unpack".to_string(),
    }

    let feed_address = match &tx.destination {
        Some(d) => d.clone(),
        None => {
            status = "invalid: no feed address".to_string();
            String::new()
        }
    };

    let mut fee_fraction_int = 0i64;
    if status == "valid" {
        let problems = validate(
            bet_type,
            wager,
            counterwager,
            target_value,
            leverage,
            expiration,
            config,
        );
        if let Some(p) = problems.first() {
            status = format!("invalid: {p}");
        } else {
            match ledger.last_broadcast(&feed_address)? {
                None => status = "invalid: feed does not exist".to_string(),
                Some(b) => {
                    fee_fraction_int = b.fee_fraction_int;
                    if ledger.feed_locked(&feed_address)? {
                        status = "invalid: locked feed".to_string();
                    } else if deadline < tx.block_time {
                        status = "invalid: deadline in the past".to_string();
                    }
                }
            }
        }
    }

    if status == "valid" {
        // A wager above the balance is scaled down like an oversized
        // order, counterwager adjusted at the stated odds.
        let held = ledger.balance(&tx.source, XCP)?;
        if held < wager {
            let odds = price(counterwager, wager, tx.block_index, config)?;
            wager = held;
            counterwager = odds.mul_floor(held);
        }
        if wager == 0 || counterwager == 0 {
            status = "invalid: insufficient funds".to_string();
        }
    }

    if status == "valid" {
        ledger.debit(tx.block_index, &tx.source, XCP, wager, "bet", &tx.tx_hash)?;
    }

    let open = status == "valid";
    let mut bet = BetRow {
        tx_index: tx.tx_index,
        tx_hash: tx.tx_hash.clone(),
        block_index: tx.block_index,
        source: tx.source.clone(),
        feed_address,
        bet_type,
        deadline,
        wager_quantity: wager,
        wager_remaining: wager,
        counterwager_quantity: counterwager,
        counterwager_remaining: counterwager,
        target_value,
        leverage,
        expiration,
        expire_index: tx.block_index + expiration,
        fee_fraction_int,
        status: if open { "open".to_string() } else { status },
    };
    ledger.insert_bet(&bet)?;
    if open {
        match_bets(ledger, config, &mut bet)?;
    }
    Ok(())
}

fn bet_update(b: &BetRow) -> BetUpdate {
    BetUpdate {
        tx_hash: b.tx_hash.clone(),
        wager_remaining: b.wager_remaining,
        counterwager_remaining: b.counterwager_remaining,
        status: b.status.clone(),
    }
}

fn fill_bet(ledger: &Ledger, block_index: u32, b: &mut BetRow) -> Result<()> {
    if b.wager_remaining > 0 {
        ledger.credit(
            block_index,
            &b.source,
            XCP,
            b.wager_remaining,
            "filled",
            &b.tx_hash,
        )?;
        b.wager_remaining = 0;
    }
    b.status = "filled".to_string();
    Ok(())
}

/// Match a just-opened bet against standing complementary bets.
///
/// Only exact contract twins qualify: same feed, deadline, leverage,
/// target value, and fee fraction. The book is scanned in odds order,
/// ties by age; a standing bet whose offered odds fall short of the
/// incoming bet's demanded counter-stake per unit staked is passed
/// over.
fn match_bets(ledger: &Ledger, config: &Config, tx1: &mut BetRow) -> Result<()> {
    let block_index = tx1.block_index;
    let counter = match counter_type(tx1.bet_type) {
        Some(c) => c,
        None => return Ok(()),
    };
    let tx1_odds = price(tx1.wager_quantity, tx1.counterwager_quantity, block_index, config)?;
    if tx1_odds.is_zero() {
        return Ok(());
    }
    let tx1_inverse = match config.bet_inverse_odds.at(block_index, config.testnet) {
        InverseOdds::Recomputed => {
            price(tx1.counterwager_quantity, tx1.wager_quantity, block_index, config)?
        }
        InverseOdds::ExactReciprocal => tx1_odds.reciprocal()?,
    };

    let initial_value = match ledger.last_broadcast(&tx1.feed_address)? {
        Some(b) => b.value,
        None => return Ok(()),
    };

    let mut book: Vec<(Fraction, BetRow)> = Vec::new();
    for tx0 in ledger.open_bets(&tx1.feed_address, counter)? {
        if tx0.deadline != tx1.deadline
            || tx0.leverage != tx1.leverage
            || tx0.target_value != tx1.target_value
            || tx0.fee_fraction_int != tx1.fee_fraction_int
        {
            continue;
        }
        if tx0.wager_quantity <= 0 || tx0.counterwager_quantity <= 0 {
            continue;
        }
        let odds = price(tx0.wager_quantity, tx0.counterwager_quantity, block_index, config)?;
        book.push((odds, tx0));
    }
    book.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.tx_index.cmp(&b.1.tx_index)));

    let mut tx1_dirty = false;
    for (tx0_odds, mut tx0) in book {
        if tx1.wager_remaining <= 0 || tx1.counterwager_remaining <= 0 {
            break;
        }
        // The trade executes at tx0's odds, so tx1 receives tx0_odds of
        // counter-stake per unit staked and demands at least
        // tx1_inverse.
        if tx0_odds < tx1_inverse {
            continue;
        }

        let forward = tx0.wager_remaining.min(tx0_odds.mul_floor(tx1.wager_remaining));
        let backward = tx0_odds.div_floor(forward)?;
        if forward == 0 || backward == 0 {
            continue;
        }
        tx1_dirty = true;

        tx0.wager_remaining -= forward;
        tx0.counterwager_remaining -= backward;
        tx1.wager_remaining -= backward;
        tx1.counterwager_remaining -= forward;

        if tx0.wager_remaining <= 0 || tx0.counterwager_remaining <= 0 {
            fill_bet(ledger, block_index, &mut tx0)?;
        }
        ledger.update_bet(block_index, &bet_update(&tx0))?;

        ledger.insert_bet_match(&BetMatchRow {
            id: format!("{}{}", tx0.tx_hash, tx1.tx_hash),
            tx0_index: tx0.tx_index,
            tx0_hash: tx0.tx_hash.clone(),
            tx0_address: tx0.source.clone(),
            tx1_index: tx1.tx_index,
            tx1_hash: tx1.tx_hash.clone(),
            tx1_address: tx1.source.clone(),
            tx0_bet_type: tx0.bet_type,
            tx1_bet_type: tx1.bet_type,
            feed_address: tx1.feed_address.clone(),
            initial_value,
            deadline: tx1.deadline,
            target_value: tx1.target_value,
            leverage: tx1.leverage,
            forward_quantity: forward,
            backward_quantity: backward,
            tx0_block_index: tx0.block_index,
            tx1_block_index: tx1.block_index,
            block_index,
            match_expire_index: block_index + config.bet_match_expire,
            fee_fraction_int: tx1.fee_fraction_int,
            status: "pending".to_string(),
        })?;
    }

    if tx1.wager_remaining <= 0 || tx1.counterwager_remaining <= 0 {
        fill_bet(ledger, block_index, tx1)?;
        tx1_dirty = true;
    }
    if tx1_dirty {
        ledger.update_bet(block_index, &bet_update(tx1))?;
    }
    Ok(())
}

/// Close an open bet, refunding its remaining wager. Shared by cancels,
/// expirations, and feed-cancellation broadcasts.
pub(crate) fn close_bet(
    ledger: &Ledger,
    block_index: u32,
    bet: &BetRow,
    status: &str,
    event: &str,
) -> Result<()> {
    if bet.wager_remaining > 0 {
        ledger.credit(
            block_index,
            &bet.source,
            XCP,
            bet.wager_remaining,
            "recredit wager",
            event,
        )?;
    }
    let mut u = bet_update(bet);
    u.status = status.to_string();
    ledger.update_bet(block_index, &u)
}

/// Refund both escrowed sides of a bet match.
pub(crate) fn refund_bet_match(ledger: &Ledger, block_index: u32, m: &BetMatchRow) -> Result<()> {
    ledger.credit(
        block_index,
        &m.tx0_address,
        XCP,
        m.forward_quantity,
        "bet match refund",
        &m.id,
    )?;
    ledger.credit(
        block_index,
        &m.tx1_address,
        XCP,
        m.backward_quantity,
        "bet match refund",
        &m.id,
    )
}

/// Expire open bets whose lifetime ended at or before this block.
pub(crate) fn expire_bets(ledger: &Ledger, block_index: u32) -> Result<()> {
    for bet in ledger.expired_bets(block_index)? {
        close_bet(ledger, block_index, &bet, "expired", &bet.tx_hash)?;
        ledger.insert_bet_expiration(&crate::store::BetExpirationRow {
            bet_index: bet.tx_index,
            bet_hash: bet.tx_hash.clone(),
            source: bet.source.clone(),
            block_index,
        })?;
    }
    Ok(())
}

/// Expire pending bet matches past their window, or whose deadline went
/// unresolved longer than the grace period.
pub(crate) fn expire_bet_matches(
    ledger: &Ledger,
    config: &Config,
    block_index: u32,
    block_time: u32,
) -> Result<()> {
    let cutoff = block_time as i64 - config.bet_match_grace as i64;
    for m in ledger.expired_bet_matches(block_index, cutoff)? {
        refund_bet_match(ledger, block_index, &m)?;
        ledger.update_bet_match_status(block_index, &m.id, "expired")?;
        ledger.insert_bet_match_expiration(&crate::store::BetMatchExpirationRow {
            bet_match_id: m.id.clone(),
            tx0_address: m.tx0_address.clone(),
            tx1_address: m.tx1_address.clone(),
            block_index,
        })?;
    }
    Ok(())
}
