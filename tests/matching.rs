//! The order and bet matching engines and their settlement paths.
mod common;

use common::{apply, burn, strip_prefix, test_config};
use serde_json::json;
use sobrecapa::config::{Config, UNIT, XCP};
use sobrecapa::messages::{bet, broadcast, btcpay, callback, issuance, order, send};
use sobrecapa::query::{self, Operator, Select};
use sobrecapa::{conservation, Ledger};

const ALICE: &str = "mnAlice1111111111111111111111111111";
const BOB: &str = "mnBob22222222222222222222222222222";
const CAROL: &str = "mnCarol333333333333333333333333333";

const T0: u32 = 1_600_000_000;

fn issue(ledger: &Ledger, config: &Config, height: u32, source: &str, asset: &str, qty: i64) {
    burn(ledger, config, height, source, 100 * UNIT).unwrap();
    let data = issuance::compose(
        ledger, config, source, asset, qty, true, false, 0, 0.0, "", false, height,
    )
    .unwrap();
    apply(ledger, config, height, T0, source, None, 0, strip_prefix(config, data)).unwrap();
}

#[test]
fn crossing_orders_settle_from_escrow() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    let height = config.burn_start;
    issue(&ledger, &config, height, ALICE, "BBBB", 100 * UNIT);
    issue(&ledger, &config, height, BOB, "CCCC", 100 * UNIT);

    let data = order::compose(
        &ledger, &config, ALICE, "BBBB", 100 * UNIT, "CCCC", 50 * UNIT, 1_000, 0,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();
    assert_eq!(ledger.balance(ALICE, "BBBB").unwrap(), 0);

    let data = order::compose(
        &ledger, &config, BOB, "CCCC", 50 * UNIT, "BBBB", 100 * UNIT, 1_000, 0,
    )
    .unwrap();
    apply(&ledger, &config, height + 1, T0, BOB, None, 0, strip_prefix(&config, data)).unwrap();

    assert_eq!(ledger.balance(ALICE, "CCCC").unwrap(), 50 * UNIT);
    assert_eq!(ledger.balance(BOB, "BBBB").unwrap(), 100 * UNIT);
    let matches = query::run(&ledger, &Select::from_table("order_matches")).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["status"], json!("completed"));
    let orders = query::run(
        &ledger,
        &Select::from_table("orders").filter("status", Operator::Eq, json!("filled")),
    )
    .unwrap();
    assert_eq!(orders.len(), 2);
    conservation::check(&ledger).unwrap();
}

#[test]
fn worse_priced_counterparty_is_not_taken() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    let height = config.burn_start;
    issue(&ledger, &config, height, ALICE, "BBBB", 100 * UNIT);
    issue(&ledger, &config, height, BOB, "CCCC", 100 * UNIT);

    // Alice demands 2 CCCC per BBBB; Bob offers only 1 CCCC per BBBB.
    let data = order::compose(
        &ledger, &config, ALICE, "BBBB", 10 * UNIT, "CCCC", 20 * UNIT, 1_000, 0,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();
    let data = order::compose(
        &ledger, &config, BOB, "CCCC", 10 * UNIT, "BBBB", 10 * UNIT, 1_000, 0,
    )
    .unwrap();
    apply(&ledger, &config, height + 1, T0, BOB, None, 0, strip_prefix(&config, data)).unwrap();

    assert!(query::run(&ledger, &Select::from_table("order_matches"))
        .unwrap()
        .is_empty());
    conservation::check(&ledger).unwrap();
}

#[test]
fn btc_leg_waits_for_payment() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    let height = config.burn_start;
    issue(&ledger, &config, height, ALICE, "BBBB", 100 * UNIT);

    // Alice sells BBBB for BTC; Bob buys with BTC he will pay on-chain.
    let data = order::compose(
        &ledger, &config, ALICE, "BBBB", 10 * UNIT, "BTC", 1_000_000, 1_000, 1_000,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();
    let data = order::compose(
        &ledger, &config, BOB, "BTC", 1_000_000, "BBBB", 10 * UNIT, 1_000, 0,
    )
    .unwrap();
    apply(&ledger, &config, height + 1, T0, BOB, None, 0, strip_prefix(&config, data)).unwrap();

    let matches = query::run(&ledger, &Select::from_table("order_matches")).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["status"], json!("pending"));
    assert_eq!(ledger.balance(BOB, "BBBB").unwrap(), 0);

    // The on-chain payment completes the match and releases the escrow.
    let id = matches[0]["id"].as_str().unwrap();
    let data = btcpay::compose(&ledger, &config, BOB, id).unwrap();
    apply(
        &ledger,
        &config,
        height + 2,
        T0,
        BOB,
        Some(ALICE),
        1_000_000,
        strip_prefix(&config, data),
    )
    .unwrap();
    assert_eq!(ledger.balance(BOB, "BBBB").unwrap(), 10 * UNIT);
    let matches = query::run(&ledger, &Select::from_table("order_matches")).unwrap();
    assert_eq!(matches[0]["status"], json!("completed"));
    conservation::check(&ledger).unwrap();
}

fn feed_and_funded_bettors(ledger: &Ledger, config: &Config, height: u32) {
    burn(ledger, config, height, ALICE, 100 * UNIT).unwrap();
    burn(ledger, config, height, BOB, 100 * UNIT).unwrap();
    let data = broadcast::compose(ledger, config, CAROL, T0, 100.0, 0, "feed").unwrap();
    apply(ledger, config, height, T0, CAROL, None, 0, strip_prefix(config, data)).unwrap();
}

#[test]
fn cfd_bets_match_and_settle_by_the_feed() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    let height = config.burn_start;
    feed_and_funded_bettors(&ledger, &config, height);
    let deadline = T0 + 1_000;

    let data = bet::compose(
        &ledger, &config, ALICE, CAROL, 0, deadline, 10 * UNIT, 10 * UNIT, 0.0, 5_040, 1_000,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, Some(CAROL), 0, strip_prefix(&config, data))
        .unwrap();
    let data = bet::compose(
        &ledger, &config, BOB, CAROL, 1, deadline, 10 * UNIT, 10 * UNIT, 0.0, 5_040, 1_000,
    )
    .unwrap();
    apply(&ledger, &config, height + 1, T0, BOB, Some(CAROL), 0, strip_prefix(&config, data))
        .unwrap();

    let matches = query::run(&ledger, &Select::from_table("bet_matches")).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["status"], json!("pending"));
    assert_eq!(matches[0]["initial_value"], json!(100.0));

    // Value up 50% at full leverage: the bull takes 15 of the 20 XCP pot.
    let alice_before = ledger.balance(ALICE, XCP).unwrap();
    let bob_before = ledger.balance(BOB, XCP).unwrap();
    let data = broadcast::compose(&ledger, &config, CAROL, deadline, 150.0, 0, "settle").unwrap();
    apply(&ledger, &config, height + 2, T0, CAROL, None, 0, strip_prefix(&config, data)).unwrap();

    assert_eq!(ledger.balance(ALICE, XCP).unwrap(), alice_before + 15 * UNIT);
    assert_eq!(ledger.balance(BOB, XCP).unwrap(), bob_before + 5 * UNIT);
    let matches = query::run(&ledger, &Select::from_table("bet_matches")).unwrap();
    assert_eq!(matches[0]["status"], json!("settled"));
    conservation::check(&ledger).unwrap();
}

#[test]
fn equality_bets_pay_the_winning_side_less_the_feed_fee() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    let height = config.burn_start;
    burn(&ledger, &config, height, ALICE, 100 * UNIT).unwrap();
    burn(&ledger, &config, height, BOB, 100 * UNIT).unwrap();
    // 1% settlement fee.
    let data = broadcast::compose(&ledger, &config, CAROL, T0, 100.0, 1_000_000, "feed").unwrap();
    apply(&ledger, &config, height, T0, CAROL, None, 0, strip_prefix(&config, data)).unwrap();
    let deadline = T0 + 1_000;

    let data = bet::compose(
        &ledger, &config, ALICE, CAROL, 2, deadline, 10 * UNIT, 10 * UNIT, 100.0, 5_040, 1_000,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, Some(CAROL), 0, strip_prefix(&config, data))
        .unwrap();
    let data = bet::compose(
        &ledger, &config, BOB, CAROL, 3, deadline, 10 * UNIT, 10 * UNIT, 100.0, 5_040, 1_000,
    )
    .unwrap();
    apply(&ledger, &config, height + 1, T0, BOB, Some(CAROL), 0, strip_prefix(&config, data))
        .unwrap();

    // The published value equals the target: Equal wins the pot minus
    // the 1% fee, which goes to the feed.
    let alice_before = ledger.balance(ALICE, XCP).unwrap();
    let data = broadcast::compose(&ledger, &config, CAROL, deadline, 100.0, 1_000_000, "settle")
        .unwrap();
    apply(&ledger, &config, height + 2, T0, CAROL, None, 0, strip_prefix(&config, data)).unwrap();

    let pot = 20 * UNIT;
    let fee = pot / 100;
    assert_eq!(ledger.balance(ALICE, XCP).unwrap(), alice_before + pot - fee);
    assert_eq!(ledger.balance(CAROL, XCP).unwrap(), fee);
    let matches = query::run(&ledger, &Select::from_table("bet_matches")).unwrap();
    assert_eq!(matches[0]["status"], json!("settled: for equal"));
    conservation::check(&ledger).unwrap();
}

#[test]
fn stingy_counterparty_is_skipped_for_a_generous_one() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    let height = config.burn_start;
    feed_and_funded_bettors(&ledger, &config, height);
    let deadline = T0 + 1_000;

    // A bull staking 1 XCP per 2 demanded, then one staking 3 per 1.
    let data = bet::compose(
        &ledger, &config, ALICE, CAROL, 0, deadline, 5 * UNIT, 10 * UNIT, 0.0, 5_040, 1_000,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, Some(CAROL), 0, strip_prefix(&config, data))
        .unwrap();
    let data = bet::compose(
        &ledger, &config, ALICE, CAROL, 0, deadline, 30 * UNIT, 10 * UNIT, 0.0, 5_040, 1_000,
    )
    .unwrap();
    let generous =
        apply(&ledger, &config, height, T0, ALICE, Some(CAROL), 0, strip_prefix(&config, data))
            .unwrap();

    // The bear demands 2 of counter-stake per unit staked. Only the
    // second bull clears that bar, and the trade runs at its odds.
    let data = bet::compose(
        &ledger, &config, BOB, CAROL, 1, deadline, 10 * UNIT, 20 * UNIT, 0.0, 5_040, 1_000,
    )
    .unwrap();
    apply(&ledger, &config, height + 1, T0, BOB, Some(CAROL), 0, strip_prefix(&config, data))
        .unwrap();

    let matches = query::run(&ledger, &Select::from_table("bet_matches")).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["tx0_hash"], json!(generous.tx_hash));
    assert_eq!(matches[0]["forward_quantity"], json!(30 * UNIT));
    assert_eq!(matches[0]["backward_quantity"], json!(10 * UNIT));
    let open = query::run(
        &ledger,
        &Select::from_table("bets").filter("status", Operator::Eq, json!("open")),
    )
    .unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0]["wager_quantity"], json!(5 * UNIT));
    conservation::check(&ledger).unwrap();
}

#[test]
fn excessive_cfd_leverage_is_rejected() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    let height = config.burn_start;
    feed_and_funded_bettors(&ledger, &config, height);
    let deadline = T0 + 1_000;

    assert!(bet::compose(
        &ledger, &config, ALICE, CAROL, 0, deadline, 10 * UNIT, 10 * UNIT, 0.0, 10_080, 1_000,
    )
    .is_err());

    // A hand-delivered payload parses invalid instead of opening.
    let mut data = 40u32.to_be_bytes().to_vec();
    data.extend_from_slice(&0u16.to_be_bytes());
    data.extend_from_slice(&deadline.to_be_bytes());
    data.extend_from_slice(&(10 * UNIT as u64).to_be_bytes());
    data.extend_from_slice(&(10 * UNIT as u64).to_be_bytes());
    data.extend_from_slice(&0f64.to_be_bytes());
    data.extend_from_slice(&10_080u32.to_be_bytes());
    data.extend_from_slice(&1_000u32.to_be_bytes());
    apply(&ledger, &config, height, T0, ALICE, Some(CAROL), 0, data).unwrap();

    let rows = query::run(&ledger, &Select::from_table("bets")).unwrap();
    assert_eq!(rows[0]["status"], json!("invalid: leverage too high"));
    assert_eq!(ledger.balance(ALICE, XCP).unwrap(), 150 * UNIT);
}

#[test]
fn callback_cancels_pending_matches_first() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    let height = config.burn_start;
    burn(&ledger, &config, height, ALICE, 100 * UNIT).unwrap();
    let data = issuance::compose(
        &ledger, &config, ALICE, "CALLME", 20 * UNIT, true, true, 0, 1.0, "", false, height,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();
    let data = send::compose(&ledger, &config, ALICE, BOB, "CALLME", 10 * UNIT).unwrap();
    apply(&ledger, &config, height, T0, ALICE, Some(BOB), 0, strip_prefix(&config, data)).unwrap();

    // Bob's holding ends up escrowed in a pending BTC-leg match.
    let data = order::compose(
        &ledger, &config, BOB, "CALLME", 10 * UNIT, "BTC", 1_000_000, 1_000, 1_000,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, BOB, None, 0, strip_prefix(&config, data)).unwrap();
    let data = order::compose(
        &ledger, &config, CAROL, "BTC", 1_000_000, "CALLME", 10 * UNIT, 1_000, 0,
    )
    .unwrap();
    apply(&ledger, &config, height + 1, T0, CAROL, None, 0, strip_prefix(&config, data)).unwrap();
    assert_eq!(ledger.balance(BOB, "CALLME").unwrap(), 0);

    // The callback unwinds the match, then buys every unit back.
    let data = callback::compose(&ledger, &config, ALICE, 1.0, "CALLME", T0).unwrap();
    apply(&ledger, &config, height + 2, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();

    let matches = query::run(&ledger, &Select::from_table("order_matches")).unwrap();
    assert_eq!(matches[0]["status"], json!("cancelled"));
    assert_eq!(ledger.balance(ALICE, "CALLME").unwrap(), 20 * UNIT);
    assert_eq!(ledger.balance(BOB, "CALLME").unwrap(), 0);
    assert_eq!(ledger.balance(BOB, XCP).unwrap(), 10 * UNIT);
    conservation::check(&ledger).unwrap();
}

#[test]
fn mismatched_contract_terms_do_not_match() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    let height = config.burn_start;
    feed_and_funded_bettors(&ledger, &config, height);

    let data = bet::compose(
        &ledger, &config, ALICE, CAROL, 0, T0 + 1_000, 10 * UNIT, 10 * UNIT, 0.0, 5_040, 1_000,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, Some(CAROL), 0, strip_prefix(&config, data))
        .unwrap();
    // Same feed and type complement, different deadline.
    let data = bet::compose(
        &ledger, &config, BOB, CAROL, 1, T0 + 2_000, 10 * UNIT, 10 * UNIT, 0.0, 5_040, 1_000,
    )
    .unwrap();
    apply(&ledger, &config, height + 1, T0, BOB, Some(CAROL), 0, strip_prefix(&config, data))
        .unwrap();

    assert!(query::run(&ledger, &Select::from_table("bet_matches"))
        .unwrap()
        .is_empty());
    conservation::check(&ledger).unwrap();
}
