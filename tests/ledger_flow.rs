//! End-to-end flows through the state machine: burns, issuance, sends,
//! dividends, broadcasts, cancels, and the conservation checker.
mod common;

use common::{apply, burn, strip_prefix, test_config};
use serde_json::json;
use sobrecapa::config::{UNIT, XCP};
use sobrecapa::messages::{broadcast, cancel, issuance, order, send};
use sobrecapa::query::{self, Operator, Select};
use sobrecapa::util::asset_id;
use sobrecapa::{conservation, Ledger};

const ALICE: &str = "mnAlice1111111111111111111111111111";
const BOB: &str = "mnBob22222222222222222222222222222";
const CAROL: &str = "mnCarol333333333333333333333333333";

const T0: u32 = 1_600_000_000;

#[test]
fn burn_earns_half_again_at_window_start_and_caps() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();

    // At the very start of the window the multiplier is exactly 1.5.
    burn(&ledger, &config, config.burn_start, ALICE, 60 * UNIT).unwrap();
    assert_eq!(ledger.balance(ALICE, XCP).unwrap(), 90 * UNIT);

    // The lifetime cap clamps the second burn; the excess is forfeited.
    burn(&ledger, &config, config.burn_start, ALICE, 60 * UNIT).unwrap();
    assert_eq!(ledger.burned_by(ALICE).unwrap(), 100 * UNIT);
    assert_eq!(ledger.balance(ALICE, XCP).unwrap(), 150 * UNIT);

    // A third burn has no headroom left at all.
    burn(&ledger, &config, config.burn_start, ALICE, UNIT).unwrap();
    assert_eq!(ledger.burned_by(ALICE).unwrap(), 100 * UNIT);

    conservation::check(&ledger).unwrap();
}

#[test]
fn burn_outside_window_is_invalid() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    burn(&ledger, &config, config.burn_start - 1, ALICE, UNIT).unwrap();
    assert_eq!(ledger.balance(ALICE, XCP).unwrap(), 0);
    let rows = query::run(
        &ledger,
        &Select::from_table("burns").filter("source", Operator::Eq, json!(ALICE)),
    )
    .unwrap();
    assert_eq!(rows[0]["status"], json!("invalid: too early"));
}

#[test]
fn issuance_charges_fee_and_lock_freezes_supply() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    let height = config.burn_start;
    burn(&ledger, &config, height, ALICE, 100 * UNIT).unwrap();
    let xcp_before = ledger.balance(ALICE, XCP).unwrap();
    let fee = config.issuance_fee.at(height, config.testnet);

    let data = issuance::compose(
        &ledger, &config, ALICE, "BASSET", 1_000 * UNIT, true, false, 0, 0.0, "", false, height,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();
    assert_eq!(ledger.balance(ALICE, "BASSET").unwrap(), 1_000 * UNIT);
    assert_eq!(ledger.balance(ALICE, XCP).unwrap(), xcp_before - fee);

    // Lock, then any further issuance is rejected.
    let data = issuance::compose(
        &ledger, &config, ALICE, "BASSET", 0, true, false, 0, 0.0, "LOCK", false, height,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();
    assert!(ledger.asset_locked("BASSET").unwrap());
    assert!(issuance::compose(
        &ledger, &config, ALICE, "BASSET", UNIT, true, false, 0, 0.0, "", false, height,
    )
    .is_err());

    // Another address cannot reissue someone else's asset either.
    assert!(issuance::compose(
        &ledger, &config, BOB, "BASSET", UNIT, true, false, 0, 0.0, "", false, height,
    )
    .is_err());
    conservation::check(&ledger).unwrap();
}

#[test]
fn issuance_rejects_total_supply_overflow() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    let height = config.burn_start;
    burn(&ledger, &config, height, ALICE, 100 * UNIT).unwrap();
    let data = issuance::compose(
        &ledger, &config, ALICE, "BASSET", i64::MAX - 100, true, false, 0, 0.0, "", false, height,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();

    // Any further issuance would push the cumulative total past the
    // representable range.
    assert!(issuance::compose(
        &ledger, &config, ALICE, "BASSET", 200, true, false, 0, 0.0, "", false, height,
    )
    .is_err());
    let scratch = Ledger::new_in_memory().unwrap();
    scratch.credit(height, ALICE, XCP, 10 * UNIT, "test", "test").unwrap();
    let data = issuance::compose(
        &scratch, &config, ALICE, "BASSET", 200, true, false, 0, 0.0, "", false, height,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();

    let valid = query::run(
        &ledger,
        &Select::from_table("issuances").filter("status", Operator::Eq, json!("valid")),
    )
    .unwrap();
    assert_eq!(valid.len(), 1);
    let rejected = query::run(
        &ledger,
        &Select::from_table("issuances")
            .filter("status", Operator::Eq, json!("invalid: total quantity overflow")),
    )
    .unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0]["quantity"], json!(0));
    assert_eq!(ledger.balance(ALICE, "BASSET").unwrap(), i64::MAX - 100);
    conservation::check(&ledger).unwrap();
}

#[test]
fn reissuance_must_keep_call_terms() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    let height = config.burn_start;
    burn(&ledger, &config, height, ALICE, 100 * UNIT).unwrap();
    let data = issuance::compose(
        &ledger, &config, ALICE, "BASSET", 10 * UNIT, true, true, 500, 1.5, "", false, height,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();

    // Dropping callability on reissue is refused at compose and parse.
    assert!(issuance::compose(
        &ledger, &config, ALICE, "BASSET", 5 * UNIT, true, false, 0, 0.0, "", false, height,
    )
    .is_err());
    let scratch = Ledger::new_in_memory().unwrap();
    scratch.credit(height, ALICE, XCP, 10 * UNIT, "test", "test").unwrap();
    let data = issuance::compose(
        &scratch, &config, ALICE, "BASSET", 5 * UNIT, true, false, 0, 0.0, "", false, height,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();
    let rows = query::run(
        &ledger,
        &Select::from_table("issuances")
            .filter("status", Operator::Eq, json!("invalid: call terms mismatch")),
    )
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(ledger.balance(ALICE, "BASSET").unwrap(), 10 * UNIT);

    // Identical terms reissue cleanly.
    let data = issuance::compose(
        &ledger, &config, ALICE, "BASSET", 5 * UNIT, true, true, 500, 1.5, "", false, height,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();
    assert_eq!(ledger.balance(ALICE, "BASSET").unwrap(), 15 * UNIT);
    conservation::check(&ledger).unwrap();
}

#[test]
fn oversend_spends_the_whole_balance() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    let height = config.burn_start;
    burn(&ledger, &config, height, ALICE, 100 * UNIT).unwrap();
    let data = issuance::compose(
        &ledger, &config, ALICE, "BASSET", 1_000, false, false, 0, 0.0, "", false, height,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();

    // compose refuses an oversend, so build the payload from a world
    // where it would have been fine.
    let scratch = Ledger::new_in_memory().unwrap();
    scratch.credit(height, ALICE, "BASSET", 5_000, "test", "test").unwrap();
    let data = send::compose(&scratch, &config, ALICE, BOB, "BASSET", 5_000).unwrap();
    apply(&ledger, &config, height, T0, ALICE, Some(BOB), 0, strip_prefix(&config, data)).unwrap();

    assert_eq!(ledger.balance(ALICE, "BASSET").unwrap(), 0);
    assert_eq!(ledger.balance(BOB, "BASSET").unwrap(), 1_000);
    let rows = query::run(
        &ledger,
        &Select::from_table("sends").filter("status", Operator::Eq, json!("valid")),
    )
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["quantity"], json!(1_000));
    conservation::check(&ledger).unwrap();
}

#[test]
fn dividend_pays_holders_but_not_the_source() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    let height = config.burn_start;
    burn(&ledger, &config, height, ALICE, 100 * UNIT).unwrap();
    let data = issuance::compose(
        &ledger, &config, ALICE, "BASSET", 10 * UNIT, true, false, 0, 0.0, "", false, height,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();
    for (who, qty) in [(BOB, 2 * UNIT), (CAROL, 3 * UNIT)] {
        let data = send::compose(&ledger, &config, ALICE, who, "BASSET", qty).unwrap();
        apply(&ledger, &config, height, T0, ALICE, Some(who), 0, strip_prefix(&config, data))
            .unwrap();
    }

    // One XCP per whole unit held; the newest policy excludes the payer.
    let xcp_before = ledger.balance(ALICE, XCP).unwrap();
    let data = sobrecapa::messages::dividend::compose(
        &ledger, &config, ALICE, "BASSET", XCP, UNIT, height,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();
    assert_eq!(ledger.balance(BOB, XCP).unwrap(), 2 * UNIT);
    assert_eq!(ledger.balance(CAROL, XCP).unwrap(), 3 * UNIT);
    assert_eq!(ledger.balance(ALICE, XCP).unwrap(), xcp_before - 5 * UNIT);
    conservation::check(&ledger).unwrap();
}

#[test]
fn btc_dividends_drop_dust_payouts() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    let height = config.burn_start;
    burn(&ledger, &config, height, ALICE, 100 * UNIT).unwrap();
    let data = issuance::compose(
        &ledger, &config, ALICE, "BASSET", 10 * UNIT, true, false, 0, 0.0, "", false, height,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();
    for (who, qty) in [(BOB, 2 * UNIT), (CAROL, 40_000_000)] {
        let data = send::compose(&ledger, &config, ALICE, who, "BASSET", qty).unwrap();
        apply(&ledger, &config, height, T0, ALICE, Some(who), 0, strip_prefix(&config, data))
            .unwrap();
    }

    // At 10_000 sat per unit Bob's 2 units clear the dust size and
    // Carol's 0.4 does not. BTC settles through the transaction's own
    // outputs, so no ledger balance moves.
    let xcp_before = ledger.balance(ALICE, XCP).unwrap();
    let data = sobrecapa::messages::dividend::compose(
        &ledger, &config, ALICE, "BASSET", "BTC", 10_000, height,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();
    let rows = query::run(&ledger, &Select::from_table("dividends")).unwrap();
    assert_eq!(rows[0]["status"], json!("valid"));
    assert_eq!(ledger.balance(ALICE, XCP).unwrap(), xcp_before);

    // At 1 sat per unit every payout is under the dust size.
    let mut data = 50u32.to_be_bytes().to_vec();
    data.extend_from_slice(&1u64.to_be_bytes());
    data.extend_from_slice(&asset_id("BASSET").unwrap().to_be_bytes());
    data.extend_from_slice(&0u64.to_be_bytes());
    apply(&ledger, &config, height, T0, ALICE, None, 0, data).unwrap();
    let rows = query::run(
        &ledger,
        &Select::from_table("dividends").filter("quantity_per_unit", Operator::Eq, json!(1)),
    )
    .unwrap();
    assert_eq!(rows[0]["status"], json!("invalid: zero dividend"));
    conservation::check(&ledger).unwrap();
}

#[test]
fn feed_lock_is_case_insensitive() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    let data = broadcast::compose(&ledger, &config, CAROL, T0, 100.0, 0, "lock").unwrap();
    apply(&ledger, &config, config.burn_start, T0, CAROL, None, 0, strip_prefix(&config, data))
        .unwrap();
    assert!(ledger.feed_locked(CAROL).unwrap());
    assert!(broadcast::compose(&ledger, &config, CAROL, T0 + 1, 1.0, 0, "after").is_err());
}

#[test]
fn broadcast_timestamps_must_increase_and_lock_is_final() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    let height = config.burn_start;

    let data = broadcast::compose(&ledger, &config, CAROL, T0, 100.0, 0, "price feed").unwrap();
    apply(&ledger, &config, height, T0, CAROL, None, 0, strip_prefix(&config, data)).unwrap();

    // Stale timestamp: compose refuses, and a hand-delivered payload
    // parses invalid.
    assert!(broadcast::compose(&ledger, &config, CAROL, T0, 101.0, 0, "stale").is_err());
    let scratch = Ledger::new_in_memory().unwrap();
    let data = broadcast::compose(&scratch, &config, CAROL, T0, 101.0, 0, "stale").unwrap();
    apply(&ledger, &config, height, T0, CAROL, None, 0, strip_prefix(&config, data)).unwrap();
    let rows = query::run(
        &ledger,
        &Select::from_table("broadcasts").filter("text", Operator::Eq, json!("stale")),
    )
    .unwrap();
    assert_eq!(
        rows[0]["status"],
        json!("invalid: feed timestamps not monotonically increasing")
    );

    let data = broadcast::compose(&ledger, &config, CAROL, T0 + 1, 0.0, 0, "LOCK").unwrap();
    apply(&ledger, &config, height, T0, CAROL, None, 0, strip_prefix(&config, data)).unwrap();
    assert!(ledger.feed_locked(CAROL).unwrap());
    assert!(broadcast::compose(&ledger, &config, CAROL, T0 + 2, 1.0, 0, "after").is_err());
}

#[test]
fn cancel_refunds_order_escrow() {
    let ledger = Ledger::new_in_memory().unwrap();
    let config = test_config();
    let height = config.burn_start;
    burn(&ledger, &config, height, ALICE, 100 * UNIT).unwrap();
    let data = issuance::compose(
        &ledger, &config, ALICE, "BASSET", 10 * UNIT, true, false, 0, 0.0, "", false, height,
    )
    .unwrap();
    apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();

    let data = order::compose(
        &ledger, &config, ALICE, "BASSET", 4 * UNIT, XCP, 2 * UNIT, 100, 0,
    )
    .unwrap();
    let order_tx =
        apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();
    assert_eq!(ledger.balance(ALICE, "BASSET").unwrap(), 6 * UNIT);

    // Only the owner may cancel.
    assert!(cancel::compose(&ledger, &config, BOB, &order_tx.tx_hash).is_err());
    let data = cancel::compose(&ledger, &config, ALICE, &order_tx.tx_hash).unwrap();
    apply(&ledger, &config, height, T0, ALICE, None, 0, strip_prefix(&config, data)).unwrap();
    assert_eq!(ledger.balance(ALICE, "BASSET").unwrap(), 10 * UNIT);
    assert_eq!(
        ledger.order_by_hash(&order_tx.tx_hash).unwrap().unwrap().status,
        "cancelled"
    );
    conservation::check(&ledger).unwrap();
}

#[test]
fn ledger_survives_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let config = test_config();
    {
        let ledger = Ledger::new(&path).unwrap();
        burn(&ledger, &config, config.burn_start, ALICE, 10 * UNIT).unwrap();
        assert_eq!(ledger.balance(ALICE, XCP).unwrap(), 15 * UNIT);
    }
    let ledger = Ledger::new(&path).unwrap();
    assert_eq!(ledger.balance(ALICE, XCP).unwrap(), 15 * UNIT);
    assert_eq!(ledger.burned_by(ALICE).unwrap(), 10 * UNIT);
}

#[test]
fn query_rejects_unknown_tables_and_bad_columns() {
    let ledger = Ledger::new_in_memory().unwrap();
    assert!(query::run(&ledger, &Select::from_table("sqlite_master")).is_err());
    assert!(query::run(
        &ledger,
        &Select::from_table("sends").filter("status; DROP TABLE sends", Operator::Eq, json!("x")),
    )
    .is_err());
}
